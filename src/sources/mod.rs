pub mod catalog;

use crate::errors::AppResult;
use crate::models::{SourceEntry, UsageSample};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Snapshot of applications currently installed on the device.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    async fn fetch_local(&self) -> AppResult<Vec<SourceEntry>>;
}

/// Remotely curated catalog. Failures must leave stored remote items alone.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_catalog(&self) -> AppResult<Vec<SourceEntry>>;
}

/// Auxiliary per-item usage counters.
#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn fetch_usage(&self) -> AppResult<Vec<UsageSample>>;
}

/// Number of cells on one page as currently laid out. Zero means unknown.
pub trait CapacityProvider: Send + Sync {
    fn page_capacity(&self) -> usize;
}

impl<F> CapacityProvider for F
where
    F: Fn() -> usize + Send + Sync,
{
    fn page_capacity(&self) -> usize {
        self()
    }
}

/// Capacity cell the presentation layer writes whenever the grid geometry changes.
#[derive(Debug, Clone, Default)]
pub struct GridCapacity {
    cells: Arc<AtomicUsize>,
}

impl GridCapacity {
    pub fn new(cells: usize) -> Self {
        Self {
            cells: Arc::new(AtomicUsize::new(cells)),
        }
    }

    pub fn set(&self, cells: usize) {
        let previous = self.cells.swap(cells, Ordering::AcqRel);
        if previous != cells {
            tracing::debug!(previous, cells, "page capacity changed");
        }
    }
}

impl CapacityProvider for GridCapacity {
    fn page_capacity(&self) -> usize {
        self.cells.load(Ordering::Acquire)
    }
}

/// The bundle of external collaborators a grid engine reads from.
#[derive(Clone)]
pub struct GridSources {
    pub registry: Arc<dyn RegistrySource>,
    pub catalog: Arc<dyn CatalogSource>,
    pub usage: Option<Arc<dyn UsageSource>>,
    pub capacity: Arc<dyn CapacityProvider>,
}
