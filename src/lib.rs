pub mod db;
pub mod drag;
pub mod errors;
pub mod feed;
pub mod grid;
pub mod models;
pub mod placement;
pub mod reconcile;
pub mod reorder;
pub mod sources;

pub use crate::db::{Database, ItemStore};
pub use crate::drag::DragPhase;
pub use crate::errors::{AppError, AppResult};
pub use crate::grid::GridCore;
pub use crate::models::{
    GridSettings, Item, ItemKind, MoveOutcome, PageMap, RefreshReport, Slot, SourceEntry, UsageSample,
};
pub use crate::sources::catalog::JsonCatalogSource;
pub use crate::sources::{CapacityProvider, CatalogSource, GridCapacity, GridSources, RegistrySource, UsageSource};

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs JSON logging into `log_dir/grid.log.<date>`, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "grid.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}
