use crate::db::ItemStore;
use crate::errors::{AppError, AppResult};
use crate::models::{group_pages, PageMap};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Live page-to-items view delivered to subscribers after committed changes.
///
/// While paused, publishes are dropped; `resume` re-reads the store and
/// delivers the latest state once.
#[derive(Clone)]
pub struct LiveFeed {
    sender: Arc<watch::Sender<PageMap>>,
    paused: Arc<Mutex<bool>>,
}

impl Default for LiveFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveFeed {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(PageMap::new());
        Self {
            sender: Arc::new(sender),
            paused: Arc::new(Mutex::new(false)),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PageMap> {
        self.sender.subscribe()
    }

    pub fn current(&self) -> PageMap {
        self.sender.borrow().clone()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.lock().map(|paused| *paused).unwrap_or(false)
    }

    pub fn pause(&self) -> AppResult<()> {
        let mut paused = self
            .paused
            .lock()
            .map_err(|_| AppError::Internal("feed mutex poisoned".to_string()))?;
        *paused = true;
        Ok(())
    }

    /// Returns true when subscribers were notified of a changed view.
    pub fn publish(&self, store: &dyn ItemStore) -> AppResult<bool> {
        let paused = self
            .paused
            .lock()
            .map_err(|_| AppError::Internal("feed mutex poisoned".to_string()))?;
        if *paused {
            return Ok(false);
        }
        self.deliver(store)
    }

    pub fn resume(&self, store: &dyn ItemStore) -> AppResult<bool> {
        let mut paused = self
            .paused
            .lock()
            .map_err(|_| AppError::Internal("feed mutex poisoned".to_string()))?;
        *paused = false;
        self.deliver(store)
    }

    fn deliver(&self, store: &dyn ItemStore) -> AppResult<bool> {
        let pages = group_pages(store.read_all()?);
        Ok(self.sender.send_if_modified(|current| {
            if *current == pages {
                return false;
            }
            *current = pages;
            true
        }))
    }
}
