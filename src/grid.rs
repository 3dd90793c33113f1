use crate::db::{Database, ItemStore};
use crate::drag::{DragCoordinator, DragPhase};
use crate::errors::{AppError, AppResult};
use crate::feed::LiveFeed;
use crate::models::{group_pages, GridSettings, Item, ItemKind, MoveOutcome, PageMap, RefreshReport};
use crate::reconcile::{annotate_usage, reconcile_kind};
use crate::reorder;
use crate::sources::GridSources;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// The grid engine: one instance per launcher process, shared behind an `Arc`.
pub struct GridCore {
    store: Arc<dyn ItemStore>,
    sources: GridSources,
    settings: GridSettings,
    ordering: Arc<Mutex<()>>,
    notifications: Mutex<()>,
    feed: LiveFeed,
    drag: DragCoordinator,
}

impl GridCore {
    /// Opens (or creates) `grid.sqlite` under `data_dir` and reads persisted settings.
    pub fn open(data_dir: &Path, sources: GridSources) -> AppResult<Arc<Self>> {
        let db = Database::new(&data_dir.join("grid.sqlite"))?;
        let settings = db.get_settings()?;
        Ok(Self::new(Arc::new(db), settings, sources))
    }

    pub fn new(store: Arc<dyn ItemStore>, settings: GridSettings, sources: GridSources) -> Arc<Self> {
        let ordering = Arc::new(Mutex::new(()));
        let feed = LiveFeed::new();
        let drag = DragCoordinator::new(
            store.clone(),
            ordering.clone(),
            feed.clone(),
            Duration::from_millis(settings.drag_debounce_ms),
        );

        if let Err(error) = feed.publish(store.as_ref()) {
            tracing::warn!(error = %error, "initial grid read failed");
        }

        Arc::new(Self {
            store,
            sources,
            settings,
            ordering,
            notifications: Mutex::new(()),
            feed,
            drag,
        })
    }

    pub fn settings(&self) -> &GridSettings {
        &self.settings
    }

    /// Live page map, re-delivered after every committed change.
    pub fn subscribe(&self) -> watch::Receiver<PageMap> {
        self.feed.subscribe()
    }

    pub fn pages(&self) -> AppResult<PageMap> {
        Ok(group_pages(self.store.read_all()?))
    }

    /// Reconciles the local registry only; stored remote items are left alone.
    pub async fn refresh(&self) -> AppResult<RefreshReport> {
        self.run_refresh(false).await
    }

    /// Reconciles the local registry and the remote catalog.
    pub async fn refresh_with_catalog(&self) -> AppResult<RefreshReport> {
        self.run_refresh(true).await
    }

    async fn run_refresh(&self, include_catalog: bool) -> AppResult<RefreshReport> {
        let _ordering = self.ordering.lock().await;
        tracing::debug!(include_catalog, "refresh started");

        let (local, remote) = if include_catalog {
            let (local, remote) = tokio::join!(
                self.sources.registry.fetch_local(),
                self.sources.catalog.fetch_catalog()
            );
            (local, Some(remote))
        } else {
            (self.sources.registry.fetch_local().await, None)
        };
        let local = local?;

        let store = self.store.as_ref();
        let capacity = self.sources.capacity.as_ref();
        let mut report = RefreshReport::default();
        let mut failed = Vec::new();

        let mut read_error = None;
        if let Err(error) = reconcile_kind(store, ItemKind::Local, local, capacity, &mut report, &mut failed) {
            tracing::warn!(error = %error, "local reconciliation aborted");
            read_error = Some(error);
        }

        let mut source_error = None;
        match remote {
            Some(Ok(entries)) => {
                if let Err(error) =
                    reconcile_kind(store, ItemKind::Remote, entries, capacity, &mut report, &mut failed)
                {
                    tracing::warn!(error = %error, "remote reconciliation aborted");
                    if read_error.is_none() {
                        read_error = Some(error);
                    }
                }
            }
            Some(Err(error)) => {
                tracing::warn!(error = %error, "catalog fetch failed; keeping stored remote items");
                source_error = Some(error);
            }
            None => {}
        }

        if let Some(usage) = &self.sources.usage {
            match usage.fetch_usage().await {
                Ok(samples) => {
                    if let Err(error) = annotate_usage(store, samples, &mut report) {
                        tracing::warn!(error = %error, "usage annotation aborted");
                        if read_error.is_none() {
                        read_error = Some(error);
                    }
                    }
                }
                Err(error) => tracing::warn!(error = %error, "usage stats unavailable"),
            }
        }

        if let Err(error) = self.feed.publish(store) {
            tracing::warn!(error = %error, "failed to publish refreshed grid");
        }

        // A gap that fails to close in the local pass is retried by the remote pass.
        let mut reported = HashSet::new();
        failed.retain(|id| reported.insert(id.clone()));

        tracing::info!(
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            unchanged = report.unchanged,
            deferred = report.deferred,
            failed = failed.len(),
            "refresh finished"
        );

        if !failed.is_empty() {
            return Err(AppError::Store(format!(
                "{} item writes failed: {}",
                failed.len(),
                failed.join(", ")
            )));
        }
        if let Some(error) = read_error {
            return Err(error);
        }
        if let Some(error) = source_error {
            return Err(error);
        }
        if report.deferred > 0 {
            return Err(AppError::CapacityUnknown(format!(
                "{} new items waiting for page capacity",
                report.deferred
            )));
        }
        Ok(report)
    }

    /// Runs `refresh_with_catalog` every `catalogRefreshSecs` until the engine is dropped.
    pub fn spawn_catalog_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let period = Duration::from_secs(self.settings.catalog_refresh_secs.max(1));
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let Some(core) = weak.upgrade() else {
                    break;
                };
                if let Err(error) = core.refresh_with_catalog().await {
                    tracing::warn!(error = %error, "scheduled catalog refresh failed");
                }
            }
        })
    }

    pub async fn move_within_page(&self, item_id: &str, to_index: u32) -> AppResult<Item> {
        let _ordering = self.ordering.lock().await;
        let item = reorder::move_within_page(self.store.as_ref(), item_id, to_index)?;
        self.publish();
        Ok(item)
    }

    pub async fn move_to_page(&self, to_page: u32, item_ids: &[String]) -> AppResult<MoveOutcome> {
        let _ordering = self.ordering.lock().await;
        let capacity = self.sources.capacity.page_capacity();
        let result = reorder::move_to_page(self.store.as_ref(), to_page, item_ids, capacity);
        self.publish();
        result
    }

    pub async fn begin_drag(&self, page: u32) -> AppResult<Vec<Item>> {
        self.drag.begin_drag(page).await
    }

    pub async fn apply_drag_move(&self, from_index: usize, to_index: usize) -> AppResult<()> {
        self.drag.apply_drag_move(from_index, to_index).await
    }

    pub async fn end_drag(&self) -> AppResult<DragPhase> {
        self.drag.end_drag().await
    }

    pub async fn flush_drag(&self) -> AppResult<usize> {
        self.drag.flush().await
    }

    pub async fn drag_phase(&self) -> DragPhase {
        self.drag.phase().await
    }

    pub async fn drag_working_copy(&self) -> Option<Vec<Item>> {
        self.drag.working_copy().await
    }

    pub fn rename_item(&self, item_id: &str, display_name: &str) -> AppResult<()> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(AppError::InvalidInput("display name cannot be empty".to_string()));
        }
        if !self.store.update_display_name(item_id, display_name)? {
            return Err(AppError::NotFound(format!("No grid item {}", item_id)));
        }
        self.publish();
        Ok(())
    }

    /// Replaces all badge counts with the number of notifications per item id.
    pub async fn apply_notifications(&self, item_ids: &[String]) -> AppResult<()> {
        let _notifications = self.notifications.lock().await;
        let mut counts = HashMap::<&str, u32>::new();
        for id in item_ids {
            *counts.entry(id.as_str()).or_default() += 1;
        }

        self.store.reset_notification_counts()?;
        for (id, count) in counts {
            self.store.update_notification_count(id, count)?;
        }
        self.publish();
        Ok(())
    }

    pub fn toggle_selected(&self, item_id: &str) -> AppResult<bool> {
        let Some(item) = self.store.read_by_id(item_id)? else {
            return Err(AppError::NotFound(format!("No grid item {}", item_id)));
        };
        let selected = !item.selected;
        self.store.set_selected(item_id, selected)?;
        self.publish();
        Ok(selected)
    }

    pub fn selected_items(&self) -> AppResult<Vec<Item>> {
        Ok(self
            .store
            .read_all()?
            .into_iter()
            .filter(|item| item.selected)
            .collect())
    }

    pub fn clear_selection(&self) -> AppResult<()> {
        self.store.clear_selection()?;
        self.publish();
        Ok(())
    }

    /// Moves the current selection, in grid order, onto `to_page`.
    ///
    /// Items that fit (or were already there) are deselected; the rest stay
    /// selected where they were.
    pub async fn move_selected_to_page(&self, to_page: u32) -> AppResult<MoveOutcome> {
        let _ordering = self.ordering.lock().await;
        let ids = self
            .selected_items()?
            .into_iter()
            .map(|item| item.id)
            .collect::<Vec<_>>();
        if ids.is_empty() {
            return Ok(MoveOutcome::default());
        }

        let capacity = self.sources.capacity.page_capacity();
        let outcome = reorder::move_to_page(self.store.as_ref(), to_page, &ids, capacity)?;
        for id in outcome.accepted.iter().chain(outcome.unchanged.iter()) {
            self.store.set_selected(id, false)?;
        }
        self.publish();
        Ok(outcome)
    }

    fn publish(&self) {
        if let Err(error) = self.feed.publish(self.store.as_ref()) {
            tracing::warn!(error = %error, "failed to publish grid change");
        }
    }
}
