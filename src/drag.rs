use crate::db::ItemStore;
use crate::errors::{AppError, AppResult};
use crate::feed::LiveFeed;
use crate::models::Item;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragPhase {
    Idle,
    Dragging,
    Settling,
}

#[derive(Debug, Clone)]
struct DragSession {
    session_id: String,
    page: u32,
    items: Vec<Item>,
    touched: Option<(usize, usize)>,
    moves: usize,
}

impl DragSession {
    fn new(page: u32, items: Vec<Item>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            page,
            items,
            touched: None,
            moves: 0,
        }
    }

    fn apply(&mut self, from: usize, to: usize) -> AppResult<()> {
        let len = self.items.len();
        if from >= len || to >= len {
            return Err(AppError::InvalidMove(format!(
                "drag move {} -> {} outside page {} ({} items)",
                from, to, self.page, len
            )));
        }
        if from == to {
            return Ok(());
        }

        let item = self.items.remove(from);
        self.items.insert(to, item);

        let (low, high) = (from.min(to), from.max(to));
        self.touched = Some(match self.touched {
            Some((prior_low, prior_high)) => (prior_low.min(low), prior_high.max(high)),
            None => (low, high),
        });
        self.moves += 1;
        Ok(())
    }
}

struct DragState {
    phase: DragPhase,
    session: Option<DragSession>,
    pending: Option<JoinHandle<()>>,
    generation: u64,
}

/// Batches a continuous reorder gesture into one debounced commit.
///
/// `Idle -> Dragging` pauses the live feed and cancels a pending commit,
/// `Dragging -> Settling` arms the debounce timer, and the timer writes the
/// touched index range before resuming the feed.
#[derive(Clone)]
pub struct DragCoordinator {
    store: Arc<dyn ItemStore>,
    ordering: Arc<Mutex<()>>,
    feed: LiveFeed,
    debounce: Duration,
    state: Arc<Mutex<DragState>>,
}

impl DragCoordinator {
    pub fn new(store: Arc<dyn ItemStore>, ordering: Arc<Mutex<()>>, feed: LiveFeed, debounce: Duration) -> Self {
        Self {
            store,
            ordering,
            feed,
            debounce,
            state: Arc::new(Mutex::new(DragState {
                phase: DragPhase::Idle,
                session: None,
                pending: None,
                generation: 0,
            })),
        }
    }

    pub async fn phase(&self) -> DragPhase {
        self.state.lock().await.phase
    }

    /// The in-memory order of the page being dragged, if any.
    pub async fn working_copy(&self) -> Option<Vec<Item>> {
        let state = self.state.lock().await;
        state.session.as_ref().map(|session| session.items.clone())
    }

    pub async fn touched_range(&self) -> Option<(usize, usize)> {
        let state = self.state.lock().await;
        state.session.as_ref().and_then(|session| session.touched)
    }

    pub async fn begin_drag(&self, page: u32) -> AppResult<Vec<Item>> {
        let mut state = self.state.lock().await;
        let phase = state.phase;
        let carried = match phase {
            DragPhase::Idle => None,
            DragPhase::Dragging => state.session.take(),
            DragPhase::Settling => {
                if let Some(pending) = state.pending.take() {
                    pending.abort();
                }
                state.session.take()
            }
        };
        state.generation += 1;
        self.feed.pause()?;

        let session = match carried {
            Some(session) if session.page == page => {
                tracing::debug!(session_id = %session.session_id, page, "pending drag commit superseded");
                session
            }
            other => {
                if let Some(previous) = other {
                    if let Err(error) = self.commit(&previous).await {
                        tracing::warn!(session_id = %previous.session_id, error = %error, "drag commit for previous page failed");
                    }
                }
                match self.load(page).await {
                    Ok(session) => session,
                    Err(error) => {
                        state.phase = DragPhase::Idle;
                        state.session = None;
                        self.feed.resume(self.store.as_ref())?;
                        return Err(error);
                    }
                }
            }
        };

        tracing::debug!(session_id = %session.session_id, page, "drag started");
        let items = session.items.clone();
        state.phase = DragPhase::Dragging;
        state.session = Some(session);
        Ok(items)
    }

    pub async fn apply_drag_move(&self, from_index: usize, to_index: usize) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if state.phase != DragPhase::Dragging {
            return Err(AppError::InvalidMove("no drag in progress".to_string()));
        }
        let Some(session) = state.session.as_mut() else {
            return Err(AppError::InvalidMove("no drag in progress".to_string()));
        };
        session.apply(from_index, to_index)
    }

    pub async fn end_drag(&self) -> AppResult<DragPhase> {
        let mut state = self.state.lock().await;
        if state.phase != DragPhase::Dragging {
            return Err(AppError::InvalidMove("no drag in progress".to_string()));
        }

        let untouched = state
            .session
            .as_ref()
            .map(|session| session.touched.is_none())
            .unwrap_or(true);
        if untouched {
            state.phase = DragPhase::Idle;
            state.session = None;
            self.feed.resume(self.store.as_ref())?;
            return Ok(DragPhase::Idle);
        }

        state.phase = DragPhase::Settling;
        let generation = state.generation;
        let coordinator = self.clone();
        state.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(coordinator.debounce).await;
            coordinator.settle(generation).await;
        }));
        Ok(DragPhase::Settling)
    }

    /// Commits a settling session now instead of waiting for the timer.
    ///
    /// The timer commits while holding the state lock, so a session still in
    /// `Settling` here has not been written yet.
    pub async fn flush(&self) -> AppResult<usize> {
        let mut state = self.state.lock().await;
        if state.phase != DragPhase::Settling {
            return Ok(0);
        }
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
        state.generation += 1;

        let result = match state.session.take() {
            Some(session) => self.commit(&session).await,
            None => Ok(0),
        };
        state.phase = DragPhase::Idle;
        self.feed.resume(self.store.as_ref())?;
        result
    }

    async fn load(&self, page: u32) -> AppResult<DragSession> {
        let _ordering = self.ordering.lock().await;
        let items = self.store.read_page(page)?;
        Ok(DragSession::new(page, items))
    }

    async fn settle(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.generation != generation || state.phase != DragPhase::Settling {
            return;
        }
        state.pending = None;

        if let Some(session) = state.session.take() {
            if let Err(error) = self.commit(&session).await {
                tracing::warn!(session_id = %session.session_id, error = %error, "drag commit failed");
            }
        }

        state.phase = DragPhase::Idle;
        if let Err(error) = self.feed.resume(self.store.as_ref()) {
            tracing::warn!(error = %error, "failed to resume live feed after drag");
        }
    }

    async fn commit(&self, session: &DragSession) -> AppResult<usize> {
        let Some((low, high)) = session.touched else {
            return Ok(0);
        };

        let _ordering = self.ordering.lock().await;
        let current = self.store.read_page(session.page)?;
        let current_ids = current.iter().map(|item| item.id.as_str()).collect::<HashSet<_>>();
        let working_ids = session.items.iter().map(|item| item.id.as_str()).collect::<HashSet<_>>();

        let mut writes = 0;
        if current_ids == working_ids {
            for position in low..=high {
                write_index(self.store.as_ref(), &session.items[position].id, position as u32)?;
                writes += 1;
            }
        } else {
            tracing::warn!(
                session_id = %session.session_id,
                page = session.page,
                "page changed during drag; merging with stored order"
            );
            let stored = current
                .iter()
                .map(|item| (item.id.as_str(), item.index))
                .collect::<HashMap<_, _>>();
            let order = session
                .items
                .iter()
                .map(|item| item.id.as_str())
                .filter(|id| current_ids.contains(id))
                .chain(
                    current
                        .iter()
                        .map(|item| item.id.as_str())
                        .filter(|id| !working_ids.contains(id)),
                )
                .collect::<Vec<_>>();
            for (position, id) in order.into_iter().enumerate() {
                let position = position as u32;
                if stored.get(id) != Some(&position) {
                    write_index(self.store.as_ref(), id, position)?;
                    writes += 1;
                }
            }
        }

        tracing::info!(
            session_id = %session.session_id,
            page = session.page,
            moves = session.moves,
            writes,
            "drag session committed"
        );
        Ok(writes)
    }
}

fn write_index(store: &dyn ItemStore, id: &str, index: u32) -> AppResult<()> {
    store
        .update_index(id, index)
        .map_err(|error| AppError::Store(format!("drag commit of {} failed: {}", id, error)))
}

#[cfg(test)]
mod tests {
    use super::{DragCoordinator, DragPhase, DragSession};
    use crate::db::{Database, ItemStore};
    use crate::errors::AppError;
    use crate::feed::LiveFeed;
    use crate::models::{Item, ItemKind, Slot, SourceEntry};
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tokio::time::Duration;

    fn items(ids: &[&str]) -> Vec<Item> {
        ids.iter()
            .enumerate()
            .map(|(index, id)| SourceEntry::new(*id, *id, "1").into_item(ItemKind::Local, Slot::new(0, index as u32)))
            .collect()
    }

    fn order(items: &[Item]) -> Vec<&str> {
        items.iter().map(|item| item.id.as_str()).collect()
    }

    #[test]
    fn touched_range_grows_across_moves() {
        let mut session = DragSession::new(0, items(&["a", "b", "c", "d", "e", "f"]));
        session.apply(1, 3).expect("move");
        assert_eq!(order(&session.items), vec!["a", "c", "d", "b", "e", "f"]);
        assert_eq!(session.touched, Some((1, 3)));

        session.apply(4, 2).expect("move");
        assert_eq!(session.touched, Some((1, 4)));

        session.apply(5, 5).expect("noop");
        assert_eq!(session.touched, Some((1, 4)));
        assert_eq!(session.moves, 2);
    }

    #[test]
    fn out_of_range_moves_are_rejected() {
        let mut session = DragSession::new(0, items(&["a", "b"]));
        let err = session.apply(0, 2).expect_err("out of range");
        assert!(matches!(err, AppError::InvalidMove(_)));
        assert!(session.touched.is_none());
    }

    #[tokio::test]
    async fn flush_commits_the_settling_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("grid.sqlite")).expect("db"));
        for item in items(&["a", "b", "c"]) {
            db.upsert(&item).expect("seed");
        }
        let coordinator = DragCoordinator::new(
            db.clone(),
            Arc::new(Mutex::new(())),
            LiveFeed::new(),
            Duration::from_secs(60),
        );

        coordinator.begin_drag(0).await.expect("begin");
        coordinator.apply_drag_move(2, 0).await.expect("move");
        assert_eq!(coordinator.end_drag().await.expect("end"), DragPhase::Settling);
        assert_eq!(coordinator.flush().await.expect("flush"), 3);
        assert_eq!(coordinator.phase().await, DragPhase::Idle);

        let page = db.read_page(0).expect("page");
        assert_eq!(order(&page), vec!["c", "a", "b"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn flush_racing_the_timer_returns_after_the_write() {
        for round in 0..20 {
            let dir = tempfile::tempdir().expect("tempdir");
            let db = Arc::new(Database::new(&dir.path().join("grid.sqlite")).expect("db"));
            for item in items(&["a", "b", "c"]) {
                db.upsert(&item).expect("seed");
            }
            let coordinator = DragCoordinator::new(
                db.clone(),
                Arc::new(Mutex::new(())),
                LiveFeed::new(),
                Duration::from_millis(1),
            );

            coordinator.begin_drag(0).await.expect("begin");
            coordinator.apply_drag_move(2, 0).await.expect("move");
            coordinator.end_drag().await.expect("end");
            tokio::time::sleep(Duration::from_millis(1)).await;
            coordinator.flush().await.expect("flush");

            let page = db.read_page(0).expect("page");
            assert_eq!(order(&page), vec!["c", "a", "b"], "round {round}");
            assert_eq!(coordinator.phase().await, DragPhase::Idle);
        }
    }

    #[tokio::test]
    async fn moves_outside_a_drag_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("grid.sqlite")).expect("db"));
        let coordinator = DragCoordinator::new(db, Arc::new(Mutex::new(())), LiveFeed::new(), Duration::from_millis(10));

        assert!(coordinator.apply_drag_move(0, 1).await.is_err());
        assert!(coordinator.end_drag().await.is_err());
    }
}
