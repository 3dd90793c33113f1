use crate::db::ItemStore;
use crate::errors::{AppError, AppResult};
use crate::models::{group_pages, Item, MoveOutcome};
use std::collections::HashSet;

/// Sets one item's index on its current page. Siblings are not renumbered.
pub fn move_within_page(store: &dyn ItemStore, item_id: &str, to_index: u32) -> AppResult<Item> {
    let Some(mut item) = store.read_by_id(item_id)? else {
        return Err(AppError::NotFound(format!("No grid item {}", item_id)));
    };

    let occupants = store.read_page(item.page)?.len();
    if to_index as usize >= occupants {
        return Err(AppError::InvalidMove(format!(
            "index {} is outside page {} ({} items)",
            to_index, item.page, occupants
        )));
    }

    if item.index != to_index {
        store.update_index(item_id, to_index)?;
        item.index = to_index;
    }
    Ok(item)
}

/// Appends `item_ids`, in order, to the end of `to_page` until it is full.
///
/// Ids that do not fit keep their current slot and are reported as rejected.
/// Pages left with gaps (the source pages, or an earlier failed compaction) are
/// compacted afterwards.
pub fn move_to_page(
    store: &dyn ItemStore,
    to_page: u32,
    item_ids: &[String],
    capacity: usize,
) -> AppResult<MoveOutcome> {
    if capacity == 0 {
        return Err(AppError::CapacityUnknown(
            "page capacity has not been reported yet".to_string(),
        ));
    }

    let mut items = Vec::with_capacity(item_ids.len());
    let mut seen = HashSet::new();
    for id in item_ids {
        if !seen.insert(id.as_str()) {
            continue;
        }
        match store.read_by_id(id)? {
            Some(item) => items.push(item),
            None => return Err(AppError::NotFound(format!("No grid item {}", id))),
        }
    }

    let target = store.read_page(to_page)?;
    let mut free = capacity.saturating_sub(target.len());
    let mut next_index = target.iter().map(|item| item.index + 1).max().unwrap_or(0);

    let mut outcome = MoveOutcome::default();
    let mut write_error = None;

    for item in items {
        if item.page == to_page {
            outcome.unchanged.push(item.id);
            continue;
        }
        if free == 0 || write_error.is_some() {
            outcome.rejected.push(item.id);
            continue;
        }
        if let Err(error) = store.update_page_and_index(&item.id, to_page, next_index) {
            tracing::warn!(item_id = %item.id, page = to_page, error = %error, "cross-page move write failed");
            write_error = Some(AppError::Store(format!(
                "moving {} to page {}: {}",
                item.id, to_page, error
            )));
            outcome.rejected.push(item.id);
            continue;
        }
        outcome.accepted.push(item.id);
        next_index += 1;
        free -= 1;
    }

    let mut failed = Vec::new();
    compact_pages(store, &mut failed)?;

    if let Some(error) = write_error {
        return Err(error);
    }
    if !failed.is_empty() {
        return Err(AppError::Store(format!(
            "compacting after move failed for: {}",
            failed.join(", ")
        )));
    }

    if outcome.is_truncated() {
        tracing::info!(
            page = to_page,
            accepted = outcome.accepted.len(),
            rejected = outcome.rejected.len(),
            "move truncated at page capacity"
        );
    }
    Ok(outcome)
}

/// Renumbers every page whose indices are not exactly `0..n`, keeping relative
/// order. Ids whose index write fails are pushed to `failed`; the gap they leave
/// is picked up again by the next sweep. Returns the number of writes.
pub fn compact_pages(store: &dyn ItemStore, failed: &mut Vec<String>) -> AppResult<usize> {
    let mut writes = 0;
    for (page, items) in group_pages(store.read_all()?) {
        let contiguous = items
            .iter()
            .enumerate()
            .all(|(position, item)| item.index == position as u32);
        if contiguous {
            continue;
        }

        let mut page_writes = 0;
        for (position, item) in items.iter().enumerate() {
            let position = position as u32;
            if item.index == position {
                continue;
            }
            match store.update_index(&item.id, position) {
                Ok(()) => page_writes += 1,
                Err(error) => {
                    tracing::warn!(item_id = %item.id, page, error = %error, "compaction write failed");
                    failed.push(item.id.clone());
                }
            }
        }
        tracing::debug!(page, writes = page_writes, "page compacted");
        writes += page_writes;
    }
    Ok(writes)
}
