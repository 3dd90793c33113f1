use crate::db::ItemStore;
use crate::errors::AppResult;
use crate::models::{ItemKind, RefreshReport, SourceEntry, UsageSample};
use crate::placement::Occupancy;
use crate::reorder::compact_pages;
use crate::sources::CapacityProvider;
use chrono::Utc;
use std::collections::{HashMap, HashSet};

/// Merges one source snapshot into the store.
///
/// Vanished ids of `kind` are deleted and any page whose indices are not `0..n`
/// is compacted, including gaps left by an earlier failed write. Known ids with
/// an equal version are skipped, known ids with a new version keep their slot,
/// and unknown ids are placed first-fit against the merged occupancy of both
/// kinds. Write failures are collected in `failed` by id and do not stop the
/// pass; only a failing read does.
pub fn reconcile_kind(
    store: &dyn ItemStore,
    kind: ItemKind,
    snapshot: Vec<SourceEntry>,
    capacity: &dyn CapacityProvider,
    report: &mut RefreshReport,
    failed: &mut Vec<String>,
) -> AppResult<()> {
    let mut seen = HashSet::new();
    let entries = snapshot
        .into_iter()
        .filter(|entry| seen.insert(entry.id.clone()))
        .collect::<Vec<_>>();
    let keep_ids = entries.iter().map(|entry| entry.id.clone()).collect::<Vec<_>>();

    let vanished = store
        .read_kind(kind)?
        .into_iter()
        .filter(|item| !seen.contains(&item.id))
        .map(|item| item.id)
        .collect::<Vec<_>>();
    if !vanished.is_empty() {
        match store.delete_not_in(kind, &keep_ids) {
            Ok(removed) => {
                for item in &removed {
                    tracing::debug!(item_id = %item.id, kind = kind.as_str(), "removed vanished item");
                }
                report.deleted += removed.len();
            }
            Err(error) => {
                tracing::warn!(kind = kind.as_str(), error = %error, "deleting vanished items failed");
                failed.extend(vanished);
            }
        }
    }
    report.compacted += compact_pages(store, failed)?;

    let existing = store.read_all()?;
    let mut occupancy = Occupancy::from_items(&existing);
    let stored = existing
        .into_iter()
        .map(|item| (item.id.clone(), item))
        .collect::<HashMap<_, _>>();

    let mut deferred = 0usize;
    for entry in entries {
        match stored.get(&entry.id) {
            Some(current) if current.kind != kind => {
                tracing::warn!(
                    item_id = %entry.id,
                    stored_kind = current.kind.as_str(),
                    incoming_kind = kind.as_str(),
                    "id already owned by the other source; skipping"
                );
                report.conflicts += 1;
            }
            Some(current) if current.version_tag == entry.version_tag => {
                report.unchanged += 1;
            }
            Some(current) => {
                let mut updated = current.clone();
                updated.display_name = entry.display_name;
                updated.version_tag = entry.version_tag;
                updated.favorite = entry.favorite;
                updated.updated_at = Utc::now();
                match store.upsert(&updated) {
                    Ok(()) => report.updated += 1,
                    Err(error) => {
                        tracing::warn!(item_id = %updated.id, error = %error, "metadata update failed");
                        failed.push(updated.id);
                    }
                }
            }
            None => {
                let cells = capacity.page_capacity();
                if cells == 0 {
                    deferred += 1;
                    continue;
                }
                let id = entry.id.clone();
                let slot = occupancy.place(&id, cells);
                let item = entry.into_item(kind, slot);
                match store.upsert(&item) {
                    Ok(()) => {
                        tracing::debug!(item_id = %id, page = slot.page, index = slot.index, "placed new item");
                        report.inserted += 1;
                    }
                    Err(error) => {
                        tracing::warn!(item_id = %id, error = %error, "insert failed");
                        occupancy.release(slot, &id);
                        failed.push(id);
                    }
                }
            }
        }
    }

    if deferred > 0 {
        tracing::warn!(count = deferred, kind = kind.as_str(), "page capacity unknown; new items deferred");
        report.deferred += deferred;
    }
    Ok(())
}

/// Copies usage counters onto stored items. Position is never touched.
pub fn annotate_usage(store: &dyn ItemStore, samples: Vec<UsageSample>, report: &mut RefreshReport) -> AppResult<()> {
    let current = store
        .read_all()?
        .into_iter()
        .map(|item| (item.id, item.usage_millis))
        .collect::<HashMap<_, _>>();

    for sample in samples {
        match current.get(&sample.id) {
            Some(stored) if *stored != sample.usage_millis => {
                if let Err(error) = store.update_usage(&sample.id, sample.usage_millis) {
                    tracing::warn!(item_id = %sample.id, error = %error, "usage update failed");
                    continue;
                }
                report.usage_updates += 1;
            }
            _ => {}
        }
    }
    Ok(())
}
