use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemKind {
    /// Installed on the device, owned by the OS application registry.
    Local,
    /// Curated entry delivered by the remote catalog feed.
    Remote,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// One cell of the launcher grid. Both kinds share the same page/index space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub kind: ItemKind,
    pub display_name: String,
    pub version_tag: String,
    pub page: u32,
    pub index: u32,
    pub selected: bool,
    pub favorite: bool,
    pub usage_millis: i64,
    pub notification_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn slot(&self) -> Slot {
        Slot {
            page: self.page,
            index: self.index,
        }
    }
}

/// An entry as reported by an external source snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceEntry {
    pub id: String,
    pub display_name: String,
    pub version_tag: String,
    #[serde(default)]
    pub favorite: bool,
}

impl SourceEntry {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, version_tag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            version_tag: version_tag.into(),
            favorite: false,
        }
    }

    pub(crate) fn into_item(self, kind: ItemKind, slot: Slot) -> Item {
        Item {
            id: self.id,
            kind,
            display_name: self.display_name,
            version_tag: self.version_tag,
            page: slot.page,
            index: slot.index,
            selected: false,
            favorite: self.favorite,
            usage_millis: 0,
            notification_count: 0,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSample {
    pub id: String,
    pub usage_millis: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub page: u32,
    pub index: u32,
}

impl Slot {
    pub const fn new(page: u32, index: u32) -> Self {
        Self { page, index }
    }
}

/// Page number to items on that page, each list sorted by index.
pub type PageMap = BTreeMap<u32, Vec<Item>>;

pub fn group_pages(items: Vec<Item>) -> PageMap {
    let mut pages = PageMap::new();
    for item in items {
        pages.entry(item.page).or_default().push(item);
    }
    for entries in pages.values_mut() {
        entries.sort_by_key(|item| item.index);
    }
    pages
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub deferred: usize,
    pub conflicts: usize,
    pub compacted: usize,
    pub usage_updates: usize,
}

impl RefreshReport {
    pub fn writes(&self) -> usize {
        self.inserted + self.updated + self.deleted + self.compacted + self.usage_updates
    }
}

/// Result of a cross-page move. `rejected` ids did not fit and kept their slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveOutcome {
    pub accepted: Vec<String>,
    pub rejected: Vec<String>,
    pub unchanged: Vec<String>,
}

impl MoveOutcome {
    pub fn is_truncated(&self) -> bool {
        !self.rejected.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct GridSettings {
    pub drag_debounce_ms: u64,
    pub catalog_refresh_secs: u64,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            drag_debounce_ms: 400,
            catalog_refresh_secs: 3600,
        }
    }
}
