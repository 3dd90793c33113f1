use crate::errors::{AppError, AppResult};
use crate::models::{GridSettings, Item, ItemKind};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("schema.sql");

const ITEM_COLUMNS: &str = "id, kind, display_name, version_tag, page, position, favorite, selected,
     usage_millis, notification_count, updated_at";

/// Durable ordered item table. Position-mutating sequences are serialized by
/// the caller; implementations only need each call to be atomic.
pub trait ItemStore: Send + Sync {
    /// Every item of both kinds, ordered by page then index.
    fn read_all(&self) -> AppResult<Vec<Item>>;
    fn read_kind(&self, kind: ItemKind) -> AppResult<Vec<Item>>;
    fn read_page(&self, page: u32) -> AppResult<Vec<Item>>;
    fn read_by_id(&self, id: &str) -> AppResult<Option<Item>>;
    fn upsert(&self, item: &Item) -> AppResult<()>;
    /// Deletes rows of `kind` whose id is not in `keep_ids` and returns them.
    fn delete_not_in(&self, kind: ItemKind, keep_ids: &[String]) -> AppResult<Vec<Item>>;
    fn update_index(&self, id: &str, index: u32) -> AppResult<()>;
    fn update_page_and_index(&self, id: &str, page: u32, index: u32) -> AppResult<()>;
    /// Returns false when no row has this id.
    fn update_display_name(&self, id: &str, display_name: &str) -> AppResult<bool>;
    fn update_usage(&self, id: &str, usage_millis: i64) -> AppResult<()>;
    fn update_notification_count(&self, id: &str, count: u32) -> AppResult<()>;
    fn reset_notification_counts(&self) -> AppResult<()>;
    fn set_selected(&self, id: &str, selected: bool) -> AppResult<()>;
    fn clear_selection(&self) -> AppResult<()>;
}

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        // Selection only lives for one process lifetime.
        conn.execute("UPDATE items SET selected = 0 WHERE selected != 0", [])?;

        tracing::info!(path = %path.display(), "grid database opened");

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connection(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    pub fn get_settings(&self) -> AppResult<GridSettings> {
        let conn = self.connection()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = 'grid'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<GridSettings>(&raw).unwrap_or_default()),
            None => Ok(GridSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<GridSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: GridSettings = serde_json::from_value(merged)?;

        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES ('grid', ?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![serde_json::to_string(&settings)?, Utc::now().to_rfc3339()],
        )?;

        Ok(settings)
    }

    fn query_items(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> AppResult<Vec<Item>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, parse_item_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }
}

impl ItemStore for Database {
    fn read_all(&self) -> AppResult<Vec<Item>> {
        self.query_items(
            &format!("SELECT {ITEM_COLUMNS} FROM items ORDER BY page ASC, position ASC, id ASC"),
            &[],
        )
    }

    fn read_kind(&self, kind: ItemKind) -> AppResult<Vec<Item>> {
        self.query_items(
            &format!("SELECT {ITEM_COLUMNS} FROM items WHERE kind = ?1 ORDER BY page ASC, position ASC"),
            &[&kind.as_str()],
        )
    }

    fn read_page(&self, page: u32) -> AppResult<Vec<Item>> {
        self.query_items(
            &format!("SELECT {ITEM_COLUMNS} FROM items WHERE page = ?1 ORDER BY position ASC, id ASC"),
            &[&page],
        )
    }

    fn read_by_id(&self, id: &str) -> AppResult<Option<Item>> {
        let conn = self.connection()?;
        let item = conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"),
                [id],
                parse_item_row,
            )
            .optional()?;
        Ok(item)
    }

    fn upsert(&self, item: &Item) -> AppResult<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO items (
               id, kind, display_name, version_tag, page, position, favorite, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
               kind = excluded.kind,
               display_name = excluded.display_name,
               version_tag = excluded.version_tag,
               page = excluded.page,
               position = excluded.position,
               favorite = excluded.favorite,
               updated_at = excluded.updated_at",
            params![
                item.id,
                item.kind.as_str(),
                item.display_name,
                item.version_tag,
                item.page,
                item.index,
                item.favorite as i32,
                item.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn delete_not_in(&self, kind: ItemKind, keep_ids: &[String]) -> AppResult<Vec<Item>> {
        let keep = keep_ids.iter().map(String::as_str).collect::<HashSet<_>>();
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;

        let removed = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM items WHERE kind = ?1 ORDER BY page ASC, position ASC"
            ))?;
            let rows = stmt.query_map([kind.as_str()], parse_item_row)?;
            let mut removed = Vec::new();
            for row in rows {
                let item = row?;
                if !keep.contains(item.id.as_str()) {
                    removed.push(item);
                }
            }
            removed
        };

        for item in &removed {
            tx.execute(
                "DELETE FROM items WHERE id = ?1 AND kind = ?2",
                params![item.id, kind.as_str()],
            )?;
        }
        tx.commit()?;

        Ok(removed)
    }

    fn update_index(&self, id: &str, index: u32) -> AppResult<()> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE items SET position = ?1 WHERE id = ?2",
            params![index, id],
        )?;
        Ok(())
    }

    fn update_page_and_index(&self, id: &str, page: u32, index: u32) -> AppResult<()> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE items SET page = ?1, position = ?2 WHERE id = ?3",
            params![page, index, id],
        )?;
        Ok(())
    }

    fn update_display_name(&self, id: &str, display_name: &str) -> AppResult<bool> {
        let conn = self.connection()?;
        let changed = conn.execute(
            "UPDATE items SET display_name = ?1, updated_at = ?2 WHERE id = ?3",
            params![display_name, Utc::now().to_rfc3339(), id],
        )?;
        Ok(changed > 0)
    }

    fn update_usage(&self, id: &str, usage_millis: i64) -> AppResult<()> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE items SET usage_millis = ?1 WHERE id = ?2",
            params![usage_millis, id],
        )?;
        Ok(())
    }

    fn update_notification_count(&self, id: &str, count: u32) -> AppResult<()> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE items SET notification_count = ?1 WHERE id = ?2",
            params![count, id],
        )?;
        Ok(())
    }

    fn reset_notification_counts(&self) -> AppResult<()> {
        let conn = self.connection()?;
        conn.execute("UPDATE items SET notification_count = 0 WHERE notification_count != 0", [])?;
        Ok(())
    }

    fn set_selected(&self, id: &str, selected: bool) -> AppResult<()> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE items SET selected = ?1 WHERE id = ?2",
            params![selected as i32, id],
        )?;
        Ok(())
    }

    fn clear_selection(&self) -> AppResult<()> {
        let conn = self.connection()?;
        conn.execute("UPDATE items SET selected = 0 WHERE selected != 0", [])?;
        Ok(())
    }
}

fn parse_item_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        kind: parse_kind(&row.get::<_, String>(1)?)?,
        display_name: row.get(2)?,
        version_tag: row.get(3)?,
        page: row.get(4)?,
        index: row.get(5)?,
        favorite: row.get::<_, i32>(6)? != 0,
        selected: row.get::<_, i32>(7)? != 0,
        usage_millis: row.get(8)?,
        notification_count: row.get(9)?,
        updated_at: parse_time(&row.get::<_, String>(10)?)?,
    })
}

fn parse_kind(raw: &str) -> rusqlite::Result<ItemKind> {
    match raw {
        "local" => Ok(ItemKind::Local),
        "remote" => Ok(ItemKind::Remote),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Unknown item kind '{}'", other),
            )),
        )),
    }
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                10,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
            )
        })
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}
