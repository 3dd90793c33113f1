use crate::errors::{AppError, AppResult};
use crate::models::SourceEntry;
use crate::sources::CatalogSource;
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogFeed {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub favorites: Vec<CatalogApp>,
    #[serde(default)]
    pub apps: Vec<CatalogApp>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogApp {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub url_web: Option<String>,
}

impl CatalogFeed {
    /// Flattens favorites then apps; an id listed twice is kept once, favorite first.
    pub fn into_entries(self) -> Vec<SourceEntry> {
        let mut seen = HashSet::new();
        let favorites = self.favorites.into_iter().map(|app| (app, true));
        let apps = self.apps.into_iter().map(|app| (app, false));

        favorites
            .chain(apps)
            .filter(|(app, _)| seen.insert(app.id.clone()))
            .map(|(app, favorite)| SourceEntry {
                display_name: if app.name.is_empty() { app.id.clone() } else { app.name },
                id: app.id,
                version_tag: app.version,
                favorite,
            })
            .collect()
    }
}

pub fn parse_catalog(raw: &str) -> anyhow::Result<CatalogFeed> {
    let feed: CatalogFeed = serde_json::from_str(raw).context("catalog feed is not valid JSON")?;
    if let Some(app) = feed.favorites.iter().chain(feed.apps.iter()).find(|app| app.id.trim().is_empty()) {
        anyhow::bail!("catalog entry '{}' has an empty id", app.name);
    }
    Ok(feed)
}

/// Reads the catalog feed document from a file the transport layer keeps current.
#[derive(Debug, Clone)]
pub struct JsonCatalogSource {
    path: PathBuf,
}

impl JsonCatalogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CatalogSource for JsonCatalogSource {
    async fn fetch_catalog(&self) -> AppResult<Vec<SourceEntry>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|error| AppError::Source(format!("{}: {}", self.path.display(), error)))?;
        let feed = parse_catalog(&raw)
            .with_context(|| format!("reading {}", self.path.display()))
            .map_err(|error| AppError::Source(format!("{:#}", error)))?;
        tracing::debug!(version = %feed.version, path = %self.path.display(), "catalog feed loaded");
        Ok(feed.into_entries())
    }
}
