//! Local filesystem storage backend.
//!
//! Stores everything as JSON under one root directory using atomic
//! temp-file renames, with a hot/cold split per source: the live item
//! set in `current/{source}.json` and immutable monthly archives under
//! `archive/{source}/YYYY/MM.json`. Suitable for development and
//! single-node deployments; the traits in [`crate::store`] allow a
//! relational backend to replace it without touching the pipeline.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{Item, SourceQualityProfile, TaskRecord, Watermark};
use crate::store::{ItemStore, ProfileStore, TaskStore, UpsertSummary, WatermarkStore};

/// Header for a hot per-source item file.
#[derive(Debug, Serialize, Deserialize, Default)]
struct SourceData {
    updated_at: Option<DateTime<Utc>>,
    count: usize,
    items: Vec<Item>,
}

/// Local filesystem storage backend.
pub struct LocalStore {
    root_dir: PathBuf,
    // Serializes read-modify-write cycles on shared files. Different
    // sources share watermarks.json/profiles.json/tasks.json, so a
    // single lock keeps concurrent cycles from losing writes.
    write_lock: Mutex<()>,
}

impl LocalStore {
    /// Create a store rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn current_key(source: &str) -> String {
        format!("current/{}.json", source)
    }

    fn archive_key(source: &str, year: i32, month: u32) -> String {
        format!("archive/{}/{}/{:02}.json", source, year, month)
    }

    async fn load_source_data(&self, source: &str) -> Result<SourceData> {
        Ok(self
            .read_json(&Self::current_key(source))
            .await?
            .unwrap_or_default())
    }

    async fn save_source_data(&self, source: &str, mut data: SourceData) -> Result<()> {
        data.updated_at = Some(Utc::now());
        data.count = data.items.len();
        self.write_json(&Self::current_key(source), &data).await
    }

    async fn load_map<T: DeserializeOwned>(&self, key: &str) -> Result<HashMap<String, T>> {
        Ok(self.read_json(key).await?.unwrap_or_default())
    }
}

#[async_trait]
impl ItemStore for LocalStore {
    async fn upsert_batch(&self, source: &str, items: &[Item]) -> Result<UpsertSummary> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.load_source_data(source).await?;
        let mut summary = UpsertSummary::default();

        for incoming in items {
            let existing = data
                .items
                .iter_mut()
                .find(|row| row.source_item_id == incoming.source_item_id && row.is_current);

            match existing {
                None => {
                    let mut row = incoming.clone();
                    row.version = 1;
                    row.is_current = true;
                    data.items.push(row);
                    summary.inserted += 1;
                }
                Some(row) if row.content_hash == incoming.content_hash => {
                    // Unchanged content: refresh engagement counters only,
                    // never a new version.
                    row.score = incoming.score;
                    row.comment_count = incoming.comment_count;
                    row.fetched_at = incoming.fetched_at;
                    summary.unchanged += 1;
                }
                Some(row) => {
                    let next_version = row.version + 1;
                    row.is_current = false;
                    let mut fresh = incoming.clone();
                    fresh.version = next_version;
                    fresh.is_current = true;
                    data.items.push(fresh);
                    summary.updated += 1;
                }
            }
        }

        self.save_source_data(source, data).await?;
        Ok(summary)
    }

    async fn known_hashes(&self, source: &str) -> Result<HashSet<String>> {
        let data = self.load_source_data(source).await?;
        Ok(data
            .items
            .into_iter()
            .map(|item| item.content_hash)
            .collect())
    }

    async fn record_duplicate(&self, source: &str, source_item_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.load_source_data(source).await?;

        let row = data
            .items
            .iter_mut()
            .find(|row| row.source_item_id == source_item_id && row.is_current);
        if let Some(row) = row {
            row.duplicate_refs += 1;
        } else {
            log::warn!(
                "Duplicate reference for unknown item {}:{}",
                source,
                source_item_id
            );
            return Ok(());
        }

        self.save_source_data(source, data).await
    }

    async fn load_current(&self, source: &str) -> Result<Vec<Item>> {
        Ok(self.load_source_data(source).await?.items)
    }

    async fn archive_older_than(&self, source: &str, cutoff: DateTime<Utc>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.load_source_data(source).await?;

        let (old, hot): (Vec<Item>, Vec<Item>) = data
            .items
            .into_iter()
            .partition(|item| item.created_at < cutoff);
        data.items = hot;
        let moved = old.len();

        // Group the moved rows into monthly archive files.
        let mut by_month: HashMap<(i32, u32), Vec<Item>> = HashMap::new();
        for item in old {
            let key = (item.created_at.year(), item.created_at.month());
            by_month.entry(key).or_default().push(item);
        }

        for ((year, month), items) in by_month {
            let key = Self::archive_key(source, year, month);
            let mut existing: Vec<Item> = self.read_json(&key).await?.unwrap_or_default();

            let existing_keys: HashSet<String> =
                existing.iter().map(|item| item.natural_key()).collect();
            for item in items {
                if !existing_keys.contains(&item.natural_key()) {
                    existing.push(item);
                }
            }

            existing.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            self.write_json(&key, &existing).await?;
            log::info!("Archived into {} ({} rows total)", key, existing.len());
        }

        if moved > 0 {
            self.save_source_data(source, data).await?;
        }
        Ok(moved)
    }
}

#[async_trait]
impl WatermarkStore for LocalStore {
    async fn get(&self, source: &str) -> Result<Option<Watermark>> {
        let map: HashMap<String, Watermark> = self.load_map("watermarks.json").await?;
        Ok(map.get(source).cloned())
    }

    async fn put(&self, watermark: &Watermark) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map: HashMap<String, Watermark> = self.load_map("watermarks.json").await?;
        map.insert(watermark.source.clone(), watermark.clone());
        self.write_json("watermarks.json", &map).await
    }

    async fn all(&self) -> Result<Vec<Watermark>> {
        let map: HashMap<String, Watermark> = self.load_map("watermarks.json").await?;
        Ok(map.into_values().collect())
    }
}

#[async_trait]
impl ProfileStore for LocalStore {
    async fn get(&self, source: &str) -> Result<Option<SourceQualityProfile>> {
        let map: HashMap<String, SourceQualityProfile> = self.load_map("profiles.json").await?;
        Ok(map.get(source).cloned())
    }

    async fn all(&self) -> Result<Vec<SourceQualityProfile>> {
        let map: HashMap<String, SourceQualityProfile> = self.load_map("profiles.json").await?;
        let mut profiles: Vec<SourceQualityProfile> = map.into_values().collect();
        profiles.sort_by(|a, b| a.source.cmp(&b.source));
        Ok(profiles)
    }

    async fn put_batch(&self, profiles: &[SourceQualityProfile]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map: HashMap<String, SourceQualityProfile> = self.load_map("profiles.json").await?;
        for profile in profiles {
            map.insert(profile.source.clone(), profile.clone());
        }
        self.write_json("profiles.json", &map).await
    }
}

#[async_trait]
impl TaskStore for LocalStore {
    async fn create(&self, task: &TaskRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map: HashMap<String, TaskRecord> = self.load_map("tasks.json").await?;
        if map.contains_key(&task.id) {
            return Err(AppError::validation(format!(
                "task {} already exists",
                task.id
            )));
        }
        map.insert(task.id.clone(), task.clone());
        self.write_json("tasks.json", &map).await
    }

    async fn get(&self, id: &str) -> Result<Option<TaskRecord>> {
        let map: HashMap<String, TaskRecord> = self.load_map("tasks.json").await?;
        Ok(map.get(id).cloned())
    }

    async fn update(&self, task: &TaskRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map: HashMap<String, TaskRecord> = self.load_map("tasks.json").await?;
        if !map.contains_key(&task.id) {
            return Err(AppError::validation(format!("task {} not found", task.id)));
        }
        map.insert(task.id.clone(), task.clone());
        self.write_json("tasks.json", &map).await
    }

    async fn all(&self) -> Result<Vec<TaskRecord>> {
        let map: HashMap<String, TaskRecord> = self.load_map("tasks.json").await?;
        let mut tasks: Vec<TaskRecord> = map.into_values().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }
}
