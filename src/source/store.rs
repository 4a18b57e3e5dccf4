//! Expiring store for uploaded and filled PDFs

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default lifetime of an upload
pub const DEFAULT_FILE_EXPIRY: Duration = Duration::from_secs(2 * 60 * 60);

/// Bookkeeping for one upload
#[derive(Debug, Clone)]
pub struct StoredFile {
    /// Name the client uploaded the file under
    pub original_name: String,
    pub upload_path: PathBuf,
    /// Filled PDF, once `fill_form` has run
    pub output_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

impl StoredFile {
    /// `<stem>_filled.pdf`
    pub fn download_name(&self) -> String {
        let stem = Path::new(&self.original_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "document".to_string());
        format!("{}_filled.pdf", stem)
    }
}

/// File id → stored file, with expiry.
///
/// Entries are removed from the map before their files are deleted, so each
/// file is unlinked by exactly one caller even when a sweep and an explicit
/// cleanup race.
pub struct FileStore {
    entries: Mutex<HashMap<String, StoredFile>>,
    upload_dir: PathBuf,
    output_dir: PathBuf,
    expiry: chrono::Duration,
}

impl FileStore {
    /// Create a store; directories are created on first write
    pub fn new(upload_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, expiry: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            upload_dir: upload_dir.into(),
            output_dir: output_dir.into(),
            expiry: chrono::Duration::from_std(expiry).unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Save uploaded bytes and return the new file id
    pub fn save_upload(&self, original_name: &str, data: &[u8]) -> Result<String> {
        if !original_name.to_ascii_lowercase().ends_with(".pdf") {
            return Err(Error::UnsupportedUpload {
                name: original_name.to_string(),
            });
        }

        std::fs::create_dir_all(&self.upload_dir)?;

        let file_id = self.generate_unique_id();
        let upload_path = self.upload_dir.join(format!("{}.pdf", file_id));
        std::fs::write(&upload_path, data)?;

        self.entries.lock().insert(
            file_id.clone(),
            StoredFile {
                original_name: original_name.to_string(),
                upload_path,
                output_path: None,
                created_at: Utc::now(),
            },
        );

        tracing::info!(file_id = %file_id, name = original_name, bytes = data.len(), "stored upload");
        Ok(file_id)
    }

    /// Bookkeeping for a live upload. Expired entries are purged on access.
    pub fn info(&self, file_id: &str) -> Result<StoredFile> {
        self.live_entry(file_id, Utc::now())
    }

    /// Path of the uploaded PDF
    pub fn upload_path(&self, file_id: &str) -> Result<PathBuf> {
        self.info(file_id).map(|f| f.upload_path)
    }

    /// Path of the filled PDF
    pub fn output_path(&self, file_id: &str) -> Result<PathBuf> {
        self.info(file_id)?
            .output_path
            .filter(|p| p.is_file())
            .ok_or_else(|| Error::OutputNotReady {
                file_id: file_id.to_string(),
            })
    }

    /// Write the filled PDF for an upload and record it
    pub fn write_output(&self, file_id: &str, data: &[u8]) -> Result<PathBuf> {
        // Fail early for unknown or expired ids
        self.info(file_id)?;

        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(format!("{}_filled.pdf", file_id));
        std::fs::write(&path, data)?;

        self.keep_output(file_id, path)
    }

    /// Register a freshly written output, deleting it if the upload vanished
    /// in the meantime
    fn keep_output(&self, file_id: &str, path: PathBuf) -> Result<PathBuf> {
        match self.register_output(file_id, path.clone()) {
            Ok(()) => Ok(path),
            Err(e) => {
                if let Err(remove_err) = std::fs::remove_file(&path) {
                    tracing::warn!(file_id, path = %path.display(), error = %remove_err, "failed to delete orphaned output");
                }
                Err(e)
            }
        }
    }

    /// Record an output file for an upload
    pub fn register_output(&self, file_id: &str, path: PathBuf) -> Result<()> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(file_id).ok_or_else(|| Error::FileNotFound {
            file_id: file_id.to_string(),
        })?;
        entry.output_path = Some(path);
        Ok(())
    }

    /// Forget an upload and delete its files. Returns false if the id was unknown.
    pub fn remove(&self, file_id: &str) -> bool {
        let removed = self.entries.lock().remove(file_id);
        match removed {
            Some(entry) => {
                delete_files(file_id, &entry);
                true
            }
            None => false,
        }
    }

    /// Purge every expired entry, returning how many were removed
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<(String, StoredFile)> = {
            let mut entries = self.entries.lock();
            let ids: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| self.is_expired(entry, now))
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        for (id, entry) in &expired {
            delete_files(id, entry);
        }

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "swept expired uploads");
        }
        expired.len()
    }

    /// Number of tracked uploads, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn is_expired(&self, entry: &StoredFile, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(entry.created_at) > self.expiry
    }

    fn live_entry(&self, file_id: &str, now: DateTime<Utc>) -> Result<StoredFile> {
        let not_found = || Error::FileNotFound {
            file_id: file_id.to_string(),
        };

        let expired = {
            let mut entries = self.entries.lock();
            let entry = entries.get(file_id).ok_or_else(not_found)?;
            if !self.is_expired(entry, now) {
                return Ok(entry.clone());
            }
            entries.remove(file_id)
        };

        if let Some(entry) = expired {
            tracing::debug!(file_id, "upload expired on access");
            delete_files(file_id, &entry);
        }
        Err(not_found())
    }

    fn generate_unique_id(&self) -> String {
        let entries = self.entries.lock();
        loop {
            let id = uuid::Uuid::new_v4().to_string();
            if !entries.contains_key(&id) {
                return id;
            }
        }
    }
}

fn delete_files(file_id: &str, entry: &StoredFile) {
    let paths = std::iter::once(&entry.upload_path).chain(entry.output_path.as_ref());
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(file_id, path = %path.display(), error = %e, "failed to delete file");
            }
        }
    }
}

/// Periodically purge expired uploads until the returned task is aborted
pub fn spawn_sweeper(store: Arc<FileStore>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            store.sweep_expired();
        }
    })
}
