use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::config::Config;
use crate::models::CategoryDocument;

/// Result of a save
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Content on disk already matched, nothing touched
    Unchanged,
    /// File replaced; holds the backup taken of the previous content, if any
    Written { backup: Option<PathBuf> },
}

impl SaveOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, SaveOutcome::Written { .. })
    }
}

/// Timestamped copies of files about to be overwritten
#[derive(Debug, Clone)]
pub struct BackupPolicy {
    pub dir: PathBuf,
    /// Backups kept per file; 0 disables backups
    pub keep: usize,
}

/// Write `bytes` to `path` through a sibling temp file and a rename
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = File::create(&tmp_path)
        .await
        .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(e).with_context(|| format!("Failed to replace {}", path.display()));
    }
    Ok(())
}

/// [`write_atomic`] unless `path` already holds exactly `bytes`
pub async fn write_if_changed(path: &Path, bytes: &[u8]) -> Result<bool> {
    if let Ok(current) = fs::read(path).await {
        if current == bytes {
            return Ok(false);
        }
    }
    write_atomic(path, bytes).await?;
    Ok(true)
}

impl BackupPolicy {
    fn dir_for(&self, stem: &str) -> PathBuf {
        self.dir.join(stem)
    }

    /// Copy `path` into the backup dir, then prune to `keep`
    pub async fn snapshot(&self, path: &Path) -> Result<Option<PathBuf>> {
        if self.keep == 0 || !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(None);
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_else(|| "bak".to_string());
        let dir = self.dir_for(&stem);
        fs::create_dir_all(&dir).await?;

        // Nanosecond stamps sort lexically in creation order
        let mut target;
        loop {
            let stamp = Utc::now().format("%Y%m%d-%H%M%S-%9f");
            target = dir.join(format!("{}-{}.{}", stem, stamp, ext));
            if !fs::try_exists(&target).await.unwrap_or(false) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }

        fs::copy(path, &target)
            .await
            .with_context(|| format!("Failed to back up {}", path.display()))?;

        let removed = self.prune(&stem).await?;
        if removed > 0 {
            tracing::info!(file = %stem, backups_removed = removed, "old backups pruned");
        }
        Ok(Some(target))
    }

    /// Backups for `stem`, oldest first
    pub async fn list(&self, stem: &str) -> Result<Vec<PathBuf>> {
        let dir = self.dir_for(stem);
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let prefix = format!("{}-", stem);
        let mut entries = fs::read_dir(&dir).await?;
        let mut backups = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(&prefix) && !name.ends_with(".tmp") {
                backups.push(entry.path());
            }
        }
        backups.sort();
        Ok(backups)
    }

    /// Delete the oldest backups beyond `keep`
    async fn prune(&self, stem: &str) -> Result<usize> {
        let backups = self.list(stem).await?;
        if backups.len() <= self.keep {
            return Ok(0);
        }

        let excess = backups.len() - self.keep;
        let mut removed = 0usize;
        for path in backups.into_iter().take(excess) {
            fs::remove_file(&path).await?;
            removed += 1;
        }
        Ok(removed)
    }
}

/// Category files on disk with backup-before-overwrite
#[derive(Debug, Clone)]
pub struct CategoryStore {
    dir: PathBuf,
    backups: BackupPolicy,
}

impl CategoryStore {
    pub fn new(dir: impl Into<PathBuf>, backups: BackupPolicy) -> Self {
        Self {
            dir: dir.into(),
            backups,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.categories_dir,
            BackupPolicy {
                dir: PathBuf::from(&config.backup_dir),
                keep: config.backup_keep,
            },
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// `*.json` file names in the dir, sorted, without `exclude`
    pub async fn list_files(&self, exclude: &str) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Directory '{}' not found", self.dir.display()))?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".json") && name != exclude {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Read a category file; a missing or malformed file is an empty collection
    pub async fn load_or_empty(&self, file_name: &str) -> CategoryDocument {
        let path = self.path_for(file_name);
        match fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<CategoryDocument>(&content) {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!(
                        "Malformed category file {}, starting empty: {}",
                        path.display(),
                        e
                    );
                    CategoryDocument::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CategoryDocument::default(),
            Err(e) => {
                tracing::warn!("Failed to read {}, starting empty: {}", path.display(), e);
                CategoryDocument::default()
            }
        }
    }

    /// Read a category file, failing on missing or malformed content
    pub async fn load(&self, file_name: &str) -> Result<CategoryDocument> {
        let path = self.path_for(file_name);
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON structure in {}", path.display()))
    }

    pub async fn save(&self, file_name: &str, doc: &CategoryDocument) -> Result<SaveOutcome> {
        let bytes = doc.to_pretty_bytes()?;
        self.save_bytes(file_name, &bytes).await
    }

    /// Write raw bytes under the dir; identical content is left alone
    pub async fn save_bytes(&self, file_name: &str, bytes: &[u8]) -> Result<SaveOutcome> {
        let path = self.path_for(file_name);

        if let Ok(current) = fs::read(&path).await {
            if current == bytes {
                return Ok(SaveOutcome::Unchanged);
            }
        }

        let backup = self.backups.snapshot(&path).await?;
        write_atomic(&path, bytes).await?;

        tracing::info!(file = %path.display(), bytes = bytes.len(), "saved");
        Ok(SaveOutcome::Written { backup })
    }
}
