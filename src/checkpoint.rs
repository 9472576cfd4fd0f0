//! Durable record of completed work units.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::WorkUnit;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(alias = "last_city")]
    pub last_location: Option<String>,
    pub last_keyword: Option<String>,
    #[serde(default)]
    pub completed_combinations: Vec<String>,
    pub timestamp: Option<String>,
}

impl Checkpoint {
    pub fn is_completed(&self, unit: &WorkUnit) -> bool {
        let id = unit.id();
        self.completed_combinations.iter().any(|done| *done == id)
    }

    pub fn completed_count(&self) -> usize {
        self.completed_combinations.len()
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable checkpoints mean "nothing completed".
    pub fn load(&self) -> Checkpoint {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No checkpoint at {}, starting fresh", self.path.display());
                return Checkpoint::default();
            }
            Err(e) => {
                warn!("Failed to read checkpoint {}: {}. Starting fresh.", self.path.display(), e);
                return Checkpoint::default();
            }
        };

        match serde_json::from_str::<Checkpoint>(&raw) {
            Ok(checkpoint) => {
                info!(
                    "Resuming: {} work units already completed",
                    checkpoint.completed_count()
                );
                checkpoint
            }
            Err(e) => {
                warn!("Failed to parse checkpoint: {}. Starting fresh.", e);
                Checkpoint::default()
            }
        }
    }

    /// Overwrite the checkpoint with `completed`, stamped now.
    pub fn save(&self, last: &WorkUnit, completed: &[String]) -> anyhow::Result<Checkpoint> {
        let checkpoint = Checkpoint {
            last_location: Some(last.location.clone()),
            last_keyword: Some(last.keyword.clone()),
            completed_combinations: completed.to_vec(),
            timestamp: Some(chrono::Local::now().to_rfc3339()),
        };
        let json = serde_json::to_vec_pretty(&checkpoint)?;
        atomic_write(&self.path, &json)
            .with_context(|| format!("writing checkpoint {}", self.path.display()))?;
        Ok(checkpoint)
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        remove_if_present(&self.path)
    }
}

/// Write to a sibling temp file, fsync, then rename over `path`.
/// Readers see the old content or the new content, never a mix.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let tmp = tmp_path(path);
    {
        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

pub fn remove_if_present(path: &Path) -> anyhow::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing {}", path.display())),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, CheckpointStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        (dir, store)
    }

    #[test]
    fn test_missing_checkpoint_is_empty() {
        let (_dir, store) = store();
        assert_eq!(store.load(), Checkpoint::default());
    }

    #[test]
    fn test_malformed_checkpoint_is_empty() {
        let (_dir, store) = store();
        fs::write(store.path(), "{\"completed_combinations\": [\"Sion_SE").unwrap();
        assert_eq!(store.load().completed_count(), 0);
    }

    #[test]
    fn test_save_then_load_membership() {
        let (_dir, store) = store();
        let unit = WorkUnit::new("Lausanne", "Agence Web");
        store.save(&unit, &[unit.id()]).unwrap();

        let loaded = store.load();
        assert!(loaded.is_completed(&unit));
        assert!(!loaded.is_completed(&WorkUnit::new("Lausanne", "SEO")));
        assert_eq!(loaded.last_location.as_deref(), Some("Lausanne"));
        assert!(loaded.timestamp.is_some());
    }

    #[test]
    fn test_interrupted_write_keeps_previous_checkpoint() {
        let (_dir, store) = store();
        let first = WorkUnit::new("Sion", "SEO");
        store.save(&first, &[first.id()]).unwrap();

        // Crash after the temp file was partly written, before the rename.
        fs::write(tmp_path(store.path()), "{\"last_location\": \"Ny").unwrap();

        let loaded = store.load();
        assert_eq!(loaded.completed_combinations, vec![first.id()]);
    }

    #[test]
    fn test_reads_legacy_field_names() {
        let (_dir, store) = store();
        fs::write(
            store.path(),
            r#"{"last_city": "Nyon", "last_keyword": "SEO", "completed_combinations": ["Nyon_SEO"], "timestamp": "2024-05-01T10:00:00"}"#,
        )
        .unwrap();
        let loaded = store.load();
        assert_eq!(loaded.last_location.as_deref(), Some("Nyon"));
        assert!(loaded.is_completed(&WorkUnit::new("Nyon", "SEO")));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (_dir, store) = store();
        let unit = WorkUnit::new("Sion", "SEO");
        store.save(&unit, &[unit.id()]).unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(!store.path().exists());
    }
}
