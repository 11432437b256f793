//! Point-in-time snapshots of the document store.
//!
//! A snapshot holds every collection, the transaction log included, so a
//! store reloaded from disk can resume transactions that were prepared
//! but never applied.

use super::memory::{Collections, DocumentStore};
use crate::core::{DocId, Document, Result, StateError};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub created_at: i64,
    /// Collections as (name, documents) pairs; ids are not plain strings
    /// so they can't be map keys in every encoding.
    pub collections: Vec<(String, Vec<(DocId, Document)>)>,
}

impl StoreSnapshot {
    pub fn capture(collections: &Collections) -> Self {
        let mut entries: Vec<(String, Vec<(DocId, Document)>)> = collections
            .entries()
            .map(|(name, docs)| {
                let docs = docs.iter().map(|(id, d)| (id.clone(), d.clone())).collect();
                (name.clone(), docs)
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            version: SNAPSHOT_VERSION,
            created_at: chrono::Utc::now().timestamp_millis(),
            collections: entries,
        }
    }

    pub fn document_count(&self) -> usize {
        self.collections.iter().map(|(_, docs)| docs.len()).sum()
    }

    pub fn into_store(self) -> DocumentStore {
        DocumentStore::from_collections(Collections::restore(self.collections))
    }
}

pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    /// Writes the snapshot to a temp file next to the target and renames
    /// it into place, so readers never see a partial file.
    pub fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let dir = match self.snapshot_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)
            .map_err(|e| StateError::IoError(format!("Failed to create snapshot directory: {}", e)))?;
        let serialized = rmp_serde::to_vec(snapshot)
            .map_err(|e| StateError::Serialization(format!("Failed to serialize snapshot: {}", e)))?;

        let temp = NamedTempFile::new_in(&dir)
            .map_err(|e| StateError::IoError(format!("Failed to create temp file: {}", e)))?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            writer
                .write_all(&serialized)
                .map_err(|e| StateError::IoError(format!("Failed to write snapshot: {}", e)))?;
            writer
                .flush()
                .map_err(|e| StateError::IoError(format!("Failed to flush snapshot: {}", e)))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(|e| StateError::IoError(format!("Failed to sync snapshot: {}", e)))?;
        temp.persist(&self.snapshot_path)
            .map_err(|e| StateError::IoError(format!("Failed to rename snapshot: {}", e)))?;
        debug!(
            path = %self.snapshot_path.display(),
            documents = snapshot.document_count(),
            "saved snapshot"
        );
        Ok(())
    }

    pub fn load(&self) -> Result<Option<StoreSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.snapshot_path)
            .map_err(|e| StateError::IoError(format!("Failed to open snapshot: {}", e)))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| StateError::IoError(format!("Failed to read snapshot: {}", e)))?;
        let snapshot: StoreSnapshot = rmp_serde::from_slice(&data)
            .map_err(|e| StateError::Serialization(format!("Failed to deserialize snapshot: {}", e)))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StateError::Serialization(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }
}

impl DocumentStore {
    pub async fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let snapshot = StoreSnapshot::capture(&*self.read().await);
        SnapshotManager::new(path).save(&snapshot)
    }

    /// Loads a store from `path`; a missing file yields an empty store.
    pub fn load_snapshot<P: AsRef<Path>>(path: P) -> Result<DocumentStore> {
        match SnapshotManager::new(path).load()? {
            Some(snapshot) => Ok(snapshot.into_store()),
            None => Ok(DocumentStore::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_snapshot_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.snapshot");

        let store = DocumentStore::new();
        {
            let mut c = store.write().await;
            c.insert("units", &DocId::from("u:wordpress/0"), doc! { "life": "alive" });
            c.insert("relationscopes", &DocId::from(7), doc! { "departing": false });
        }
        store.save_snapshot(&path).await.unwrap();
        assert!(SnapshotManager::new(&path).exists());

        let loaded = DocumentStore::load_snapshot(&path).unwrap();
        let unit = loaded.get("units", &DocId::from("u:wordpress/0")).await.unwrap();
        assert_eq!(unit.get("life"), Some(&serde_json::Value::from("alive")));
        assert_eq!(loaded.count("relationscopes").await, 1);
    }

    #[tokio::test]
    async fn test_load_missing_snapshot_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = DocumentStore::load_snapshot(temp_dir.path().join("absent")).unwrap();
        assert!(store.read().await.collection_names().is_empty());
    }
}
