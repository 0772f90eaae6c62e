//! Persistent gallery-embedding cache.
//!
//! Embeddings are stored in a postcard sidecar file inside the gallery
//! directory, keyed by file name and mtime. A stale or unreadable cache is
//! discarded and rebuilt; the cache is an accelerator, never a source of
//! truth.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use facematch_vision::Embedding;
use serde::{Deserialize, Serialize};

pub const CACHE_FILE: &str = ".embeddings.bin";

#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    mtime_secs: u64,
    vector: Vec<f32>,
}

#[derive(Debug, Default)]
pub struct EmbeddingCache {
    path: Option<PathBuf>,
    entries: HashMap<String, CacheRecord>,
    dirty: bool,
}

impl EmbeddingCache {
    /// A cache that never reads or writes anything.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn open(gallery_dir: &Path) -> Self {
        let path = gallery_dir.join(CACHE_FILE);
        let entries = match fs::read(&path) {
            Ok(raw) => match postcard::from_bytes(&raw) {
                Ok(entries) => entries,
                Err(err) => {
                    log::warn!(
                        "discarding unreadable embedding cache {}: {err}",
                        path.display()
                    );
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        log::debug!("embedding cache holds {} entr(ies)", entries.len());
        Self {
            path: Some(path),
            entries,
            dirty: false,
        }
    }

    /// A hit requires the stored mtime to equal the file's current mtime.
    pub fn get(&self, file_name: &str, mtime_secs: u64) -> Option<Embedding> {
        self.entries
            .get(file_name)
            .filter(|record| record.mtime_secs == mtime_secs)
            .map(|record| Embedding::from_raw(record.vector.clone()))
    }

    pub fn insert(&mut self, file_name: String, mtime_secs: u64, embedding: &Embedding) {
        self.entries.insert(
            file_name,
            CacheRecord {
                mtime_secs,
                vector: embedding.to_vec(),
            },
        );
        self.dirty = true;
    }

    /// Drop records for files no longer present in the gallery.
    pub fn prune<F: FnMut(&str) -> bool>(&mut self, mut keep: F) {
        let before = self.entries.len();
        self.entries.retain(|name, _| keep(name));
        if self.entries.len() != before {
            self.dirty = true;
        }
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        let raw = postcard::to_allocvec(&self.entries)?;
        fs::write(path, raw).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

pub fn mtime_secs(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .ok()?
        .modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs())
}
