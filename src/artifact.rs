//! Blob storage for stage artifacts, keyed by work item id.
//!
//! A reference is `{url_prefix}/{id}.{ext}`. That string is what the speech
//! stage stores in the `audio` column and what the delete path hands back.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::model::work::WorkId;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Write (or overwrite) the artifact for `id` and return its reference.
    async fn put(&self, id: WorkId, ext: &str, bytes: &[u8]) -> Result<String>;

    /// Remove by reference. `Ok(false)` if there was nothing to remove or the
    /// reference isn't one of ours (an error marker, say).
    async fn remove(&self, reference: &str) -> Result<bool>;

    /// Whether `reference` points into this store.
    fn owns(&self, reference: &str) -> bool;
}

fn artifact_name(id: WorkId, ext: &str) -> String {
    format!("{id}.{ext}")
}

/// Strip `prefix/` and reject anything that isn't a bare file name.
fn file_name_of<'a>(prefix: &str, reference: &'a str) -> Option<&'a str> {
    let name = reference.strip_prefix(prefix)?.strip_prefix('/')?;
    let valid = !name.is_empty()
        && !name.contains(['/', '\\'])
        && !name.starts_with('.');
    valid.then_some(name)
}

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

/// Artifacts as files in one directory.
#[derive(Debug, Clone)]
pub struct FsArtifacts {
    dir: PathBuf,
    url_prefix: String,
}

impl FsArtifacts {
    pub fn new(dir: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        let url_prefix: String = url_prefix.into();
        Self {
            dir: dir.into(),
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn path_for(&self, reference: &str) -> Option<PathBuf> {
        file_name_of(&self.url_prefix, reference).map(|name| self.dir.join(name))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifacts {
    async fn put(&self, id: WorkId, ext: &str, bytes: &[u8]) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let name = artifact_name(id, ext);

        // write-then-rename so readers never see a half-written file
        let tmp = self.dir.join(format!(".{name}.{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, self.dir.join(&name)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Artifact(format!("cannot store {name}: {e}")));
        }

        Ok(format!("{}/{name}", self.url_prefix))
    }

    async fn remove(&self, reference: &str) -> Result<bool> {
        let Some(path) = self.path_for(reference) else {
            return Ok(false);
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn owns(&self, reference: &str) -> bool {
        file_name_of(&self.url_prefix, reference).is_some()
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// Artifacts held in a map, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryArtifacts {
    url_prefix: String,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifacts {
    pub fn new(url_prefix: impl Into<String>) -> Self {
        Self {
            url_prefix: url_prefix.into(),
            blobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, reference: &str) -> Option<Vec<u8>> {
        self.blobs.lock().ok()?.get(reference).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifacts {
    async fn put(&self, id: WorkId, ext: &str, bytes: &[u8]) -> Result<String> {
        let reference = format!("{}/{}", self.url_prefix, artifact_name(id, ext));
        self.blobs
            .lock()
            .map_err(|_| Error::Artifact("artifact map poisoned".to_string()))?
            .insert(reference.clone(), bytes.to_vec());
        Ok(reference)
    }

    async fn remove(&self, reference: &str) -> Result<bool> {
        Ok(self
            .blobs
            .lock()
            .map_err(|_| Error::Artifact("artifact map poisoned".to_string()))?
            .remove(reference)
            .is_some())
    }

    fn owns(&self, reference: &str) -> bool {
        file_name_of(&self.url_prefix, reference).is_some()
    }
}
