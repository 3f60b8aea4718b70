#![forbid(unsafe_code)]

//! Per-request ownership of temporary files.
//!
//! An [`ArtifactSet`] owns one work directory below the configured temp root
//! and every path registered inside it. Dropping the set deletes all of
//! them, so every exit path of a request (error return, timeout, cancelled
//! future, finished response body) releases its disk usage exactly once.
//!
//! A drop on a multi-threaded runtime hands the deletion to the blocking
//! pool; anywhere else it runs inline.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug)]
pub struct ArtifactSet {
    request_id: String,
    work_dir: PathBuf,
    paths: Vec<PathBuf>,
    released: bool,
}

impl ArtifactSet {
    /// Creates `<temp_root>/<request id>`. The set owns the directory from
    /// this point on, even if nothing is registered in it.
    pub async fn create(temp_root: &Path) -> io::Result<Self> {
        tokio::fs::create_dir_all(temp_root).await?;
        let request_id = Uuid::new_v4().simple().to_string();
        let work_dir = temp_root.join(&request_id);
        tokio::fs::create_dir(&work_dir).await?;
        debug!(%request_id, work_dir = %work_dir.display(), "created work directory");
        Ok(Self {
            request_id,
            work_dir,
            paths: Vec::new(),
            released: false,
        })
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Short token used to keep filenames unique inside the work directory.
    pub fn discriminator(&self) -> &str {
        &self.request_id[..8]
    }

    /// Records a path for deletion. Registering before the producing tool
    /// starts covers partially written output.
    pub fn register(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path);
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.iter().any(|registered| registered == path)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Deletes every registered path and the work directory before
    /// returning. Idempotent; a path that is already gone is not an error.
    pub fn release(&mut self) {
        if let Some(batch) = self.take_batch() {
            batch.remove();
        }
    }

    fn take_batch(&mut self) -> Option<RemovalBatch> {
        if self.released {
            return None;
        }
        self.released = true;
        Some(RemovalBatch {
            request_id: self.request_id.clone(),
            paths: std::mem::take(&mut self.paths),
            work_dir: self.work_dir.clone(),
        })
    }
}

impl Drop for ArtifactSet {
    fn drop(&mut self) {
        let Some(batch) = self.take_batch() else {
            return;
        };
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                handle.spawn_blocking(move || batch.remove());
            }
            _ => batch.remove(),
        }
    }
}

/// Everything one set still has to delete.
struct RemovalBatch {
    request_id: String,
    paths: Vec<PathBuf>,
    work_dir: PathBuf,
}

impl RemovalBatch {
    fn remove(self) {
        for path in &self.paths {
            if let Err(err) = remove_path(path) {
                warn!(
                    request_id = %self.request_id,
                    path = %path.display(),
                    error = %err,
                    "failed to delete artifact"
                );
            }
        }
        if let Err(err) = remove_path(&self.work_dir) {
            warn!(
                request_id = %self.request_id,
                path = %self.work_dir.display(),
                error = %err,
                "failed to delete work directory"
            );
        }
        debug!(request_id = %self.request_id, "artifacts released");
    }
}

fn remove_path(path: &Path) -> io::Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) => Err(err),
    };
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
