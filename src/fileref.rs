//! Deferred, location-transparent file references.
use std::sync::OnceLock;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::FileError;
use crate::storage::Storage;

/// Whether a reference stands for a single file or a directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileKind {
    File,
    Dir,
}

/// A handle to file-valued data that may or may not be on the local disk yet.
///
/// A `FileRef` lets a task body be written as if its files were always local:
/// the body calls [`materialize`](FileRef::materialize) (usually through
/// [`TaskContext::materialize`](crate::TaskContext::materialize)) and gets a
/// path, whether the bytes started out next door or behind a [`Storage`]
/// implementation. The first call fetches and caches; later calls return the
/// same path without touching storage again.
///
/// Each reference is owned by a single task invocation. Passing a value to a
/// downstream task clones the reference, so consumers never observe each
/// other's materialization state.
#[derive(Debug)]
pub struct FileRef {
    /// Remote URI the bytes can be fetched from, if any.
    origin: Option<String>,
    /// URI the bytes should be published to once the owning task succeeds.
    destination: Option<String>,
    /// Local path, either set at construction or filled by the first fetch.
    local: OnceLock<Utf8PathBuf>,
}

impl FileRef {
    /// A reference to remote data, not yet materialized.
    pub fn remote(uri: impl Into<String>) -> Self {
        Self {
            origin: Some(uri.into()),
            destination: None,
            local: OnceLock::new(),
        }
    }

    /// A reference to data already on the local filesystem.
    pub fn local(path: impl Into<Utf8PathBuf>) -> Self {
        let local = OnceLock::new();
        let _ = local.set(path.into());
        Self {
            origin: None,
            destination: None,
            local,
        }
    }

    /// Marks this value for publication: once the task that produced it
    /// completes successfully, the executor uploads the local bytes to `uri`.
    /// Values without a destination are never published.
    pub fn publish_to(mut self, uri: impl Into<String>) -> Self {
        self.destination = Some(uri.into());
        self
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// The local path, if the data is already materialized. Never fetches.
    pub fn local_path(&self) -> Option<&Utf8Path> {
        self.local.get().map(Utf8PathBuf::as_path)
    }

    /// Returns a local path for the referenced data, fetching it into
    /// `staging` on the first call.
    ///
    /// The call is idempotent: once a path has been produced it is returned
    /// for the remainder of the owning task execution, and storage is not
    /// contacted again. May block on I/O. A failed fetch leaves the
    /// reference unmaterialized, so the task sees the error and the engine
    /// does not retry behind its back.
    pub fn materialize(
        &self,
        storage: &dyn Storage,
        staging: &Utf8Path,
    ) -> Result<&Utf8Path, FileError> {
        if let Some(path) = self.local.get() {
            return Ok(path);
        }

        let origin = self.origin.as_deref().ok_or(FileError::Unresolvable)?;
        let target = staging.join(staging_name(origin));

        storage
            .fetch(origin, &target)
            .map_err(|source| FileError::Fetch {
                uri: origin.to_string(),
                source,
            })?;

        // If two threads raced here, the first write wins and the loser's
        // copy is simply left unused in staging.
        Ok(self.local.get_or_init(|| target))
    }

    /// Uploads the local bytes to the declared destination, if any.
    ///
    /// Executors call this after the producing task completes successfully.
    /// A reference without a destination is a no-op.
    pub fn publish(&self, storage: &dyn Storage) -> Result<(), FileError> {
        let Some(destination) = self.destination.as_deref() else {
            return Ok(());
        };
        let path = self.local.get().ok_or(FileError::Unresolvable)?;

        storage
            .store(path, destination)
            .map_err(|source| FileError::Publish {
                path: path.clone(),
                uri: destination.to_string(),
                source,
            })
    }

    /// Same reference pointed at a new local home. Used by executors after
    /// copying a staged output somewhere durable.
    pub(crate) fn rehomed(&self, path: Utf8PathBuf) -> Self {
        let local = OnceLock::new();
        let _ = local.set(path);
        Self {
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            local,
        }
    }
}

impl Clone for FileRef {
    fn clone(&self) -> Self {
        let local = OnceLock::new();
        if let Some(path) = self.local.get() {
            let _ = local.set(path.clone());
        }
        Self {
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            local,
        }
    }
}

impl PartialEq for FileRef {
    fn eq(&self, other: &Self) -> bool {
        self.origin == other.origin
            && self.destination == other.destination
            && self.local.get() == other.local.get()
    }
}

/// Collision-free staging file name for a URI: a short content-independent
/// hash prefix plus the original base name, so staged files stay readable
/// in a debugger.
fn staging_name(uri: &str) -> String {
    let hash = blake3::hash(uri.as_bytes()).to_hex();
    let base = uri
        .rsplit('/')
        .find(|part| !part.is_empty())
        .unwrap_or("data");
    format!("{}-{base}", &hash.as_str()[..12])
}
