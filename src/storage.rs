//! The remote storage collaborator seam.
use std::fs;
use std::path::Path;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

/// Object storage as seen by the engine: opaque URIs in, local paths out.
///
/// Implementations are provided by the hosting environment (an object store
/// client, an HTTP gateway, ...). The engine only ever asks for whole
/// objects; ranged reads, retries and credentials are the implementation's
/// business. Errors are opaque [`anyhow::Error`]s and surface inside the
/// task that asked for the data.
pub trait Storage: Send + Sync {
    /// Download the object at `uri` into the local path `into`.
    ///
    /// `into` does not exist yet; its parent directory does. Directory-valued
    /// objects are written as a directory tree rooted at `into`.
    fn fetch(&self, uri: &str, into: &Utf8Path) -> anyhow::Result<()>;

    /// Upload the local file or directory at `from` to `uri`.
    fn store(&self, from: &Utf8Path, uri: &str) -> anyhow::Result<()>;
}

/// [`Storage`] rooted at a local directory, mapping URIs to relative paths.
///
/// This is the reference implementation used by tests and local runs; it
/// treats the URI (minus an optional `fs://` scheme) as a path under the
/// root. Keys that would escape the root are rejected.
pub struct FsStorage {
    root: Utf8PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, uri: &str) -> anyhow::Result<Utf8PathBuf> {
        let key = uri.strip_prefix("fs://").unwrap_or(uri);
        let key = key.trim_start_matches('/');

        let escapes = Utf8Path::new(key)
            .components()
            .any(|part| matches!(part, Utf8Component::ParentDir | Utf8Component::RootDir));
        if key.is_empty() || escapes {
            anyhow::bail!("invalid storage key '{uri}'");
        }

        Ok(self.root.join(key))
    }
}

impl Storage for FsStorage {
    fn fetch(&self, uri: &str, into: &Utf8Path) -> anyhow::Result<()> {
        let source = self.resolve(uri)?;
        if !source.exists() {
            anyhow::bail!("no object at '{uri}'");
        }

        if source.is_dir() {
            copy_rec(&source, into)?;
        } else {
            if let Some(dir) = into.parent() {
                fs::create_dir_all(dir)?;
            }
            fs::copy(&source, into)?;
        }

        Ok(())
    }

    fn store(&self, from: &Utf8Path, uri: &str) -> anyhow::Result<()> {
        let target = self.resolve(uri)?;

        if from.is_dir() {
            copy_rec(from, &target)?;
        } else {
            if let Some(dir) = target.parent() {
                fs::create_dir_all(dir)?;
            }
            fs::copy(from, &target)?;
        }

        Ok(())
    }
}

pub(crate) fn copy_rec(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> std::io::Result<()> {
    fs::create_dir_all(&dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let filetype = entry.file_type()?;
        if filetype.is_dir() {
            copy_rec(entry.path(), dst.as_ref().join(entry.file_name()))?;
        } else {
            fs::copy(entry.path(), dst.as_ref().join(entry.file_name()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn rooted() -> (tempfile::TempDir, FsStorage, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let storage = FsStorage::new(root.join("store"));
        (dir, storage, root)
    }

    #[test]
    fn file_roundtrip() {
        let (_guard, storage, scratch) = rooted();
        let original = scratch.join("in.txt");
        fs::write(&original, "hello").unwrap();

        storage.store(&original, "data/in.txt").unwrap();

        let fetched = scratch.join("fetched.txt");
        storage.fetch("data/in.txt", &fetched).unwrap();
        assert_eq!(fs::read_to_string(&fetched).unwrap(), "hello");
    }

    #[test]
    fn directory_roundtrip() {
        let (_guard, storage, scratch) = rooted();
        let tree = scratch.join("tree");
        fs::create_dir_all(tree.join("sub")).unwrap();
        fs::write(tree.join("a.txt"), "a").unwrap();
        fs::write(tree.join("sub/b.txt"), "b").unwrap();

        storage.store(&tree, "trees/tree").unwrap();

        let fetched = scratch.join("copy");
        storage.fetch("trees/tree", &fetched).unwrap();
        assert_eq!(fs::read_to_string(fetched.join("a.txt")).unwrap(), "a");
        assert_eq!(fs::read_to_string(fetched.join("sub/b.txt")).unwrap(), "b");
    }

    #[test]
    fn scheme_prefix_is_accepted() {
        let (_guard, storage, scratch) = rooted();
        let original = scratch.join("in.txt");
        fs::write(&original, "x").unwrap();

        storage.store(&original, "fs://data/in.txt").unwrap();

        let fetched = scratch.join("out.txt");
        storage.fetch("data/in.txt", &fetched).unwrap();
        assert_eq!(fs::read_to_string(&fetched).unwrap(), "x");
    }

    #[test]
    fn traversal_is_rejected() {
        let (_guard, storage, scratch) = rooted();
        let target = scratch.join("out.txt");

        assert!(storage.fetch("../escape", &target).is_err());
        assert!(storage.fetch("", &target).is_err());
        assert!(storage.store(&target, "a/../../escape").is_err());
    }

    #[test]
    fn missing_object_is_an_error() {
        let (_guard, storage, scratch) = rooted();
        let target = scratch.join("out.txt");
        assert!(storage.fetch("data/never-written", &target).is_err());
    }
}
