//! Scoped temporary directories.
//!
//! A root generator is created once per [`crate::ImageFetcher`]; every
//! acquisition gets a nested child generator so its scratch space can be
//! removed on its own, while the root can remove everything in bulk.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use imgsrc_core::error::{ImageError, Result};
use parking_lot::Mutex;

/// Creates uniquely named directories below one root.
#[derive(Debug, Clone)]
pub struct TempDirGenerator {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    parent: Option<Weak<Inner>>,
    /// Live child scopes. Entries leave on the child's cleanup or drop.
    children: Mutex<Vec<Weak<Inner>>>,
}

impl TempDirGenerator {
    /// Create a root below the system temp directory.
    pub fn new(prefix: &str) -> Result<Self> {
        Self::new_in(&std::env::temp_dir(), prefix)
    }

    /// Create a root below `parent`.
    pub fn new_in(parent: &Path, prefix: &str) -> Result<Self> {
        let root = unique_dir(parent, prefix)?;
        tracing::debug!(root = %root.display(), "Created temp dir root");
        Ok(Self::with_root(root, None))
    }

    fn with_root(root: PathBuf, parent: Option<Weak<Inner>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                root,
                parent,
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Create a nested generator whose directories live below this one.
    pub fn new_generator(&self) -> Result<Self> {
        let root = unique_dir(&self.inner.root, "scope")?;
        let child = Self::with_root(root, Some(Arc::downgrade(&self.inner)));
        let mut children = self.inner.children.lock();
        children.retain(|c| c.strong_count() > 0);
        children.push(Arc::downgrade(&child.inner));
        Ok(child)
    }

    #[cfg(test)]
    fn tracked_children(&self) -> usize {
        let mut children = self.inner.children.lock();
        children.retain(|c| c.strong_count() > 0);
        children.len()
    }

    /// Create a fresh, uniquely named directory.
    pub fn new_temp_dir(&self) -> Result<PathBuf> {
        unique_dir(&self.inner.root, "tmp")
    }

    /// Remove the root and everything below it. Safe to call repeatedly.
    pub fn cleanup(&self) -> Result<()> {
        let children = std::mem::take(&mut *self.inner.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            Self { inner: child }.cleanup()?;
        }
        if let Some(parent) = self.inner.parent.as_ref().and_then(Weak::upgrade) {
            let me = Arc::as_ptr(&self.inner);
            parent.children.lock().retain(|c| c.as_ptr() != me);
        }
        match std::fs::remove_dir_all(&self.inner.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ImageError::TempDir {
                path: self.inner.root.display().to_string(),
                message: format!("failed to remove: {}", e),
            }),
        }
    }
}

fn unique_dir(parent: &Path, prefix: &str) -> Result<PathBuf> {
    let dir = parent.join(format!("{}-{}", prefix, uuid::Uuid::new_v4().simple()));
    std::fs::create_dir_all(&dir).map_err(|e| ImageError::TempDir {
        path: dir.display().to_string(),
        message: format!("failed to create: {}", e),
    })?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_dirs_are_unique_and_nested() {
        let parent = TempDir::new().unwrap();
        let root = TempDirGenerator::new_in(parent.path(), "imgsrc").unwrap();

        let a = root.new_temp_dir().unwrap();
        let b = root.new_temp_dir().unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with(root.root()));
        assert!(a.is_dir() && b.is_dir());
    }

    #[test]
    fn test_child_cleanup_leaves_root() {
        let parent = TempDir::new().unwrap();
        let root = TempDirGenerator::new_in(parent.path(), "imgsrc").unwrap();
        let child = root.new_generator().unwrap();
        let dir = child.new_temp_dir().unwrap();
        assert!(dir.starts_with(root.root()));

        child.cleanup().unwrap();
        assert!(!dir.exists());
        assert!(root.root().exists());
    }

    #[test]
    fn test_finished_children_are_not_retained() {
        let parent = TempDir::new().unwrap();
        let root = TempDirGenerator::new_in(parent.path(), "imgsrc").unwrap();

        // cleaned up but still held, as a returned image would
        let kept = root.new_generator().unwrap();
        kept.cleanup().unwrap();
        assert_eq!(root.tracked_children(), 0);

        for _ in 0..10 {
            let child = root.new_generator().unwrap();
            child.new_temp_dir().unwrap();
        }
        assert_eq!(root.tracked_children(), 0);

        let live = root.new_generator().unwrap();
        assert_eq!(root.tracked_children(), 1);
        drop(kept);
        root.cleanup().unwrap();
        assert!(!live.root().exists());
    }

    #[test]
    fn test_root_cleanup_removes_everything() {
        let parent = TempDir::new().unwrap();
        let root = TempDirGenerator::new_in(parent.path(), "imgsrc").unwrap();
        let child = root.new_generator().unwrap();
        let dir = child.new_temp_dir().unwrap();
        std::fs::write(dir.join("image.tar"), b"data").unwrap();

        root.cleanup().unwrap();
        assert!(!root.root().exists());
        // already gone
        root.cleanup().unwrap();
        child.cleanup().unwrap();
    }
}
