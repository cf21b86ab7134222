use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use util::PathEncodingError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Specified project folder \"{0}\" is not a directory")]
    NotDirectory(String),
    #[error("Can't perform IO operation: \"{0}\" is not whitelisted")]
    NotWhitelisted(String),
}

/// All destructive file operations in the crate should go through this struct.
///
/// Every destructive operation checks that the path in question is strictly
/// inside the single whitelisted prefix (the project folder); otherwise it is
/// not performed. Nothing is modified at all during a dry run.
#[derive(Debug)]
pub struct Fs {
    /// The directory we are allowed to modify
    prefix: PathBuf,
    /// if true, prevents all destructive operations
    dry_run: bool,
}

impl Fs {
    /// Create a new `Fs` that may modify the contents of `prefix`.
    pub fn new(prefix: &Path, dry_run: bool) -> Result<Self> {
        if !prefix.is_dir() {
            return Err(Error::NotDirectory(
                prefix.to_str().ok_or(PathEncodingError)?.to_owned(),
            )
            .into());
        }
        let prefix = prefix
            .canonicalize()
            .with_context(|| format!("while resolving {prefix:?}"))?;
        Ok(Self { prefix, dry_run })
    }

    /// Check if path exists on disk.
    pub fn exists<T: AsRef<Path>>(&self, path: T) -> bool {
        let path = path.as_ref();
        path.exists() || path.is_symlink()
    }

    /// Recursively delete a directory.
    pub fn delete_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::remove_dir_all(path).with_context(|| format!("deleting dir {path:?}"))?;
        Ok(())
    }

    fn is_whitelisted(&self, path: &Path) -> bool {
        // resolve symlinks and "..", so they can't be used to escape the prefix:
        let Ok(path) = path.canonicalize() else {
            return false;
        };
        path != self.prefix && path.starts_with(&self.prefix)
    }

    fn check_whitelist(&self, path: &Path) -> Result<()> {
        if self.dry_run || !self.is_whitelisted(path) {
            Err(Error::NotWhitelisted(path.to_str().ok_or(PathEncodingError)?.to_owned()).into())
        } else {
            Ok(())
        }
    }
}
