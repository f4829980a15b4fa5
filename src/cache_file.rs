//! On-disk copy of the last successfully fetched configuration.
use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::obfuscation::md5_hex;

/// Opaque byte storage for the last fetched configuration body.
pub trait ConfigurationCache: Send + Sync {
    /// Returns `Ok(None)` when nothing has been cached yet.
    fn read(&self) -> io::Result<Option<Vec<u8>>>;

    /// Replace the cached bytes.
    fn write(&self, bytes: &[u8]) -> io::Result<()>;

    /// Remove the cached bytes. Deleting a missing cache is not an error.
    fn delete(&self) -> io::Result<()>;
}

/// [`ConfigurationCache`] stored in a single file.
#[derive(Debug, Clone)]
pub struct CacheFile {
    path: PathBuf,
}

impl CacheFile {
    /// Cache stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> CacheFile {
        CacheFile { path: path.into() }
    }

    /// Cache file for the flag configuration of `api_key` inside `directory`.
    pub fn for_flags(directory: impl AsRef<Path>, api_key: &str) -> CacheFile {
        let file_name = format!("eppo-sdk-config-v4-flags-{}.json", safe_cache_key(api_key));
        CacheFile::new(directory.as_ref().join(file_name))
    }

    /// Cache file for the precomputed configuration of `subject_key`.
    pub fn for_precomputed(
        directory: impl AsRef<Path>,
        api_key: &str,
        subject_key: &str,
    ) -> CacheFile {
        let subject_hash = md5_hex(subject_key);
        let file_name = format!(
            "eppo-sdk-precomputed-{}-{}.json",
            safe_cache_key(api_key),
            &subject_hash[..8]
        );
        CacheFile::new(directory.as_ref().join(file_name))
    }

    /// Location of the cache file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// First 8 characters of `api_key` with anything but word characters removed.
fn safe_cache_key(api_key: &str) -> String {
    api_key
        .chars()
        .take(8)
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

impl ConfigurationCache for CacheFile {
    fn read(&self) -> io::Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Readers never observe a half-written file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)
    }

    fn delete(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}
