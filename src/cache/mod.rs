// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Shared plumbing for the content-addressed caches.
//!
//! Both [`c_file`] and [`package`] share the same shape: canonical encoding
//! of a key, hash that encoding to a digest, turn the digest into a
//! filename under a fixed prefix, and publish by renaming a fully-written
//! temporary onto that filename. This module is the one place that shape is
//! implemented; the two cache kinds differ only in their key structure and
//! filename prefix.

pub mod c_file;
pub mod package;

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tempfile::Builder as NamedTempFileOptions;

use digest::FileDigest;
use errors::*;

/// A cache key whose canonical, re-serialization-stable encoding can be
/// hashed to form a cache filename.
pub trait CacheKey {
    /// Stable byte encoding: equal keys must encode identically and the
    /// encoding must not depend on map iteration order or similar
    /// nondeterminism.
    fn canonical_encode(&self) -> Vec<u8>;

    fn digest(&self) -> FileDigest {
        ::digest::hash_bytes(&self.canonical_encode())
    }
}

/// The cache directory: a single flat directory whose entries are entirely
/// hash-derived, shared read/write across concurrent driver invocations.
#[derive(Debug, Clone)]
pub struct CacheDir(PathBuf);

impl CacheDir {
    pub fn new<P: Into<PathBuf>>(path: P) -> CacheDir {
        CacheDir(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// The canonical filename for an entry with the given prefix, digest
    /// and extension, e.g. `pkg-<hex>.bc`.
    pub fn entry_path(&self, prefix: &str, digest: &FileDigest, ext: &str) -> PathBuf {
        self.0.join(format!("{}{}.{}", prefix, digest.as_hex(), ext))
    }

    pub fn exists(&self, prefix: &str, digest: &FileDigest, ext: &str) -> bool {
        self.entry_path(prefix, digest, ext).is_file()
    }

    /// Write `contents` to a private temporary in this directory and
    /// atomically rename it onto the canonical name for `(prefix, digest,
    /// ext)`. Returns the canonical path.
    ///
    /// Because the destination name is determined solely by the content
    /// hash, concurrent writers racing to publish the same key write
    /// equivalent content and their renames are idempotent with respect to
    /// each other: no locking is required.
    pub fn publish_bytes(
        &self,
        prefix: &str,
        digest: &FileDigest,
        ext: &str,
        contents: &[u8],
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.0)
            .chain_err(|| format!("failed to create cache directory {}", self.0.display()))?;
        let mut tmp = NamedTempFileOptions::new()
            .prefix("tmp-")
            .tempfile_in(&self.0)
            .chain_err(|| format!("failed to create temporary file in {}", self.0.display()))?;
        use std::io::Write;
        tmp.write_all(contents)
            .chain_err(|| "failed to write temporary cache entry")?;
        tmp.flush().chain_err(|| "failed to flush temporary cache entry")?;
        let dest = self.entry_path(prefix, digest, ext);
        tmp.persist(&dest)
            .map_err(|e| e.error)
            .chain_err(|| format!("failed to publish cache entry {}", dest.display()))?;
        Ok(dest)
    }

    /// Copy the file at `src` into the cache under `(prefix, digest, ext)`,
    /// via the same temp-then-rename protocol.
    pub fn publish_file(
        &self,
        prefix: &str,
        digest: &FileDigest,
        ext: &str,
        src: &Path,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.0)
            .chain_err(|| format!("failed to create cache directory {}", self.0.display()))?;
        let mut tmp = NamedTempFileOptions::new()
            .prefix("tmp-")
            .tempfile_in(&self.0)
            .chain_err(|| format!("failed to create temporary file in {}", self.0.display()))?;
        {
            let mut source = File::open(src)
                .chain_err(|| format!("failed to open {} for publishing", src.display()))?;
            ::std::io::copy(&mut source, tmp.as_file_mut())
                .chain_err(|| "failed to copy into temporary cache entry")?;
        }
        let dest = self.entry_path(prefix, digest, ext);
        tmp.persist(&dest)
            .map_err(|e| e.error)
            .chain_err(|| format!("failed to publish cache entry {}", dest.display()))?;
        Ok(dest)
    }

    pub fn read_to_string(&self, prefix: &str, digest: &FileDigest, ext: &str) -> Result<Option<String>> {
        let path = self.entry_path(prefix, digest, ext);
        match fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(ref e) if e.kind() == ::std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).chain_err(|| format!("failed to read cache entry {}", path.display())),
        }
    }
}

/// Resolve the "cache off" sentinel (see `Config::cache_dir`) to a
/// per-invocation scratch directory that implements the same on-disk
/// protocol, so callers never need a separate code path for the disabled
/// case.
pub fn resolve(configured: &Option<PathBuf>, scratch: &Path) -> CacheDir {
    match configured {
        Some(path) => CacheDir::new(path.clone()),
        None => CacheDir::new(scratch.to_path_buf()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn publish_then_exists() {
        let dir = ::tempfile::tempdir().unwrap();
        let cache = CacheDir::new(dir.path());
        let digest = ::digest::hash_bytes(b"hello");
        assert!(!cache.exists("obj-", &digest, "o"));
        let path = cache.publish_bytes("obj-", &digest, "o", b"hello").unwrap();
        assert!(cache.exists("obj-", &digest, "o"));
        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn no_partial_file_left_under_canonical_name_on_success() {
        let dir = ::tempfile::tempdir().unwrap();
        let cache = CacheDir::new(dir.path());
        let digest = ::digest::hash_bytes(b"payload");
        cache.publish_bytes("dep-", &digest, "json", b"payload").unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert!(entries.iter().all(|name| !name.starts_with("tmp-")));
    }
}
