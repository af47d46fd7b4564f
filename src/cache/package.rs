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

//! Content-addressed cache for compiled package bitcode.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use cache::{CacheDir, CacheKey};
use digest::FileDigest;
use errors::*;

/// The fingerprint of a package compilation.
#[derive(Debug, Clone)]
pub struct PackageActionKey {
    pub import_path: String,
    pub codegen_version: u32,
    pub ir_toolchain_version: String,
    /// Stable encoding of the compiler configuration (flags, target triple,
    /// etc); produced by the orchestrator, opaque here.
    pub compiler_config: Vec<u8>,
    pub c_flags: Vec<String>,
    /// Per-source-file digests, keyed by path.
    pub file_digests: BTreeMap<PathBuf, FileDigest>,
    /// Per-imported-package action digests, keyed by import path.
    pub import_digests: BTreeMap<String, FileDigest>,
}

impl CacheKey for PackageActionKey {
    fn canonical_encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.import_path.as_bytes());
        buf.push(0);
        buf.extend_from_slice(&self.codegen_version.to_le_bytes());
        buf.extend_from_slice(self.ir_toolchain_version.as_bytes());
        buf.push(0);
        buf.extend_from_slice(&self.compiler_config);
        buf.push(0);
        for flag in &self.c_flags {
            buf.extend_from_slice(flag.as_bytes());
            buf.push(0);
        }
        for (path, digest) in &self.file_digests {
            buf.extend_from_slice(path.to_string_lossy().as_bytes());
            buf.push(b'=');
            buf.extend_from_slice(digest.as_hex().as_bytes());
            buf.push(0);
        }
        for (import, digest) in &self.import_digests {
            buf.extend_from_slice(import.as_bytes());
            buf.push(b'=');
            buf.extend_from_slice(digest.as_hex().as_bytes());
            buf.push(0);
        }
        buf
    }
}

/// Strategy for writing a freshly-compiled module to disk, selected by
/// platform: some IR toolchains cannot stream-write through a file
/// handle reliably, so those platforms buffer in memory unconditionally.
pub enum WriteStrategy {
    Streaming,
    InMemory,
}

pub fn write_strategy_for_platform() -> WriteStrategy {
    // The in-memory path sidesteps a known streaming-writer failure mode in
    // the IR toolchain on these platforms.
    if cfg!(target_os = "windows") {
        WriteStrategy::InMemory
    } else {
        WriteStrategy::Streaming
    }
}

/// Look up or produce the bitcode for `key`, returning its cache path.
///
/// `compile` is invoked only on a miss. It returns the serialized module
/// bytes; callers choose how those bytes were produced (streaming vs.
/// in-memory) based on [`write_strategy_for_platform`], but either way this
/// function publishes them the same atomic way.
pub fn compile_package<F>(cache: &CacheDir, key: &PackageActionKey, compile: F) -> Result<PathBuf>
where
    F: FnOnce() -> Result<Vec<u8>>,
{
    let digest = key.digest();
    if cache.exists("pkg-", &digest, "bc") {
        debug!("bitcode cache hit for {}: pkg-{}.bc", key.import_path, digest);
        return Ok(cache.entry_path("pkg-", &digest, "bc"));
    }

    debug!("bitcode cache miss for {}, compiling", key.import_path);
    let bytes = compile()?;
    let dest = cache.publish_bytes("pkg-", &digest, "bc", &bytes)?;
    info!("compiled package {} -> {}", key.import_path, dest.display());
    Ok(dest)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;

    fn key(import_path: &str) -> PackageActionKey {
        PackageActionKey {
            import_path: import_path.to_string(),
            codegen_version: 1,
            ir_toolchain_version: "14.0".to_string(),
            compiler_config: vec![1, 2, 3],
            c_flags: vec![],
            file_digests: BTreeMap::new(),
            import_digests: BTreeMap::new(),
        }
    }

    #[test]
    fn cold_then_warm_elides_second_compile() {
        let dir = ::tempfile::tempdir().unwrap();
        let cache = CacheDir::new(dir.path());
        let k = key("example.com/pkg");

        let first = compile_package(&cache, &k, || Ok(b"bitcode-v1".to_vec())).unwrap();
        let second = compile_package(&cache, &k, || -> Result<Vec<u8>> {
            panic!("bitcode cache should have elided recompilation")
        }).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn different_import_path_differs() {
        let dir = ::tempfile::tempdir().unwrap();
        let cache = CacheDir::new(dir.path());
        let a = compile_package(&cache, &key("pkg/a"), || Ok(b"x".to_vec())).unwrap();
        let b = compile_package(&cache, &key("pkg/b"), || Ok(b"x".to_vec())).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn different_import_digest_differs() {
        let dir = ::tempfile::tempdir().unwrap();
        let cache = CacheDir::new(dir.path());
        let mut k1 = key("pkg/a");
        k1.import_digests.insert("dep".to_string(), ::digest::hash_bytes(b"v1"));
        let mut k2 = key("pkg/a");
        k2.import_digests.insert("dep".to_string(), ::digest::hash_bytes(b"v2"));
        let a = compile_package(&cache, &k1, || Ok(b"x".to_vec())).unwrap();
        let b = compile_package(&cache, &k2, || Ok(b"x".to_vec())).unwrap();
        assert_ne!(a, b);
    }
}
