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

//! The two-phase, content-addressed cache for single C/assembly
//! translation units.
//!
//! The dependency manifest for a C file can only be discovered by compiling
//! it once, so the cache key for the *object* depends on a manifest that is
//! itself cached under a key computed *before* compilation. Two compiler
//! invocations racing on the same key converge on the same canonical
//! filenames, so no locking is required.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::Builder as NamedTempFileOptions;

use cache::{CacheDir, CacheKey};
use depfile::{dedup_then_sort, parse_dep_file};
use digest::{hash_file, FileDigest};
use errors::*;

/// Fingerprint of a C/assembly translation unit *before* its header set is
/// known.
#[derive(Debug, Clone)]
pub struct CFileDepKey {
    pub abs_path: PathBuf,
    pub source_digest: FileDigest,
    pub compiler_id: String,
    pub c_flags: Vec<String>,
    pub ir_toolchain_version: String,
}

impl CacheKey for CFileDepKey {
    fn canonical_encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.abs_path.to_string_lossy().as_bytes());
        buf.push(0);
        buf.extend_from_slice(self.source_digest.as_hex().as_bytes());
        buf.push(0);
        buf.extend_from_slice(self.compiler_id.as_bytes());
        buf.push(0);
        for flag in &self.c_flags {
            buf.extend_from_slice(flag.as_bytes());
            buf.push(0);
        }
        buf.extend_from_slice(self.ir_toolchain_version.as_bytes());
        buf
    }
}

/// A sorted, de-duplicated sequence of absolute paths: the transitive input
/// set of a C translation unit, including the primary source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepManifest(Vec<PathBuf>);

impl DepManifest {
    pub fn paths(&self) -> &[PathBuf] {
        &self.0
    }

    fn from_raw(mut paths: Vec<PathBuf>, primary: &Path) -> DepManifest {
        paths.push(primary.to_path_buf());
        DepManifest(dedup_then_sort(paths))
    }

    fn to_json_pretty(&self) -> Result<String> {
        let mut out = Vec::new();
        {
            let mut ser = ::serde_json::Serializer::with_formatter(
                &mut out,
                ::serde_json::ser::PrettyFormatter::with_indent(b"\t"),
            );
            ::serde::Serialize::serialize(self, &mut ser)
                .chain_err(|| "failed to serialize dependency manifest")?;
        }
        Ok(String::from_utf8(out).expect("json output is always valid utf8"))
    }

    fn from_json(text: &str) -> Result<DepManifest> {
        ::serde_json::from_str(text).chain_err(|| "failed to parse dependency manifest")
    }
}

/// Fingerprint identifying a specific cached object file: the depfile-name
/// digest plus every dependency path's own [`FileDigest`].
struct COutputKey<'a> {
    depfile_name_digest: &'a FileDigest,
    dep_digests: BTreeMap<PathBuf, FileDigest>,
}

impl<'a> CacheKey for COutputKey<'a> {
    fn canonical_encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.depfile_name_digest.as_hex().as_bytes());
        buf.push(0);
        for (path, digest) in &self.dep_digests {
            buf.extend_from_slice(path.to_string_lossy().as_bytes());
            buf.push(b'=');
            buf.extend_from_slice(digest.as_hex().as_bytes());
            buf.push(0);
        }
        buf
    }
}

fn hash_deps(paths: &[PathBuf]) -> Result<BTreeMap<PathBuf, FileDigest>> {
    let mut map = BTreeMap::new();
    for path in paths {
        let digest = hash_file(path)
            .chain_err(|| format!("failed to hash dependency {}", path.display()))?;
        map.insert(path.clone(), digest);
    }
    Ok(map)
}

/// Compile `abs_path` through the two-phase cache, returning the path to
/// the cached object file.
///
/// `invoke_compiler` performs the actual external compiler invocation: it
/// receives the object path and depfile path it must produce and is
/// responsible for returning an error if the compiler exits non-zero. It is
/// a parameter (rather than a hardcoded `Command`) so tests can stub the
/// compiler without spawning a real process.
pub fn compile_c<F>(
    cache: &CacheDir,
    abs_path: &Path,
    scratch_dir: &Path,
    compiler_id: &str,
    c_flags: &[String],
    ir_toolchain_version: &str,
    invoke_compiler: F,
) -> Result<PathBuf>
where
    F: FnOnce(&Path, &Path) -> Result<()>,
{
    let source_digest = hash_file(abs_path)
        .chain_err(|| format!("failed to hash source {}", abs_path.display()))?;
    let dep_key = CFileDepKey {
        abs_path: abs_path.to_path_buf(),
        source_digest,
        compiler_id: compiler_id.to_string(),
        c_flags: c_flags.to_vec(),
        ir_toolchain_version: ir_toolchain_version.to_string(),
    };
    let depfile_name_digest = dep_key.digest();

    // Step 2: an existing manifest may let us skip compilation entirely.
    if let Some(text) = cache.read_to_string("dep-", &depfile_name_digest, "json")? {
        if let Ok(manifest) = DepManifest::from_json(&text) {
            if let Ok(dep_digests) = hash_deps(manifest.paths()) {
                let output_key = COutputKey {
                    depfile_name_digest: &depfile_name_digest,
                    dep_digests,
                };
                let object_digest = output_key.digest();
                if cache.exists("obj-", &object_digest, "o") {
                    debug!("cache hit for {}: obj-{}.o", abs_path.display(), object_digest);
                    return Ok(cache.entry_path("obj-", &object_digest, "o"));
                }
            }
        } else {
            warn!(
                "stale or unparsable dependency manifest dep-{}.json for {}, recompiling",
                depfile_name_digest,
                abs_path.display()
            );
        }
    }

    // Step 3: miss. Compile for real, into fresh temporaries.
    debug!("cache miss for {}, invoking compiler", abs_path.display());
    let object_tmp = NamedTempFileOptions::new()
        .prefix("tmp-")
        .suffix(".o")
        .tempfile_in(cache.path())
        .chain_err(|| "failed to create temporary object file")?;
    let depfile_tmp = NamedTempFileOptions::new()
        .prefix("dep-")
        .suffix(".d")
        .tempfile_in(scratch_dir)
        .chain_err(|| "failed to create temporary depfile")?;

    invoke_compiler(object_tmp.path(), depfile_tmp.path())?;

    // Step 4: parse the fresh manifest, guarantee the primary source is
    // present, de-duplicate and sort.
    let raw_text = ::std::fs::read_to_string(depfile_tmp.path())
        .chain_err(|| format!("failed to read depfile {}", depfile_tmp.path().display()))?;
    let raw_paths = parse_dep_file(&raw_text, depfile_tmp.path())?;
    let manifest = DepManifest::from_raw(raw_paths, abs_path);

    // Step 5: publish the manifest unconditionally, absorbing any
    // divergence even when the key digest is unchanged.
    let manifest_json = manifest.to_json_pretty()?;
    cache.publish_bytes("dep-", &depfile_name_digest, "json", manifest_json.as_bytes())?;

    // Step 6: recompute the object key from the fresh manifest and publish.
    let dep_digests = hash_deps(manifest.paths())?;
    let output_key = COutputKey {
        depfile_name_digest: &depfile_name_digest,
        dep_digests,
    };
    let object_digest = output_key.digest();
    let dest = cache.publish_file("obj-", &object_digest, "o", object_tmp.path())?;

    info!(
        "compiled {} -> {} ({} dependencies)",
        abs_path.display(),
        dest.display(),
        manifest.paths().len()
    );
    Ok(dest)
}

/// Build the augmented compiler command line: request a quoted-dialect
/// dependency manifest targeting `deps`, and emit the object to
/// `object_path`.
pub fn compiler_command(
    compiler: &Path,
    c_flags: &[String],
    source: &Path,
    object_path: &Path,
    depfile_path: &Path,
) -> Command {
    let mut cmd = Command::new(compiler);
    cmd.args(c_flags);
    cmd.arg("-MD")
        .arg("-MV")
        .arg("-MTdeps")
        .arg("-MF")
        .arg(depfile_path);
    cmd.arg("-c").arg("-o").arg(object_path).arg(source);
    cmd
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use std::io::Write;

    fn write_depfile(path: &Path, contents: &str) {
        let mut f = fs::File::create(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    fn fixture() -> (::tempfile::TempDir, ::tempfile::TempDir, PathBuf, PathBuf) {
        let cache_dir = ::tempfile::tempdir().unwrap();
        let scratch_dir = ::tempfile::tempdir().unwrap();
        let src_dir = scratch_dir.path().join("src");
        fs::create_dir_all(&src_dir).unwrap();
        let source = src_dir.join("a.c");
        fs::write(&source, "int main(void) { return 0; }\n").unwrap();
        let header = src_dir.join("a.h");
        fs::write(&header, "#define X 1\n").unwrap();
        (cache_dir, scratch_dir, source, header)
    }

    fn fake_compile(object: &Path, depfile: &Path, deps_line: &str) -> Result<()> {
        fs::write(object, b"fake-object-contents").unwrap();
        write_depfile(depfile, deps_line);
        Ok(())
    }

    #[test]
    fn cold_compile_creates_dep_and_obj() {
        let (cache_dir, scratch_dir, source, header) = fixture();
        let cache = CacheDir::new(cache_dir.path());
        let deps_line = format!("deps: {} {}\n", source.display(), header.display());
        let obj = compile_c(
            &cache,
            &source,
            scratch_dir.path(),
            "clang",
            &["-O2".to_string()],
            "14.0",
            |object, depfile| fake_compile(object, depfile, &deps_line),
        ).unwrap();
        assert!(obj.is_file());
        assert!(obj.file_name().unwrap().to_str().unwrap().starts_with("obj-"));
    }

    #[test]
    fn warm_hit_skips_compiler() {
        let (cache_dir, scratch_dir, source, header) = fixture();
        let cache = CacheDir::new(cache_dir.path());
        let deps_line = format!("deps: {} {}\n", source.display(), header.display());
        let first = compile_c(
            &cache,
            &source,
            scratch_dir.path(),
            "clang",
            &["-O2".to_string()],
            "14.0",
            |object, depfile| fake_compile(object, depfile, &deps_line),
        ).unwrap();

        let second = compile_c(
            &cache,
            &source,
            scratch_dir.path(),
            "clang",
            &["-O2".to_string()],
            "14.0",
            |_object, _depfile| -> Result<()> { panic!("compiler should not be invoked on a warm hit") },
        ).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn flag_change_yields_different_object() {
        let (cache_dir, scratch_dir, source, header) = fixture();
        let cache = CacheDir::new(cache_dir.path());
        let deps_line = format!("deps: {} {}\n", source.display(), header.display());
        let first = compile_c(
            &cache,
            &source,
            scratch_dir.path(),
            "clang",
            &["-O2".to_string()],
            "14.0",
            |object, depfile| fake_compile(object, depfile, &deps_line),
        ).unwrap();
        let second = compile_c(
            &cache,
            &source,
            scratch_dir.path(),
            "clang",
            &["-O1".to_string()],
            "14.0",
            |object, depfile| fake_compile(object, depfile, &deps_line),
        ).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn header_mutation_publishes_new_object() {
        let (cache_dir, scratch_dir, source, header) = fixture();
        let cache = CacheDir::new(cache_dir.path());
        let deps_line = format!("deps: {} {}\n", source.display(), header.display());
        let first = compile_c(
            &cache,
            &source,
            scratch_dir.path(),
            "clang",
            &["-O2".to_string()],
            "14.0",
            |object, depfile| fake_compile(object, depfile, &deps_line),
        ).unwrap();

        fs::write(&header, "#define X 2\n").unwrap();

        let second = compile_c(
            &cache,
            &source,
            scratch_dir.path(),
            "clang",
            &["-O2".to_string()],
            "14.0",
            |object, depfile| fake_compile(object, depfile, &deps_line),
        ).unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn malformed_depfile_surfaces_error() {
        let (cache_dir, scratch_dir, source, _header) = fixture();
        let cache = CacheDir::new(cache_dir.path());
        let err = compile_c(
            &cache,
            &source,
            scratch_dir.path(),
            "clang",
            &["-O2".to_string()],
            "14.0",
            |object, depfile| fake_compile(object, depfile, "not-a-deps-line\n"),
        );
        assert!(err.is_err());
    }
}
