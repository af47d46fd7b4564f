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

//! Parser for the "quoted NMake" dependency manifest dialect emitted by the
//! C compiler when asked for `-MD -MV -MTdeps -MF <depfile>`.
//!
//! Only the first physical line is meaningful. Backslash-newline
//! continuations are folded into that line before parsing begins.

use std::path::{Path, PathBuf};

use errors::*;

/// Parse a dependency manifest's textual contents into an ordered list of
/// paths, preserving duplicates and original order.
///
/// Empty input yields an empty list. A missing `deps:` prefix, or an
/// unmatched opening quote, is `ErrorKind::MalformedDepFile`.
pub fn parse_dep_file(contents: &str, origin: &Path) -> Result<Vec<PathBuf>> {
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }

    // Fold `\`-newline continuations into a single logical first line.
    let folded = contents.replace("\\\r\n", " ").replace("\\\n", " ");
    let first_line = folded.lines().next().unwrap_or("");

    let rest = match strip_deps_prefix(first_line) {
        Some(rest) => rest,
        None => return Err(ErrorKind::MalformedDepFile(origin.to_path_buf()).into()),
    };

    split_paths(rest, origin)
}

fn strip_deps_prefix(line: &str) -> Option<&str> {
    let line = line.trim_start();
    let rest = line.strip_prefix_str("deps:")?;
    // Must be followed by whitespace, unless the manifest is otherwise empty.
    if rest.is_empty() {
        return Some(rest);
    }
    if rest.starts_with(|c: char| c.is_whitespace()) {
        Some(rest)
    } else {
        None
    }
}

/// Split the remainder of the `deps:` line into individual paths. A token
/// starting with `"` runs to the next `"`; otherwise it runs to the next
/// whitespace character.
fn split_paths(rest: &str, origin: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    let chars: Vec<char> = rest.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= chars.len() {
            break;
        }
        if chars[i] == '"' {
            let start = i + 1;
            let mut end = start;
            let mut closed = false;
            while end < chars.len() {
                if chars[end] == '"' {
                    closed = true;
                    break;
                }
                end += 1;
            }
            if !closed {
                return Err(ErrorKind::MalformedDepFile(origin.to_path_buf()).into());
            }
            let token: String = chars[start..end].iter().collect();
            paths.push(PathBuf::from(token));
            i = end + 1;
        } else {
            let start = i;
            let mut end = start;
            while end < chars.len() && !chars[end].is_whitespace() {
                end += 1;
            }
            let token: String = chars[start..end].iter().collect();
            paths.push(PathBuf::from(token));
            i = end;
        }
    }
    Ok(paths)
}

/// Tiny `str::strip_prefix` shim so this crate stays buildable on older
/// stable compilers where the method isn't available yet.
trait StripPrefixStr {
    fn strip_prefix_str<'a>(&'a self, prefix: &str) -> Option<&'a str>;
}

impl StripPrefixStr for str {
    fn strip_prefix_str<'a>(&'a self, prefix: &str) -> Option<&'a str> {
        if self.starts_with(prefix) {
            Some(&self[prefix.len()..])
        } else {
            None
        }
    }
}

/// De-duplicate `paths` while preserving first-occurrence order, then sort
/// lexicographically to produce the canonical on-disk ordering used by
/// [`DepManifest`](crate::cache::c_file::DepManifest).
pub fn dedup_then_sort(mut paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = ::std::collections::HashSet::new();
    paths.retain(|p| seen.insert(p.clone()));
    paths.sort();
    paths
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::PathBuf;

    fn origin() -> PathBuf {
        PathBuf::from("/tmp/whatever.d")
    }

    #[test]
    fn empty_input_yields_empty_list() {
        assert_eq!(parse_dep_file("", &origin()).unwrap(), Vec::<PathBuf>::new());
        assert_eq!(parse_dep_file("   \n", &origin()).unwrap(), Vec::<PathBuf>::new());
    }

    #[test]
    fn simple_paths() {
        let parsed = parse_dep_file("deps: /tmp/foo.c /tmp/qux.h\n", &origin()).unwrap();
        assert_eq!(parsed, vec![PathBuf::from("/tmp/foo.c"), PathBuf::from("/tmp/qux.h")]);
    }

    #[test]
    fn quoted_path_with_spaces() {
        let parsed = parse_dep_file(
            "deps: /tmp/foo.c \"/tmp/bar baz.h\" /tmp/qux.h\n",
            &origin(),
        ).unwrap();
        assert_eq!(
            parsed,
            vec![
                PathBuf::from("/tmp/foo.c"),
                PathBuf::from("/tmp/bar baz.h"),
                PathBuf::from("/tmp/qux.h"),
            ]
        );
    }

    #[test]
    fn path_at_end_of_line_with_no_trailing_whitespace() {
        let parsed = parse_dep_file("deps: /tmp/foo.c", &origin()).unwrap();
        assert_eq!(parsed, vec![PathBuf::from("/tmp/foo.c")]);
    }

    #[test]
    fn only_first_physical_line_considered() {
        let parsed = parse_dep_file("deps: /tmp/a.c\n/tmp/b.c: /tmp/a.c\n", &origin()).unwrap();
        assert_eq!(parsed, vec![PathBuf::from("/tmp/a.c")]);
    }

    #[test]
    fn backslash_newline_continuation_is_folded() {
        let parsed = parse_dep_file("deps: /tmp/a.c \\\n  /tmp/b.c\n", &origin()).unwrap();
        assert_eq!(parsed, vec![PathBuf::from("/tmp/a.c"), PathBuf::from("/tmp/b.c")]);
    }

    #[test]
    fn missing_deps_prefix_is_malformed() {
        let err = parse_dep_file("/tmp/a.c: /tmp/b.c\n", &origin());
        assert!(err.is_err());
    }

    #[test]
    fn unmatched_quote_is_malformed() {
        let err = parse_dep_file("deps: \"/tmp/unterminated.h\n", &origin());
        assert!(err.is_err());
    }

    #[test]
    fn dedup_preserves_first_occurrence_then_sorts() {
        let paths = vec![
            PathBuf::from("/z.h"),
            PathBuf::from("/a.h"),
            PathBuf::from("/z.h"),
            PathBuf::from("/m.h"),
        ];
        assert_eq!(
            dedup_then_sort(paths),
            vec![PathBuf::from("/a.h"), PathBuf::from("/m.h"), PathBuf::from("/z.h")],
        );
    }
}
