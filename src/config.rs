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

//! Driver configuration: where the cache lives, what toolchain versions are
//! in play, and what output is being requested.

use std::env;
use std::path::PathBuf;

use directories::ProjectDirs;

pub const ORGANIZATION: &str = "example";
const APP_NAME: &str = "aotbuild";

/// Optimization levels the pipeline understands; anything else is an
/// `UnknownOption` error before any job is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptLevel {
    None,
    Less,
    Default,
    Aggressive,
}

impl OptLevel {
    pub fn parse(s: &str) -> ::errors::Result<OptLevel> {
        match s {
            "0" => Ok(OptLevel::None),
            "1" => Ok(OptLevel::Less),
            "2" => Ok(OptLevel::Default),
            "s" | "z" => Ok(OptLevel::Aggressive),
            other => Err(::errors::ErrorKind::UnknownOption("opt".to_string(), other.to_string()).into()),
        }
    }
}

/// The requested final artifact kind, inferred from the output file
/// extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Object,
    Bitcode,
    TextIr,
    Elf,
    IntelHex,
    RawBinary,
    Uf2,
    Esp,
}

impl OutputKind {
    pub fn from_extension(ext: &str) -> OutputKind {
        match ext {
            "o" => OutputKind::Object,
            "bc" => OutputKind::Bitcode,
            "ll" => OutputKind::TextIr,
            "hex" => OutputKind::IntelHex,
            "bin" => OutputKind::RawBinary,
            "uf2" => OutputKind::Uf2,
            "esp" => OutputKind::Esp,
            _ => OutputKind::Elf,
        }
    }

    /// Whether this output is an intermediate artifact that can be emitted
    /// straight from the link+optimize job without a full link.
    pub fn is_intermediate(&self) -> bool {
        match *self {
            OutputKind::Object | OutputKind::Bitcode | OutputKind::TextIr => true,
            _ => false,
        }
    }
}

/// Top-level driver configuration, built once at orchestration start.
#[derive(Debug, Clone)]
pub struct Config {
    /// `None` means caching is disabled; the orchestrator substitutes a
    /// per-invocation scratch directory.
    pub cache_dir: Option<PathBuf>,
    pub ir_toolchain_version: String,
    pub codegen_version: u32,
    pub c_compiler: PathBuf,
    pub c_flags: Vec<String>,
    pub linker_flags: Vec<String>,
    pub libc: Option<String>,
    pub opt_level: OptLevel,
    pub output_kind: OutputKind,
    pub automatic_stack_sizing: bool,
}

impl Config {
    /// Resolve the default cache directory: an environment override,
    /// falling back to the OS-appropriate cache directory for
    /// `(ORGANIZATION, APP_NAME)` via `directories::ProjectDirs`.
    pub fn default_cache_dir() -> Option<PathBuf> {
        if let Some(over) = env::var_os("AOTBUILD_CACHE_DISABLE") {
            if over == "1" {
                return None;
            }
        }
        if let Some(dir) = env::var_os("AOTBUILD_CACHE_DIR") {
            return Some(PathBuf::from(dir));
        }
        let dirs = ProjectDirs::from("", ORGANIZATION, APP_NAME);
        Some(dirs.cache_dir().to_path_buf())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn opt_level_rejects_unknown_value() {
        assert!(OptLevel::parse("9").is_err());
        assert!(OptLevel::parse("2").is_ok());
    }

    #[test]
    fn output_kind_defaults_to_elf() {
        assert_eq!(OutputKind::from_extension("out"), OutputKind::Elf);
        assert_eq!(OutputKind::from_extension("o"), OutputKind::Object);
    }

    #[test]
    fn intermediate_outputs_identified() {
        assert!(OutputKind::Object.is_intermediate());
        assert!(!OutputKind::Elf.is_intermediate());
    }
}
