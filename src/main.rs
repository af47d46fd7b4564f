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

//! CLI entry point: a thin driver over the orchestration core in `lib.rs`.
//!
//! This binary exercises the cache and job-graph layers end to end by
//! acting as a caching compile-and-link front end over a list of C/assembly
//! files; it does not itself embed an IR toolchain. A host program that
//! owns a front end and IR compiler links against this crate as a library
//! and drives [`aotbuild::pipeline::run`] directly, supplying its own
//! [`aotbuild::pipeline::IrBackend`] and [`aotbuild::pipeline::Linker`].

extern crate aotbuild;
#[macro_use]
extern crate clap;
extern crate env_logger;
extern crate num_cpus;
extern crate which;

use std::path::{Path, PathBuf};
use std::process::{self, Command};

use clap::{App, Arg};

use aotbuild::cache::{self, c_file, CacheDir};
use aotbuild::config::{Config, OptLevel, OutputKind};
use aotbuild::errors::*;
use aotbuild::job::{run_jobs, Job};
use aotbuild::pipeline::Linker;

struct SystemLinker {
    linker: PathBuf,
}

impl Linker for SystemLinker {
    fn link(&self, objects: &[PathBuf], flags: &[String], dest: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.linker);
        cmd.args(flags).args(objects).arg("-o").arg(dest);
        let status = cmd
            .status()
            .chain_err(|| format!("failed to spawn linker {}", self.linker.display()))?;
        if !status.success() {
            return Err(ErrorKind::LinkerFailed(dest.to_path_buf(), status.code()).into());
        }
        Ok(())
    }
}

fn resolve_compiler(requested: &str) -> Result<PathBuf> {
    let path = Path::new(requested);
    if path.is_absolute() || path.components().count() > 1 {
        return Ok(path.to_path_buf());
    }
    which::which(requested)
        .map_err(Error::from)
        .chain_err(|| format!("compiler {:?} not found on PATH", requested))
}

fn compile_and_link(
    config: &Config,
    cache: &CacheDir,
    scratch_dir: &Path,
    sources: &[PathBuf],
    linker: &SystemLinker,
    output_path: &Path,
) -> Result<()> {
    let mut object_jobs = Vec::new();
    for source in sources {
        let cache = cache.clone();
        let scratch_dir = scratch_dir.to_path_buf();
        let compiler = config.c_compiler.clone();
        let c_flags = config.c_flags.clone();
        let ir_toolchain_version = config.ir_toolchain_version.clone();
        let source = source.clone();
        let job = Job::new(format!("compile {}", source.display()), Vec::new(), move |_| {
            let object = c_file::compile_c(&cache, &source, &scratch_dir, &compiler.to_string_lossy(), &c_flags, &ir_toolchain_version, |object_path, depfile_path| {
                let mut cmd = c_file::compiler_command(&compiler, &c_flags, &source, object_path, depfile_path);
                let status = cmd.status().chain_err(|| format!("failed to spawn compiler for {}", source.display()))?;
                if !status.success() {
                    return Err(ErrorKind::CompilerInvocationFailed(source.clone(), status.code()).into());
                }
                Ok(())
            })?;
            Ok(object.to_string_lossy().into_owned())
        });
        object_jobs.push(job);
    }

    let link_flags = config.linker_flags.clone();
    let linker_path = linker.linker.clone();
    let output_path = output_path.to_path_buf();
    let final_job = Job::new("link", object_jobs, move |outputs| {
        let objects: Vec<PathBuf> = outputs.deps().into_iter().map(PathBuf::from).collect();
        SystemLinker { linker: linker_path.clone() }
            .link(&objects, &link_flags, &output_path)?;
        Ok(output_path.to_string_lossy().into_owned())
    });

    run_jobs(&[final_job], num_cpus::get())?;
    Ok(())
}

fn run() -> Result<()> {
    env_logger::init().expect("env_logger should only be initialized once");

    let matches = App::new("aotbuild")
        .version(crate_version!())
        .about("Caching compile-and-link driver for C/assembly translation units")
        .arg(Arg::with_name("inputs").multiple(true).required(true).help("source files to compile and link"))
        .arg(Arg::with_name("output").short("o").long("output").takes_value(true).default_value("a.out"))
        .arg(Arg::with_name("compiler").long("compiler").takes_value(true).default_value("cc"))
        .arg(Arg::with_name("linker").long("linker").takes_value(true).default_value("cc"))
        .arg(Arg::with_name("opt").short("O").long("opt").takes_value(true).default_value("2"))
        .arg(Arg::with_name("cache-dir").long("cache-dir").takes_value(true))
        .arg(Arg::with_name("cflag").short("f").long("cflag").takes_value(true).multiple(true).number_of_values(1))
        .get_matches();

    let sources: Vec<PathBuf> = matches.values_of("inputs").unwrap().map(PathBuf::from).collect();
    let output = PathBuf::from(matches.value_of("output").unwrap());
    let c_compiler = resolve_compiler(matches.value_of("compiler").unwrap())?;
    let linker_path = resolve_compiler(matches.value_of("linker").unwrap())?;
    let opt_level = OptLevel::parse(matches.value_of("opt").unwrap())?;
    let c_flags: Vec<String> = matches.values_of("cflag").map(|v| v.map(str::to_string).collect()).unwrap_or_default();

    let cache_dir = matches.value_of("cache-dir").map(PathBuf::from).or_else(Config::default_cache_dir);
    let config = Config {
        cache_dir,
        ir_toolchain_version: "0".to_string(),
        codegen_version: 0,
        c_compiler,
        c_flags,
        linker_flags: Vec::new(),
        libc: None,
        opt_level,
        output_kind: OutputKind::from_extension(output.extension().and_then(|e| e.to_str()).unwrap_or("")),
        automatic_stack_sizing: false,
    };

    let scratch_dir = ::std::env::temp_dir().join(format!("aotbuild-{}", process::id()));
    std::fs::create_dir_all(&scratch_dir).chain_err(|| "failed to create scratch directory")?;
    let cache = cache::resolve(&config.cache_dir, &scratch_dir);
    let linker = SystemLinker { linker: linker_path };

    compile_and_link(&config, &cache, &scratch_dir, &sources, &linker, &output)
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {}", e);
        for cause in e.iter().skip(1) {
            eprintln!("caused by: {}", cause);
        }
        process::exit(1);
    }
}
