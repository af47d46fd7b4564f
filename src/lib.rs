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

//! Build-orchestration core for an ahead-of-time compiler driver:
//! content-addressed caches, a dependency-driven job graph, and post-link
//! ELF stack-size patching.

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;
extern crate byteorder;
extern crate directories;
extern crate goblin;
extern crate num_cpus;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate sha2;
extern crate tempfile;
extern crate which;

pub mod cache;
pub mod config;
pub mod depfile;
pub mod digest;
pub mod elf;
pub mod errors;
pub mod job;
pub mod pipeline;

pub use config::Config;
pub use errors::{Error, ErrorKind, Result};
