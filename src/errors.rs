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

use std::path::PathBuf;

error_chain! {
    foreign_links {
        Io(::std::io::Error);
        Json(::serde_json::Error);
    }

    errors {
        /// A dependency manifest is missing its `deps:` prefix, or has an
        /// unmatched opening quote.
        MalformedDepFile(path: PathBuf) {
            description("malformed dependency manifest")
            display("malformed dependency manifest: {}", path.display())
        }

        /// The external C compiler exited non-zero.
        CompilerInvocationFailed(source: PathBuf, status: Option<i32>) {
            description("C compiler invocation failed")
            display("compiling {} failed (exit status {:?})", source.display(), status)
        }

        /// The external linker exited non-zero.
        LinkerFailed(executable: PathBuf, status: Option<i32>) {
            description("link failed")
            display("linking {} failed (exit status {:?})", executable.display(), status)
        }

        /// IR verification failed after a package compile, after link+init
        /// synthesis, or after optimization.
        VerifyFailed(what: String) {
            description("IR verification failed")
            display("IR verification failed: {}", what)
        }

        /// A queried symbol had zero or more than one definition, or a
        /// sentinel name was absent from the stack-size map.
        MissingSymbol(name: String) {
            description("missing or ambiguous symbol")
            display("symbol {:?} has no unique definition in the call graph", name)
        }

        /// A package's import list named a dependency not found earlier in
        /// the package list passed to the orchestrator.
        UnknownImport(import_path: String) {
            description("unknown import")
            display("import {:?} has no earlier entry in the package list", import_path)
        }

        /// `.tinygo_stacksizes` is absent, or its size disagrees with the
        /// file size or the sentinel count.
        SectionLayoutMismatch(detail: String) {
            description("stack-size section layout mismatch")
            display("stack-size section layout mismatch: {}", detail)
        }

        /// An unrecognized optimization level or libc name was requested.
        UnknownOption(option: String, value: String) {
            description("unknown option value")
            display("unknown value {:?} for option {}", value, option)
        }

        /// A job graph action failed for a reason not otherwise classified.
        JobFailed(description: String) {
            description("job failed")
            display("job {:?} failed", description)
        }

        /// Several independent errors were aggregated by the IR compiler or
        /// optimization pipeline.
        MultiError(causes: Vec<String>) {
            description("multiple errors")
            display("{} errors occurred:\n{}", causes.len(), causes.join("\n"))
        }
    }
}
