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

//! Bridges the code generator's view of a module to an external
//! stack-depth analyzer, and folds the result into one stack-size map keyed
//! by sentinel name.
//!
//! The actual instruction-level walk of a compiled module and the actual
//! worst-case stack analysis of a linked binary are both the responsibility
//! of external collaborators (the IR toolchain and the stack analyzer
//! respectively); this module only defines the narrow interfaces they are
//! consumed through and the driver logic that combines their answers.

use std::collections::HashMap;

use elf::{Arch, TASK_STARTUP_SYMBOL};
use errors::*;

/// A query surface over a single compiled module, implemented by whatever
/// IR toolchain produced it.
pub trait IrModule {
    /// Every function containing at least one indirect call instruction.
    /// These are the only functions the stack analyzer cannot bound by
    /// static inspection alone.
    fn indirect_callers(&self) -> Vec<String>;

    /// Every function tagged as a goroutine wrapper, paired with the task
    /// name it was generated for. A wrapper's stack frame has to include
    /// enough room to start and immediately suspend the task it launches.
    fn goroutine_wrappers(&self) -> Vec<(String, String)>;
}

/// A query surface over a linked binary's statically-computed call graph,
/// implemented by whatever external tool performs the analysis.
pub trait StackAnalyzer {
    /// Build the call graph, treating every name in `indirect_callers` as a
    /// possible target of any function-pointer call. Must be called before
    /// [`bounded_stack_size`](StackAnalyzer::bounded_stack_size); a function
    /// pointer whose target isn't in this set can't be resolved and leaves
    /// every caller reachable only through it unbounded.
    fn build(&self, indirect_callers: &[String]) -> Result<()>;

    /// The bounded stack size for `symbol`, in bytes, or `None` if the
    /// analyzer could not bound it (for example because it calls through a
    /// function pointer not present in `indirect_callers`).
    ///
    /// Returns [`ErrorKind::MissingSymbol`] if `symbol` has zero or more
    /// than one definition in the graph.
    fn bounded_stack_size(&self, symbol: &str) -> Result<Option<u32>>;
}

/// Drive a full stack-size pass: ask `module` for its indirect callers and
/// goroutine wrappers, consult `analyzer` for each wrapper's bounded size
/// plus the fixed task-startup baseline, and fold the two into one answer
/// per wrapper.
///
/// If the startup baseline itself is unbounded, every wrapper inherits that
/// unknown status regardless of its own measured size. Otherwise, a wrapper
/// whose own bound is smaller than the baseline is raised to the baseline.
pub fn compute_wrapper_sizes<M, A>(module: &M, analyzer: &A, arch: Arch) -> Result<HashMap<String, Option<u32>>>
where
    M: IrModule,
    A: StackAnalyzer,
{
    analyzer.build(&module.indirect_callers())?;

    // The reset handler has to resolve to exactly one definition even
    // though its own size is unused, so the `MissingSymbol` check on it
    // runs for effect.
    if let Some(reset) = arch.reset_handler_symbol() {
        analyzer.bounded_stack_size(reset)?;
    }

    let baseline = analyzer.bounded_stack_size(TASK_STARTUP_SYMBOL)?;
    let wrappers = module.goroutine_wrappers();

    let mut sizes = HashMap::with_capacity(wrappers.len());
    for (symbol, _task_name) in wrappers {
        let own = analyzer.bounded_stack_size(&symbol)?;
        let resolved = match baseline {
            None => None,
            Some(base) => own.map(|w| w.max(base)),
        };
        sizes.insert(symbol, resolved);
    }
    Ok(sizes)
}
