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

//! Post-link ELF work: correlating the code generator's sentinel loads with
//! a statically-computed call graph, then rewriting the stack-size
//! section in place.

pub mod callgraph;
pub mod patcher;

/// The name of the ELF section the code generator reserves one 32-bit slot
/// per sentinel load in.
pub const STACK_SIZES_SECTION: &str = ".tinygo_stacksizes";

/// Extra bytes reserved per frame on top of the measured stack size: a
/// 4-byte canary plus whatever the architecture's interrupt entry pushes
/// before user code runs.
pub const CANARY_BYTES: u32 = 4;

/// Target architecture families this crate distinguishes for patching
/// purposes. Only ARM has a nonzero interrupt reserve and a reset handler
/// symbol; every other architecture goblin can identify is folded into
/// `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Arm,
    Unknown,
}

impl Arch {
    /// ELF `e_machine` for 32-bit ARM (`EM_ARM`).
    const EM_ARM: u16 = 40;

    pub fn from_machine(e_machine: u16) -> Arch {
        if e_machine == Arch::EM_ARM {
            Arch::Arm
        } else {
            Arch::Unknown
        }
    }

    /// Bytes the hardware pushes for caller-saved registers on interrupt
    /// entry, which must be reserved on top of the measured frame.
    pub fn interrupt_reserve(&self) -> u32 {
        match *self {
            Arch::Arm => 32,
            Arch::Unknown => 0,
        }
    }

    /// The fixed reset-handler symbol expected exactly once in the call
    /// graph on this architecture, if any.
    pub fn reset_handler_symbol(&self) -> Option<&'static str> {
        match *self {
            Arch::Arm => Some("Reset_Handler"),
            Arch::Unknown => None,
        }
    }
}

/// The code generator's fixed baseline symbol: the minimum stack frame
/// needed to begin and suspend a task.
pub const TASK_STARTUP_SYMBOL: &str = "tinygo_startTask";
