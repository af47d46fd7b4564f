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

//! Rewrites the stack-size section of a linked ELF in place.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use goblin::elf::Elf;

use elf::{Arch, CANARY_BYTES, STACK_SIZES_SECTION};
use errors::*;

fn section_name_at(strtab: &[u8], offset: usize) -> &str {
    let end = strtab[offset..]
        .iter()
        .position(|&b| b == 0)
        .map(|p| offset + p)
        .unwrap_or_else(|| strtab.len());
    ::std::str::from_utf8(&strtab[offset..end]).unwrap_or("")
}

/// Locate the stack-sizes section in an already-parsed ELF, returning its
/// file offset, size in bytes, and the binary's architecture.
fn locate_section(bytes: &[u8], elf: &Elf) -> Result<(u64, u64, Arch)> {
    let shstrndx = elf.header.e_shstrndx as usize;
    let shstrtab_hdr = elf
        .section_headers
        .get(shstrndx)
        .ok_or_else(|| ErrorKind::SectionLayoutMismatch("missing section header string table".to_string()))?;
    let start = shstrtab_hdr.sh_offset as usize;
    let end = start + shstrtab_hdr.sh_size as usize;
    let shstrtab = bytes
        .get(start..end)
        .ok_or_else(|| ErrorKind::SectionLayoutMismatch("section header string table out of bounds".to_string()))?;

    let arch = Arch::from_machine(elf.header.e_machine);
    for sh in &elf.section_headers {
        if section_name_at(shstrtab, sh.sh_name as usize) == STACK_SIZES_SECTION {
            return Ok((sh.sh_offset, sh.sh_size, arch));
        }
    }
    Err(ErrorKind::SectionLayoutMismatch(format!("no {} section", STACK_SIZES_SECTION)).into())
}

/// Patch every bounded sentinel slot in `elf_path`'s stack-sizes section.
///
/// `sentinels` is the ordered list of sentinel names the code generator
/// recorded for this module; `sizes` gives each sentinel's resolved bound,
/// or `None` for a sentinel whose stack usage could not be bounded.
/// Unbounded slots are left exactly as the linker wrote them. Every name in
/// `sentinels` must have an entry in `sizes`, and the section's size must
/// equal `4 * sentinels.len()` bytes; either mismatch is an error raised
/// before any byte is written.
pub fn patch_stack_sizes(elf_path: &Path, sentinels: &[String], sizes: &HashMap<String, Option<u32>>) -> Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(elf_path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    let (offset, size, arch) = {
        let elf = Elf::parse(&bytes).map_err(|e| ErrorKind::SectionLayoutMismatch(e.to_string()))?;
        locate_section(&bytes, &elf)?
    };

    let expected = sentinels.len() as u64 * 4;
    if size != expected {
        return Err(ErrorKind::SectionLayoutMismatch(format!(
            "{} holds {} bytes, expected {} for {} sentinels",
            STACK_SIZES_SECTION,
            size,
            expected,
            sentinels.len()
        )).into());
    }

    let offset = offset as usize;
    let mut patched = bytes[offset..offset + size as usize].to_vec();
    for (i, sentinel) in sentinels.iter().enumerate() {
        let bounded = sizes
            .get(sentinel)
            .ok_or_else(|| ErrorKind::MissingSymbol(sentinel.clone()))?;
        if let Some(stack_size) = *bounded {
            let value = stack_size + CANARY_BYTES + arch.interrupt_reserve();
            LittleEndian::write_u32(&mut patched[i * 4..i * 4 + 4], value);
        }
    }

    file.seek(SeekFrom::Start(offset as u64))?;
    file.write_all(&patched)?;
    Ok(())
}
