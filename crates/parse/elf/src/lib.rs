//! Minimal ELF64 parser and loader for statically linked executables.
//!
//! Covers exactly what the kernel's process loader needs: header
//! validation, iteration over `PT_LOAD` program headers, and relocation
//! arithmetic for the rare position-independent binary. No section header
//! parsing, no symbol table resolution, no dynamic linking — every
//! executable this kernel runs is linked against nothing but the syscall
//! ABI.

#![cfg_attr(not(test), no_std)]

pub mod header;
pub mod reloc;
pub mod segment;

use planck_noalloc::vec::ArrayVec;

pub use header::{ELF_MAGIC, ElfError, Elf64Header};
pub use reloc::{Elf64Rela, RelaIter, RelocError, RelocValue, compute_x86_64_reloc};
pub use segment::{PT_LOAD, ProgramHeader, ProgramHeaderIter, SegmentFlags};

/// Maximum number of `PT_LOAD` segments a single executable may have.
///
/// Every executable produced by the toolchain this kernel targets links
/// with a handful of segments (text, rodata, data+bss); this bound exists
/// so segment collection needs no allocator.
pub const MAX_LOAD_SEGMENTS: usize = 16;

/// One loadable segment, ready to be copied into freshly allocated process
/// memory.
#[derive(Debug, Clone, Copy)]
pub struct ExecSegment<'a> {
    /// Destination virtual address.
    pub vaddr: u64,
    /// Initialized data to copy to `vaddr`; shorter than `memsz` when the
    /// segment has a `.bss` tail.
    pub data: &'a [u8],
    /// Total bytes the segment occupies once mapped.
    pub memsz: u64,
    /// Mapping permissions.
    pub flags: SegmentFlags,
}

/// A fully validated executable image, ready to hand to the process loader.
#[derive(Debug, Clone)]
pub struct ExecImage<'a> {
    /// Virtual address execution should begin at.
    pub entry_point: u64,
    /// Load base to apply to segment addresses (0 for `ET_EXEC`; chosen by
    /// the caller for `ET_DYN`).
    pub load_bias: u64,
    /// The executable's `PT_LOAD` segments, in file order.
    pub segments: ArrayVec<ExecSegment<'a>, MAX_LOAD_SEGMENTS>,
}

/// A parsed, validated ELF64 file.
pub struct ElfFile<'a> {
    data: &'a [u8],
    header: Elf64Header,
}

impl<'a> ElfFile<'a> {
    /// Validates the ELF64 header at the start of `data`.
    ///
    /// # Errors
    ///
    /// See [`ElfError`] for the individual validation failures.
    pub fn parse(data: &'a [u8]) -> Result<Self, ElfError> {
        let header = Elf64Header::parse(data)?;
        Ok(Self { data, header })
    }

    /// The entry point as recorded in the file header, before any load
    /// bias is applied.
    #[must_use]
    pub fn entry_point(&self) -> u64 {
        self.header.e_entry
    }

    /// Whether the file is position-independent (`ET_DYN`).
    #[must_use]
    pub fn is_position_independent(&self) -> bool {
        self.header.e_type == header::ET_DYN
    }

    /// Iterates over the raw program header table.
    pub fn program_headers(&self) -> ProgramHeaderIter<'a> {
        ProgramHeaderIter::new(
            self.data,
            self.header.e_phoff,
            self.header.e_phentsize,
            self.header.e_phnum,
        )
    }

    /// Collects the `PT_LOAD` segments into an [`ExecImage`], applying
    /// `load_bias` to every virtual address.
    ///
    /// # Errors
    ///
    /// Returns [`ElfError::InvalidOffset`] if a program header is malformed
    /// or there are more than [`MAX_LOAD_SEGMENTS`] loadable segments.
    pub fn load_segments(&self, load_bias: u64) -> Result<ExecImage<'a>, ElfError> {
        let mut segments = ArrayVec::new();
        for phdr in self.program_headers() {
            let phdr = phdr?;
            if phdr.p_type != PT_LOAD {
                continue;
            }
            let data = &self.data[phdr.offset as usize..(phdr.offset + phdr.filesz) as usize];
            let segment = ExecSegment {
                vaddr: phdr.vaddr.wrapping_add(load_bias),
                data,
                memsz: phdr.memsz,
                flags: phdr.flags,
            };
            if segments.try_push(segment).is_err() {
                return Err(ElfError::InvalidOffset);
            }
        }
        Ok(ExecImage {
            entry_point: self.header.e_entry.wrapping_add(load_bias),
            load_bias,
            segments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ET_EXEC;

    // A minimal but complete ELF64 executable: header + one PT_LOAD segment
    // whose data is four `NOP` bytes.
    fn build_minimal_exe() -> Vec<u8> {
        let mut data = vec![0u8; header::ELF64_EHDR_SIZE];
        data[0..4].copy_from_slice(&ELF_MAGIC);
        data[4] = 2; // ELFCLASS64
        data[5] = 1; // ELFDATA2LSB
        data[6] = 1; // EI_VERSION
        data[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
        data[18..20].copy_from_slice(&header::EM_X86_64.to_le_bytes());
        data[24..32].copy_from_slice(&0x40_1000u64.to_le_bytes()); // e_entry
        let phoff = header::ELF64_EHDR_SIZE as u64;
        data[32..40].copy_from_slice(&phoff.to_le_bytes());
        data[54..56].copy_from_slice(&(segment::ELF64_PHDR_SIZE as u16).to_le_bytes());
        data[56..58].copy_from_slice(&1u16.to_le_bytes());

        let seg_data = [0x90u8; 4];
        let seg_offset = phoff + segment::ELF64_PHDR_SIZE as u64;
        let mut phdr = [0u8; segment::ELF64_PHDR_SIZE];
        phdr[0..4].copy_from_slice(&PT_LOAD.to_le_bytes());
        phdr[4..8].copy_from_slice(&0b101u32.to_le_bytes()); // R + X
        phdr[8..16].copy_from_slice(&seg_offset.to_le_bytes());
        phdr[16..24].copy_from_slice(&0x40_1000u64.to_le_bytes());
        phdr[32..40].copy_from_slice(&(seg_data.len() as u64).to_le_bytes());
        phdr[40..48].copy_from_slice(&(seg_data.len() as u64).to_le_bytes());
        phdr[48..56].copy_from_slice(&0x1000u64.to_le_bytes());

        data.extend_from_slice(&phdr);
        data.extend_from_slice(&seg_data);
        data
    }

    #[test]
    fn parses_and_loads_minimal_executable() {
        let data = build_minimal_exe();
        let elf = ElfFile::parse(&data).unwrap();
        assert_eq!(elf.entry_point(), 0x40_1000);
        assert!(!elf.is_position_independent());

        let image = elf.load_segments(0).unwrap();
        assert_eq!(image.segments.len(), 1);
        let seg = image.segments[0];
        assert_eq!(seg.vaddr, 0x40_1000);
        assert_eq!(seg.memsz, 4);
        assert!(seg.flags.executable);
        assert!(!seg.flags.writable);
    }

    #[test]
    fn applies_load_bias_for_pie() {
        let data = build_minimal_exe();
        let elf = ElfFile::parse(&data).unwrap();
        let image = elf.load_segments(0x1000_0000).unwrap();
        assert_eq!(image.entry_point, 0x4140_1000);
        assert_eq!(image.segments[0].vaddr, 0x4140_1000);
    }

    #[test]
    fn rejects_truncated_file() {
        let data = [0u8; 8];
        assert_eq!(ElfFile::parse(&data).unwrap_err(), ElfError::Truncated);
    }
}
