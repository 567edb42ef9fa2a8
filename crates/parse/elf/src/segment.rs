//! ELF64 program header (`Elf64_Phdr`) parsing and loadable segment extraction.

use crate::header::{ElfError, le_u32, le_u64};

/// Size of an ELF64 program header table entry.
pub const ELF64_PHDR_SIZE: usize = 56;

/// `p_type` value for a loadable segment.
pub const PT_LOAD: u32 = 1;

const PF_EXECUTABLE: u32 = 1 << 0;
const PF_WRITABLE: u32 = 1 << 1;
const PF_READABLE: u32 = 1 << 2;

/// Permissions a loaded segment should be mapped with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentFlags {
    /// Segment is readable (in practice always true; mappings assume it).
    pub readable: bool,
    /// Segment is writable.
    pub writable: bool,
    /// Segment is executable.
    pub executable: bool,
}

impl SegmentFlags {
    fn from_p_flags(flags: u32) -> Self {
        Self {
            readable: flags & PF_READABLE != 0,
            writable: flags & PF_WRITABLE != 0,
            executable: flags & PF_EXECUTABLE != 0,
        }
    }
}

/// A single `PT_LOAD` program header, parsed and validated against the
/// bounds of the file it came from.
#[derive(Debug, Clone, Copy)]
pub struct ProgramHeader {
    /// Segment type (`p_type`); only `PT_LOAD` is surfaced by [`crate::ElfFile::load_segments`].
    pub p_type: u32,
    /// Desired mapping permissions.
    pub flags: SegmentFlags,
    /// Offset of the segment's initialized data within the file.
    pub offset: u64,
    /// Virtual address the segment should be mapped at.
    pub vaddr: u64,
    /// Bytes of initialized data to copy from the file.
    pub filesz: u64,
    /// Total bytes the segment occupies in memory; the tail beyond
    /// `filesz` (if any) must be zero-filled (`.bss`).
    pub memsz: u64,
    /// Required alignment of `vaddr` and `offset`.
    pub align: u64,
}

impl ProgramHeader {
    fn parse(data: &[u8], off: usize) -> Self {
        let b = &data[off..];
        let p_type = le_u32(b, 0);
        let p_flags = le_u32(b, 4);
        let p_offset = le_u64(b, 8);
        let p_vaddr = le_u64(b, 16);
        let p_filesz = le_u64(b, 32);
        let p_memsz = le_u64(b, 40);
        let p_align = le_u64(b, 48);
        Self {
            p_type,
            flags: SegmentFlags::from_p_flags(p_flags),
            offset: p_offset,
            vaddr: p_vaddr,
            filesz: p_filesz,
            memsz: p_memsz,
            align: p_align,
        }
    }

    /// Validates that `[offset, offset + filesz)` lies within `file_len` and
    /// that `filesz <= memsz`.
    fn validate(&self, file_len: usize) -> Result<(), ElfError> {
        if self.filesz > self.memsz {
            return Err(ElfError::InvalidOffset);
        }
        let end = self
            .offset
            .checked_add(self.filesz)
            .ok_or(ElfError::InvalidOffset)?;
        if end > file_len as u64 {
            return Err(ElfError::InvalidOffset);
        }
        Ok(())
    }
}

/// An iterator over the program header table of an ELF64 file, validating
/// each entry as it is produced.
pub struct ProgramHeaderIter<'a> {
    data: &'a [u8],
    off: usize,
    entsize: usize,
    remaining: u16,
}

impl<'a> ProgramHeaderIter<'a> {
    pub(crate) fn new(data: &'a [u8], phoff: u64, phentsize: u16, phnum: u16) -> Self {
        Self {
            data,
            off: phoff as usize,
            entsize: phentsize as usize,
            remaining: phnum,
        }
    }
}

impl Iterator for ProgramHeaderIter<'_> {
    type Item = Result<ProgramHeader, ElfError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        if self.off + ELF64_PHDR_SIZE > self.data.len() {
            self.remaining = 0;
            return Some(Err(ElfError::InvalidOffset));
        }
        let phdr = ProgramHeader::parse(self.data, self.off);
        self.off += self.entsize;
        self.remaining -= 1;
        match phdr.validate(self.data.len()) {
            Ok(()) => Some(Ok(phdr)),
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phdr_bytes(
        p_type: u32,
        p_flags: u32,
        offset: u64,
        vaddr: u64,
        filesz: u64,
        memsz: u64,
        align: u64,
    ) -> [u8; ELF64_PHDR_SIZE] {
        let mut b = [0u8; ELF64_PHDR_SIZE];
        b[0..4].copy_from_slice(&p_type.to_le_bytes());
        b[4..8].copy_from_slice(&p_flags.to_le_bytes());
        b[8..16].copy_from_slice(&offset.to_le_bytes());
        b[16..24].copy_from_slice(&vaddr.to_le_bytes());
        b[32..40].copy_from_slice(&filesz.to_le_bytes());
        b[40..48].copy_from_slice(&memsz.to_le_bytes());
        b[48..56].copy_from_slice(&align.to_le_bytes());
        b
    }

    #[test]
    fn parses_single_load_segment() {
        let phdr = phdr_bytes(PT_LOAD, PF_READABLE | PF_EXECUTABLE, 0, 0x40_0000, 0x10, 0x10, 0x1000);
        let mut data = vec![0u8; ELF64_PHDR_SIZE];
        data[..].copy_from_slice(&phdr);
        let mut iter = ProgramHeaderIter::new(&data, 0, ELF64_PHDR_SIZE as u16, 1);
        let parsed = iter.next().unwrap().unwrap();
        assert_eq!(parsed.p_type, PT_LOAD);
        assert!(parsed.flags.executable);
        assert!(parsed.flags.readable);
        assert!(!parsed.flags.writable);
        assert_eq!(parsed.vaddr, 0x40_0000);
        assert!(iter.next().is_none());
    }

    #[test]
    fn rejects_filesz_greater_than_memsz() {
        let phdr = phdr_bytes(PT_LOAD, PF_READABLE, 0, 0, 0x20, 0x10, 0x1000);
        let data = phdr.to_vec();
        let mut iter = ProgramHeaderIter::new(&data, 0, ELF64_PHDR_SIZE as u16, 1);
        assert_eq!(iter.next(), Some(Err(ElfError::InvalidOffset)));
    }

    #[test]
    fn rejects_segment_data_beyond_file() {
        let phdr = phdr_bytes(PT_LOAD, PF_READABLE, 100, 0, 0x10, 0x10, 0x1000);
        let data = phdr.to_vec();
        let mut iter = ProgramHeaderIter::new(&data, 0, ELF64_PHDR_SIZE as u16, 1);
        assert_eq!(iter.next(), Some(Err(ElfError::InvalidOffset)));
    }
}
