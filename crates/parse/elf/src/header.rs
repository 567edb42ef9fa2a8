//! ELF64 file header parsing.

use core::fmt;

/// Size of the ELF64 file header.
pub const ELF64_EHDR_SIZE: usize = 64;

/// Magic bytes at the start of every ELF file.
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const EI_VERSION: usize = 6;

const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;

/// Size of an `Elf64_Phdr` entry. Mirrored in [`crate::segment::ELF64_PHDR_SIZE`];
/// kept local here too since `header` must not depend on `segment`.
const ELF64_PHDR_SIZE: usize = 56;

/// `e_type` value for a statically linked executable.
pub const ET_EXEC: u16 = 2;
/// `e_type` value for a position-independent executable or shared object.
pub const ET_DYN: u16 = 3;

/// `e_machine` value for x86-64.
pub const EM_X86_64: u16 = 62;

/// Errors encountered while validating or parsing an ELF64 file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// The file is shorter than a minimal ELF64 header, or a referenced
    /// table falls outside the file.
    Truncated,
    /// The first four bytes are not `\x7fELF`.
    BadMagic,
    /// `EI_CLASS` is not `ELFCLASS64`.
    UnsupportedClass,
    /// `EI_DATA` is not `ELFDATA2LSB`.
    UnsupportedEncoding,
    /// `e_machine` is not `EM_X86_64`.
    UnsupportedMachine,
    /// `e_type` is neither `ET_EXEC` nor `ET_DYN`.
    UnsupportedType,
    /// A header field points outside the bounds of the file.
    InvalidOffset,
    /// `e_phentsize` does not match the size of an `Elf64_Phdr`, or
    /// `e_phnum` is zero.
    BadProgramHeaderTable,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Truncated => "file too short to contain a valid ELF header",
            Self::BadMagic => "missing ELF magic",
            Self::UnsupportedClass => "not a 64-bit ELF file",
            Self::UnsupportedEncoding => "not little-endian",
            Self::UnsupportedMachine => "not built for x86-64",
            Self::UnsupportedType => "neither an executable nor a PIE",
            Self::InvalidOffset => "header field points outside the file",
            Self::BadProgramHeaderTable => "e_phentsize/e_phnum do not describe a valid program header table",
        };
        f.write_str(msg)
    }
}

#[inline]
pub(crate) fn le_u16(b: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([b[off], b[off + 1]])
}

#[inline]
pub(crate) fn le_u32(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

#[inline]
pub(crate) fn le_u64(b: &[u8], off: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&b[off..off + 8]);
    u64::from_le_bytes(buf)
}

#[inline]
pub(crate) fn le_i64(b: &[u8], off: usize) -> i64 {
    le_u64(b, off) as i64
}

/// A parsed ELF64 file header (`Elf64_Ehdr`).
#[derive(Debug, Clone, Copy)]
pub struct Elf64Header {
    /// Object file type (`ET_EXEC`, `ET_DYN`, ...).
    pub e_type: u16,
    /// Target instruction set architecture.
    pub e_machine: u16,
    /// Virtual address of the entry point.
    pub e_entry: u64,
    /// File offset of the program header table.
    pub e_phoff: u64,
    /// File offset of the section header table.
    pub e_shoff: u64,
    /// Size of one program header table entry.
    pub e_phentsize: u16,
    /// Number of entries in the program header table.
    pub e_phnum: u16,
    /// Size of one section header table entry.
    pub e_shentsize: u16,
    /// Number of entries in the section header table.
    pub e_shnum: u16,
}

impl Elf64Header {
    /// Parses and validates the header at the start of `data`.
    ///
    /// # Errors
    ///
    /// Returns an [`ElfError`] if the file is too short, lacks the ELF
    /// magic, is not a little-endian 64-bit x86-64 executable or PIE, has
    /// no program headers or an `e_phentsize` other than `sizeof(Elf64_Phdr)`,
    /// or has a program/section header table that does not fit within `data`.
    pub fn parse(data: &[u8]) -> Result<Self, ElfError> {
        if data.len() < ELF64_EHDR_SIZE {
            return Err(ElfError::Truncated);
        }
        if data[0..4] != ELF_MAGIC {
            return Err(ElfError::BadMagic);
        }
        if data[EI_CLASS] != ELFCLASS64 {
            return Err(ElfError::UnsupportedClass);
        }
        if data[EI_DATA] != ELFDATA2LSB {
            return Err(ElfError::UnsupportedEncoding);
        }
        // EI_VERSION must be EV_CURRENT (1); anything else is not a file
        // we know how to interpret.
        if data[EI_VERSION] != 1 {
            return Err(ElfError::Truncated);
        }

        let e_type = le_u16(data, 16);
        let e_machine = le_u16(data, 18);
        let e_entry = le_u64(data, 24);
        let e_phoff = le_u64(data, 32);
        let e_shoff = le_u64(data, 40);
        let e_phentsize = le_u16(data, 54);
        let e_phnum = le_u16(data, 56);
        let e_shentsize = le_u16(data, 58);
        let e_shnum = le_u16(data, 60);

        if e_machine != EM_X86_64 {
            return Err(ElfError::UnsupportedMachine);
        }
        if e_type != ET_EXEC && e_type != ET_DYN {
            return Err(ElfError::UnsupportedType);
        }
        if e_phentsize as usize != ELF64_PHDR_SIZE || e_phnum == 0 {
            return Err(ElfError::BadProgramHeaderTable);
        }

        let phtable_end = e_phoff
            .checked_add(u64::from(e_phentsize) * u64::from(e_phnum))
            .ok_or(ElfError::InvalidOffset)?;
        if phtable_end > data.len() as u64 {
            return Err(ElfError::InvalidOffset);
        }

        Ok(Self {
            e_type,
            e_machine,
            e_entry,
            e_phoff,
            e_shoff,
            e_phentsize,
            e_phnum,
            e_shentsize,
            e_shnum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_header(e_type: u16, e_phnum: u16) -> [u8; ELF64_EHDR_SIZE] {
        let mut b = [0u8; ELF64_EHDR_SIZE];
        b[0..4].copy_from_slice(&ELF_MAGIC);
        b[EI_CLASS] = ELFCLASS64;
        b[EI_DATA] = ELFDATA2LSB;
        b[EI_VERSION] = 1;
        b[16..18].copy_from_slice(&e_type.to_le_bytes());
        b[18..20].copy_from_slice(&EM_X86_64.to_le_bytes());
        b[24..32].copy_from_slice(&0x40_0000u64.to_le_bytes());
        b[32..40].copy_from_slice(&(ELF64_EHDR_SIZE as u64).to_le_bytes());
        b[54..56].copy_from_slice(&56u16.to_le_bytes());
        b[56..58].copy_from_slice(&e_phnum.to_le_bytes());
        b
    }

    #[test]
    fn parses_valid_header() {
        // One program header's worth of trailing bytes so the table fits.
        let mut data = minimal_header(ET_EXEC, 1).to_vec();
        data.extend_from_slice(&[0u8; ELF64_PHDR_SIZE]);
        let header = Elf64Header::parse(&data).unwrap();
        assert_eq!(header.e_type, ET_EXEC);
        assert_eq!(header.e_entry, 0x40_0000);
    }

    #[test]
    fn rejects_zero_phnum() {
        let data = minimal_header(ET_EXEC, 0);
        assert_eq!(Elf64Header::parse(&data), Err(ElfError::BadProgramHeaderTable));
    }

    #[test]
    fn rejects_wrong_phentsize() {
        let mut data = minimal_header(ET_EXEC, 1);
        data[54..56].copy_from_slice(&64u16.to_le_bytes());
        assert_eq!(Elf64Header::parse(&data), Err(ElfError::BadProgramHeaderTable));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut data = minimal_header(ET_EXEC, 0);
        data[0] = 0;
        assert_eq!(Elf64Header::parse(&data), Err(ElfError::BadMagic));
    }

    #[test]
    fn rejects_truncated_file() {
        let data = [0u8; 10];
        assert_eq!(Elf64Header::parse(&data), Err(ElfError::Truncated));
    }

    #[test]
    fn rejects_wrong_machine() {
        let mut data = minimal_header(ET_EXEC, 0);
        data[18..20].copy_from_slice(&3u16.to_le_bytes());
        assert_eq!(Elf64Header::parse(&data), Err(ElfError::UnsupportedMachine));
    }

    #[test]
    fn rejects_unsupported_type() {
        let data = minimal_header(4, 0);
        assert_eq!(Elf64Header::parse(&data), Err(ElfError::UnsupportedType));
    }

    #[test]
    fn rejects_phtable_out_of_bounds() {
        let data = minimal_header(ET_EXEC, 5);
        assert_eq!(Elf64Header::parse(&data), Err(ElfError::InvalidOffset));
    }
}
