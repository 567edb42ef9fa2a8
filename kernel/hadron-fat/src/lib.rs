//! A read-mostly FAT32 volume reader.
//!
//! Supports BPB parsing, FAT cluster-chain walking, LFN-aware directory
//! traversal, and reading or in-place overwriting the content of existing
//! files. Directory mutation, cluster allocation, truncation, and file
//! creation are out of scope — every operation here assumes the volume's
//! directory structure and cluster chains are already in their final
//! shape.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod bpb;
pub mod directory;
pub mod fat;

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use hadron_driver_api::{BlockDevice, BlockError};

pub use bpb::Bpb;
use directory::{RawFileEntry, RawLfnEntry, reconstruct_lfn};

/// Errors from mounting or operating on a FAT32 volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatError {
    /// Boot sector is missing the `0xAA55` signature.
    BadBootSignature,
    /// A BPB field is outside the range the FAT32 spec allows.
    InvalidBpb,
    /// A cluster chain referenced a free or reserved cluster mid-walk.
    BrokenChain,
    /// A cluster chain exceeded the FAT-size-derived maximum length
    /// without terminating, implying a cycle.
    ChainTooLong,
    /// A path component was not found in its parent directory.
    NotFound,
    /// A non-final path component named a file, not a directory.
    NotADirectory,
    /// The underlying block device reported a failure.
    Io(BlockError),
}

impl fmt::Display for FatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadBootSignature => write!(f, "missing FAT32 boot signature"),
            Self::InvalidBpb => write!(f, "invalid BPB field"),
            Self::BrokenChain => write!(f, "cluster chain references a free or reserved cluster"),
            Self::ChainTooLong => write!(f, "cluster chain exceeds FAT size (cycle?)"),
            Self::NotFound => write!(f, "path component not found"),
            Self::NotADirectory => write!(f, "path component is not a directory"),
            Self::Io(e) => write!(f, "block I/O error: {e}"),
        }
    }
}

impl From<BlockError> for FatError {
    fn from(e: BlockError) -> Self {
        Self::Io(e)
    }
}

impl hadron_core::error::ToErrno for FatError {
    fn to_errno(&self) -> isize {
        use hadron_core::error::Errno;
        let errno = match self {
            Self::NotFound => Errno::NoEnt,
            Self::NotADirectory => Errno::Inval,
            Self::BrokenChain | Self::ChainTooLong => Errno::Overflow,
            Self::BadBootSignature | Self::InvalidBpb => Errno::Inval,
            Self::Io(_) => Errno::Io,
        };
        errno.as_errno()
    }
}

/// A located file or subdirectory, resolved from a path lookup.
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// The entry's preferred display name (LFN if present, else 8.3).
    pub name: String,
    /// First cluster of the entry's content (or, for a directory, of its
    /// entry list).
    pub first_cluster: u32,
    /// File size in bytes; 0 and meaningless for directories.
    pub size: u32,
    /// Whether this entry is a directory.
    pub is_dir: bool,
}

/// A mounted FAT32 volume over a [`BlockDevice`].
///
/// The volume is assumed to start at LBA 0 of the device (no MBR/GPT
/// partition table traversal).
pub struct FatFs<'a> {
    device: &'a dyn BlockDevice,
    bpb: Bpb,
}

impl<'a> FatFs<'a> {
    /// Reads and validates the boot sector, mounting the volume.
    ///
    /// # Errors
    ///
    /// Returns [`FatError::Io`] if the boot sector can't be read, or a BPB
    /// validation error if it is read but malformed.
    pub fn mount(device: &'a dyn BlockDevice) -> Result<Self, FatError> {
        let mut sector = [0u8; bpb::BOOT_SECTOR_SIZE];
        device.read(0, &mut sector)?;
        let bpb = Bpb::parse(&sector)?;
        Ok(Self { device, bpb })
    }

    /// The volume's parsed BPB.
    #[must_use]
    pub fn bpb(&self) -> &Bpb {
        &self.bpb
    }

    /// Resolves a `/`- or `\`-separated path to the entry it names,
    /// starting from the root directory.
    ///
    /// # Errors
    ///
    /// Returns [`FatError::NotFound`] if any component is missing,
    /// [`FatError::NotADirectory`] if a non-final component names a file,
    /// or a chain-walking error if the volume's metadata is corrupt.
    pub fn lookup(&self, path: &str) -> Result<DirEntry, FatError> {
        let mut cluster = self.bpb.root_cluster;
        let mut current = DirEntry {
            name: String::from("/"),
            first_cluster: cluster,
            size: 0,
            is_dir: true,
        };

        let components: Vec<&str> = path
            .split(|c| c == '/' || c == '\\')
            .filter(|c| !c.is_empty())
            .collect();

        for (i, component) in components.iter().enumerate() {
            if !current.is_dir {
                return Err(FatError::NotADirectory);
            }
            current = self.find_in_directory(cluster, component)?;
            cluster = current.first_cluster;
            let _ = i;
        }

        Ok(current)
    }

    /// Reads the full content of `entry` into a freshly allocated buffer.
    ///
    /// Copies whole clusters into a staging buffer cluster by cluster; the
    /// last cluster copies only the residual `size mod cluster_size`
    /// bytes.
    ///
    /// # Errors
    ///
    /// Returns a chain-walking or I/O error if the volume is corrupt or
    /// the device fails.
    pub fn read_file(&self, entry: &DirEntry) -> Result<Vec<u8>, FatError> {
        let mut out = Vec::with_capacity(entry.size as usize);
        let cluster_size = self.bpb.cluster_size() as usize;
        let mut staging = vec![0u8; cluster_size];
        let mut remaining = entry.size as usize;

        for cluster in self.cluster_chain(entry.first_cluster)? {
            if remaining == 0 {
                break;
            }
            let lba = self.bpb.cluster_to_lba(cluster);
            self.device.read(lba, &mut staging)?;
            let take = remaining.min(cluster_size);
            out.extend_from_slice(&staging[..take]);
            remaining -= take;
        }

        Ok(out)
    }

    /// Overwrites the content of an existing file starting at its first
    /// byte, performing read-modify-write on any sector only partially
    /// covered by `data`.
    ///
    /// Never extends the file's cluster chain: writing more than
    /// `entry.size` bytes is rejected rather than growing the file.
    ///
    /// # Errors
    ///
    /// Returns [`FatError::InvalidBpb`]-adjacent errors are not produced
    /// here; instead a too-large write is reported via
    /// [`FatError::ChainTooLong`] reused as "would exceed the existing
    /// allocation", and I/O or chain-walking errors propagate as usual.
    pub fn write_file(&self, entry: &DirEntry, data: &[u8]) -> Result<(), FatError> {
        if data.len() > entry.size as usize {
            return Err(FatError::ChainTooLong);
        }
        let cluster_size = self.bpb.cluster_size() as usize;
        let mut staging = vec![0u8; cluster_size];
        let mut offset = 0usize;

        for cluster in self.cluster_chain(entry.first_cluster)? {
            if offset >= data.len() {
                break;
            }
            let lba = self.bpb.cluster_to_lba(cluster);
            let chunk = &data[offset..(offset + cluster_size).min(data.len())];

            if chunk.len() < cluster_size {
                // Partial cluster: read-modify-write.
                self.device.read(lba, &mut staging)?;
                staging[..chunk.len()].copy_from_slice(chunk);
                self.device.write(lba, &staging)?;
            } else {
                self.device.write(lba, chunk)?;
            }
            offset += chunk.len();
        }

        Ok(())
    }

    /// Walks a cluster chain starting at `start`, returning the full list
    /// of clusters in order.
    ///
    /// Caps the walk at [`Bpb::max_chain_length`] clusters to guarantee
    /// termination even over a corrupt, cyclic FAT.
    fn cluster_chain(&self, start: u32) -> Result<Vec<u32>, FatError> {
        let mut chain = Vec::new();
        let mut cluster = start;
        let bytes_per_sector = self.bpb.bytes_per_sector as u64;
        let mut sector_buf = vec![0u8; self.bpb.bytes_per_sector as usize];
        let mut cached_sector: Option<u64> = None;
        let max_len = self.bpb.max_chain_length();

        loop {
            if chain.len() as u32 >= max_len {
                return Err(FatError::ChainTooLong);
            }
            chain.push(cluster);

            let fat_byte_offset = u64::from(cluster) * 4;
            let fat_sector = u64::from(self.bpb.reserved_sectors) + fat_byte_offset / bytes_per_sector;
            let offset_in_sector = (fat_byte_offset % bytes_per_sector) as usize;

            if cached_sector != Some(fat_sector) {
                self.device.read(fat_sector, &mut sector_buf)?;
                cached_sector = Some(fat_sector);
            }

            let entry = fat::read_entry(&sector_buf, offset_in_sector / 4);
            if fat::is_chain_end(entry) {
                break;
            }
            cluster = fat::validate_chain_link(entry)?;
        }

        Ok(chain)
    }

    /// Scans a single directory's cluster chain for an entry named
    /// `target` (case-insensitive ASCII compare against the preferred
    /// name).
    fn find_in_directory(&self, dir_cluster: u32, target: &str) -> Result<DirEntry, FatError> {
        let cluster_size = self.bpb.cluster_size() as usize;
        let mut staging = vec![0u8; cluster_size];
        let mut pending_lfn: Vec<RawLfnEntry> = Vec::new();

        for cluster in self.cluster_chain(dir_cluster)? {
            let lba = self.bpb.cluster_to_lba(cluster);
            self.device.read(lba, &mut staging)?;

            for chunk in staging.chunks_exact(32) {
                let raw = RawFileEntry::from_bytes(chunk);
                if raw.is_end() {
                    return Err(FatError::NotFound);
                }
                if raw.is_deleted() {
                    pending_lfn.clear();
                    continue;
                }
                if raw.is_lfn() {
                    pending_lfn.push(RawLfnEntry::from_bytes(chunk));
                    continue;
                }
                if raw.is_volume_label() {
                    pending_lfn.clear();
                    continue;
                }

                let name = if pending_lfn.is_empty() {
                    raw.short_name()
                } else {
                    reconstruct_lfn(&pending_lfn)
                };
                pending_lfn.clear();

                if name.eq_ignore_ascii_case(target) {
                    return Ok(DirEntry {
                        name,
                        first_cluster: raw.first_cluster(),
                        size: raw.size,
                        is_dir: raw.is_directory(),
                    });
                }
            }
        }

        Err(FatError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// An in-memory FAT32 volume sized just large enough to hold a BPB,
    /// one FAT, and a handful of clusters, used to drive lookup/read/write
    /// through the real cluster-walking code paths.
    struct TestVolume {
        sectors: Mutex<Vec<u8>>,
        sector_size: u32,
    }

    impl BlockDevice for TestVolume {
        fn sector_size(&self) -> u32 {
            self.sector_size
        }
        fn sector_count(&self) -> u64 {
            self.sectors.lock().unwrap().len() as u64 / u64::from(self.sector_size)
        }
        fn read(&self, lba: u64, buf: &mut [u8]) -> Result<(), BlockError> {
            let data = self.sectors.lock().unwrap();
            let start = lba as usize * self.sector_size as usize;
            let end = start + buf.len();
            if end > data.len() {
                return Err(BlockError::OutOfRange);
            }
            buf.copy_from_slice(&data[start..end]);
            Ok(())
        }
        fn write(&self, lba: u64, buf: &[u8]) -> Result<(), BlockError> {
            let mut data = self.sectors.lock().unwrap();
            let start = lba as usize * self.sector_size as usize;
            let end = start + buf.len();
            if end > data.len() {
                return Err(BlockError::OutOfRange);
            }
            data[start..end].copy_from_slice(buf);
            Ok(())
        }
    }

    const SECTOR: usize = 512;
    const SECTORS_PER_CLUSTER: u8 = 1;
    const RESERVED: u16 = 4;
    const FAT_SECTORS: u32 = 2;
    const NUM_FATS: u8 = 1;
    const ROOT_CLUSTER: u32 = 2;

    fn build_volume() -> TestVolume {
        let total_sectors = 64u32;
        let mut data = vec![0u8; total_sectors as usize * SECTOR];

        // Boot sector.
        data[11..13].copy_from_slice(&(SECTOR as u16).to_le_bytes());
        data[13] = SECTORS_PER_CLUSTER;
        data[14..16].copy_from_slice(&RESERVED.to_le_bytes());
        data[16] = NUM_FATS;
        data[36..40].copy_from_slice(&FAT_SECTORS.to_le_bytes());
        data[44..48].copy_from_slice(&ROOT_CLUSTER.to_le_bytes());
        data[32..36].copy_from_slice(&total_sectors.to_le_bytes());
        data[510..512].copy_from_slice(&0xAA55u16.to_le_bytes());

        let data_start_lba = u64::from(RESERVED) + u64::from(NUM_FATS) * u64::from(FAT_SECTORS);
        let fat_offset = RESERVED as usize * SECTOR;

        // FAT entries: cluster 2 (root) -> EOC. Cluster 3 (file data) -> EOC.
        let set_entry = |data: &mut [u8], cluster: u32, value: u32| {
            let off = fat_offset + cluster as usize * 4;
            data[off..off + 4].copy_from_slice(&value.to_le_bytes());
        };
        set_entry(&mut data, 2, 0x0FFF_FFFF);
        set_entry(&mut data, 3, 0x0FFF_FFFF);

        // Root directory (cluster 2): one file entry "HELLO.TXT" at cluster 3, size 5.
        let root_lba = data_start_lba; // cluster 2 is first data cluster
        let root_off = root_lba as usize * SECTOR;
        let mut entry = [0u8; 32];
        entry[0..11].copy_from_slice(b"HELLO   TXT");
        entry[20..22].copy_from_slice(&0u16.to_le_bytes());
        entry[26..28].copy_from_slice(&3u16.to_le_bytes());
        entry[28..32].copy_from_slice(&5u32.to_le_bytes());
        data[root_off..root_off + 32].copy_from_slice(&entry);

        // File data (cluster 3): "hello" (5 bytes) padded with zeros to a full sector.
        let file_lba = data_start_lba + 1;
        let file_off = file_lba as usize * SECTOR;
        data[file_off..file_off + 5].copy_from_slice(b"hello");

        TestVolume {
            sectors: Mutex::new(data),
            sector_size: SECTOR as u32,
        }
    }

    #[test]
    fn mounts_and_parses_bpb() {
        let volume = build_volume();
        let fs = FatFs::mount(&volume).unwrap();
        assert_eq!(fs.bpb().root_cluster, ROOT_CLUSTER);
    }

    #[test]
    fn looks_up_and_reads_file() {
        let volume = build_volume();
        let fs = FatFs::mount(&volume).unwrap();
        let entry = fs.lookup("HELLO.TXT").unwrap();
        assert_eq!(entry.size, 5);
        assert!(!entry.is_dir);
        let content = fs.read_file(&entry).unwrap();
        assert_eq!(content, b"hello");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let volume = build_volume();
        let fs = FatFs::mount(&volume).unwrap();
        assert!(fs.lookup("hello.txt").is_ok());
    }

    #[test]
    fn lookup_missing_file_fails() {
        let volume = build_volume();
        let fs = FatFs::mount(&volume).unwrap();
        assert_eq!(fs.lookup("NOPE.TXT").unwrap_err(), FatError::NotFound);
    }

    #[test]
    fn write_file_overwrites_in_place() {
        let volume = build_volume();
        let fs = FatFs::mount(&volume).unwrap();
        let entry = fs.lookup("HELLO.TXT").unwrap();
        fs.write_file(&entry, b"HELLO").unwrap();
        let content = fs.read_file(&entry).unwrap();
        assert_eq!(content, b"HELLO");
    }

    #[test]
    fn write_file_rejects_growth() {
        let volume = build_volume();
        let fs = FatFs::mount(&volume).unwrap();
        let entry = fs.lookup("HELLO.TXT").unwrap();
        assert_eq!(
            fs.write_file(&entry, b"too many bytes for this file"),
            Err(FatError::ChainTooLong)
        );
    }
}
