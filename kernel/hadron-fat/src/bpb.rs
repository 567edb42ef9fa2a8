//! FAT32 BIOS parameter block.

use crate::FatError;

/// Size of a FAT32 boot sector, always exactly one sector on the media
/// this reader targets (512-byte sectors are assumed for the boot sector
/// itself; the BPB records the volume's actual sector size separately).
pub const BOOT_SECTOR_SIZE: usize = 512;

const SIG_OFFSET: usize = 510;
const BOOT_SIGNATURE: u16 = 0xAA55;

/// The fields of the FAT32 BPB this reader consumes.
///
/// Populated once at mount and immutable thereafter; every cluster/sector
/// computation elsewhere in this crate goes through [`Bpb::data_start_lba`]
/// and [`Bpb::cluster_to_lba`] rather than re-deriving these offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bpb {
    /// Bytes per sector (512, 1024, 2048, or 4096).
    pub bytes_per_sector: u16,
    /// Sectors per cluster (a power of two, 1 through 128).
    pub sectors_per_cluster: u8,
    /// Number of reserved sectors preceding the first FAT.
    pub reserved_sectors: u16,
    /// Number of FAT copies (1 or 2).
    pub num_fats: u8,
    /// Sectors occupied by a single FAT copy.
    pub sectors_per_fat: u32,
    /// Cluster number of the root directory (always >= 2).
    pub root_cluster: u32,
    /// Total sectors on the volume.
    pub total_sectors: u32,
}

impl Bpb {
    /// Parses and validates a 512-byte FAT32 boot sector.
    ///
    /// # Errors
    ///
    /// Returns [`FatError::BadBootSignature`] if the trailing `0xAA55`
    /// signature is missing, or [`FatError::InvalidBpb`] if any field is
    /// out of the range the FAT32 spec allows.
    pub fn parse(sector: &[u8; BOOT_SECTOR_SIZE]) -> Result<Self, FatError> {
        let signature = u16::from_le_bytes([sector[SIG_OFFSET], sector[SIG_OFFSET + 1]]);
        if signature != BOOT_SIGNATURE {
            return Err(FatError::BadBootSignature);
        }

        let bytes_per_sector = u16::from_le_bytes([sector[11], sector[12]]);
        let sectors_per_cluster = sector[13];
        let reserved_sectors = u16::from_le_bytes([sector[14], sector[15]]);
        let num_fats = sector[16];
        let total_sectors_16 = u16::from_le_bytes([sector[19], sector[20]]);
        let sectors_per_fat_32 = u32::from_le_bytes([sector[36], sector[37], sector[38], sector[39]]);
        let root_cluster = u32::from_le_bytes([sector[44], sector[45], sector[46], sector[47]]);
        let total_sectors_32 =
            u32::from_le_bytes([sector[32], sector[33], sector[34], sector[35]]);

        let total_sectors = if total_sectors_16 != 0 {
            u32::from(total_sectors_16)
        } else {
            total_sectors_32
        };

        if !matches!(bytes_per_sector, 512 | 1024 | 2048 | 4096) {
            return Err(FatError::InvalidBpb);
        }
        if !sectors_per_cluster.is_power_of_two() || sectors_per_cluster > 128 {
            return Err(FatError::InvalidBpb);
        }
        if reserved_sectors == 0 || !matches!(num_fats, 1 | 2) || sectors_per_fat_32 == 0 {
            return Err(FatError::InvalidBpb);
        }
        if root_cluster < 2 {
            return Err(FatError::InvalidBpb);
        }

        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            num_fats,
            sectors_per_fat: sectors_per_fat_32,
            root_cluster,
            total_sectors,
        })
    }

    /// The first LBA of the data region, after the reserved sectors and
    /// every FAT copy.
    #[must_use]
    pub fn data_start_lba(&self) -> u64 {
        u64::from(self.reserved_sectors) + u64::from(self.num_fats) * u64::from(self.sectors_per_fat)
    }

    /// Maps a cluster number to its first LBA in the data region.
    ///
    /// # Panics
    ///
    /// Debug-panics if `cluster < 2`, which is never a valid data cluster.
    #[must_use]
    pub fn cluster_to_lba(&self, cluster: u32) -> u64 {
        debug_assert!(cluster >= 2, "cluster 0 and 1 are reserved, not data");
        self.data_start_lba() + u64::from(cluster - 2) * u64::from(self.sectors_per_cluster)
    }

    /// Bytes in one cluster.
    #[must_use]
    pub fn cluster_size(&self) -> u32 {
        u32::from(self.bytes_per_sector) * u32::from(self.sectors_per_cluster)
    }

    /// Upper bound on the number of clusters a chain walk may traverse
    /// before it is assumed to be corrupt (cyclic).
    #[must_use]
    pub fn max_chain_length(&self) -> u32 {
        (self.sectors_per_fat * u32::from(self.bytes_per_sector)) / 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sector() -> [u8; BOOT_SECTOR_SIZE] {
        let mut s = [0u8; BOOT_SECTOR_SIZE];
        s[11..13].copy_from_slice(&512u16.to_le_bytes());
        s[13] = 8;
        s[14..16].copy_from_slice(&32u16.to_le_bytes());
        s[16] = 2;
        s[36..40].copy_from_slice(&6408u32.to_le_bytes());
        s[44..48].copy_from_slice(&2u32.to_le_bytes());
        s[32..36].copy_from_slice(&204_800u32.to_le_bytes());
        s[510..512].copy_from_slice(&BOOT_SIGNATURE.to_le_bytes());
        s
    }

    #[test]
    fn parses_valid_bpb() {
        let bpb = Bpb::parse(&sample_sector()).unwrap();
        assert_eq!(bpb.bytes_per_sector, 512);
        assert_eq!(bpb.sectors_per_cluster, 8);
        assert_eq!(bpb.root_cluster, 2);
    }

    #[test]
    fn rejects_missing_signature() {
        let mut sector = sample_sector();
        sector[510] = 0;
        assert_eq!(Bpb::parse(&sector), Err(FatError::BadBootSignature));
    }

    #[test]
    fn data_start_and_cluster_mapping() {
        let bpb = Bpb::parse(&sample_sector()).unwrap();
        let data_start = bpb.data_start_lba();
        assert_eq!(data_start, 32 + 2 * 6408);
        assert_eq!(bpb.cluster_to_lba(2), data_start);
        assert_eq!(bpb.cluster_to_lba(3), data_start + 8);
    }

    #[test]
    fn rejects_bad_sectors_per_cluster() {
        let mut sector = sample_sector();
        sector[13] = 3;
        assert_eq!(Bpb::parse(&sector), Err(FatError::InvalidBpb));
    }
}
