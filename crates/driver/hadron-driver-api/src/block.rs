//! Block device trait backing the FAT32 reader.
//!
//! The concrete driver (AHCI, virtio-blk) is an external collaborator; this
//! crate only specifies the `read`/`write` contract the FAT32 reader is
//! written against, expressed in whole logical sectors so no subsystem
//! needs to reason about partial-sector I/O except the block device
//! adapter itself.

use core::fmt;

/// Errors a [`BlockDevice`] implementation can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    /// The requested LBA range extends past the end of the device.
    OutOfRange,
    /// The underlying controller reported a transfer failure.
    TransferFailed,
    /// `buf.len()` was not a multiple of the device's sector size.
    UnalignedBuffer,
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::OutOfRange => "LBA range out of bounds",
            Self::TransferFailed => "block transfer failed",
            Self::UnalignedBuffer => "buffer not a multiple of sector size",
        };
        f.write_str(msg)
    }
}

/// A logical-block-addressed storage device.
///
/// Every method operates in whole sectors; `buf.len()` must be an exact
/// multiple of [`BlockDevice::sector_size`] or the call fails with
/// [`BlockError::UnalignedBuffer`] before any I/O is attempted.
pub trait BlockDevice: Send + Sync {
    /// Sector size in bytes (512, typically, but not assumed by callers).
    fn sector_size(&self) -> u32;

    /// Total number of addressable sectors.
    fn sector_count(&self) -> u64;

    /// Reads whole sectors starting at `lba` into `buf`.
    ///
    /// # Errors
    ///
    /// See [`BlockError`].
    fn read(&self, lba: u64, buf: &mut [u8]) -> Result<(), BlockError>;

    /// Writes whole sectors starting at `lba` from `buf`.
    ///
    /// # Errors
    ///
    /// See [`BlockError`].
    fn write(&self, lba: u64, buf: &[u8]) -> Result<(), BlockError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MemoryDisk {
        sector_size: u32,
        data: std::sync::Mutex<Vec<u8>>,
    }

    impl BlockDevice for MemoryDisk {
        fn sector_size(&self) -> u32 {
            self.sector_size
        }

        fn sector_count(&self) -> u64 {
            self.data.lock().unwrap().len() as u64 / u64::from(self.sector_size)
        }

        fn read(&self, lba: u64, buf: &mut [u8]) -> Result<(), BlockError> {
            if buf.len() % self.sector_size as usize != 0 {
                return Err(BlockError::UnalignedBuffer);
            }
            let data = self.data.lock().unwrap();
            let start = lba as usize * self.sector_size as usize;
            let end = start + buf.len();
            if end > data.len() {
                return Err(BlockError::OutOfRange);
            }
            buf.copy_from_slice(&data[start..end]);
            Ok(())
        }

        fn write(&self, lba: u64, buf: &[u8]) -> Result<(), BlockError> {
            if buf.len() % self.sector_size as usize != 0 {
                return Err(BlockError::UnalignedBuffer);
            }
            let mut data = self.data.lock().unwrap();
            let start = lba as usize * self.sector_size as usize;
            let end = start + buf.len();
            if end > data.len() {
                return Err(BlockError::OutOfRange);
            }
            data[start..end].copy_from_slice(buf);
            Ok(())
        }
    }

    #[test]
    fn read_write_roundtrip() {
        let disk = MemoryDisk {
            sector_size: 512,
            data: std::sync::Mutex::new(vec![0u8; 512 * 4]),
        };
        let mut buf = [0xABu8; 512];
        disk.write(1, &buf).unwrap();
        buf.fill(0);
        disk.read(1, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn rejects_unaligned_buffer() {
        let disk = MemoryDisk {
            sector_size: 512,
            data: std::sync::Mutex::new(vec![0u8; 512 * 4]),
        };
        let mut buf = [0u8; 100];
        assert_eq!(disk.read(0, &mut buf), Err(BlockError::UnalignedBuffer));
    }

    #[test]
    fn rejects_out_of_range() {
        let disk = MemoryDisk {
            sector_size: 512,
            data: std::sync::Mutex::new(vec![0u8; 512 * 4]),
        };
        let mut buf = [0u8; 512];
        assert_eq!(disk.read(10, &mut buf), Err(BlockError::OutOfRange));
    }
}
