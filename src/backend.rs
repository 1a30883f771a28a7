//! Disk backend boundary.
//!
//! The cache issues synchronous block I/O through [`DiskBackend`]. I/O
//! happens only while the calling thread holds the target slot's content
//! lock, and never while any bucket or eviction lock is held, so backend
//! latency cannot stall unrelated lookups.

use crate::error::{CacheError, CacheResult};
use crate::DeviceId;

use parking_lot::Mutex;
use std::collections::HashMap;

/// Synchronous block transport keyed by (device id, block number).
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`. The cache may call them from any
/// thread, but never concurrently for the same block: the per-slot content
/// lock serializes all I/O for one (device, block number) pair.
///
/// # Errors
///
/// Failures are opaque to the cache. They surface as
/// [`CacheError::Device`] and are never retried.
pub trait DiskBackend: Send + Sync {
    /// Read one block into `buf`.
    ///
    /// `buf` is exactly the configured block size.
    fn read_block(&self, dev: DeviceId, blockno: u64, buf: &mut [u8]) -> CacheResult<()>;

    /// Write one block from `buf`.
    fn write_block(&self, dev: DeviceId, blockno: u64, buf: &[u8]) -> CacheResult<()>;
}

/// In-memory [`DiskBackend`] for tests, fixtures, and benchmarks.
///
/// Blocks that were never written read back as zeroes.
#[derive(Default)]
pub struct MemBackend {
    blocks: Mutex<HashMap<(DeviceId, u64), Box<[u8]>>>,
}

impl MemBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-load a block, e.g. to seed a test fixture.
    pub fn insert(&self, dev: DeviceId, blockno: u64, data: &[u8]) {
        self.blocks.lock().insert((dev, blockno), data.into());
    }

    /// Copy of the stored bytes for a block, if it was ever written.
    pub fn block(&self, dev: DeviceId, blockno: u64) -> Option<Vec<u8>> {
        self.blocks.lock().get(&(dev, blockno)).map(|b| b.to_vec())
    }
}

impl DiskBackend for MemBackend {
    fn read_block(&self, dev: DeviceId, blockno: u64, buf: &mut [u8]) -> CacheResult<()> {
        let blocks = self.blocks.lock();
        match blocks.get(&(dev, blockno)) {
            Some(data) => {
                let n = buf.len().min(data.len());
                buf[..n].copy_from_slice(&data[..n]);
                buf[n..].fill(0);
            }
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_block(&self, dev: DeviceId, blockno: u64, buf: &[u8]) -> CacheResult<()> {
        self.blocks.lock().insert((dev, blockno), buf.into());
        Ok(())
    }
}

/// Backend that fails every operation. Useful for exercising error paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingBackend;

impl DiskBackend for FailingBackend {
    fn read_block(&self, _dev: DeviceId, _blockno: u64, _buf: &mut [u8]) -> CacheResult<()> {
        Err(CacheError::Device)
    }

    fn write_block(&self, _dev: DeviceId, _blockno: u64, _buf: &[u8]) -> CacheResult<()> {
        Err(CacheError::Device)
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn test_absent_block_reads_zero() {
        let backend = MemBackend::new();
        let mut buf = [0xFFu8; 16];
        backend.read_block(1, 42, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn test_write_then_read() {
        let backend = MemBackend::new();
        backend.write_block(1, 7, &[0xAB; 16]).unwrap();

        let mut buf = [0u8; 16];
        backend.read_block(1, 7, &mut buf).unwrap();
        assert_eq!(buf, [0xAB; 16]);
    }

    #[test]
    fn test_devices_are_distinct() {
        let backend = MemBackend::new();
        backend.write_block(1, 7, &[0x11; 8]).unwrap();
        backend.write_block(2, 7, &[0x22; 8]).unwrap();

        assert_eq!(backend.block(1, 7).unwrap(), vec![0x11; 8]);
        assert_eq!(backend.block(2, 7).unwrap(), vec![0x22; 8]);
    }

    #[test]
    fn test_seeded_block_pads_short_data() {
        let backend = MemBackend::new();
        backend.insert(1, 3, &[0xCD; 4]);

        let mut buf = [0xFFu8; 8];
        backend.read_block(1, 3, &mut buf).unwrap();
        assert_eq!(&buf[..4], &[0xCD; 4]);
        assert_eq!(&buf[4..], &[0u8; 4]);
    }

    #[test]
    fn test_failing_backend() {
        let backend = FailingBackend;
        let mut buf = [0u8; 8];
        assert_eq!(
            backend.read_block(1, 0, &mut buf),
            Err(CacheError::Device)
        );
        assert_eq!(backend.write_block(1, 0, &buf), Err(CacheError::Device));
    }
}
