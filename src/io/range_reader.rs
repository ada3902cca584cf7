use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

/// A byte-range request against a [`RangeReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slice {
    /// Absolute offset of the first byte.
    pub offset: u64,
    /// Number of bytes requested.
    pub length: u64,
}

impl Slice {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Offset one past the last requested byte.
    pub fn top(&self) -> u64 {
        self.offset + self.length
    }
}

/// Abstraction over random-access byte sources (local file, HTTP, S3).
///
/// Everything above this trait is transport-agnostic: the TIFF parser only
/// ever asks for absolute byte ranges. Implementations must be cheap to
/// share across tasks; concurrent calls to `read_exact_at` are expected.
#[async_trait]
pub trait RangeReader: Send + Sync {
    /// Reads exactly `length` bytes starting at absolute `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range exceeds the resource bounds, the
    /// transport fails, or fewer bytes than requested come back.
    async fn read_exact_at(&self, offset: u64, length: usize) -> Result<Bytes, IoError>;

    /// Fetches several ranges, preserving request order in the result.
    ///
    /// The default issues one `read_exact_at` per range. Transports with a
    /// native batch form (HTTP multi-range requests) override this.
    async fn fetch_ranges(&self, ranges: &[Slice]) -> Result<Vec<Bytes>, IoError> {
        let mut out = Vec::with_capacity(ranges.len());
        for range in ranges {
            out.push(self.read_exact_at(range.offset, range.length as usize).await?);
        }
        Ok(out)
    }

    /// Total size of the underlying resource in bytes.
    fn size(&self) -> u64;

    /// Human-readable identifier (path, URL, or bucket/key) for logging.
    fn identifier(&self) -> &str;
}

/// Rejects a range that does not fit inside `size` bytes.
pub(crate) fn check_bounds(offset: u64, length: usize, size: u64) -> Result<(), IoError> {
    let requested = length as u64;
    if offset.checked_add(requested).map_or(true, |top| top > size) {
        return Err(IoError::RangeOutOfBounds {
            offset,
            requested,
            size,
        });
    }
    Ok(())
}
