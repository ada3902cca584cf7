use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lru::LruCache;
use tokio::sync::{Mutex, Notify, RwLock};

use crate::error::IoError;
use crate::io::range_reader::RangeReader;

/// Default block size: 64KB. Walking an IFD chain touches many small,
/// scattered ranges; one block usually covers a whole directory plus its
/// out-of-line values.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Default capacity in blocks (128 * 64KB = 8MB).
const DEFAULT_CACHE_CAPACITY: usize = 128;

/// Block-aligned caching layer over any [`RangeReader`].
///
/// Directory parsing issues many small reads at scattered offsets; against
/// a remote source each would otherwise be its own request. The cache
/// rounds reads up to fixed-size blocks, keeps them in an LRU, and
/// deduplicates concurrent fetches of the same block (singleflight), so
/// parallel tile reads that land on the same directory pay for one fetch.
pub struct BlockCache<R> {
    inner: Arc<R>,
    block_size: usize,
    cache: RwLock<LruCache<u64, Bytes>>,
    in_flight: Mutex<HashMap<u64, Arc<Notify>>>,
}

impl<R: RangeReader> BlockCache<R> {
    /// Wraps `inner` with the default block size and capacity.
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_BLOCK_SIZE, DEFAULT_CACHE_CAPACITY)
    }

    /// Wraps `inner` with a custom block size (bytes) and capacity (blocks).
    ///
    /// # Panics
    ///
    /// Panics if `block_size` or `capacity` is zero.
    pub fn with_capacity(inner: R, block_size: usize, capacity: usize) -> Self {
        assert!(block_size > 0, "block size must be non-zero");
        let capacity = NonZeroUsize::new(capacity).expect("capacity must be non-zero");
        Self {
            inner: Arc::new(inner),
            block_size,
            cache: RwLock::new(LruCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// A reference to the wrapped reader.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Returns the block, fetching it at most once across concurrent
    /// callers. Failed fetches are not cached; every waiter observes the
    /// miss and the next caller retries.
    async fn block(&self, index: u64) -> Result<Bytes, IoError> {
        loop {
            if let Some(data) = self.cache.read().await.peek(&index) {
                return Ok(data.clone());
            }

            let notify = {
                let mut in_flight = self.in_flight.lock().await;
                if let Some(notify) = in_flight.get(&index) {
                    let notify = notify.clone();
                    drop(in_flight);
                    notify.notified().await;
                    continue;
                }
                let notify = Arc::new(Notify::new());
                in_flight.insert(index, notify.clone());
                notify
            };

            let result = self.fetch_block(index).await;
            {
                let mut cache = self.cache.write().await;
                let mut in_flight = self.in_flight.lock().await;
                if let Ok(ref data) = result {
                    cache.put(index, data.clone());
                }
                in_flight.remove(&index);
            }
            notify.notify_waiters();

            return result;
        }
    }

    /// Reads block `index` from the source; the final block may be short.
    async fn fetch_block(&self, index: u64) -> Result<Bytes, IoError> {
        let offset = index * self.block_size as u64;
        let size = self.inner.size();
        let remaining = size.saturating_sub(offset);
        if remaining == 0 {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: self.block_size as u64,
                size,
            });
        }
        let length = (self.block_size as u64).min(remaining) as usize;
        self.inner.read_exact_at(offset, length).await
    }

    #[inline]
    fn block_index(&self, offset: u64) -> u64 {
        offset / self.block_size as u64
    }

    #[inline]
    fn intra_block(&self, offset: u64) -> usize {
        (offset % self.block_size as u64) as usize
    }
}

#[async_trait]
impl<R: RangeReader + 'static> RangeReader for BlockCache<R> {
    async fn read_exact_at(&self, offset: u64, length: usize) -> Result<Bytes, IoError> {
        let size = self.inner.size();
        if offset + length as u64 > size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: length as u64,
                size,
            });
        }
        if length == 0 {
            return Ok(Bytes::new());
        }

        let first = self.block_index(offset);
        let last = self.block_index(offset + length as u64 - 1);

        if first == last {
            let block = self.block(first).await?;
            let start = self.intra_block(offset);
            return Ok(block.slice(start..start + length));
        }

        let mut assembled = BytesMut::with_capacity(length);
        let mut cursor = offset;
        let mut remaining = length;
        for index in first..=last {
            let block = self.block(index).await?;
            let start = self.intra_block(cursor);
            let take = (block.len() - start).min(remaining);
            assembled.extend_from_slice(&block[start..start + take]);
            cursor += take as u64;
            remaining -= take;
        }
        Ok(assembled.freeze())
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}
