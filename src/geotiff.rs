//! The top-level file handle: header parse plus lazy directory walk.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::TiffError;
use crate::image::RasterImage;
use crate::io::range_reader::RangeReader;
use crate::tiff::codec::DecoderRegistry;
use crate::tiff::header::{ByteOrder, TiffHeader, BIGTIFF_HEADER_SIZE};
use crate::tiff::ifd::{parse_ifd_at, Ifd};
use crate::tiff::tags::tag;

/// Memoized state of the directory chain walk.
///
/// Directories are parsed on demand, strictly in order, and never
/// re-fetched. `total` is set once the walk reaches a zero next-offset.
struct ChainState {
    ifds: Vec<Arc<Ifd>>,
    total: Option<usize>,
}

/// An open TIFF/BigTIFF file over a byte-range source.
///
/// Opening reads only the header; directories are fetched lazily as they
/// are requested. The handle is cheap to share behind an `Arc` and all
/// methods take `&self`.
pub struct GeoTiff<S> {
    source: Arc<S>,
    registry: Arc<DecoderRegistry>,
    header: TiffHeader,
    chain: Mutex<ChainState>,
}

impl<S: RangeReader + 'static> GeoTiff<S> {
    /// Opens a TIFF file with the default codec registry.
    pub async fn open(source: S) -> Result<Self, TiffError> {
        Self::open_with_registry(source, DecoderRegistry::default()).await
    }

    /// Opens a TIFF file with a caller-provided codec registry.
    ///
    /// Reads `min(16, file size)` bytes: enough for either header flavor,
    /// without over-reading files shorter than a BigTIFF header.
    pub async fn open_with_registry(
        source: S,
        registry: DecoderRegistry,
    ) -> Result<Self, TiffError> {
        let size = source.size();
        let head_len = (BIGTIFF_HEADER_SIZE as u64).min(size) as usize;
        let bytes = source.read_exact_at(0, head_len).await?;
        let header = TiffHeader::parse(&bytes, size)?;
        debug!(
            source = source.identifier(),
            bigtiff = header.is_bigtiff,
            first_ifd_offset = header.first_ifd_offset,
            "opened tiff"
        );

        Ok(Self {
            source: Arc::new(source),
            registry: Arc::new(registry),
            header,
            chain: Mutex::new(ChainState {
                ifds: Vec::new(),
                total: None,
            }),
        })
    }

    pub fn header(&self) -> &TiffHeader {
        &self.header
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    pub fn is_bigtiff(&self) -> bool {
        self.header.is_bigtiff
    }

    /// The underlying byte source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Walks the chain (parsing as needed) until directory `index` is
    /// known, and returns it.
    ///
    /// # Errors
    ///
    /// `ImageIndexOutOfRange` when the chain ends before `index`.
    pub async fn ifd(&self, index: usize) -> Result<Arc<Ifd>, TiffError> {
        let mut chain = self.chain.lock().await;
        while chain.ifds.len() <= index {
            if chain.total.is_some() {
                return Err(TiffError::ImageIndexOutOfRange(index));
            }
            self.parse_next(&mut chain).await?;
        }
        Ok(chain.ifds[index].clone())
    }

    /// Number of images in the file. Walks (and memoizes) the whole
    /// directory chain on first call.
    pub async fn image_count(&self) -> Result<usize, TiffError> {
        let mut chain = self.chain.lock().await;
        while chain.total.is_none() {
            self.parse_next(&mut chain).await?;
        }
        Ok(chain.ifds.len())
    }

    /// Whether the directory chain is a proper overview pyramid: every
    /// image after the first strictly smaller than its predecessor in both
    /// dimensions. Multi-page files with equal-sized pages are not
    /// overviews.
    pub async fn has_overviews(&self) -> Result<bool, TiffError> {
        let count = self.image_count().await?;
        if count < 2 {
            return Ok(false);
        }
        let mut previous = self.dimensions(0).await?;
        for index in 1..count {
            let current = self.dimensions(index).await?;
            if current.0 >= previous.0 || current.1 >= previous.1 {
                return Ok(false);
            }
            previous = current;
        }
        Ok(true)
    }

    async fn dimensions(&self, index: usize) -> Result<(u64, u64), TiffError> {
        let ifd = self.ifd(index).await?;
        let width = ifd
            .u64_by_id(tag::IMAGE_WIDTH)
            .ok_or(TiffError::MissingTag("ImageWidth"))?;
        let height = ifd
            .u64_by_id(tag::IMAGE_LENGTH)
            .ok_or(TiffError::MissingTag("ImageLength"))?;
        Ok((width, height))
    }

    /// Opens directory `index` for raster reads.
    pub async fn image(&self, index: usize) -> Result<RasterImage<S>, TiffError> {
        self.open_image(index, false).await
    }

    /// Like [`GeoTiff::image`], with an LRU cache of decoded tiles kept on
    /// the returned image.
    pub async fn image_with_cache(&self, index: usize) -> Result<RasterImage<S>, TiffError> {
        self.open_image(index, true).await
    }

    async fn open_image(&self, index: usize, cache_tiles: bool) -> Result<RasterImage<S>, TiffError> {
        let ifd = self.ifd(index).await?;
        RasterImage::new(
            ifd,
            &self.header,
            self.source.clone(),
            self.registry.clone(),
            cache_tiles,
        )
    }

    /// Parses the directory after the last memoized one. Caller holds the
    /// chain lock.
    async fn parse_next(&self, chain: &mut ChainState) -> Result<(), TiffError> {
        let offset = match chain.ifds.last() {
            Some(last) => last.next_ifd_offset,
            None => self.header.first_ifd_offset,
        };
        if offset == 0 {
            chain.total = Some(chain.ifds.len());
            return Ok(());
        }
        if offset >= self.source.size() {
            return Err(TiffError::InvalidIfdOffset(offset));
        }

        let ifd = parse_ifd_at(self.source.as_ref(), &self.header, offset).await?;
        debug!(
            index = chain.ifds.len(),
            offset,
            entries = ifd.len(),
            "parsed directory"
        );
        if ifd.next_ifd_offset == 0 {
            chain.total = Some(chain.ifds.len() + 1);
        }
        chain.ifds.push(Arc::new(ifd));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IoError;

    use async_trait::async_trait;
    use bytes::Bytes;

    struct MemSource {
        data: Bytes,
    }

    #[async_trait]
    impl RangeReader for MemSource {
        async fn read_exact_at(&self, offset: u64, length: usize) -> Result<Bytes, IoError> {
            crate::io::range_reader::check_bounds(offset, length, self.size())?;
            let start = offset as usize;
            Ok(self.data.slice(start..start + length))
        }

        fn size(&self) -> u64 {
            self.data.len() as u64
        }

        fn identifier(&self) -> &str {
            "mem://chain"
        }
    }

    // Minimal classic little-endian writer: header at 0, directories
    // appended in order, each pointing at the next.
    fn chain_file(directories: usize) -> Bytes {
        let mut buf = vec![0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00];
        for i in 0..directories {
            let here = buf.len() as u32;
            assert_eq!(here, 8 + i as u32 * (2 + 2 * 12 + 4));
            buf.extend_from_slice(&2u16.to_le_bytes());
            // Each directory halves both dimensions, pyramid-style.
            for (id, value) in [
                (tag::IMAGE_WIDTH, 100u32 >> i),
                (tag::IMAGE_LENGTH, 50u32 >> i),
            ] {
                buf.extend_from_slice(&id.to_le_bytes());
                buf.extend_from_slice(&3u16.to_le_bytes());
                buf.extend_from_slice(&1u32.to_le_bytes());
                buf.extend_from_slice(&value.to_le_bytes());
            }
            let next = if i + 1 < directories {
                here + (2 + 2 * 12 + 4)
            } else {
                0
            };
            buf.extend_from_slice(&next.to_le_bytes());
        }
        Bytes::from(buf)
    }

    async fn open_chain(directories: usize) -> GeoTiff<MemSource> {
        GeoTiff::open(MemSource {
            data: chain_file(directories),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn walks_directories_in_order() {
        let tiff = open_chain(3).await;
        for i in 0..3 {
            let ifd = tiff.ifd(i).await.unwrap();
            assert_eq!(ifd.u64_by_id(tag::IMAGE_WIDTH), Some(100 >> i));
        }
        // Memoized: a second request hits the cached chain.
        let again = tiff.ifd(1).await.unwrap();
        assert_eq!(again.u64_by_id(tag::IMAGE_WIDTH), Some(50));
    }

    #[tokio::test]
    async fn image_count_walks_to_the_end() {
        let tiff = open_chain(3).await;
        assert_eq!(tiff.image_count().await.unwrap(), 3);
        // Count is memoized alongside the chain.
        assert_eq!(tiff.image_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn index_past_chain_end_fails() {
        let tiff = open_chain(3).await;
        assert!(matches!(
            tiff.ifd(5).await,
            Err(TiffError::ImageIndexOutOfRange(5))
        ));
        // The chain itself is still intact.
        assert_eq!(tiff.image_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn overview_detection() {
        assert!(open_chain(2).await.has_overviews().await.unwrap());
        assert!(!open_chain(1).await.has_overviews().await.unwrap());
    }

    #[tokio::test]
    async fn equal_sized_pages_are_not_overviews() {
        // Two directories, identical dimensions: a multi-page document.
        let mut buf = vec![0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00];
        for i in 0..2u32 {
            buf.extend_from_slice(&2u16.to_le_bytes());
            for (id, value) in [(tag::IMAGE_WIDTH, 100u32), (tag::IMAGE_LENGTH, 50)] {
                buf.extend_from_slice(&id.to_le_bytes());
                buf.extend_from_slice(&3u16.to_le_bytes());
                buf.extend_from_slice(&1u32.to_le_bytes());
                buf.extend_from_slice(&value.to_le_bytes());
            }
            let next = if i == 0 { 8 + (2 + 2 * 12 + 4) } else { 0u32 };
            buf.extend_from_slice(&next.to_le_bytes());
        }
        let tiff = GeoTiff::open(MemSource {
            data: Bytes::from(buf),
        })
        .await
        .unwrap();
        assert!(!tiff.has_overviews().await.unwrap());
    }

    #[tokio::test]
    async fn short_file_still_parses_classic_header() {
        // 12-byte file: shorter than a BigTIFF header, still opens.
        let mut buf = vec![0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00];
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&[0, 0]); // truncated next offset is never read
        let err = GeoTiff::open(MemSource {
            data: Bytes::from(buf),
        })
        .await;
        // Header parse succeeds; the directory itself is broken.
        assert!(err.is_ok());
    }

    #[tokio::test]
    async fn rejects_next_offset_past_eof() {
        let mut buf = vec![0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00];
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0xFFFF_0000u32.to_le_bytes());
        let tiff = GeoTiff::open(MemSource {
            data: Bytes::from(buf),
        })
        .await
        .unwrap();
        assert!(matches!(
            tiff.image_count().await,
            Err(TiffError::InvalidIfdOffset(0xFFFF_0000))
        ));
        assert!(matches!(
            tiff.ifd(1).await,
            Err(TiffError::InvalidIfdOffset(0xFFFF_0000))
        ));
    }
}
