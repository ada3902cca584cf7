//! Raster access to a single image (one IFD) of a TIFF file.
//!
//! `RasterImage` owns the derived geometry of its directory and turns
//! window reads into tile/strip fetches: compute the covering tile grid,
//! fetch and decode the chunks concurrently, then scatter the decoded
//! samples into per-sample output buffers.

use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, trace};

use crate::error::TiffError;
use crate::io::range_reader::RangeReader;
use crate::tiff::codec::DecoderRegistry;
use crate::tiff::header::{ByteOrder, TiffHeader};
use crate::tiff::ifd::{GeoKeyValue, Ifd};
use crate::tiff::tags::tag;

/// Decoded tiles kept per image when the cache is enabled.
const TILE_CACHE_CAPACITY: usize = 16;

/// Half-open pixel window: `left..right` by `top..bottom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub left: u64,
    pub top: u64,
    pub right: u64,
    pub bottom: u64,
}

impl Window {
    pub fn new(left: u64, top: u64, right: u64, bottom: u64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> u64 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u64 {
        self.bottom.saturating_sub(self.top)
    }
}

/// Options for [`RasterImage::read_rasters`].
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Pixel window to read; the full image when absent.
    pub window: Option<Window>,
    /// Sample (band) indices to read; all samples when absent.
    pub samples: Option<Vec<usize>>,
    /// Requested output width. Only the window's own width is supported;
    /// anything else fails with `ResamplingUnsupported`.
    pub width: Option<u64>,
    /// Requested output height, same rule as `width`.
    pub height: Option<u64>,
}

/// A flat per-sample pixel buffer in the sample's natural type.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBuffer {
    U8(Vec<u8>),
    I8(Vec<i8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U32(Vec<u32>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl SampleBuffer {
    pub fn len(&self) -> usize {
        match self {
            SampleBuffer::U8(v) => v.len(),
            SampleBuffer::I8(v) => v.len(),
            SampleBuffer::U16(v) => v.len(),
            SampleBuffer::I16(v) => v.len(),
            SampleBuffer::U32(v) => v.len(),
            SampleBuffer::I32(v) => v.len(),
            SampleBuffer::F32(v) => v.len(),
            SampleBuffer::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_u8(&self) -> Option<&[u8]> {
        match self {
            SampleBuffer::U8(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<&[u16]> {
        match self {
            SampleBuffer::U16(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<&[u32]> {
        match self {
            SampleBuffer::U32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> Option<&[i16]> {
        match self {
            SampleBuffer::I16(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            SampleBuffer::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match self {
            SampleBuffer::F64(v) => Some(v),
            _ => None,
        }
    }

    /// Element `index` promoted to f64.
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        match self {
            SampleBuffer::U8(v) => v.get(index).map(|&x| x as f64),
            SampleBuffer::I8(v) => v.get(index).map(|&x| x as f64),
            SampleBuffer::U16(v) => v.get(index).map(|&x| x as f64),
            SampleBuffer::I16(v) => v.get(index).map(|&x| x as f64),
            SampleBuffer::U32(v) => v.get(index).map(|&x| x as f64),
            SampleBuffer::I32(v) => v.get(index).map(|&x| x as f64),
            SampleBuffer::F32(v) => v.get(index).map(|&x| x as f64),
            SampleBuffer::F64(v) => v.get(index).copied(),
        }
    }

    fn set(&mut self, index: usize, value: f64) {
        match self {
            SampleBuffer::U8(v) => v[index] = value as u8,
            SampleBuffer::I8(v) => v[index] = value as i8,
            SampleBuffer::U16(v) => v[index] = value as u16,
            SampleBuffer::I16(v) => v[index] = value as i16,
            SampleBuffer::U32(v) => v[index] = value as u32,
            SampleBuffer::I32(v) => v[index] = value as i32,
            SampleBuffer::F32(v) => v[index] = value as f32,
            SampleBuffer::F64(v) => v[index] = value,
        }
    }
}

/// Result of a window read: one buffer per requested sample, each
/// `width * height` elements in row-major order.
#[derive(Debug, Clone)]
pub struct RasterData {
    pub width: u64,
    pub height: u64,
    pub samples: Vec<SampleBuffer>,
}

type ScalarReader = fn(&[u8], usize, ByteOrder) -> f64;

/// One fetched-and-decoded tile or strip, keyed back to the grid.
struct TileChunk {
    x_tile: u64,
    y_tile: u64,
    /// Position in the requested-samples list for planar fetches; `None`
    /// means the chunk is chunky and serves every requested sample.
    sample_slot: Option<usize>,
    data: Bytes,
}

/// A single image (IFD) opened for raster reads.
pub struct RasterImage<S> {
    ifd: Arc<Ifd>,
    source: Arc<S>,
    registry: Arc<DecoderRegistry>,
    byte_order: ByteOrder,
    width: u64,
    height: u64,
    is_tiled: bool,
    tile_width: u64,
    tile_height: u64,
    planar_configuration: u16,
    samples_per_pixel: usize,
    bits_per_sample: Vec<u16>,
    sample_formats: Vec<u16>,
    tile_cache: Option<Arc<Mutex<LruCache<u64, Bytes>>>>,
}

impl<S> Clone for RasterImage<S> {
    fn clone(&self) -> Self {
        Self {
            ifd: self.ifd.clone(),
            source: self.source.clone(),
            registry: self.registry.clone(),
            byte_order: self.byte_order,
            width: self.width,
            height: self.height,
            is_tiled: self.is_tiled,
            tile_width: self.tile_width,
            tile_height: self.tile_height,
            planar_configuration: self.planar_configuration,
            samples_per_pixel: self.samples_per_pixel,
            bits_per_sample: self.bits_per_sample.clone(),
            sample_formats: self.sample_formats.clone(),
            tile_cache: self.tile_cache.clone(),
        }
    }
}

impl<S: RangeReader + 'static> RasterImage<S> {
    pub(crate) fn new(
        ifd: Arc<Ifd>,
        header: &TiffHeader,
        source: Arc<S>,
        registry: Arc<DecoderRegistry>,
        cache_tiles: bool,
    ) -> Result<Self, TiffError> {
        let width = ifd
            .u64_by_id(tag::IMAGE_WIDTH)
            .ok_or(TiffError::MissingTag("ImageWidth"))?;
        let height = ifd
            .u64_by_id(tag::IMAGE_LENGTH)
            .ok_or(TiffError::MissingTag("ImageLength"))?;

        let planar_configuration = ifd.u64_by_id(tag::PLANAR_CONFIGURATION).unwrap_or(1) as u16;
        if planar_configuration != 1 && planar_configuration != 2 {
            return Err(TiffError::InvalidPlanarConfiguration(planar_configuration));
        }

        let samples_per_pixel = ifd
            .u64_by_id(tag::SAMPLES_PER_PIXEL)
            .filter(|&n| n > 0)
            .unwrap_or(1) as usize;

        let bits_per_sample = ifd
            .tag_by_id(tag::BITS_PER_SAMPLE)
            .and_then(|t| t.value.to_u16_vec())
            .ok_or(TiffError::MissingTag("BitsPerSample"))?;
        if bits_per_sample.len() < samples_per_pixel {
            return Err(TiffError::InvalidTagValue {
                tag: "BitsPerSample",
                message: format!(
                    "{} values for {} samples",
                    bits_per_sample.len(),
                    samples_per_pixel
                ),
            });
        }

        let sample_formats = ifd
            .tag_by_id(tag::SAMPLE_FORMAT)
            .and_then(|t| t.value.to_u16_vec())
            .unwrap_or_default();

        // An image is striped exactly when it has StripOffsets; a strip is
        // treated as a tile as wide as the image.
        let is_tiled = ifd.tag_by_id(tag::STRIP_OFFSETS).is_none();
        let (tile_width, tile_height) = if is_tiled {
            (
                ifd.u64_by_id(tag::TILE_WIDTH)
                    .ok_or(TiffError::MissingTag("TileWidth"))?,
                ifd.u64_by_id(tag::TILE_LENGTH)
                    .ok_or(TiffError::MissingTag("TileLength"))?,
            )
        } else {
            let rows = ifd.u64_by_id(tag::ROWS_PER_STRIP).unwrap_or(height);
            (width, rows.min(height))
        };
        if tile_width == 0 || tile_height == 0 {
            return Err(TiffError::InvalidTagValue {
                tag: "TileWidth",
                message: "zero tile dimensions".to_string(),
            });
        }

        let tile_cache = cache_tiles.then(|| {
            Arc::new(Mutex::new(LruCache::new(
                std::num::NonZeroUsize::new(TILE_CACHE_CAPACITY).unwrap(),
            )))
        });

        Ok(Self {
            ifd,
            source,
            registry,
            byte_order: header.byte_order,
            width,
            height,
            is_tiled,
            tile_width,
            tile_height,
            planar_configuration,
            samples_per_pixel,
            bits_per_sample,
            sample_formats,
            tile_cache,
        })
    }

    pub fn width(&self) -> u64 {
        self.width
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn is_tiled(&self) -> bool {
        self.is_tiled
    }

    /// Tile width; for striped images, the image width.
    pub fn tile_width(&self) -> u64 {
        self.tile_width
    }

    /// Tile height; for striped images, RowsPerStrip.
    pub fn tile_height(&self) -> u64 {
        self.tile_height
    }

    pub fn samples_per_pixel(&self) -> usize {
        self.samples_per_pixel
    }

    pub fn bits_per_sample(&self) -> &[u16] {
        &self.bits_per_sample
    }

    /// SampleFormat for sample `index`; unsigned when the tag is absent.
    pub fn sample_format(&self, index: usize) -> u16 {
        self.sample_formats.get(index).copied().unwrap_or(1)
    }

    pub fn planar_configuration(&self) -> u16 {
        self.planar_configuration
    }

    /// The underlying directory, for tag-level access.
    pub fn ifd(&self) -> &Ifd {
        &self.ifd
    }

    /// A resolved GeoKey by name.
    pub fn geo_key(&self, name: &str) -> Option<&GeoKeyValue> {
        self.ifd.geo_key(name)
    }

    /// GDAL's nodata marker, parsed out of its ASCII tag.
    pub fn gdal_nodata(&self) -> Option<f64> {
        let text = self.ifd.str_by_id(tag::GDAL_NODATA)?;
        text.trim_end_matches(['\0', '|', '\n', '\r', ' '])
            .trim()
            .parse()
            .ok()
    }

    fn tiles_per_row(&self) -> u64 {
        self.width.div_ceil(self.tile_width)
    }

    fn tiles_per_col(&self) -> u64 {
        self.height.div_ceil(self.tile_height)
    }

    /// Rows actually present in tile row `y_tile`. Tiles are padded to full
    /// height; only the last strip of a striped image is short.
    fn block_height(&self, y_tile: u64) -> u64 {
        if self.is_tiled || (y_tile + 1) * self.tile_height <= self.height {
            self.tile_height
        } else {
            self.height - y_tile * self.tile_height
        }
    }

    /// Bytes per sample value as stored after decode. Depths that go
    /// through bit normalization occupy 1/2/4-byte lanes; lane-aligned
    /// depths keep their natural width. Scatter strides must match the
    /// unpacked layout, so both derive from the same predicate.
    fn sample_byte_size(&self, sample: usize) -> usize {
        let bits = self.bits_per_sample[sample];
        if needs_normalization(self.sample_format(sample), bits) {
            if bits <= 8 {
                1
            } else if bits <= 16 {
                2
            } else {
                4
            }
        } else {
            (bits as usize).div_ceil(8)
        }
    }

    /// Bytes per pixel in a chunky tile.
    fn bytes_per_pixel(&self) -> usize {
        (0..self.samples_per_pixel)
            .map(|s| self.sample_byte_size(s))
            .sum()
    }

    /// Byte offset of `sample` within a chunky pixel.
    fn src_sample_offset(&self, sample: usize) -> usize {
        (0..sample).map(|s| self.sample_byte_size(s)).sum()
    }

    /// Reads a pixel window into per-sample buffers.
    ///
    /// Tiles and strips covering the window are fetched and decoded
    /// concurrently; sparse chunks (byte count 0) are synthesized from the
    /// GDAL nodata value. Dropping the returned future cancels the read.
    ///
    /// # Errors
    ///
    /// - `InvalidWindow` for an inverted window
    /// - `SampleIndexOutOfRange` for a sample index past SamplesPerPixel
    /// - `ResamplingUnsupported` when output dims differ from the window
    /// - `UnsupportedSampleFormat` / `UnsupportedCompression` per tile
    pub async fn read_rasters(&self, options: ReadOptions) -> Result<RasterData, TiffError> {
        let window = options
            .window
            .unwrap_or_else(|| Window::new(0, 0, self.width, self.height));
        if window.left > window.right || window.top > window.bottom {
            return Err(TiffError::InvalidWindow);
        }
        if options.width.is_some_and(|w| w != window.width())
            || options.height.is_some_and(|h| h != window.height())
        {
            return Err(TiffError::ResamplingUnsupported);
        }

        let samples: Vec<usize> = match options.samples {
            Some(samples) => samples,
            None => (0..self.samples_per_pixel).collect(),
        };
        for &s in &samples {
            if s >= self.samples_per_pixel {
                return Err(TiffError::SampleIndexOutOfRange(s));
            }
        }

        let out_width = window.width();
        let out_height = window.height();
        let pixel_count = (out_width * out_height) as usize;

        let mut buffers = samples
            .iter()
            .map(|&s| {
                alloc_sample_buffer(self.sample_format(s), self.bits_per_sample[s], pixel_count)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let readers = samples
            .iter()
            .map(|&s| reader_for(self.sample_format(s), self.bits_per_sample[s]))
            .collect::<Result<Vec<_>, _>>()?;

        if pixel_count == 0 {
            return Ok(RasterData {
                width: out_width,
                height: out_height,
                samples: buffers,
            });
        }

        let min_x_tile = window.left / self.tile_width;
        let max_x_tile = window
            .right
            .div_ceil(self.tile_width)
            .min(self.tiles_per_row());
        let min_y_tile = window.top / self.tile_height;
        let max_y_tile = window
            .bottom
            .div_ceil(self.tile_height)
            .min(self.tiles_per_col());
        debug!(
            source = self.source.identifier(),
            ?window,
            tiles = (max_x_tile - min_x_tile) * (max_y_tile - min_y_tile),
            "reading raster window"
        );

        let mut tasks: JoinSet<Result<TileChunk, TiffError>> = JoinSet::new();
        for y_tile in min_y_tile..max_y_tile {
            for x_tile in min_x_tile..max_x_tile {
                if self.planar_configuration == 2 {
                    for (slot, &sample) in samples.iter().enumerate() {
                        let image = self.clone();
                        tasks.spawn(async move {
                            Ok(TileChunk {
                                x_tile,
                                y_tile,
                                sample_slot: Some(slot),
                                data: image.tile_data(x_tile, y_tile, sample).await?,
                            })
                        });
                    }
                } else {
                    let image = self.clone();
                    tasks.spawn(async move {
                        Ok(TileChunk {
                            x_tile,
                            y_tile,
                            sample_slot: None,
                            data: image.tile_data(x_tile, y_tile, 0).await?,
                        })
                    });
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            let chunk = match joined {
                Ok(result) => result?,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => return Err(TiffError::DecodeFailed(format!("tile task: {e}"))),
            };
            match chunk.sample_slot {
                Some(slot) => {
                    self.scatter(&chunk, samples[slot], &window, &mut buffers[slot], readers[slot])?
                }
                None => {
                    for (slot, &sample) in samples.iter().enumerate() {
                        self.scatter(&chunk, sample, &window, &mut buffers[slot], readers[slot])?;
                    }
                }
            }
        }

        Ok(RasterData {
            width: out_width,
            height: out_height,
            samples: buffers,
        })
    }

    /// Fetches, decodes, and (if needed) bit-normalizes one tile/strip.
    async fn tile_data(&self, x_tile: u64, y_tile: u64, sample: usize) -> Result<Bytes, TiffError> {
        let tiles_per_row = self.tiles_per_row();
        let index = if self.planar_configuration == 2 {
            sample as u64 * tiles_per_row * self.tiles_per_col() + y_tile * tiles_per_row + x_tile
        } else {
            y_tile * tiles_per_row + x_tile
        };

        if let Some(cache) = &self.tile_cache {
            if let Some(hit) = cache.lock().await.get(&index) {
                trace!(index, "tile cache hit");
                return Ok(hit.clone());
            }
        }

        let (offsets_id, offsets_name, counts_id, counts_name) = if self.is_tiled {
            (tag::TILE_OFFSETS, "TileOffsets", tag::TILE_BYTE_COUNTS, "TileByteCounts")
        } else {
            (
                tag::STRIP_OFFSETS,
                "StripOffsets",
                tag::STRIP_BYTE_COUNTS,
                "StripByteCounts",
            )
        };
        let offset = self
            .ifd
            .tag_by_id(offsets_id)
            .ok_or(TiffError::MissingTag(offsets_name))?
            .value
            .u64_at(index as usize)
            .ok_or_else(|| TiffError::InvalidTagValue {
                tag: offsets_name,
                message: format!("no entry for chunk {index}"),
            })?;
        let byte_count = self
            .ifd
            .tag_by_id(counts_id)
            .ok_or(TiffError::MissingTag(counts_name))?
            .value
            .u64_at(index as usize)
            .ok_or_else(|| TiffError::InvalidTagValue {
                tag: counts_name,
                message: format!("no entry for chunk {index}"),
            })?;

        let data = if byte_count == 0 {
            // Sparse chunk (GDAL SPARSE_OK): synthesize a nodata fill.
            self.fill_sparse(y_tile, sample)?
        } else {
            let raw = self.source.read_exact_at(offset, byte_count as usize).await?;
            let decoded = self.registry.decode(&self.ifd, raw)?;
            let format = self.sample_format(0);
            let bits = self.bits_per_sample[0];
            if needs_normalization(format, bits) {
                unpack_bits(
                    &decoded,
                    format,
                    bits,
                    self.planar_configuration,
                    self.samples_per_pixel,
                    self.tile_width,
                    self.block_height(y_tile),
                    self.byte_order,
                )?
            } else {
                decoded
            }
        };

        if let Some(cache) = &self.tile_cache {
            cache.lock().await.put(index, data.clone());
        }
        Ok(data)
    }

    /// Builds the stand-in buffer for a sparse chunk, shaped exactly like
    /// a decoded one, with every sample slot holding the nodata value.
    fn fill_sparse(&self, y_tile: u64, sample: usize) -> Result<Bytes, TiffError> {
        let fill = self.gdal_nodata().unwrap_or(0.0);
        let pixels = (self.block_height(y_tile) * self.tile_width) as usize;

        let buf = if self.planar_configuration == 2 {
            let lane = self.sample_byte_size(sample);
            let format = self.sample_format(sample);
            let mut buf = vec![0u8; pixels * lane];
            for i in 0..pixels {
                encode_value(&mut buf, i * lane, format, lane, fill, self.byte_order)?;
            }
            buf
        } else {
            let bpp = self.bytes_per_pixel();
            let mut buf = vec![0u8; pixels * bpp];
            for i in 0..pixels {
                for s in 0..self.samples_per_pixel {
                    encode_value(
                        &mut buf,
                        i * bpp + self.src_sample_offset(s),
                        self.sample_format(s),
                        self.sample_byte_size(s),
                        fill,
                        self.byte_order,
                    )?;
                }
            }
            buf
        };
        Ok(Bytes::from(buf))
    }

    /// Copies the window-intersecting part of a chunk into `out`.
    fn scatter(
        &self,
        chunk: &TileChunk,
        sample: usize,
        window: &Window,
        out: &mut SampleBuffer,
        reader: ScalarReader,
    ) -> Result<(), TiffError> {
        let planar = self.planar_configuration == 2;
        let block_height = self.block_height(chunk.y_tile) as i64;
        let tile_width = self.tile_width as i64;
        let first_line = (chunk.y_tile * self.tile_height) as i64;
        let first_col = (chunk.x_tile * self.tile_width) as i64;
        let last_line = first_line + block_height;
        let last_col = first_col + tile_width;

        let bytes_per_pixel = if planar {
            self.sample_byte_size(sample)
        } else {
            self.bytes_per_pixel()
        } as i64;
        let sample_offset = if planar {
            0
        } else {
            self.src_sample_offset(sample)
        } as i64;
        let value_width = self.sample_byte_size(sample) as i64;

        let y_start = 0.max(window.top as i64 - first_line);
        let y_end = block_height
            .min(block_height - (last_line - window.bottom as i64))
            .min(self.height as i64 - first_line);
        let x_start = 0.max(window.left as i64 - first_col);
        let x_end = tile_width
            .min(tile_width - (last_col - window.right as i64))
            .min(self.width as i64 - first_col);
        if y_start >= y_end || x_start >= x_end {
            return Ok(());
        }

        // One bounds check for the whole chunk instead of per value.
        let max_index =
            ((y_end - 1) * tile_width + (x_end - 1)) * bytes_per_pixel + sample_offset + value_width;
        if max_index as usize > chunk.data.len() {
            return Err(TiffError::DecodeFailed(format!(
                "chunk ({}, {}) holds {} bytes, expected at least {max_index}",
                chunk.x_tile,
                chunk.y_tile,
                chunk.data.len()
            )));
        }

        let window_width = window.width() as i64;
        for y in y_start..y_end {
            let line_offset = y * tile_width;
            let window_line = (y + first_line - window.top as i64) * window_width;
            for x in x_start..x_end {
                let at = ((line_offset + x) * bytes_per_pixel + sample_offset) as usize;
                let value = reader(&chunk.data, at, self.byte_order);
                let out_index = (window_line + x + first_col - window.left as i64) as usize;
                out.set(out_index, value);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Georeferencing
    // ------------------------------------------------------------------

    /// Whether the directory carries an affine transform, either as a
    /// ModelTransformation or as a ModelTiepoint/ModelPixelScale pair.
    pub fn has_affine_transformation(&self) -> bool {
        self.ifd.tag_by_id(tag::MODEL_TRANSFORMATION).is_some()
            || (self.ifd.tag_by_id(tag::MODEL_TIEPOINT).is_some()
                && self.ifd.tag_by_id(tag::MODEL_PIXEL_SCALE).is_some())
    }

    /// Model-space coordinates of the top-left corner.
    pub fn origin(&self) -> Result<(f64, f64, f64), TiffError> {
        if let Some(tiepoint) = self.ifd.f64_vec_by_id(tag::MODEL_TIEPOINT) {
            if tiepoint.len() >= 6 {
                return Ok((tiepoint[3], tiepoint[4], tiepoint[5]));
            }
        }
        if let Some(m) = self.ifd.f64_vec_by_id(tag::MODEL_TRANSFORMATION) {
            if m.len() >= 12 {
                return Ok((m[3], m[7], m[11]));
            }
        }
        Err(TiffError::NotGeoreferenced)
    }

    /// Model-space size of one pixel; the y step is negative for
    /// north-up images.
    pub fn resolution(&self) -> Result<(f64, f64, f64), TiffError> {
        if let Some(scale) = self.ifd.f64_vec_by_id(tag::MODEL_PIXEL_SCALE) {
            if scale.len() >= 3 {
                return Ok((scale[0], -scale[1], scale[2]));
            }
        }
        if let Some(m) = self.ifd.f64_vec_by_id(tag::MODEL_TRANSFORMATION) {
            if m.len() >= 12 {
                // Axis-aligned transforms read straight off the diagonal;
                // rotated ones take the column norms.
                return if m[1] == 0.0 && m[4] == 0.0 {
                    Ok((m[0], -m[5], m[10]))
                } else {
                    Ok((
                        (m[0] * m[0] + m[4] * m[4]).sqrt(),
                        -(m[1] * m[1] + m[5] * m[5]).sqrt(),
                        m[10],
                    ))
                };
            }
        }
        Err(TiffError::NotGeoreferenced)
    }

    /// Model-space bounding box as `[min_x, min_y, max_x, max_y]`.
    pub fn bounding_box(&self) -> Result<[f64; 4], TiffError> {
        if let Some(m) = self.ifd.f64_vec_by_id(tag::MODEL_TRANSFORMATION) {
            if m.len() >= 12 {
                let w = self.width as f64;
                let h = self.height as f64;
                let corners = [(0.0, 0.0), (0.0, h), (w, 0.0), (w, h)];
                let xs = corners.map(|(x, y)| m[3] + m[0] * x + m[1] * y);
                let ys = corners.map(|(x, y)| m[7] + m[4] * x + m[5] * y);
                return Ok([
                    xs.iter().copied().fold(f64::INFINITY, f64::min),
                    ys.iter().copied().fold(f64::INFINITY, f64::min),
                    xs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    ys.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                ]);
            }
        }

        let (origin_x, origin_y, _) = self.origin()?;
        let (res_x, res_y, _) = self.resolution()?;
        let far_x = origin_x + res_x * self.width as f64;
        let far_y = origin_y + res_y * self.height as f64;
        Ok([
            origin_x.min(far_x),
            origin_y.min(far_y),
            origin_x.max(far_x),
            origin_y.max(far_y),
        ])
    }
}

/// Whether a sample layout needs bit-level unpacking before scatter.
///
/// Integer depths outside {8, 16, 32} normalize even when byte-aligned:
/// 24-bit values have no matching scalar reader, so they are widened into
/// 4-byte lanes like any other packed depth.
fn needs_normalization(format: u16, bits: u16) -> bool {
    match format {
        1 | 2 => !matches!(bits, 8 | 16 | 32),
        3 => !(bits == 16 || bits == 32 || bits == 64),
        _ => true,
    }
}

/// Output lane width for an unpacked unsigned value.
fn lane_width(format: u16, bits: u16) -> Result<usize, TiffError> {
    if bits <= 8 {
        Ok(1)
    } else if bits <= 16 {
        Ok(2)
    } else if bits <= 32 {
        Ok(4)
    } else {
        Err(TiffError::UnsupportedSampleFormat { format, bits })
    }
}

/// Unpacks GDAL-style bit-packed samples into lane-aligned values.
///
/// Rows are byte-aligned on disk: each line starts on a byte boundary even
/// when the pixel bit width does not divide 8. Values are read MSB-first
/// regardless of the file's byte order; the unpacked output is re-encoded
/// in the file's byte order so the scatter readers need not distinguish
/// packed from unpacked chunks.
///
/// Only unsigned samples (format 1) can be unpacked; signed or float data
/// at a non-lane-aligned depth is corrupt-or-exotic enough to reject.
#[allow(clippy::too_many_arguments)]
fn unpack_bits(
    data: &Bytes,
    format: u16,
    bits: u16,
    planar_configuration: u16,
    samples_per_pixel: usize,
    tile_width: u64,
    tile_height: u64,
    byte_order: ByteOrder,
) -> Result<Bytes, TiffError> {
    if format != 1 {
        return Err(TiffError::UnsupportedSampleFormat { format, bits });
    }
    let lane = lane_width(format, bits)?;
    let bits = bits as u64;

    let samples_per_slot = if planar_configuration == 2 {
        1
    } else {
        samples_per_pixel as u64
    };
    let pixel_bit_skip = samples_per_slot * bits;
    // Lines are padded to a byte boundary.
    let bits_per_line = (tile_width * pixel_bit_skip + 7) & !7;

    let needed = (bits_per_line * tile_height / 8) as usize;
    if data.len() < needed {
        return Err(TiffError::DecodeFailed(format!(
            "packed chunk holds {} bytes, expected {needed}",
            data.len()
        )));
    }

    let mask: u32 = if bits >= 32 {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    };
    let value_count = (tile_width * tile_height * samples_per_slot) as usize;
    let mut out = vec![0u8; value_count * lane];

    for y in 0..tile_height {
        let line_bit_offset = y * bits_per_line;
        for x in 0..tile_width {
            let pixel_bit_offset = line_bit_offset + x * pixel_bit_skip;
            for s in 0..samples_per_slot {
                let bit_offset = pixel_bit_offset + s * bits;
                let byte_offset = (bit_offset / 8) as usize;
                let inner = bit_offset % 8;
                let span = inner + bits;

                // Straddle reads are big-endian: packing is MSB-first.
                let value = if span <= 8 {
                    (data[byte_offset] as u32) >> (8 - span) & mask
                } else if span <= 16 {
                    let raw =
                        u16::from_be_bytes([data[byte_offset], data[byte_offset + 1]]) as u32;
                    raw >> (16 - span) & mask
                } else if span <= 24 {
                    let raw = ((u16::from_be_bytes([data[byte_offset], data[byte_offset + 1]])
                        as u32)
                        << 8)
                        | data[byte_offset + 2] as u32;
                    raw >> (24 - span) & mask
                } else {
                    let raw = u32::from_be_bytes([
                        data[byte_offset],
                        data[byte_offset + 1],
                        data[byte_offset + 2],
                        data[byte_offset + 3],
                    ]);
                    raw >> (32 - span) & mask
                };

                let out_index = ((y * tile_width + x) * samples_per_slot + s) as usize;
                encode_value(&mut out, out_index * lane, 1, lane, value as f64, byte_order)?;
            }
        }
    }

    Ok(Bytes::from(out))
}

/// Writes one sample value into a raw buffer at its lane width, in the
/// image's byte order.
fn encode_value(
    buf: &mut [u8],
    at: usize,
    format: u16,
    lane: usize,
    value: f64,
    byte_order: ByteOrder,
) -> Result<(), TiffError> {
    macro_rules! put {
        ($v:expr) => {{
            let raw = match byte_order {
                ByteOrder::LittleEndian => $v.to_le_bytes(),
                ByteOrder::BigEndian => $v.to_be_bytes(),
            };
            buf[at..at + raw.len()].copy_from_slice(&raw);
        }};
    }
    match (format, lane) {
        (1, 1) => buf[at] = value as u8,
        (1, 2) => put!((value as u16)),
        (1, 4) => put!((value as u32)),
        (2, 1) => buf[at] = value as i8 as u8,
        (2, 2) => put!((value as i16)),
        (2, 4) => put!((value as i32)),
        (3, 4) => put!((value as f32)),
        (3, 8) => put!(value),
        _ => {
            return Err(TiffError::UnsupportedSampleFormat {
                format,
                bits: lane as u16 * 8,
            })
        }
    }
    Ok(())
}

/// Allocates the output buffer matching a sample's format and depth.
fn alloc_sample_buffer(format: u16, bits: u16, len: usize) -> Result<SampleBuffer, TiffError> {
    let buffer = match format {
        1 if bits <= 8 => SampleBuffer::U8(vec![0; len]),
        1 if bits <= 16 => SampleBuffer::U16(vec![0; len]),
        1 if bits <= 32 => SampleBuffer::U32(vec![0; len]),
        2 if bits <= 8 => SampleBuffer::I8(vec![0; len]),
        2 if bits <= 16 => SampleBuffer::I16(vec![0; len]),
        2 if bits <= 32 => SampleBuffer::I32(vec![0; len]),
        // 16-bit floats have no native representation; rejected below.
        3 if bits == 32 => SampleBuffer::F32(vec![0.0; len]),
        3 if bits == 64 => SampleBuffer::F64(vec![0.0; len]),
        _ => return Err(TiffError::UnsupportedSampleFormat { format, bits }),
    };
    Ok(buffer)
}

/// Picks the scalar reader for a sample's format and (post-normalization)
/// lane width.
fn reader_for(format: u16, bits: u16) -> Result<ScalarReader, TiffError> {
    let reader: ScalarReader = match format {
        1 if bits <= 8 => |d, i, _| d[i] as f64,
        1 if bits <= 16 => |d, i, bo| bo.read_u16(&d[i..]) as f64,
        1 if bits <= 32 => |d, i, bo| bo.read_u32(&d[i..]) as f64,
        2 if bits <= 8 => |d, i, _| d[i] as i8 as f64,
        2 if bits <= 16 => |d, i, bo| bo.read_i16(&d[i..]) as f64,
        2 if bits <= 32 => |d, i, bo| bo.read_i32(&d[i..]) as f64,
        3 if bits == 32 => |d, i, bo| bo.read_f32(&d[i..]) as f64,
        3 if bits == 64 => |d, i, bo| bo.read_f64(&d[i..]),
        _ => return Err(TiffError::UnsupportedSampleFormat { format, bits }),
    };
    Ok(reader)
}
