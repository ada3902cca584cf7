//! Async, range-based reader for TIFF, BigTIFF, and GeoTIFF files.
//!
//! The crate never loads a whole file: it fetches the header, walks the
//! directory chain lazily, and reads only the tiles or strips a raster
//! window touches. Sources are anything implementing [`RangeReader`];
//! local files, HTTP range requests, and S3 objects are provided, and
//! [`BlockCache`] wraps any of them with a block-aligned LRU.
//!
//! ```no_run
//! use rangetiff::{FileSource, GeoTiff, ReadOptions, Window};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = FileSource::open("elevation.tif")?;
//! let tiff = GeoTiff::open(source).await?;
//! let image = tiff.image(0).await?;
//! let raster = image
//!     .read_rasters(ReadOptions {
//!         window: Some(Window::new(0, 0, 256, 256)),
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("{} x {}", raster.width, raster.height);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod geotiff;
pub mod image;
pub mod io;
pub mod tiff;

pub use error::{IoError, TiffError};
pub use geotiff::GeoTiff;
pub use image::{RasterData, RasterImage, ReadOptions, SampleBuffer, Window};
pub use io::{BlockCache, FileSource, HttpSource, RangeReader, S3Source, Slice};
pub use tiff::{
    ByteOrder, DataSlice, Decoder, DecoderRegistry, FieldType, GeoKeyValue, Ifd, Rational, Tag,
    TagValue, TiffHeader,
};
