use thiserror::Error;

/// Transport errors raised by byte-range sources.
///
/// Kept separate from [`TiffError`] so callers can distinguish "this file is
/// corrupt" from "the transport failed".
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// HTTP-level error (bad status, missing headers, unparsable response)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// The source returned fewer bytes than requested
    #[error("Short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        expected: u64,
        actual: u64,
    },

    /// Network or connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Object or file not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The server ignored the Range header and sent the whole file.
    ///
    /// Pass `allow_full_file = true` when constructing the source if
    /// downloading the entire resource is acceptable.
    #[error("Server responded with the full file instead of the requested ranges")]
    RangeNotSupported,
}

/// Errors raised while parsing the TIFF container or assembling rasters.
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// Transport failure while fetching a byte range
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid byte-order mark (neither II nor MM)
    #[error("Invalid TIFF byte-order mark: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid magic version number
    #[error("Invalid TIFF magic number: expected 42 (classic) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// BigTIFF offset byte size must be 8
    #[error("Unsupported BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// IFD offset points outside the file
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Directory entry declares a field type code we do not know about
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),

    /// Field type is known but deliberately not decoded (e.g. SRATIONAL)
    #[error("Unsupported field type: {0}")]
    UnsupportedFieldType(&'static str),

    /// A 64-bit offset or count above the signed 63-bit ceiling.
    ///
    /// No real file has offsets this large; treat it as corruption rather
    /// than letting a bogus range request surface later.
    #[error("64-bit value {0} exceeds the plausible offset range; file is likely corrupt")]
    OffsetOverflow(u64),

    /// Required tag is missing from the directory
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag is present but has an unexpected shape or value
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// PlanarConfiguration must be 1 (chunky) or 2 (planar)
    #[error("Invalid planar configuration: {0}")]
    InvalidPlanarConfiguration(u16),

    /// SampleFormat/BitsPerSample combination we cannot represent
    #[error("Unsupported sample format/bit depth: format {format}, {bits} bits per sample")]
    UnsupportedSampleFormat { format: u16, bits: u16 },

    /// No codec registered for the Compression tag value
    #[error("No decoder registered for compression code {0}")]
    UnsupportedCompression(u16),

    /// A codec failed while decompressing a tile or strip
    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    /// The IFD chain ended before the requested image index.
    ///
    /// Doubles as the chain-terminal signal: `image_count` walks the chain
    /// until it hits this condition and never surfaces it to callers.
    #[error("Image index {0} is out of range: no further IFDs in the chain")]
    ImageIndexOutOfRange(usize),

    /// Requested sample index exceeds SamplesPerPixel
    #[error("Sample index {0} is out of range")]
    SampleIndexOutOfRange(usize),

    /// Raster window with left > right or top > bottom
    #[error("Invalid raster window: left must not exceed right, nor top bottom")]
    InvalidWindow,

    /// Output dimensions differing from the window are not supported
    #[error("Resampling to a different output size is not implemented")]
    ResamplingUnsupported,

    /// A GeoKey references a tag that is absent from the directory
    #[error("GeoKey '{key}' references tag {tag}, which is absent from the directory")]
    GeoKeyLocationMissing { key: &'static str, tag: u16 },

    /// A GeoKey references a tag whose value shape cannot be indexed
    #[error("GeoKey '{key}' references a tag with an unsupported value shape")]
    UnsupportedGeoKeyValue { key: &'static str },

    /// The image carries no ModelTiepoint/ModelPixelScale/ModelTransformation
    #[error("The image does not have an affine transformation")]
    NotGeoreferenced,
}
