//! Tile/strip decompression codecs.

use std::io::Read;

use bytes::Bytes;
use flate2::read::ZlibDecoder;

use crate::error::TiffError;
use crate::tiff::ifd::Ifd;
use crate::tiff::tags::tag;

/// Decompresses one tile or strip payload.
///
/// Implementations are stateless; one instance serves concurrent decodes.
pub trait Decoder: Send + Sync {
    /// Compression tag values this codec handles.
    fn codes(&self) -> &[u16];

    /// Decompresses a raw tile/strip payload.
    fn decode(&self, data: Bytes) -> Result<Bytes, TiffError>;
}

/// Compression 1: uncompressed passthrough.
pub struct RawDecoder;

impl Decoder for RawDecoder {
    fn codes(&self) -> &[u16] {
        &[1]
    }

    fn decode(&self, data: Bytes) -> Result<Bytes, TiffError> {
        Ok(data)
    }
}

/// Compression 8 (Adobe) and 32946 (legacy): zlib-wrapped Deflate.
pub struct DeflateDecoder;

impl Decoder for DeflateDecoder {
    fn codes(&self) -> &[u16] {
        &[8, 32946]
    }

    fn decode(&self, data: Bytes) -> Result<Bytes, TiffError> {
        let mut out = Vec::new();
        ZlibDecoder::new(data.as_ref())
            .read_to_end(&mut out)
            .map_err(|e| TiffError::DecodeFailed(format!("deflate: {e}")))?;
        Ok(Bytes::from(out))
    }
}

/// Compression 32773: PackBits run-length encoding.
pub struct PackBitsDecoder;

impl Decoder for PackBitsDecoder {
    fn codes(&self) -> &[u16] {
        &[32773]
    }

    fn decode(&self, data: Bytes) -> Result<Bytes, TiffError> {
        let mut out = Vec::with_capacity(data.len() * 2);
        let mut i = 0usize;
        while i < data.len() {
            let control = data[i] as i8;
            i += 1;
            match control {
                0..=127 => {
                    let literal = control as usize + 1;
                    if i + literal > data.len() {
                        return Err(TiffError::DecodeFailed(
                            "packbits: truncated literal run".to_string(),
                        ));
                    }
                    out.extend_from_slice(&data[i..i + literal]);
                    i += literal;
                }
                -127..=-1 => {
                    let repeats = (1 - control as isize) as usize;
                    let Some(&byte) = data.get(i) else {
                        return Err(TiffError::DecodeFailed(
                            "packbits: truncated repeat run".to_string(),
                        ));
                    };
                    i += 1;
                    out.resize(out.len() + repeats, byte);
                }
                // -128 is a no-op filler byte.
                _ => {}
            }
        }
        Ok(Bytes::from(out))
    }
}

/// Resolves the Compression tag to a codec and runs it.
///
/// The default registry handles raw, Deflate, and PackBits. Codecs
/// registered later win over earlier ones, so callers can override the
/// built-ins.
pub struct DecoderRegistry {
    decoders: Vec<Box<dyn Decoder>>,
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self {
            decoders: vec![
                Box::new(RawDecoder),
                Box::new(DeflateDecoder),
                Box::new(PackBitsDecoder),
            ],
        }
    }
}

impl DecoderRegistry {
    /// Registry with no codecs, not even raw.
    pub fn empty() -> Self {
        Self {
            decoders: Vec::new(),
        }
    }

    /// Adds a codec; it takes precedence over previously registered ones
    /// for the codes it claims.
    pub fn register(&mut self, decoder: Box<dyn Decoder>) {
        self.decoders.push(decoder);
    }

    /// Decodes a tile/strip payload according to the directory's
    /// Compression tag (absent means uncompressed).
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedCompression` if no registered codec claims the
    /// compression code.
    pub fn decode(&self, ifd: &Ifd, data: Bytes) -> Result<Bytes, TiffError> {
        let code = ifd.u64_by_id(tag::COMPRESSION).unwrap_or(1) as u16;
        let decoder = self
            .decoders
            .iter()
            .rev()
            .find(|d| d.codes().contains(&code))
            .ok_or(TiffError::UnsupportedCompression(code))?;
        decoder.decode(data)
    }
}
