//! Absolute-offset typed reads over a fetched byte range.

use bytes::Bytes;

use crate::error::TiffError;
use crate::tiff::header::ByteOrder;
use crate::tiff::value::{FieldType, Rational, TagValue};

/// A window of the file held in memory, addressed by file offsets.
///
/// The parser always works in absolute offsets; a `DataSlice` remembers
/// where its buffer came from so callers never translate coordinates.
/// Readers assume the requested range is covered, which `covers` lets the
/// owner verify before re-fetching a wider range.
#[derive(Debug, Clone)]
pub struct DataSlice {
    buf: Bytes,
    offset: u64,
    byte_order: ByteOrder,
    big_tiff: bool,
}

impl DataSlice {
    pub fn new(buf: Bytes, offset: u64, byte_order: ByteOrder, big_tiff: bool) -> Self {
        Self {
            buf,
            offset,
            byte_order,
            big_tiff,
        }
    }

    /// File offset of the first byte in the buffer.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// File offset one past the last byte in the buffer.
    pub fn top(&self) -> u64 {
        self.offset + self.buf.len() as u64
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn is_big_tiff(&self) -> bool {
        self.big_tiff
    }

    /// Whether `length` bytes at absolute `offset` lie inside the buffer.
    pub fn covers(&self, offset: u64, length: u64) -> bool {
        offset >= self.offset && offset + length <= self.top()
    }

    /// Translates an absolute offset into a buffer index.
    #[inline]
    fn index(&self, offset: u64, width: u64) -> usize {
        debug_assert!(
            self.covers(offset, width),
            "read of {width} bytes at {offset} outside slice {}..{}",
            self.offset,
            self.top()
        );
        (offset - self.offset) as usize
    }

    pub fn read_u8(&self, offset: u64) -> u8 {
        self.buf[self.index(offset, 1)]
    }

    pub fn read_i8(&self, offset: u64) -> i8 {
        self.buf[self.index(offset, 1)] as i8
    }

    pub fn read_u16(&self, offset: u64) -> u16 {
        self.byte_order.read_u16(&self.buf[self.index(offset, 2)..])
    }

    pub fn read_i16(&self, offset: u64) -> i16 {
        self.byte_order.read_i16(&self.buf[self.index(offset, 2)..])
    }

    pub fn read_u32(&self, offset: u64) -> u32 {
        self.byte_order.read_u32(&self.buf[self.index(offset, 4)..])
    }

    pub fn read_i32(&self, offset: u64) -> i32 {
        self.byte_order.read_i32(&self.buf[self.index(offset, 4)..])
    }

    pub fn read_i64(&self, offset: u64) -> i64 {
        self.byte_order.read_i64(&self.buf[self.index(offset, 8)..])
    }

    pub fn read_f32(&self, offset: u64) -> f32 {
        self.byte_order.read_f32(&self.buf[self.index(offset, 4)..])
    }

    pub fn read_f64(&self, offset: u64) -> f64 {
        self.byte_order.read_f64(&self.buf[self.index(offset, 8)..])
    }

    /// Reads a u64, rejecting values above the signed 63-bit ceiling.
    ///
    /// These are always offsets or counts; a value that large means the
    /// file is corrupt, and failing here beats issuing an absurd range
    /// request later.
    pub fn read_u64(&self, offset: u64) -> Result<u64, TiffError> {
        let value = self.byte_order.read_u64(&self.buf[self.index(offset, 8)..]);
        if value > i64::MAX as u64 {
            return Err(TiffError::OffsetOverflow(value));
        }
        Ok(value)
    }

    /// Reads an unsigned RATIONAL (numerator then denominator).
    pub fn read_rational(&self, offset: u64) -> Rational {
        Rational {
            numerator: self.read_u32(offset),
            denominator: self.read_u32(offset + 4),
        }
    }

    /// Reads an offset at the file's native width: u32 for classic TIFF,
    /// u64 for BigTIFF.
    pub fn read_offset(&self, offset: u64) -> Result<u64, TiffError> {
        if self.big_tiff {
            self.read_u64(offset)
        } else {
            Ok(self.read_u32(offset) as u64)
        }
    }

    /// Decodes `count` elements of `field_type` starting at absolute
    /// `offset` into a typed value.
    ///
    /// ASCII, BYTE, and UNDEFINED all decode to a string with trailing NULs
    /// trimmed; everything else decodes at its natural width with no
    /// promotion.
    ///
    /// # Errors
    ///
    /// - `UnknownFieldType` for a type code outside the registry
    /// - `UnsupportedFieldType` for SRATIONAL
    /// - `OffsetOverflow` for LONG8/IFD8 values above `i64::MAX`
    pub fn decode_values(
        &self,
        type_code: u16,
        count: u64,
        offset: u64,
    ) -> Result<TagValue, TiffError> {
        let field_type =
            FieldType::from_u16(type_code).ok_or(TiffError::UnknownFieldType(type_code))?;
        let width = field_type.size_in_bytes() as u64;
        let n = count as usize;

        let value = match field_type {
            FieldType::Ascii | FieldType::Byte | FieldType::Undefined => {
                let start = self.index(offset, width * count);
                let raw = &self.buf[start..start + n];
                let text = String::from_utf8_lossy(raw);
                TagValue::Ascii(text.trim_end_matches('\0').to_string())
            }
            FieldType::Sbyte => {
                TagValue::I8((0..count).map(|i| self.read_i8(offset + i)).collect())
            }
            FieldType::Short => TagValue::U16(
                (0..count)
                    .map(|i| self.read_u16(offset + i * width))
                    .collect(),
            ),
            FieldType::Sshort => TagValue::I16(
                (0..count)
                    .map(|i| self.read_i16(offset + i * width))
                    .collect(),
            ),
            FieldType::Long | FieldType::Ifd => TagValue::U32(
                (0..count)
                    .map(|i| self.read_u32(offset + i * width))
                    .collect(),
            ),
            FieldType::Slong => TagValue::I32(
                (0..count)
                    .map(|i| self.read_i32(offset + i * width))
                    .collect(),
            ),
            FieldType::Long8 | FieldType::Ifd8 => TagValue::U64(
                (0..count)
                    .map(|i| self.read_u64(offset + i * width))
                    .collect::<Result<_, _>>()?,
            ),
            FieldType::Slong8 => TagValue::I64(
                (0..count)
                    .map(|i| self.read_i64(offset + i * width))
                    .collect(),
            ),
            FieldType::Rational => TagValue::Rational(
                (0..count)
                    .map(|i| self.read_rational(offset + i * width))
                    .collect(),
            ),
            FieldType::Srational => {
                return Err(TiffError::UnsupportedFieldType("SRATIONAL"))
            }
            FieldType::Float => TagValue::F32(
                (0..count)
                    .map(|i| self.read_f32(offset + i * width))
                    .collect(),
            ),
            FieldType::Double => TagValue::F64(
                (0..count)
                    .map(|i| self.read_f64(offset + i * width))
                    .collect(),
            ),
        };
        Ok(value)
    }
}
