//! TIFF and BigTIFF header parsing.
//!
//! The header is the only structure read at a fixed offset; everything else
//! is reached by following offsets it (transitively) provides.
//!
//! # Layout
//!
//! ## Classic TIFF (8 bytes)
//! ```text
//! Bytes 0-1: Byte order (0x4949 = little-endian "II", 0x4D4D = big-endian "MM")
//! Bytes 2-3: Magic number (42 = 0x002A)
//! Bytes 4-7: Offset to first IFD (4 bytes)
//! ```
//!
//! ## BigTIFF (16 bytes)
//! ```text
//! Bytes 0-1: Byte order
//! Bytes 2-3: Magic number (43 = 0x002B)
//! Bytes 4-5: Offset byte size (must be 8)
//! Bytes 6-7: Reserved
//! Bytes 8-15: Offset to first IFD (8 bytes)
//! ```

use crate::error::TiffError;

/// Byte-order mark for little-endian ("II" for Intel)
const BOM_LITTLE_ENDIAN: u16 = 0x4949;

/// Byte-order mark for big-endian ("MM" for Motorola)
const BOM_BIG_ENDIAN: u16 = 0x4D4D;

/// Magic number for classic TIFF
const MAGIC_TIFF: u16 = 42;

/// Magic number for BigTIFF
const MAGIC_BIGTIFF: u16 = 43;

/// Size of a classic TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of a BigTIFF header in bytes
pub const BIGTIFF_HEADER_SIZE: usize = 16;

/// Byte order (endianness) of a TIFF file.
///
/// Declared by the first two bytes of the header; every multi-byte value in
/// the file is read respecting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian ("II" = Intel)
    LittleEndian,
    /// Big-endian ("MM" = Motorola)
    BigEndian,
}

macro_rules! byte_order_read {
    ($($name:ident -> $ty:ty),* $(,)?) => {
        $(
            /// Reads the value from the start of `bytes` in this byte order.
            ///
            /// # Panics
            ///
            /// Panics if `bytes` is shorter than the value width.
            #[inline]
            pub fn $name(self, bytes: &[u8]) -> $ty {
                const N: usize = std::mem::size_of::<$ty>();
                let raw: [u8; N] = bytes[..N].try_into().unwrap();
                match self {
                    ByteOrder::LittleEndian => <$ty>::from_le_bytes(raw),
                    ByteOrder::BigEndian => <$ty>::from_be_bytes(raw),
                }
            }
        )*
    };
}

impl ByteOrder {
    byte_order_read! {
        read_u16 -> u16,
        read_i16 -> i16,
        read_u32 -> u32,
        read_i32 -> i32,
        read_u64 -> u64,
        read_i64 -> i64,
        read_f32 -> f32,
        read_f64 -> f64,
    }
}

/// Parsed TIFF file header.
///
/// Carries everything needed to start walking directories: the byte order,
/// the classic/BigTIFF flag (which fixes all directory field widths), and
/// the offset of the first IFD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    /// Byte order for all multi-byte values in the file
    pub byte_order: ByteOrder,

    /// Whether this is a BigTIFF file (64-bit offsets)
    pub is_bigtiff: bool,

    /// Offset of the first IFD
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parses a TIFF header from the first bytes of a file.
    ///
    /// # Arguments
    /// * `bytes` - Raw header bytes (8 for classic, 16 for BigTIFF)
    /// * `file_size` - Total file size, used to validate the IFD offset
    ///
    /// # Errors
    /// - `InvalidMagic` if the byte-order mark is neither II nor MM
    /// - `InvalidVersion` if the magic number is not 42 or 43
    /// - `InvalidBigTiffOffsetSize` if a BigTIFF declares an offset size other than 8
    /// - `FileTooSmall` if `bytes` cannot hold the header
    /// - `InvalidIfdOffset` if the first IFD offset is outside the file
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        // The BOM is a byte pattern, so the read order is arbitrary here.
        let bom = u16::from_le_bytes([bytes[0], bytes[1]]);
        let byte_order = match bom {
            BOM_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BOM_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(bom)),
        };

        let magic = byte_order.read_u16(&bytes[2..4]);
        match magic {
            MAGIC_TIFF => {
                let first_ifd_offset = byte_order.read_u32(&bytes[4..8]) as u64;
                if first_ifd_offset >= file_size {
                    return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
                }
                Ok(TiffHeader {
                    byte_order,
                    is_bigtiff: false,
                    first_ifd_offset,
                })
            }
            MAGIC_BIGTIFF => {
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }

                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                // Bytes 6-7 are reserved; writers emit 0 but we do not insist.

                let first_ifd_offset = byte_order.read_u64(&bytes[8..16]);
                if first_ifd_offset >= file_size {
                    return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
                }
                Ok(TiffHeader {
                    byte_order,
                    is_bigtiff: true,
                    first_ifd_offset,
                })
            }
            _ => Err(TiffError::InvalidVersion(magic)),
        }
    }

    /// Size of one IFD entry: 12 bytes classic, 20 bytes BigTIFF.
    #[inline]
    pub const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    /// Size of the entry-count field at the start of an IFD: u16 or u64.
    #[inline]
    pub const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    /// Size of the next-IFD offset trailing an IFD: u32 or u64.
    #[inline]
    pub const fn ifd_next_offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    /// Size of the value/offset field in an entry; values whose encoded
    /// size fits here are stored inline.
    #[inline]
    pub const fn value_offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    /// Total byte span of an IFD with `entries` entries, including the
    /// count field and the trailing next-IFD offset.
    #[inline]
    pub const fn ifd_span(&self, entries: u64) -> u64 {
        self.ifd_count_size() as u64
            + entries * self.ifd_entry_size() as u64
            + self.ifd_next_offset_size() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_order_reads() {
        let bytes = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(ByteOrder::LittleEndian.read_u16(&bytes), 0x0201);
        assert_eq!(ByteOrder::BigEndian.read_u16(&bytes), 0x0102);
        assert_eq!(ByteOrder::LittleEndian.read_u32(&bytes), 0x0403_0201);
        assert_eq!(ByteOrder::BigEndian.read_u32(&bytes), 0x0102_0304);
        assert_eq!(ByteOrder::LittleEndian.read_u64(&bytes), 0x0807_0605_0403_0201);
        assert_eq!(ByteOrder::BigEndian.read_u64(&bytes), 0x0102_0304_0506_0708);

        assert_eq!(ByteOrder::BigEndian.read_i16(&[0xFF, 0xFE]), -2);
        assert_eq!(
            ByteOrder::LittleEndian.read_f64(&1.5f64.to_le_bytes()),
            1.5
        );
        assert_eq!(ByteOrder::BigEndian.read_f32(&2.25f32.to_be_bytes()), 2.25);
    }

    #[test]
    fn parse_classic_little_endian() {
        let header = [0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00];
        let parsed = TiffHeader::parse(&header, 1000).unwrap();
        assert_eq!(parsed.byte_order, ByteOrder::LittleEndian);
        assert!(!parsed.is_bigtiff);
        assert_eq!(parsed.first_ifd_offset, 8);
    }

    #[test]
    fn parse_classic_big_endian() {
        let header = [0x4D, 0x4D, 0x00, 0x2A, 0x00, 0x00, 0x03, 0xE8];
        let parsed = TiffHeader::parse(&header, 2000).unwrap();
        assert_eq!(parsed.byte_order, ByteOrder::BigEndian);
        assert!(!parsed.is_bigtiff);
        assert_eq!(parsed.first_ifd_offset, 1000);
    }

    #[test]
    fn parse_bigtiff_both_orders() {
        let le = [
            0x49, 0x49, 0x2B, 0x00, 0x08, 0x00, 0x00, 0x00, //
            0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        let parsed = TiffHeader::parse(&le, 1000).unwrap();
        assert!(parsed.is_bigtiff);
        assert_eq!(parsed.first_ifd_offset, 16);

        let be = [
            0x4D, 0x4D, 0x00, 0x2B, 0x00, 0x08, 0x00, 0x00, //
            0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
        ];
        let parsed = TiffHeader::parse(&be, 10_000_000_000).unwrap();
        assert_eq!(parsed.byte_order, ByteOrder::BigEndian);
        // 64-bit offset past 4GB survives.
        assert_eq!(parsed.first_ifd_offset, 0x0000_0001_0000_0000);
    }

    #[test]
    fn rejects_bad_byte_order_mark() {
        let header = [0x00, 0x00, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00];
        assert!(matches!(
            TiffHeader::parse(&header, 1000),
            Err(TiffError::InvalidMagic(0))
        ));
    }

    #[test]
    fn rejects_bad_magic_number() {
        let header = [0x49, 0x49, 0x2C, 0x00, 0x08, 0x00, 0x00, 0x00];
        assert!(matches!(
            TiffHeader::parse(&header, 1000),
            Err(TiffError::InvalidVersion(44))
        ));
    }

    #[test]
    fn rejects_bigtiff_with_four_byte_offsets() {
        // Offset size 4 is structurally meaningless for BigTIFF.
        let header = [
            0x49, 0x49, 0x2B, 0x00, 0x04, 0x00, 0x00, 0x00, //
            0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        assert!(matches!(
            TiffHeader::parse(&header, 1000),
            Err(TiffError::InvalidBigTiffOffsetSize(4))
        ));
    }

    #[test]
    fn rejects_truncated_headers() {
        assert!(matches!(
            TiffHeader::parse(&[0x49, 0x49, 0x2A, 0x00], 1000),
            Err(TiffError::FileTooSmall {
                required: 8,
                actual: 4
            })
        ));

        // Valid BigTIFF prefix but only 8 bytes available.
        let header = [0x49, 0x49, 0x2B, 0x00, 0x08, 0x00, 0x00, 0x00];
        assert!(matches!(
            TiffHeader::parse(&header, 1000),
            Err(TiffError::FileTooSmall {
                required: 16,
                actual: 8
            })
        ));
    }

    #[test]
    fn rejects_ifd_offset_outside_file() {
        let header = [0x49, 0x49, 0x2A, 0x00, 0xE8, 0x03, 0x00, 0x00];
        assert!(matches!(
            TiffHeader::parse(&header, 500),
            Err(TiffError::InvalidIfdOffset(1000))
        ));
    }

    #[test]
    fn directory_sizing() {
        let classic = TiffHeader {
            byte_order: ByteOrder::LittleEndian,
            is_bigtiff: false,
            first_ifd_offset: 8,
        };
        assert_eq!(classic.ifd_entry_size(), 12);
        assert_eq!(classic.ifd_count_size(), 2);
        assert_eq!(classic.ifd_next_offset_size(), 4);
        assert_eq!(classic.value_offset_size(), 4);
        assert_eq!(classic.ifd_span(10), 2 + 120 + 4);

        let big = TiffHeader {
            byte_order: ByteOrder::LittleEndian,
            is_bigtiff: true,
            first_ifd_offset: 16,
        };
        assert_eq!(big.ifd_entry_size(), 20);
        assert_eq!(big.ifd_count_size(), 8);
        assert_eq!(big.ifd_next_offset_size(), 8);
        assert_eq!(big.value_offset_size(), 8);
        assert_eq!(big.ifd_span(10), 8 + 200 + 8);
    }
}
