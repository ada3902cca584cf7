//! Image File Directory parsing.
//!
//! Directories are parsed with at most two range fetches: an initial
//! guess-sized read (directories are small and usually fit), widened to the
//! exact span once the entry count is known. Out-of-line values that happen
//! to land inside the fetched window are decoded without another round
//! trip.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::error::TiffError;
use crate::io::range_reader::RangeReader;
use crate::tiff::header::TiffHeader;
use crate::tiff::slice::DataSlice;
use crate::tiff::tags::{self, tag};
use crate::tiff::value::{FieldType, Tag, TagValue};

/// Initial fetch size for a classic TIFF directory.
const IFD_FETCH_GUESS: u64 = 1024;

/// Initial fetch size for a BigTIFF directory (entries are larger and
/// BigTIFF writers emit more of them).
const BIGTIFF_IFD_FETCH_GUESS: u64 = 4048;

/// A value resolved from the GeoKey sub-directory.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoKeyValue {
    /// Literal SHORT stored in the directory itself, or a count-1 SHORT
    /// lookup
    Short(u16),
    /// Substring of GeoAsciiParams with the trailing separator dropped
    Ascii(String),
    /// Count-1 DOUBLE lookup
    Double(f64),
    /// Multi-element DOUBLE lookup
    Doubles(Vec<f64>),
    /// Multi-element SHORT lookup
    Shorts(Vec<u16>),
}

impl GeoKeyValue {
    /// The value promoted to f64, where numeric and single-valued.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            GeoKeyValue::Short(v) => Some(*v as f64),
            GeoKeyValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GeoKeyValue::Ascii(s) => Some(s),
            _ => None,
        }
    }
}

/// One parsed directory: tags by id, a name index over the well-known
/// subset, resolved GeoKeys, and the link to the next directory.
#[derive(Debug, Clone)]
pub struct Ifd {
    by_id: HashMap<u16, Tag>,
    name_index: HashMap<&'static str, u16>,
    geo_keys: HashMap<&'static str, GeoKeyValue>,
    /// Absolute offset of the next IFD; 0 terminates the chain.
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// Looks up a tag by numeric id. Works for vendor tags that have no
    /// well-known name.
    pub fn tag_by_id(&self, id: u16) -> Option<&Tag> {
        self.by_id.get(&id)
    }

    /// Looks up a tag by well-known name.
    pub fn tag(&self, name: &str) -> Option<&Tag> {
        self.name_index.get(name).and_then(|id| self.by_id.get(id))
    }

    /// Looks up a resolved GeoKey by name.
    pub fn geo_key(&self, name: &str) -> Option<&GeoKeyValue> {
        self.geo_keys.get(name)
    }

    /// All resolved GeoKeys.
    pub fn geo_keys(&self) -> &HashMap<&'static str, GeoKeyValue> {
        &self.geo_keys
    }

    /// Number of tags in the directory.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Iterates over all tags in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.by_id.values()
    }

    pub(crate) fn u64_by_id(&self, id: u16) -> Option<u64> {
        self.by_id.get(&id).and_then(|t| t.value.first_u64())
    }

    pub(crate) fn f64_vec_by_id(&self, id: u16) -> Option<Vec<f64>> {
        self.by_id.get(&id).and_then(|t| t.value.to_f64_vec())
    }

    pub(crate) fn str_by_id(&self, id: u16) -> Option<&str> {
        self.by_id.get(&id).and_then(|t| t.value.as_str())
    }
}

/// Parses the directory at `offset`, fetching whatever byte ranges it
/// needs from `source`.
pub(crate) async fn parse_ifd_at<R: RangeReader>(
    source: &R,
    header: &TiffHeader,
    offset: u64,
) -> Result<Ifd, TiffError> {
    let guess = if header.is_bigtiff {
        BIGTIFF_IFD_FETCH_GUESS
    } else {
        IFD_FETCH_GUESS
    };
    let mut slice = fetch_clamped(source, header, offset, guess).await?;

    let count_size = header.ifd_count_size() as u64;
    if !slice.covers(offset, count_size) {
        return Err(TiffError::InvalidIfdOffset(offset));
    }
    let entry_count = if header.is_bigtiff {
        slice.read_u64(offset)?
    } else {
        slice.read_u16(offset) as u64
    };

    // Widen to the exact span if the guess fell short.
    let span = header.ifd_span(entry_count);
    if !slice.covers(offset, span) {
        slice = fetch_exact(source, header, offset, span).await?;
    }
    trace!(offset, entry_count, "parsing ifd");

    let mut by_id = HashMap::with_capacity(entry_count as usize);
    let mut name_index = HashMap::new();
    let entry_size = header.ifd_entry_size() as u64;
    let value_field_size = header.value_offset_size();

    let mut pos = offset + count_size;
    for _ in 0..entry_count {
        let tag_id = slice.read_u16(pos);
        let type_code = slice.read_u16(pos + 2);
        let count = if header.is_bigtiff {
            slice.read_u64(pos + 4)?
        } else {
            slice.read_u32(pos + 4) as u64
        };
        let field_type =
            FieldType::from_u16(type_code).ok_or(TiffError::UnknownFieldType(type_code))?;
        // Entry layout: id(2) type(2) count(4|8) value(4|8).
        let value_pos = if header.is_bigtiff { pos + 12 } else { pos + 8 };

        let value = if field_type.fits_inline(count, value_field_size) {
            slice.decode_values(type_code, count, value_pos)?
        } else {
            let data_offset = slice.read_offset(value_pos)?;
            let byte_len = field_type.size_in_bytes() as u64 * count;
            if slice.covers(data_offset, byte_len) {
                slice.decode_values(type_code, count, data_offset)?
            } else {
                let value_slice = fetch_exact(source, header, data_offset, byte_len).await?;
                value_slice.decode_values(type_code, count, data_offset)?
            }
        };

        let is_array = match &value {
            TagValue::Ascii(_) => false,
            _ => count != 1 || tags::is_array_tag(tag_id) || field_type == FieldType::Rational,
        };

        let name = tags::tag_name(tag_id);
        if let Some(name) = name {
            name_index.insert(name, tag_id);
        }
        by_id.insert(
            tag_id,
            Tag {
                id: tag_id,
                name,
                value,
                is_array,
            },
        );
        pos += entry_size;
    }

    let next_ifd_offset = slice.read_offset(pos)?;
    let geo_keys = parse_geo_keys(&by_id)?;

    Ok(Ifd {
        by_id,
        name_index,
        geo_keys,
        next_ifd_offset,
    })
}

/// Resolves the packed GeoKeyDirectory quadruplets against their location
/// tags. Absent directory means no GeoKeys; that is not an error.
fn parse_geo_keys(
    by_id: &HashMap<u16, Tag>,
) -> Result<HashMap<&'static str, GeoKeyValue>, TiffError> {
    let mut keys = HashMap::new();
    let Some(directory) = by_id.get(&tag::GEO_KEY_DIRECTORY) else {
        return Ok(keys);
    };
    let raw = match &directory.value {
        TagValue::U16(v) => v,
        _ => {
            return Err(TiffError::InvalidTagValue {
                tag: "GeoKeyDirectory",
                message: "expected SHORT values".to_string(),
            })
        }
    };
    if raw.len() < 4 {
        return Err(TiffError::InvalidTagValue {
            tag: "GeoKeyDirectory",
            message: format!("header needs 4 values, got {}", raw.len()),
        });
    }

    // Header quadruplet: version, revision, minor revision, key count.
    let declared = raw[3] as usize;
    let mut cursor = 4;
    while cursor + 3 < raw.len() && cursor <= declared * 4 {
        let key_id = raw[cursor];
        let location = raw[cursor + 1];
        let count = raw[cursor + 2] as usize;
        let value_or_offset = raw[cursor + 3];
        cursor += 4;

        let Some(key_name) = tags::geo_key_name(key_id) else {
            debug!(key_id, "skipping unknown geo key");
            continue;
        };

        let value = if location == 0 {
            GeoKeyValue::Short(value_or_offset)
        } else {
            let target = by_id.get(&location).ok_or(TiffError::GeoKeyLocationMissing {
                key: key_name,
                tag: location,
            })?;
            resolve_geo_key(key_name, &target.value, value_or_offset as usize, count)?
        };
        keys.insert(key_name, value);
    }

    Ok(keys)
}

/// Indexes `count` elements at `offset` out of a location tag's value.
fn resolve_geo_key(
    key: &'static str,
    value: &TagValue,
    offset: usize,
    count: usize,
) -> Result<GeoKeyValue, TiffError> {
    let out_of_range = || TiffError::InvalidTagValue {
        tag: "GeoKeyDirectory",
        message: format!("key {key} indexes past its location tag"),
    };
    match value {
        TagValue::Ascii(s) => {
            // The count includes the trailing '|' separator (or final NUL);
            // the substring convention drops it.
            let end = offset + count.saturating_sub(1);
            let text = s.get(offset..end.min(s.len())).ok_or_else(out_of_range)?;
            Ok(GeoKeyValue::Ascii(text.to_string()))
        }
        TagValue::F64(v) => {
            if offset + count > v.len() {
                return Err(out_of_range());
            }
            if count == 1 {
                Ok(GeoKeyValue::Double(v[offset]))
            } else {
                Ok(GeoKeyValue::Doubles(v[offset..offset + count].to_vec()))
            }
        }
        TagValue::U16(v) => {
            if offset + count > v.len() {
                return Err(out_of_range());
            }
            if count == 1 {
                Ok(GeoKeyValue::Short(v[offset]))
            } else {
                Ok(GeoKeyValue::Shorts(v[offset..offset + count].to_vec()))
            }
        }
        _ => Err(TiffError::UnsupportedGeoKeyValue { key }),
    }
}

/// Fetches up to `want` bytes at `offset`, clamped to the end of the file.
async fn fetch_clamped<R: RangeReader>(
    source: &R,
    header: &TiffHeader,
    offset: u64,
    want: u64,
) -> Result<DataSlice, TiffError> {
    let size = source.size();
    if offset >= size {
        return Err(TiffError::InvalidIfdOffset(offset));
    }
    let length = want.min(size - offset);
    let bytes = source.read_exact_at(offset, length as usize).await?;
    Ok(DataSlice::new(
        bytes,
        offset,
        header.byte_order,
        header.is_bigtiff,
    ))
}

/// Fetches exactly `length` bytes at `offset`; bounds violations surface
/// as transport errors.
async fn fetch_exact<R: RangeReader>(
    source: &R,
    header: &TiffHeader,
    offset: u64,
    length: u64,
) -> Result<DataSlice, TiffError> {
    let bytes = source.read_exact_at(offset, length as usize).await?;
    Ok(DataSlice::new(
        bytes,
        offset,
        header.byte_order,
        header.is_bigtiff,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiff::header::ByteOrder;
    use async_trait::async_trait;
    use bytes::Bytes;
    use crate::error::IoError;

    struct MemSource {
        data: Vec<u8>,
    }

    #[async_trait]
    impl RangeReader for MemSource {
        async fn read_exact_at(&self, offset: u64, length: usize) -> Result<Bytes, IoError> {
            let top = offset as usize + length;
            if top > self.data.len() {
                return Err(IoError::RangeOutOfBounds {
                    offset,
                    requested: length as u64,
                    size: self.data.len() as u64,
                });
            }
            Ok(Bytes::copy_from_slice(&self.data[offset as usize..top]))
        }

        fn size(&self) -> u64 {
            self.data.len() as u64
        }

        fn identifier(&self) -> &str {
            "mem://test"
        }
    }

    fn classic_le_header(first_ifd_offset: u64) -> TiffHeader {
        TiffHeader {
            byte_order: ByteOrder::LittleEndian,
            is_bigtiff: false,
            first_ifd_offset,
        }
    }

    /// Little-endian classic directory builder for tests.
    struct DirBuilder {
        entries: Vec<[u8; 12]>,
        next: u32,
    }

    impl DirBuilder {
        fn new() -> Self {
            Self {
                entries: Vec::new(),
                next: 0,
            }
        }

        fn entry(mut self, id: u16, type_code: u16, count: u32, value: [u8; 4]) -> Self {
            let mut raw = [0u8; 12];
            raw[0..2].copy_from_slice(&id.to_le_bytes());
            raw[2..4].copy_from_slice(&type_code.to_le_bytes());
            raw[4..8].copy_from_slice(&count.to_le_bytes());
            raw[8..12].copy_from_slice(&value);
            self.entries.push(raw);
            self
        }

        fn next(mut self, offset: u32) -> Self {
            self.next = offset;
            self
        }

        fn write_into(self, buf: &mut Vec<u8>) {
            buf.extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
            for entry in &self.entries {
                buf.extend_from_slice(entry);
            }
            buf.extend_from_slice(&self.next.to_le_bytes());
        }
    }

    #[tokio::test]
    async fn parses_inline_values_and_unwrap_rules() {
        let mut data = vec![0u8; 8];
        DirBuilder::new()
            // ImageWidth: scalar SHORT, should unwrap.
            .entry(256, 3, 1, [100, 0, 0, 0])
            // BitsPerSample: count 1 but on the always-array list.
            .entry(258, 3, 1, [8, 0, 0, 0])
            // XResolution would be RATIONAL; use an inline SHORT pair instead
            // to check multi-count arrays.
            .entry(296, 3, 2, [2, 0, 3, 0])
            // Vendor tag with no name.
            .entry(50000, 4, 1, [7, 0, 0, 0])
            .write_into(&mut data);

        let source = MemSource { data };
        let header = classic_le_header(8);
        let ifd = parse_ifd_at(&source, &header, 8).await.unwrap();

        assert_eq!(ifd.len(), 4);
        assert_eq!(ifd.next_ifd_offset, 0);

        let width = ifd.tag("ImageWidth").unwrap();
        assert!(!width.is_array);
        assert_eq!(width.value, TagValue::U16(vec![100]));
        assert_eq!(width.name, Some("ImageWidth"));

        let bits = ifd.tag_by_id(258).unwrap();
        assert!(bits.is_array, "allow-listed tag stays an array at count 1");

        let unit = ifd.tag_by_id(296).unwrap();
        assert!(unit.is_array);
        assert_eq!(unit.value, TagValue::U16(vec![2, 3]));

        let vendor = ifd.tag_by_id(50000).unwrap();
        assert_eq!(vendor.name, None);
        assert_eq!(vendor.value.first_u64(), Some(7));
        assert!(ifd.tag("Software").is_none());
    }

    #[tokio::test]
    async fn rational_count_one_stays_array_shaped() {
        // RATIONAL never fits inline in classic TIFF; park the value at 40.
        let mut data = vec![0u8; 8];
        DirBuilder::new()
            .entry(282, 5, 1, [40, 0, 0, 0])
            .write_into(&mut data);
        data.resize(40, 0);
        data.extend_from_slice(&300u32.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());

        let source = MemSource { data };
        let ifd = parse_ifd_at(&source, &classic_le_header(8), 8)
            .await
            .unwrap();
        let res = ifd.tag("XResolution").unwrap();
        assert!(res.is_array);
        assert_eq!(res.value.first_f64(), Some(300.0));
    }

    #[tokio::test]
    async fn out_of_line_ascii_is_fetched_and_scalar() {
        let mut data = vec![0u8; 8];
        DirBuilder::new()
            .entry(305, 2, 9, [64, 0, 0, 0])
            .write_into(&mut data);
        data.resize(64, 0);
        data.extend_from_slice(b"demo 1.0\0");

        let source = MemSource { data };
        let ifd = parse_ifd_at(&source, &classic_le_header(8), 8)
            .await
            .unwrap();
        let software = ifd.tag("Software").unwrap();
        assert!(!software.is_array, "ASCII is never array-shaped");
        assert_eq!(software.value.as_str(), Some("demo 1.0"));
    }

    #[tokio::test]
    async fn chained_directories_expose_next_offset() {
        let mut data = vec![0u8; 8];
        DirBuilder::new()
            .entry(256, 3, 1, [10, 0, 0, 0])
            .next(26)
            .write_into(&mut data);
        DirBuilder::new()
            .entry(256, 3, 1, [5, 0, 0, 0])
            .write_into(&mut data);

        let source = MemSource { data };
        let header = classic_le_header(8);
        let first = parse_ifd_at(&source, &header, 8).await.unwrap();
        assert_eq!(first.next_ifd_offset, 26);

        let second = parse_ifd_at(&source, &header, 26).await.unwrap();
        assert_eq!(second.next_ifd_offset, 0);
        assert_eq!(second.u64_by_id(256), Some(5));
    }

    #[tokio::test]
    async fn unknown_field_type_is_fatal() {
        let mut data = vec![0u8; 8];
        DirBuilder::new()
            .entry(256, 14, 1, [10, 0, 0, 0])
            .write_into(&mut data);
        let source = MemSource { data };
        let err = parse_ifd_at(&source, &classic_le_header(8), 8)
            .await
            .unwrap_err();
        assert!(matches!(err, TiffError::UnknownFieldType(14)));
    }

    #[tokio::test]
    async fn geo_keys_resolve_literals_ascii_and_doubles() {
        // GeoKeyDirectory with four keys: a literal SHORT, an ASCII
        // substring, a count-1 DOUBLE lookup, and a multi-DOUBLE lookup.
        let geo_dir: Vec<u16> = vec![
            1, 1, 0, 4, // header: version 1, revision 1.0, 4 keys
            1024, 0, 1, 2, // GTModelTypeGeoKey = 2, literal
            1026, 34737, 7, 0, // GTCitationGeoKey = "WGS 84|" minus the separator
            2057, 34736, 1, 1, // GeogSemiMajorAxisGeoKey = doubles[1]
            2062, 34736, 3, 0, // GeogTOWGS84GeoKey = doubles[0..3]
        ];
        let ascii_params = b"WGS 84|\0";
        let doubles = [6378137.0f64, 6356752.314, 0.5];

        let mut data = vec![0u8; 8];
        DirBuilder::new()
            .entry(34735, 3, geo_dir.len() as u32, [100, 0, 0, 0])
            .entry(34737, 2, ascii_params.len() as u32, [150, 0, 0, 0])
            .entry(34736, 12, doubles.len() as u32, [160, 0, 0, 0])
            .write_into(&mut data);
        data.resize(100, 0);
        for v in &geo_dir {
            data.extend_from_slice(&v.to_le_bytes());
        }
        data.resize(150, 0);
        data.extend_from_slice(ascii_params);
        data.resize(160, 0);
        for v in &doubles {
            data.extend_from_slice(&v.to_le_bytes());
        }

        let source = MemSource { data };
        let ifd = parse_ifd_at(&source, &classic_le_header(8), 8)
            .await
            .unwrap();

        assert_eq!(
            ifd.geo_key("GTModelTypeGeoKey"),
            Some(&GeoKeyValue::Short(2))
        );
        assert_eq!(
            ifd.geo_key("GTCitationGeoKey"),
            Some(&GeoKeyValue::Ascii("WGS 84".to_string()))
        );
        assert_eq!(
            ifd.geo_key("GeogSemiMajorAxisGeoKey"),
            Some(&GeoKeyValue::Double(6356752.314))
        );
        assert_eq!(
            ifd.geo_key("GeogTOWGS84GeoKey"),
            Some(&GeoKeyValue::Doubles(vec![6378137.0, 6356752.314, 0.5]))
        );
    }

    #[tokio::test]
    async fn geo_key_with_missing_location_tag_is_fatal() {
        let geo_dir: Vec<u16> = vec![
            1, 1, 0, 1, //
            1026, 34737, 7, 0, // references GeoAsciiParams, which is absent
        ];
        let mut data = vec![0u8; 8];
        DirBuilder::new()
            .entry(34735, 3, geo_dir.len() as u32, [100, 0, 0, 0])
            .write_into(&mut data);
        data.resize(100, 0);
        for v in &geo_dir {
            data.extend_from_slice(&v.to_le_bytes());
        }

        let source = MemSource { data };
        let err = parse_ifd_at(&source, &classic_le_header(8), 8)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TiffError::GeoKeyLocationMissing {
                key: "GTCitationGeoKey",
                tag: 34737
            }
        ));
    }

    #[tokio::test]
    async fn directory_without_geo_keys_is_fine() {
        let mut data = vec![0u8; 8];
        DirBuilder::new()
            .entry(256, 3, 1, [10, 0, 0, 0])
            .write_into(&mut data);
        let source = MemSource { data };
        let ifd = parse_ifd_at(&source, &classic_le_header(8), 8)
            .await
            .unwrap();
        assert!(ifd.geo_keys().is_empty());
    }

    #[tokio::test]
    async fn offset_past_eof_is_invalid() {
        let source = MemSource { data: vec![0; 16] };
        let err = parse_ifd_at(&source, &classic_le_header(8), 64)
            .await
            .unwrap_err();
        assert!(matches!(err, TiffError::InvalidIfdOffset(64)));
    }
}
