//! Typed representation of decoded tag values.

/// On-disk field type of a directory entry.
///
/// Codes 1-13 come from TIFF 6.0 (13 = IFD from the supplement), 16-18 are
/// the BigTIFF additions. Codes 14-15 were never assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    /// 8-bit unsigned integer
    Byte = 1,
    /// NUL-terminated 7-bit ASCII text
    Ascii = 2,
    /// 16-bit unsigned integer
    Short = 3,
    /// 32-bit unsigned integer
    Long = 4,
    /// Two LONGs: numerator, denominator
    Rational = 5,
    /// 8-bit signed integer
    Sbyte = 6,
    /// Opaque bytes
    Undefined = 7,
    /// 16-bit signed integer
    Sshort = 8,
    /// 32-bit signed integer
    Slong = 9,
    /// Two SLONGs: numerator, denominator
    Srational = 10,
    /// IEEE 754 single precision
    Float = 11,
    /// IEEE 754 double precision
    Double = 12,
    /// 32-bit IFD offset
    Ifd = 13,
    /// 64-bit unsigned integer (BigTIFF)
    Long8 = 16,
    /// 64-bit signed integer (BigTIFF)
    Slong8 = 17,
    /// 64-bit IFD offset (BigTIFF)
    Ifd8 = 18,
}

impl FieldType {
    /// Maps an on-disk type code to a field type.
    pub fn from_u16(code: u16) -> Option<Self> {
        Some(match code {
            1 => FieldType::Byte,
            2 => FieldType::Ascii,
            3 => FieldType::Short,
            4 => FieldType::Long,
            5 => FieldType::Rational,
            6 => FieldType::Sbyte,
            7 => FieldType::Undefined,
            8 => FieldType::Sshort,
            9 => FieldType::Slong,
            10 => FieldType::Srational,
            11 => FieldType::Float,
            12 => FieldType::Double,
            13 => FieldType::Ifd,
            16 => FieldType::Long8,
            17 => FieldType::Slong8,
            18 => FieldType::Ifd8,
            _ => return None,
        })
    }

    /// Encoded size of one element in bytes.
    pub const fn size_in_bytes(self) -> usize {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::Sbyte | FieldType::Undefined => 1,
            FieldType::Short | FieldType::Sshort => 2,
            FieldType::Long | FieldType::Slong | FieldType::Float | FieldType::Ifd => 4,
            FieldType::Rational
            | FieldType::Srational
            | FieldType::Double
            | FieldType::Long8
            | FieldType::Slong8
            | FieldType::Ifd8 => 8,
        }
    }

    /// Display name matching the TIFF specification.
    pub const fn name(self) -> &'static str {
        match self {
            FieldType::Byte => "BYTE",
            FieldType::Ascii => "ASCII",
            FieldType::Short => "SHORT",
            FieldType::Long => "LONG",
            FieldType::Rational => "RATIONAL",
            FieldType::Sbyte => "SBYTE",
            FieldType::Undefined => "UNDEFINED",
            FieldType::Sshort => "SSHORT",
            FieldType::Slong => "SLONG",
            FieldType::Srational => "SRATIONAL",
            FieldType::Float => "FLOAT",
            FieldType::Double => "DOUBLE",
            FieldType::Ifd => "IFD",
            FieldType::Long8 => "LONG8",
            FieldType::Slong8 => "SLONG8",
            FieldType::Ifd8 => "IFD8",
        }
    }

    /// Whether `count` elements fit in the entry's value/offset field.
    pub const fn fits_inline(self, count: u64, value_offset_size: usize) -> bool {
        self.size_in_bytes() as u64 * count <= value_offset_size as u64
    }
}

/// Unsigned rational: numerator over denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub numerator: u32,
    pub denominator: u32,
}

impl Rational {
    /// The quotient as a double; a zero denominator yields infinity or NaN.
    pub fn to_f64(self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }
}

/// A decoded tag value.
///
/// Values are stored in the natural width of their field type; nothing is
/// promoted at decode time. ASCII, BYTE and UNDEFINED data all decode to a
/// string with trailing NULs trimmed. The variant set is closed: SRATIONAL
/// fails at decode rather than gaining a variant here.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Ascii(String),
    U8(Vec<u8>),
    I8(Vec<i8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U32(Vec<u32>),
    I32(Vec<i32>),
    U64(Vec<u64>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Rational(Vec<Rational>),
}

impl TagValue {
    /// Number of logical elements (string length for ASCII).
    pub fn len(&self) -> usize {
        match self {
            TagValue::Ascii(s) => s.len(),
            TagValue::U8(v) => v.len(),
            TagValue::I8(v) => v.len(),
            TagValue::U16(v) => v.len(),
            TagValue::I16(v) => v.len(),
            TagValue::U32(v) => v.len(),
            TagValue::I32(v) => v.len(),
            TagValue::U64(v) => v.len(),
            TagValue::I64(v) => v.len(),
            TagValue::F32(v) => v.len(),
            TagValue::F64(v) => v.len(),
            TagValue::Rational(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The string payload, for ASCII values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::Ascii(s) => Some(s),
            _ => None,
        }
    }

    /// Element `index` promoted to f64, for any numeric variant.
    pub fn f64_at(&self, index: usize) -> Option<f64> {
        match self {
            TagValue::Ascii(_) => None,
            TagValue::U8(v) => v.get(index).map(|&x| x as f64),
            TagValue::I8(v) => v.get(index).map(|&x| x as f64),
            TagValue::U16(v) => v.get(index).map(|&x| x as f64),
            TagValue::I16(v) => v.get(index).map(|&x| x as f64),
            TagValue::U32(v) => v.get(index).map(|&x| x as f64),
            TagValue::I32(v) => v.get(index).map(|&x| x as f64),
            TagValue::U64(v) => v.get(index).map(|&x| x as f64),
            TagValue::I64(v) => v.get(index).map(|&x| x as f64),
            TagValue::F32(v) => v.get(index).map(|&x| x as f64),
            TagValue::F64(v) => v.get(index).copied(),
            TagValue::Rational(v) => v.get(index).map(|x| x.to_f64()),
        }
    }

    /// First element promoted to f64.
    pub fn first_f64(&self) -> Option<f64> {
        self.f64_at(0)
    }

    /// First element as u64, for unsigned and non-negative signed variants.
    pub fn first_u64(&self) -> Option<u64> {
        self.u64_at(0)
    }

    /// Element `index` as u64; `None` for floats, rationals, ASCII, and
    /// negative signed values.
    pub fn u64_at(&self, index: usize) -> Option<u64> {
        match self {
            TagValue::U8(v) => v.get(index).map(|&x| x as u64),
            TagValue::U16(v) => v.get(index).map(|&x| x as u64),
            TagValue::U32(v) => v.get(index).map(|&x| x as u64),
            TagValue::U64(v) => v.get(index).copied(),
            TagValue::I8(v) => v.get(index).and_then(|&x| u64::try_from(x).ok()),
            TagValue::I16(v) => v.get(index).and_then(|&x| u64::try_from(x).ok()),
            TagValue::I32(v) => v.get(index).and_then(|&x| u64::try_from(x).ok()),
            TagValue::I64(v) => v.get(index).and_then(|&x| u64::try_from(x).ok()),
            _ => None,
        }
    }

    /// All elements as u64, for integer variants.
    pub fn to_u64_vec(&self) -> Option<Vec<u64>> {
        (0..self.len()).map(|i| self.u64_at(i)).collect()
    }

    /// All elements promoted to f64, for numeric variants.
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        (0..self.len()).map(|i| self.f64_at(i)).collect()
    }

    /// All elements as u16, for integer variants that fit.
    pub fn to_u16_vec(&self) -> Option<Vec<u16>> {
        self.to_u64_vec()?
            .into_iter()
            .map(|x| u16::try_from(x).ok())
            .collect()
    }
}

/// A directory entry with its decoded value.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// Numeric tag id as stored in the file
    pub id: u16,
    /// Well-known name, if the id is in the registry
    pub name: Option<&'static str>,
    /// Decoded value
    pub value: TagValue,
    /// Whether the value is semantically an array. Count-1 values are
    /// unwrapped to scalars unless the tag is on the always-array list or
    /// the field type is RATIONAL; ASCII is always scalar.
    pub is_array: bool,
}
