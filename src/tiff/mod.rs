pub mod codec;
pub mod header;
pub mod ifd;
pub mod slice;
pub mod tags;
pub mod value;

pub use codec::{Decoder, DecoderRegistry};
pub use header::{ByteOrder, TiffHeader};
pub use ifd::{GeoKeyValue, Ifd};
pub use slice::DataSlice;
pub use value::{FieldType, Rational, Tag, TagValue};
