pub mod block_cache;
pub mod file_source;
pub mod http_source;
pub mod range_reader;
pub mod s3_source;

pub use block_cache::BlockCache;
pub use file_source::FileSource;
pub use http_source::HttpSource;
pub use range_reader::{RangeReader, Slice};
pub use s3_source::{create_s3_client, S3Source};
