use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

use crate::error::IoError;
use crate::io::range_reader::{check_bounds, RangeReader};

/// S3-backed byte-range source.
///
/// Reads byte ranges from objects in S3 or S3-compatible storage (MinIO,
/// GCS, etc.) via ranged GetObject. The object size is fetched once on
/// creation with a HEAD request; everything after that is range reads, so
/// a multi-gigabyte GeoTIFF costs only the bytes actually touched.
#[derive(Clone)]
pub struct S3Source {
    client: Client,
    bucket: String,
    key: String,
    size: u64,
    identifier: String,
}

impl S3Source {
    /// Creates a source for the given bucket and key.
    ///
    /// Performs a HEAD request to determine the object size.
    ///
    /// # Errors
    ///
    /// Returns `IoError::NotFound` if the object does not exist and
    /// `IoError::S3` for other service failures.
    pub async fn new(client: Client, bucket: String, key: String) -> Result<Self, IoError> {
        let head = client
            .head_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let is_not_found = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false);
                // Some S3-compatible services report 404 only through the
                // error text, not the typed service error.
                let err_str = e.to_string();
                if is_not_found
                    || err_str.contains("NotFound")
                    || err_str.contains("NoSuchKey")
                    || err_str.contains("404")
                {
                    IoError::NotFound(format!("s3://{}/{}", bucket, key))
                } else {
                    IoError::S3(err_str)
                }
            })?;

        let size = head.content_length().unwrap_or(0) as u64;
        let identifier = format!("s3://{}/{}", bucket, key);
        debug!(identifier = %identifier, size, "opened s3 source");

        Ok(Self {
            client,
            bucket,
            key,
            size,
            identifier,
        })
    }

    /// The bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The object key.
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl RangeReader for S3Source {
    async fn read_exact_at(&self, offset: u64, length: usize) -> Result<Bytes, IoError> {
        check_bounds(offset, length, self.size)?;
        if length == 0 {
            return Ok(Bytes::new());
        }

        // Range header is inclusive on both ends.
        let range = format!("bytes={}-{}", offset, offset + length as u64 - 1);

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .range(range)
            .send()
            .await
            .map_err(|e| IoError::S3(e.to_string()))?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?
            .into_bytes();

        if data.len() < length {
            return Err(IoError::ShortRead {
                offset,
                expected: length as u64,
                actual: data.len() as u64,
            });
        }
        Ok(data)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Creates an S3 client with optional custom endpoint and region.
///
/// Use a custom endpoint for S3-compatible services like MinIO:
/// ```ignore
/// let client = create_s3_client(Some("http://localhost:9000"), "us-east-1").await;
/// ```
///
/// For AWS S3, pass `None` to use the default endpoint:
/// ```ignore
/// let client = create_s3_client(None, "us-east-1").await;
/// ```
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;

    // S3-compatible services usually need path-style addressing.
    let s3_config = if endpoint_url.is_some() {
        aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build()
    } else {
        aws_sdk_s3::config::Builder::from(&sdk_config).build()
    };

    Client::from_conf(s3_config)
}
