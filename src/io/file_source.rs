use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;
use crate::io::range_reader::{check_bounds, RangeReader};

/// Local-file byte-range source.
///
/// Reads run on the blocking thread pool so that large strip fetches do not
/// stall the async runtime. Each read seeks on its own duplicated file
/// handle, so concurrent reads do not interfere.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    size: u64,
    identifier: String,
}

impl FileSource {
    /// Opens a file for ranged reads.
    ///
    /// # Errors
    ///
    /// Returns `IoError::NotFound` if the path does not exist and
    /// `IoError::Connection` for other filesystem failures.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref();
        let identifier = format!("file://{}", path.display());
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                IoError::NotFound(identifier.clone())
            } else {
                IoError::Connection(e.to_string())
            }
        })?;
        let size = file
            .metadata()
            .map_err(|e| IoError::Connection(e.to_string()))?
            .len();
        Ok(Self {
            file,
            size,
            identifier,
        })
    }
}

#[async_trait]
impl RangeReader for FileSource {
    async fn read_exact_at(&self, offset: u64, length: usize) -> Result<Bytes, IoError> {
        check_bounds(offset, length, self.size)?;
        if length == 0 {
            return Ok(Bytes::new());
        }

        let mut file = self
            .file
            .try_clone()
            .map_err(|e| IoError::Connection(e.to_string()))?;
        let handle = tokio::task::spawn_blocking(move || -> Result<Bytes, std::io::Error> {
            file.seek(SeekFrom::Start(offset))?;
            let mut buf = vec![0u8; length];
            file.read_exact(&mut buf)?;
            Ok(Bytes::from(buf))
        });

        handle
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => IoError::ShortRead {
                    offset,
                    expected: length as u64,
                    actual: 0,
                },
                _ => IoError::Connection(e.to_string()),
            })
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
