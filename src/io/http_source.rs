use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use reqwest::StatusCode;
use tracing::debug;

use crate::error::IoError;
use crate::io::range_reader::{check_bounds, RangeReader, Slice};

/// HTTP(S) byte-range source.
///
/// Issues `Range: bytes=...` requests and expects `206 Partial Content`
/// responses. Multi-range fetches use a single request and parse the
/// `multipart/byteranges` response body. A server that answers `200 OK`
/// with the whole file is an error unless `allow_full_file` is set, in
/// which case the requested ranges are sliced out of the full body.
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
    size: u64,
    allow_full_file: bool,
}

impl HttpSource {
    /// Connects to `url` and learns the resource size via a HEAD request.
    ///
    /// # Errors
    ///
    /// Returns `IoError::NotFound` for 404, `IoError::Http` for other
    /// non-success statuses or a missing/unparsable Content-Length, and
    /// `IoError::Connection` for transport failures.
    pub async fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        allow_full_file: bool,
    ) -> Result<Self, IoError> {
        let url = url.into();
        let resp = client
            .head(&url)
            .send()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(IoError::NotFound(url));
        }
        if !resp.status().is_success() {
            return Err(IoError::Http(format!(
                "HEAD {} returned {}",
                url,
                resp.status()
            )));
        }

        let size = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| IoError::Http(format!("HEAD {url} returned no Content-Length")))?;

        debug!(url = %url, size, "opened http source");
        Ok(Self {
            client,
            url,
            size,
            allow_full_file,
        })
    }

    async fn send_range(&self, header: String) -> Result<reqwest::Response, IoError> {
        let resp = self
            .client
            .get(&self.url)
            .header(RANGE, header)
            .send()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(IoError::NotFound(self.url.clone()));
        }
        Ok(resp)
    }

    fn slice_full_body(&self, body: &Bytes, range: Slice) -> Result<Bytes, IoError> {
        if !self.allow_full_file {
            return Err(IoError::RangeNotSupported);
        }
        if range.top() > body.len() as u64 {
            return Err(IoError::ShortRead {
                offset: range.offset,
                expected: range.length,
                actual: (body.len() as u64).saturating_sub(range.offset),
            });
        }
        Ok(body.slice(range.offset as usize..range.top() as usize))
    }
}

#[async_trait]
impl RangeReader for HttpSource {
    async fn read_exact_at(&self, offset: u64, length: usize) -> Result<Bytes, IoError> {
        check_bounds(offset, length, self.size)?;
        if length == 0 {
            return Ok(Bytes::new());
        }

        let last = offset + length as u64 - 1;
        let resp = self.send_range(format!("bytes={offset}-{last}")).await?;
        match resp.status() {
            StatusCode::PARTIAL_CONTENT => {
                let body = resp
                    .bytes()
                    .await
                    .map_err(|e| IoError::Connection(e.to_string()))?;
                if body.len() < length {
                    return Err(IoError::ShortRead {
                        offset,
                        expected: length as u64,
                        actual: body.len() as u64,
                    });
                }
                Ok(body.slice(..length))
            }
            StatusCode::OK => {
                let body = resp
                    .bytes()
                    .await
                    .map_err(|e| IoError::Connection(e.to_string()))?;
                self.slice_full_body(&body, Slice::new(offset, length as u64))
            }
            status => Err(IoError::Http(format!(
                "GET {} returned {status}",
                self.url
            ))),
        }
    }

    async fn fetch_ranges(&self, ranges: &[Slice]) -> Result<Vec<Bytes>, IoError> {
        match ranges {
            [] => return Ok(Vec::new()),
            [only] => return Ok(vec![self.read_exact_at(only.offset, only.length as usize).await?]),
            _ => {}
        }
        for range in ranges {
            check_bounds(range.offset, range.length as usize, self.size)?;
        }

        let spec = ranges
            .iter()
            .map(|r| format!("{}-{}", r.offset, r.top() - 1))
            .collect::<Vec<_>>()
            .join(",");
        let resp = self.send_range(format!("bytes={spec}")).await?;

        match resp.status() {
            StatusCode::PARTIAL_CONTENT => {
                let boundary = resp
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(multipart_boundary);
                let content_range = resp
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_content_range);
                let body = resp
                    .bytes()
                    .await
                    .map_err(|e| IoError::Connection(e.to_string()))?;

                if let Some(boundary) = boundary {
                    let parts = parse_byteranges(&body, &boundary)?;
                    return assemble_parts(ranges, &parts);
                }

                // Single-part 206: the server coalesced or honored only the
                // first range. Serve what arrived, fetch the rest one by one.
                let (start, _) = content_range.ok_or_else(|| {
                    IoError::Http("206 response without Content-Range or multipart body".into())
                })?;
                let mut out = Vec::with_capacity(ranges.len());
                for range in ranges {
                    let rel = range.offset.checked_sub(start);
                    match rel {
                        Some(rel) if rel + range.length <= body.len() as u64 => {
                            out.push(body.slice(rel as usize..(rel + range.length) as usize));
                        }
                        _ => {
                            out.push(
                                self.read_exact_at(range.offset, range.length as usize)
                                    .await?,
                            );
                        }
                    }
                }
                Ok(out)
            }
            StatusCode::OK => {
                let body = resp
                    .bytes()
                    .await
                    .map_err(|e| IoError::Connection(e.to_string()))?;
                ranges
                    .iter()
                    .map(|r| self.slice_full_body(&body, *r))
                    .collect()
            }
            status => Err(IoError::Http(format!(
                "GET {} returned {status}",
                self.url
            ))),
        }
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.url
    }
}

/// Extracts the boundary parameter from a `multipart/byteranges` media type.
fn multipart_boundary(content_type: &str) -> Option<String> {
    let mut parts = content_type.split(';');
    let media_type = parts.next()?.trim();
    if !media_type.eq_ignore_ascii_case("multipart/byteranges") {
        return None;
    }
    for param in parts {
        let param = param.trim();
        if let Some(value) = param.strip_prefix("boundary=") {
            return Some(value.trim_matches('"').to_string());
        }
    }
    None
}

/// Parses `bytes <start>-<end>/<total>` into `(start, end)` (inclusive).
fn parse_content_range(value: &str) -> Option<(u64, u64)> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, _total) = rest.split_once('/')?;
    let (start, end) = range.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}

/// A single part of a `multipart/byteranges` body.
struct RangePart {
    start: u64,
    data: Bytes,
}

/// Splits a `multipart/byteranges` body into its parts.
fn parse_byteranges(body: &Bytes, boundary: &str) -> Result<Vec<RangePart>, IoError> {
    let marker = format!("--{boundary}");
    let marker = marker.as_bytes();
    let mut parts = Vec::new();
    let mut pos = 0usize;

    while let Some(found) = find(&body[pos..], marker) {
        let mut cursor = pos + found + marker.len();
        // Closing delimiter is "--boundary--".
        if body[cursor..].starts_with(b"--") {
            break;
        }
        cursor += eat_crlf(&body[cursor..]);

        let Some(header_len) = find(&body[cursor..], b"\r\n\r\n") else {
            return Err(IoError::Http("malformed multipart/byteranges part".into()));
        };
        let headers = &body[cursor..cursor + header_len];
        let data_start = cursor + header_len + 4;

        let Some(next) = find(&body[data_start..], marker) else {
            return Err(IoError::Http("unterminated multipart/byteranges part".into()));
        };
        // Part data is followed by CRLF before the next delimiter.
        let data_end = data_start + next.saturating_sub(2);

        let (start, end) = part_content_range(headers).ok_or_else(|| {
            IoError::Http("multipart/byteranges part without Content-Range".into())
        })?;
        let expected = (end - start + 1) as usize;
        if data_end - data_start < expected {
            return Err(IoError::ShortRead {
                offset: start,
                expected: expected as u64,
                actual: (data_end - data_start) as u64,
            });
        }
        parts.push(RangePart {
            start,
            data: body.slice(data_start..data_start + expected),
        });
        pos = data_start + next;
    }

    Ok(parts)
}

fn part_content_range(headers: &[u8]) -> Option<(u64, u64)> {
    for line in headers.split(|&b| b == b'\n') {
        let line = std::str::from_utf8(line).ok()?.trim();
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-range") {
            return parse_content_range(value);
        }
    }
    None
}

/// Matches each requested range to the multipart part that covers it.
fn assemble_parts(ranges: &[Slice], parts: &[RangePart]) -> Result<Vec<Bytes>, IoError> {
    ranges
        .iter()
        .map(|range| {
            parts
                .iter()
                .find_map(|part| {
                    let rel = range.offset.checked_sub(part.start)?;
                    let top = rel + range.length;
                    if top <= part.data.len() as u64 {
                        Some(part.data.slice(rel as usize..top as usize))
                    } else {
                        None
                    }
                })
                .ok_or_else(|| {
                    IoError::Http(format!(
                        "multipart response did not cover range {}-{}",
                        range.offset,
                        range.top() - 1
                    ))
                })
        })
        .collect()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn eat_crlf(bytes: &[u8]) -> usize {
    if bytes.starts_with(b"\r\n") {
        2
    } else {
        0
    }
}
