//! # Storage Abstraction Module
//!
//! This module provides a unified `Read + Seek` view over archives stored either on the
//! local filesystem or on a remote HTTP(S) host. Remote files are never downloaded in
//! full: [`HttpRangeReader`] fetches fixed-size blocks on demand with HTTP range
//! requests, so a zip reader can jump to the central directory at the end of a
//! multi-gigabyte archive and then read only the member it needs.
//!
//! ## Path Patterns
//!
//! - **Remote paths**: `https://host/path/to/archive.zip` (or `http://`)
//! - **Local paths**: `/absolute/path/to/archive.zip` or `relative/path/to/archive.zip`
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::io::{Read, Seek, SeekFrom};
//! use worldclim_extract::storage::{HttpConfig, StorageFactory};
//!
//! let mut storage = StorageFactory::from_path(
//!     "https://geodata.ucdavis.edu/climate/worldclim/2_1/base/wc2.1_10m_elev.zip",
//!     &HttpConfig::default(),
//! )?;
//! storage.seek(SeekFrom::End(-22))?;
//! let mut eocd = [0u8; 22];
//! storage.read_exact(&mut eocd)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::vsi::{is_remote, ArchiveLocation};
use log::debug;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status} for {url}")]
    HttpStatus { url: String, status: StatusCode },

    #[error("Server did not report a content length for {0}")]
    UnknownLength(String),

    #[error("Server ignored the range request for {0}")]
    RangeNotSupported(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for io::Error {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::Io(e) => e,
            StorageError::PathNotFound(path) => io::Error::new(io::ErrorKind::NotFound, path),
            other => io::Error::other(other),
        }
    }
}

const DEFAULT_BLOCK_SIZE: u64 = 1024 * 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const CACHED_BLOCKS: usize = 8;

/// HTTP access settings for remote archives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Size of one range request in bytes
    pub block_size: u64,
    /// Discover the file size with a HEAD request instead of a one-byte ranged GET
    pub use_head: bool,
    /// Value of the User-Agent header
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            block_size: DEFAULT_BLOCK_SIZE,
            use_head: true,
            user_agent: format!("worldclim-extract/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    pub fn build_client(&self) -> StorageResult<Client> {
        let client = Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;
        Ok(client)
    }
}

/// Local filesystem storage backend
///
/// Buffered reader over a local archive.
#[derive(Debug)]
pub struct LocalFile {
    reader: BufReader<File>,
    len: u64,
}

impl LocalFile {
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::PathNotFound(path.display().to_string()));
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return Err(StorageError::PermissionDenied(path.display().to_string()));
            }
            Err(e) => return Err(StorageError::Io(e)),
        };
        let len = file.metadata()?.len();
        Ok(LocalFile {
            reader: BufReader::new(file),
            len,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Read for LocalFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Seek for LocalFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.reader.seek(pos)
    }
}

/// Remote file read through HTTP range requests.
///
/// Reads are served from `block_size` aligned blocks; the most recently fetched
/// blocks are kept in memory so the back-and-forth seeking of zip and TIFF readers
/// does not refetch the same bytes.
pub struct HttpRangeReader {
    client: Client,
    url: String,
    user_agent: String,
    len: u64,
    position: u64,
    block_size: u64,
    blocks: HashMap<u64, Vec<u8>>,
    block_order: VecDeque<u64>,
    requests: usize,
}

impl std::fmt::Debug for HttpRangeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRangeReader")
            .field("url", &self.url)
            .field("len", &self.len)
            .field("position", &self.position)
            .field("block_size", &self.block_size)
            .finish()
    }
}

impl HttpRangeReader {
    /// Opens `url` and discovers its size.
    pub fn open(url: &str, config: &HttpConfig) -> StorageResult<Self> {
        let client = config.build_client()?;
        let len = if config.use_head {
            Self::length_from_head(&client, url, &config.user_agent)?
        } else {
            Self::length_from_range(&client, url, &config.user_agent)?
        };
        debug!("Opened remote file {} ({} bytes)", url, len);

        Ok(HttpRangeReader {
            client,
            url: url.to_string(),
            user_agent: config.user_agent.clone(),
            len,
            position: 0,
            block_size: config.block_size.max(1),
            blocks: HashMap::new(),
            block_order: VecDeque::new(),
            requests: 0,
        })
    }

    fn length_from_head(client: &Client, url: &str, user_agent: &str) -> StorageResult<u64> {
        let response = client.head(url).header(USER_AGENT, user_agent).send()?;
        check_status(url, response.status())?;
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| StorageError::UnknownLength(url.to_string()))
    }

    fn length_from_range(client: &Client, url: &str, user_agent: &str) -> StorageResult<u64> {
        let response = client
            .get(url)
            .header(USER_AGENT, user_agent)
            .header(RANGE, "bytes=0-0")
            .send()?;
        check_status(url, response.status())?;
        if response.status() != StatusCode::PARTIAL_CONTENT {
            return Err(StorageError::RangeNotSupported(url.to_string()));
        }
        response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| StorageError::UnknownLength(url.to_string()))
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of range requests issued so far.
    pub fn request_count(&self) -> usize {
        self.requests
    }

    fn fetch_block(&mut self, block: u64) -> StorageResult<()> {
        if self.blocks.contains_key(&block) {
            return Ok(());
        }

        let start = block * self.block_size;
        let end = (start + self.block_size).min(self.len) - 1;
        debug!("Range request {} bytes={}-{}", self.url, start, end);

        let response = self
            .client
            .get(&self.url)
            .header(USER_AGENT, &self.user_agent)
            .header(RANGE, format!("bytes={}-{}", start, end))
            .send()?;
        check_status(&self.url, response.status())?;
        if response.status() != StatusCode::PARTIAL_CONTENT && (start != 0 || end + 1 != self.len)
        {
            return Err(StorageError::RangeNotSupported(self.url.clone()));
        }
        let data = response.bytes()?.to_vec();
        self.requests += 1;

        if self.block_order.len() >= CACHED_BLOCKS
            && let Some(oldest) = self.block_order.pop_front()
        {
            self.blocks.remove(&oldest);
        }
        self.block_order.push_back(block);
        self.blocks.insert(block, data);
        Ok(())
    }
}

impl Read for HttpRangeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.position >= self.len {
            return Ok(0);
        }

        let block = self.position / self.block_size;
        self.fetch_block(block)?;

        let data = &self.blocks[&block];
        let offset = (self.position - block * self.block_size) as usize;
        if offset >= data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("short range response from {}", self.url),
            ));
        }
        let count = buf.len().min(data.len() - offset);
        buf[..count].copy_from_slice(&data[offset..offset + count]);
        self.position += count as u64;
        Ok(count)
    }
}

impl Seek for HttpRangeReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            )),
        }
    }
}

fn check_status(url: &str, status: StatusCode) -> StorageResult<()> {
    if status == StatusCode::NOT_FOUND {
        return Err(StorageError::PathNotFound(url.to_string()));
    }
    if !status.is_success() {
        return Err(StorageError::HttpStatus {
            url: url.to_string(),
            status,
        });
    }
    Ok(())
}

/// Total length from a `Content-Range: bytes 0-0/12345` header.
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

/// Storage backend enumeration
///
/// Represents the different types of storage backends available.
#[derive(Debug)]
pub enum Storage {
    Local(LocalFile),
    Http(HttpRangeReader),
}

impl Storage {
    pub fn len(&self) -> u64 {
        match self {
            Storage::Local(file) => file.len(),
            Storage::Http(reader) => reader.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Read for Storage {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Storage::Local(file) => file.read(buf),
            Storage::Http(reader) => reader.read(buf),
        }
    }
}

impl Seek for Storage {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Storage::Local(file) => file.seek(pos),
            Storage::Http(reader) => reader.seek(pos),
        }
    }
}

/// Factory for creating storage backends based on path patterns
///
/// - Paths starting with "http://" or "https://" use [`HttpRangeReader`]
/// - All other paths use [`LocalFile`]
pub struct StorageFactory;

impl StorageFactory {
    pub fn from_path(path: &str, http: &HttpConfig) -> StorageResult<Storage> {
        Self::from_location(&ArchiveLocation::parse(path), http)
    }

    pub fn from_location(location: &ArchiveLocation, http: &HttpConfig) -> StorageResult<Storage> {
        match location {
            ArchiveLocation::Remote(url) => Ok(Storage::Http(HttpRangeReader::open(url, http)?)),
            ArchiveLocation::Local(path) => Ok(Storage::Local(LocalFile::open(path)?)),
        }
    }

    /// Checks whether the archive exists without reading it.
    pub fn exists(location: &ArchiveLocation, http: &HttpConfig) -> StorageResult<bool> {
        match location {
            ArchiveLocation::Local(path) => match std::fs::metadata(path) {
                Ok(_) => Ok(true),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(StorageError::Io(e)),
            },
            ArchiveLocation::Remote(url) => {
                let client = http.build_client()?;
                let response = client.head(url).header(USER_AGENT, &http.user_agent).send()?;
                match response.status() {
                    StatusCode::NOT_FOUND => Ok(false),
                    status if status.is_success() => Ok(true),
                    status => Err(StorageError::HttpStatus {
                        url: url.clone(),
                        status,
                    }),
                }
            }
        }
    }

    pub fn is_remote_path(path: &str) -> bool {
        is_remote(path)
    }

    pub fn is_local_path(path: &str) -> bool {
        !Self::is_remote_path(path)
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    //! Minimal HTTP/1.1 server on loopback that honours HEAD and single byte ranges.

    use std::io::{BufRead, BufReader, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    pub struct TestServer {
        pub url: String,
        pub hits: Arc<AtomicUsize>,
    }

    /// Serves `body` at `http://127.0.0.1:<port>/<name>` until the test process exits.
    pub fn serve(name: &str, body: Vec<u8>) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let body = Arc::new(body);
        let hits = Arc::new(AtomicUsize::new(0));
        let path = format!("/{}", name);

        let server_hits = hits.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let body = body.clone();
                let hits = server_hits.clone();
                let path = path.clone();
                thread::spawn(move || handle(stream, &body, &path, &hits));
            }
        });

        TestServer {
            url: format!("http://127.0.0.1:{}/{}", port, name),
            hits,
        }
    }

    fn handle(mut stream: TcpStream, body: &[u8], path: &str, hits: &AtomicUsize) {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).is_err() {
            return;
        }
        let mut range = None;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                break;
            }
            let lower = line.to_ascii_lowercase();
            if let Some(value) = lower.strip_prefix("range: bytes=") {
                let mut parts = value.trim().splitn(2, '-');
                let start: usize = parts.next().unwrap().parse().unwrap();
                let end: usize = parts.next().unwrap().parse().unwrap();
                range = Some((start, end.min(body.len() - 1)));
            }
        }
        hits.fetch_add(1, Ordering::SeqCst);

        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or("");
        let target = parts.next().unwrap_or("");

        if target != path {
            let _ = stream.write_all(
                b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
            return;
        }

        let (status, headers, payload): (&str, String, &[u8]) = match range {
            Some((start, end)) => (
                "206 Partial Content",
                format!(
                    "Content-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\n",
                    end - start + 1,
                    start,
                    end,
                    body.len()
                ),
                &body[start..=end],
            ),
            None => (
                "200 OK",
                format!("Content-Length: {}\r\n", body.len()),
                body,
            ),
        };

        let head = format!(
            "HTTP/1.1 {}\r\n{}Accept-Ranges: bytes\r\nConnection: close\r\n\r\n",
            status, headers
        );
        let _ = stream.write_all(head.as_bytes());
        if method != "HEAD" {
            let _ = stream.write_all(payload);
        }
        let _ = stream.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::test_server::serve;
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn sample_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn small_blocks() -> HttpConfig {
        HttpConfig {
            block_size: 100,
            ..HttpConfig::default()
        }
    }

    #[test]
    fn test_local_file_read_and_seek() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let file_path = temp_dir.path().join("archive.bin");
        std::fs::File::create(&file_path)?.write_all(b"Hello, world!")?;

        let mut storage = StorageFactory::from_path(file_path.to_str().unwrap(), &HttpConfig::default())?;
        assert!(matches!(storage, Storage::Local(_)));
        assert_eq!(storage.len(), 13);

        storage.seek(SeekFrom::Start(7))?;
        let mut buf = String::new();
        storage.read_to_string(&mut buf)?;
        assert_eq!(buf, "world!");
        Ok(())
    }

    #[test]
    fn test_local_file_not_found() {
        let result = LocalFile::open("/nonexistent/path/archive.zip");
        assert!(matches!(result, Err(StorageError::PathNotFound(_))));

        let location = ArchiveLocation::parse("/nonexistent/path/archive.zip");
        assert!(!StorageFactory::exists(&location, &HttpConfig::default()).unwrap());
    }

    #[test]
    fn test_path_detection() {
        assert!(StorageFactory::is_remote_path("https://host/file.zip"));
        assert!(StorageFactory::is_remote_path("http://host/file.zip"));
        assert!(!StorageFactory::is_remote_path("/local/path/file.zip"));
        assert!(StorageFactory::is_local_path("relative/path/file.zip"));
        assert!(!StorageFactory::is_local_path("https://host/file.zip"));
    }

    #[test]
    fn test_content_range_parsing() {
        assert_eq!(parse_content_range_total("bytes 0-0/12345"), Some(12345));
        assert_eq!(parse_content_range_total("bytes 0-0/*"), None);
    }

    #[test]
    fn test_http_range_reader_matches_body() -> Result<(), Box<dyn std::error::Error>> {
        let body = sample_bytes(1_050);
        let server = serve("data.bin", body.clone());

        let mut reader = HttpRangeReader::open(&server.url, &small_blocks())?;
        assert_eq!(reader.len(), 1_050);

        let mut all = Vec::new();
        reader.read_to_end(&mut all)?;
        assert_eq!(all, body);
        // 11 blocks of 100 bytes
        assert_eq!(reader.request_count(), 11);
        Ok(())
    }

    #[test]
    fn test_http_range_reader_seek_from_end() -> Result<(), Box<dyn std::error::Error>> {
        let body = sample_bytes(500);
        let server = serve("tail.bin", body.clone());

        let mut reader = HttpRangeReader::open(&server.url, &small_blocks())?;
        reader.seek(SeekFrom::End(-22))?;
        let mut tail = [0u8; 22];
        reader.read_exact(&mut tail)?;
        assert_eq!(&tail[..], &body[478..]);

        // Re-reading cached blocks does not hit the server again
        let requests = reader.request_count();
        reader.seek(SeekFrom::Current(-10))?;
        let mut again = [0u8; 10];
        reader.read_exact(&mut again)?;
        assert_eq!(reader.request_count(), requests);
        assert!(reader.seek(SeekFrom::Current(-1_000)).is_err());
        Ok(())
    }

    #[test]
    fn test_http_length_without_head() -> Result<(), Box<dyn std::error::Error>> {
        let server = serve("nohead.bin", sample_bytes(321));
        let config = HttpConfig {
            use_head: false,
            ..small_blocks()
        };
        let reader = HttpRangeReader::open(&server.url, &config)?;
        assert_eq!(reader.len(), 321);
        Ok(())
    }

    #[test]
    fn test_http_not_found() {
        let server = serve("present.bin", sample_bytes(10));
        let missing = server.url.replace("present.bin", "missing.bin");

        let result = HttpRangeReader::open(&missing, &HttpConfig::default());
        assert!(matches!(result, Err(StorageError::PathNotFound(_))));

        let location = ArchiveLocation::Remote(missing);
        assert!(!StorageFactory::exists(&location, &HttpConfig::default()).unwrap());
        let present = ArchiveLocation::Remote(server.url.clone());
        assert!(StorageFactory::exists(&present, &HttpConfig::default()).unwrap());
    }
}
