//! # Zip Archive Access
//!
//! Opens the WorldClim zip archives through a [`Storage`] backend and hands out
//! `Read + Seek` readers over single members.
//!
//! Only the central directory and the requested member's bytes are read. Members stored
//! without compression are served as a window straight over the underlying storage, so
//! a TIFF decoder can jump to the strips it needs without touching the rest of the
//! archive. Compressed members cannot be seeked into and are inflated into a spooled
//! temporary file first.

use crate::storage::{Storage, StorageError};
use log::debug;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Seek, SeekFrom};
use tempfile::SpooledTempFile;
use thiserror::Error;
use zip::result::ZipError;
use zip::{CompressionMethod, ZipArchive};

/// Compressed members up to this size are inflated in memory, larger ones spill to disk.
const SPOOL_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Zip error: {0}")]
    Zip(#[from] ZipError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Member '{member}' not found in archive (available: {available})")]
    MemberNotFound { member: String, available: String },
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Central directory entry of one archive member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub name: String,
    pub size: u64,
    pub compressed_size: u64,
    pub compression: String,
}

/// A zip archive of GeoTIFF layers.
#[derive(Debug)]
pub struct ZipRasterArchive {
    storage: Storage,
    names: Vec<String>,
}

impl ZipRasterArchive {
    /// Reads the central directory of the archive behind `storage`.
    pub fn open(mut storage: Storage) -> ArchiveResult<Self> {
        let names: Vec<String> = {
            let archive = ZipArchive::new(&mut storage)?;
            archive.file_names().map(|name| name.to_string()).collect()
        };
        debug!("Archive central directory lists {} members", names.len());
        Ok(ZipRasterArchive { storage, names })
    }

    /// Member names in central directory order.
    pub fn member_names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, member: &str) -> bool {
        self.names.iter().any(|name| name == member)
    }

    /// Name, sizes and compression of every member.
    pub fn members(&mut self) -> ArchiveResult<Vec<MemberInfo>> {
        let mut archive = ZipArchive::new(&mut self.storage)?;
        let mut members = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let file = archive.by_index(index)?;
            members.push(MemberInfo {
                name: file.name().to_string(),
                size: file.size(),
                compressed_size: file.compressed_size(),
                compression: format!("{:?}", file.compression()),
            });
        }
        Ok(members)
    }

    /// Opens a member for random access reading.
    pub fn open_member(&mut self, member: &str) -> ArchiveResult<MemberReader<'_>> {
        if !self.contains(member) {
            return Err(ArchiveError::MemberNotFound {
                member: member.to_string(),
                available: self.names.join(", "),
            });
        }

        let (start, len) = {
            let mut archive = ZipArchive::new(&mut self.storage)?;
            let mut file = archive.by_name(member)?;
            if file.compression() == CompressionMethod::Stored {
                (file.data_start(), file.size())
            } else {
                debug!(
                    "Inflating {:?} member {} ({} -> {} bytes)",
                    file.compression(),
                    member,
                    file.compressed_size(),
                    file.size()
                );
                let mut spool = SpooledTempFile::new(SPOOL_MEMORY_LIMIT);
                io::copy(&mut file, &mut spool)?;
                spool.seek(SeekFrom::Start(0))?;
                return Ok(MemberReader::Inflated(spool));
            }
        };

        debug!("Member {} is stored at offset {} ({} bytes)", member, start, len);
        Ok(MemberReader::Stored(WindowReader::new(&mut self.storage, start, len)?))
    }
}

/// Random access reader over one archive member.
pub enum MemberReader<'a> {
    /// Uncompressed member read in place
    Stored(WindowReader<&'a mut Storage>),
    /// Compressed member inflated into a temporary file
    Inflated(SpooledTempFile),
}

impl Read for MemberReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            MemberReader::Stored(window) => window.read(buf),
            MemberReader::Inflated(spool) => spool.read(buf),
        }
    }
}

impl Seek for MemberReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            MemberReader::Stored(window) => window.seek(pos),
            MemberReader::Inflated(spool) => spool.seek(pos),
        }
    }
}

/// `Read + Seek` view of the byte range `[start, start + len)` of another reader.
#[derive(Debug)]
pub struct WindowReader<R> {
    inner: R,
    start: u64,
    len: u64,
    position: u64,
}

impl<R: Read + Seek> WindowReader<R> {
    pub fn new(mut inner: R, start: u64, len: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(start))?;
        Ok(WindowReader {
            inner,
            start,
            len,
            position: 0,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<R: Read + Seek> Read for WindowReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position >= self.len {
            return Ok(0);
        }
        let remaining = (self.len - self.position) as usize;
        let count = buf.len().min(remaining);
        let read = self.inner.read(&mut buf[..count])?;
        self.position += read as u64;
        Ok(read)
    }
}

impl<R: Read + Seek> Seek for WindowReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start of member"))?;

        self.inner.seek(SeekFrom::Start(self.start + target))?;
        self.position = target;
        Ok(target)
    }
}
