//! # Virtual Raster Paths
//!
//! A raster inside a zip archive is addressed with the virtual file system syntax used
//! by the geospatial tooling ecosystem:
//!
//! - remote archive: `/vsizip/vsicurl/https://host/path/archive.zip/member.tif`
//! - local archive:  `/vsizip//data/archive.zip/member.tif`
//!
//! [`RasterPath`] composes these strings for logging and dry runs and parses them back
//! when a user hands one over on the command line.

use crate::catalog::{archive_url, Layer, Resolution, Variable};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

const VSIZIP: &str = "/vsizip/";
const VSICURL: &str = "vsicurl/";
const ZIP_BOUNDARY: &str = ".zip/";

#[derive(Error, Debug, PartialEq)]
pub enum VsiError {
    #[error("Not a /vsizip/ path: {0}")]
    NotVsiZip(String),

    #[error("Virtual path has no '.zip/' archive boundary: {0}")]
    MissingArchive(String),

    #[error("Virtual path names no archive member: {0}")]
    MissingMember(String),
}

/// Where an archive lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveLocation {
    /// `http://` or `https://` URL, read with range requests
    Remote(String),
    /// Path on the local filesystem
    Local(PathBuf),
}

impl ArchiveLocation {
    /// Classifies a user supplied path or URL.
    pub fn parse(location: &str) -> Self {
        if is_remote(location) {
            ArchiveLocation::Remote(location.to_string())
        } else {
            ArchiveLocation::Local(PathBuf::from(location))
        }
    }

    /// Archive of a WorldClim variable on `base_url` (which may itself be a local directory).
    pub fn for_selection(base_url: &str, variable: Variable, resolution: Resolution) -> Self {
        Self::parse(&archive_url(base_url, variable, resolution))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ArchiveLocation::Remote(_))
    }
}

impl fmt::Display for ArchiveLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveLocation::Remote(url) => f.write_str(url),
            ArchiveLocation::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

pub(crate) fn is_remote(location: &str) -> bool {
    let lower = location.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// A raster member inside a zip archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterPath {
    pub archive: ArchiveLocation,
    pub member: String,
}

impl RasterPath {
    pub fn new(archive: ArchiveLocation, member: impl Into<String>) -> Self {
        RasterPath {
            archive,
            member: member.into(),
        }
    }

    pub fn for_layer(archive: &ArchiveLocation, layer: &Layer, resolution: Resolution) -> Self {
        RasterPath::new(archive.clone(), layer.member_name(resolution))
    }
}

impl fmt::Display for RasterPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.archive {
            ArchiveLocation::Remote(url) => {
                write!(f, "{}{}{}/{}", VSIZIP, VSICURL, url, self.member)
            }
            ArchiveLocation::Local(path) => {
                write!(f, "{}{}/{}", VSIZIP, path.display(), self.member)
            }
        }
    }
}

impl FromStr for RasterPath {
    type Err = VsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(VSIZIP)
            .ok_or_else(|| VsiError::NotVsiZip(s.to_string()))?;

        let boundary = rest
            .to_ascii_lowercase()
            .rfind(ZIP_BOUNDARY)
            .ok_or_else(|| VsiError::MissingArchive(s.to_string()))?;
        let archive = &rest[..boundary + ZIP_BOUNDARY.len() - 1];
        let member = &rest[boundary + ZIP_BOUNDARY.len()..];
        if member.is_empty() {
            return Err(VsiError::MissingMember(s.to_string()));
        }

        let location = match archive.strip_prefix(VSICURL) {
            Some(url) => ArchiveLocation::Remote(url.to_string()),
            None => ArchiveLocation::Local(PathBuf::from(archive)),
        };

        Ok(RasterPath::new(location, member))
    }
}
