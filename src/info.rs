//! # Archive Information Module
//!
//! Lists the members of a WorldClim archive and, for one member, the raster metadata
//! (size, georeferencing, no-data value, sample format and chunk layout).

use crate::archive::{MemberInfo, ZipRasterArchive};
use crate::raster::{GeoRaster, RasterMetadata};
use crate::storage::{HttpConfig, StorageFactory};
use crate::vsi::{ArchiveLocation, RasterPath};
use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

/// Metadata of one raster member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterInfo {
    pub member: String,
    pub virtual_path: String,
    #[serde(flatten)]
    pub metadata: RasterMetadata,
}

/// Complete information about an archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveInfo {
    pub location: String,
    pub remote: bool,
    pub archive_size: u64,
    pub total_members: usize,
    pub members: Vec<MemberInfo>,
    pub raster: Option<RasterInfo>,
}

/// Reads the member listing of `location` and, when `member` is given, its raster metadata.
pub fn get_archive_info(location: &ArchiveLocation, member: Option<&str>, http: &HttpConfig) -> Result<ArchiveInfo> {
    debug!("Inspecting archive {}", location);
    let storage = StorageFactory::from_location(location, http)
        .with_context(|| format!("Failed to open archive: {}", location))?;
    let archive_size = storage.len();

    let mut archive = ZipRasterArchive::open(storage)
        .with_context(|| format!("Failed to read zip directory of {}", location))?;
    let members = archive.members().context("Failed to list archive members")?;

    let raster = match member {
        Some(member) => {
            let reader = archive.open_member(member)?;
            let raster = GeoRaster::open(reader)
                .with_context(|| format!("Failed to open raster {}", member))?;
            Some(RasterInfo {
                member: member.to_string(),
                virtual_path: RasterPath::new(location.clone(), member).to_string(),
                metadata: raster.metadata(),
            })
        }
        None => None,
    };

    Ok(ArchiveInfo {
        location: location.to_string(),
        remote: location.is_remote(),
        archive_size,
        total_members: members.len(),
        members,
        raster,
    })
}

/// Print archive info in human-readable format
pub fn print_archive_info_human(info: &ArchiveInfo) {
    println!("Archive Information:");
    println!("  Location: {}", info.location);
    println!("  Archive Size: {:.2} MB", info.archive_size as f64 / 1_048_576.0);
    println!("  Members: {} total", info.total_members);
    for member in &info.members {
        println!(
            "    {} ({:.2} MB, {} stored as {:.2} MB)",
            member.name,
            member.size as f64 / 1_048_576.0,
            member.compression,
            member.compressed_size as f64 / 1_048_576.0
        );
    }
    if let Some(raster) = &info.raster {
        let m = &raster.metadata;
        println!("  Raster: {}", raster.member);
        println!("    Path: {}", raster.virtual_path);
        println!("    Size: {} x {} pixels", m.width, m.height);
        println!("    Pixel Size: {} x {}", m.pixel_size.0, m.pixel_size.1);
        println!(
            "    Bounds: lon [{}, {}], lat [{}, {}]",
            m.bounds[0], m.bounds[2], m.bounds[1], m.bounds[3]
        );
        println!("    Sample Format: {}", m.sample_format);
        println!("    Layout: {}", m.layout);
        match m.nodata {
            Some(nodata) => println!("    NoData: {}", nodata),
            None => println!("    NoData: none"),
        }
    }
}

/// Print archive info in JSON format
pub fn print_archive_info_json(info: &ArchiveInfo) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(info)?);
    Ok(())
}

/// Print archive info in YAML format
pub fn print_archive_info_yaml(info: &ArchiveInfo) -> Result<()> {
    let yaml = serde_yaml::to_string(info).context("Failed to serialize archive info to YAML")?;
    println!("{}", yaml);
    Ok(())
}

/// Print archive info in CSV format (members only)
pub fn print_archive_info_csv(info: &ArchiveInfo) -> Result<()> {
    println!("member,size,compressed_size,compression");
    for member in &info.members {
        println!(
            "{},{},{},{}",
            member.name, member.size, member.compressed_size, member.compression
        );
    }
    Ok(())
}
