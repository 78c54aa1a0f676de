//! # WorldClim Catalog
//!
//! Naming rules of the WorldClim 2.1 "base" dataset: which variables and resolutions
//! exist, how many layers each variable carries, and how archive URLs, archive members
//! and output columns are named.
//!
//! | Variable | Layers | Member example          |
//! |----------|--------|-------------------------|
//! | `bio`    | 1..=19 | `wc2.1_10m_bio_5.tif`   |
//! | `elev`   | 1      | `wc2.1_10m_elev.tif`    |
//! | monthly  | 01..=12| `wc2.1_10m_tmin_07.tif` |
//!
//! ```rust
//! use worldclim_extract::catalog::{archive_url, Resolution, Variable, DEFAULT_BASE_URL};
//!
//! let url = archive_url(DEFAULT_BASE_URL, Variable::Tmin, Resolution::TwoAndHalfMinutes);
//! assert!(url.ends_with("/wc2.1_2.5m_tmin.zip"));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Public host of the WorldClim 2.1 historical climate archives.
pub const DEFAULT_BASE_URL: &str = "https://geodata.ucdavis.edu/climate/worldclim/2_1/base";

const DATASET_PREFIX: &str = "wc2.1";

#[derive(Error, Debug, PartialEq)]
pub enum CatalogError {
    #[error("Unknown variable '{0}' (expected one of: bio, elev, tmin, tmax, tavg, prec, srad, wind, vapr)")]
    UnknownVariable(String),

    #[error("Unknown resolution '{0}' (expected one of: 30s, 2.5m, 5m, 10m)")]
    UnknownResolution(String),

    #[error("Layer {layer} does not exist for variable '{variable}' (valid layers: 1..={max})")]
    LayerOutOfRange {
        variable: Variable,
        layer: u32,
        max: u32,
    },

    #[error("Layer selection for variable '{0}' is empty")]
    EmptySelection(Variable),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Climate variable codes published by WorldClim 2.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Variable {
    /// 19 bioclimatic variables
    Bio,
    /// Elevation
    Elev,
    Tmin,
    Tmax,
    Tavg,
    Prec,
    Srad,
    Wind,
    Vapr,
}

/// Spatial resolution of the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Resolution {
    /// 30 arc-seconds (~1 km²)
    ThirtySeconds,
    /// 2.5 arc-minutes
    TwoAndHalfMinutes,
    /// 5 arc-minutes
    FiveMinutes,
    /// 10 arc-minutes (~340 km²)
    TenMinutes,
}

impl Variable {
    pub const ALL: [Variable; 9] = [
        Variable::Bio,
        Variable::Elev,
        Variable::Tmin,
        Variable::Tmax,
        Variable::Tavg,
        Variable::Prec,
        Variable::Srad,
        Variable::Wind,
        Variable::Vapr,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Variable::Bio => "bio",
            Variable::Elev => "elev",
            Variable::Tmin => "tmin",
            Variable::Tmax => "tmax",
            Variable::Tavg => "tavg",
            Variable::Prec => "prec",
            Variable::Srad => "srad",
            Variable::Wind => "wind",
            Variable::Vapr => "vapr",
        }
    }

    /// Number of GeoTIFF layers inside the variable's archive.
    pub fn layer_count(&self) -> u32 {
        match self {
            Variable::Bio => 19,
            Variable::Elev => 1,
            _ => 12,
        }
    }

    pub fn is_monthly(&self) -> bool {
        !matches!(self, Variable::Bio | Variable::Elev)
    }

    /// All layers of this variable in archive order.
    pub fn layers(&self) -> Vec<Layer> {
        (1..=self.layer_count())
            .map(|index| Layer {
                variable: *self,
                index,
            })
            .collect()
    }

    pub fn layer(&self, index: u32) -> CatalogResult<Layer> {
        if index == 0 || index > self.layer_count() {
            return Err(CatalogError::LayerOutOfRange {
                variable: *self,
                layer: index,
                max: self.layer_count(),
            });
        }
        Ok(Layer {
            variable: *self,
            index,
        })
    }

    pub fn description(&self) -> &'static str {
        match self {
            Variable::Bio => "Bioclimatic variables (19 derived layers)",
            Variable::Elev => "Elevation",
            Variable::Tmin => "Minimum temperature",
            Variable::Tmax => "Maximum temperature",
            Variable::Tavg => "Average temperature",
            Variable::Prec => "Precipitation",
            Variable::Srad => "Solar radiation",
            Variable::Wind => "Wind speed",
            Variable::Vapr => "Water vapor pressure",
        }
    }

    pub fn units(&self) -> &'static str {
        match self {
            Variable::Bio => "mixed",
            Variable::Elev => "m",
            Variable::Tmin | Variable::Tmax | Variable::Tavg => "°C",
            Variable::Prec => "mm",
            Variable::Srad => "kJ m-2 day-1",
            Variable::Wind => "m s-1",
            Variable::Vapr => "kPa",
        }
    }
}

impl Resolution {
    pub const ALL: [Resolution; 4] = [
        Resolution::ThirtySeconds,
        Resolution::TwoAndHalfMinutes,
        Resolution::FiveMinutes,
        Resolution::TenMinutes,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Resolution::ThirtySeconds => "30s",
            Resolution::TwoAndHalfMinutes => "2.5m",
            Resolution::FiveMinutes => "5m",
            Resolution::TenMinutes => "10m",
        }
    }

    /// Grid cell size in degrees.
    pub fn cell_size_degrees(&self) -> f64 {
        match self {
            Resolution::ThirtySeconds => 30.0 / 3600.0,
            Resolution::TwoAndHalfMinutes => 2.5 / 60.0,
            Resolution::FiveMinutes => 5.0 / 60.0,
            Resolution::TenMinutes => 10.0 / 60.0,
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Variable {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_lowercase();
        Variable::ALL
            .into_iter()
            .find(|v| v.code() == code)
            .ok_or_else(|| CatalogError::UnknownVariable(s.to_string()))
    }
}

impl FromStr for Resolution {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_lowercase();
        Resolution::ALL
            .into_iter()
            .find(|r| r.code() == code)
            .ok_or_else(|| CatalogError::UnknownResolution(s.to_string()))
    }
}

impl TryFrom<String> for Variable {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Variable> for String {
    fn from(value: Variable) -> Self {
        value.code().to_string()
    }
}

impl TryFrom<String> for Resolution {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.code().to_string()
    }
}

/// One GeoTIFF layer of a variable, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Layer {
    variable: Variable,
    index: u32,
}

impl Layer {
    pub fn variable(&self) -> Variable {
        self.variable
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Layer suffix as it appears in member and column names.
    ///
    /// Bioclimatic layers are unpadded (`5`), monthly layers are zero padded (`07`) and
    /// elevation has no suffix at all.
    pub fn suffix(&self) -> Option<String> {
        match self.variable {
            Variable::Elev => None,
            Variable::Bio => Some(self.index.to_string()),
            _ => Some(format!("{:02}", self.index)),
        }
    }

    /// File name of this layer inside the archive.
    pub fn member_name(&self, resolution: Resolution) -> String {
        match self.suffix() {
            Some(suffix) => format!(
                "{}_{}_{}_{}.tif",
                DATASET_PREFIX, resolution, self.variable, suffix
            ),
            None => format!("{}_{}_{}.tif", DATASET_PREFIX, resolution, self.variable),
        }
    }

    /// Name of the column appended to the output table.
    pub fn column_name(&self, resolution: Resolution) -> String {
        match self.suffix() {
            Some(suffix) => format!("{}_{}_{}", self.variable, resolution, suffix),
            None => format!("{}_{}", self.variable, resolution),
        }
    }
}

/// Ordered, de-duplicated set of layers requested for one extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSelection {
    variable: Variable,
    layers: Vec<Layer>,
}

impl LayerSelection {
    /// Resolves the requested layer numbers; `None` selects every layer of the variable.
    pub fn resolve(variable: Variable, requested: Option<&[u32]>) -> CatalogResult<Self> {
        let layers = match requested {
            None => variable.layers(),
            Some(indices) => {
                let mut layers: Vec<Layer> = Vec::with_capacity(indices.len());
                for &index in indices {
                    let layer = variable.layer(index)?;
                    if !layers.contains(&layer) {
                        layers.push(layer);
                    }
                }
                if layers.is_empty() {
                    return Err(CatalogError::EmptySelection(variable));
                }
                layers
            }
        };
        Ok(LayerSelection { variable, layers })
    }

    pub fn variable(&self) -> Variable {
        self.variable
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn column_names(&self, resolution: Resolution) -> Vec<String> {
        self.layers
            .iter()
            .map(|layer| layer.column_name(resolution))
            .collect()
    }
}

/// Name of the zip archive holding every layer of `variable` at `resolution`.
pub fn archive_name(variable: Variable, resolution: Resolution) -> String {
    format!("{}_{}_{}.zip", DATASET_PREFIX, resolution, variable)
}

/// Full URL of the archive under `base_url`.
pub fn archive_url(base_url: &str, variable: Variable, resolution: Resolution) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        archive_name(variable, resolution)
    )
}

/// Variable and resolution encoded in an archive file name or URL, such as
/// `.../wc2.1_10m_bio.zip`.
pub fn parse_archive_name(name: &str) -> Option<(Variable, Resolution)> {
    let file = name.rsplit(['/', '\\']).next()?;
    let stem = file.strip_suffix(".zip")?;
    let rest = stem.strip_prefix(DATASET_PREFIX)?.strip_prefix('_')?;
    let (resolution, variable) = rest.split_once('_')?;
    Some((variable.parse().ok()?, resolution.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_codes_round_trip() {
        for variable in Variable::ALL {
            assert_eq!(variable.code().parse::<Variable>().unwrap(), variable);
        }
        assert_eq!("  TMIN ".parse::<Variable>().unwrap(), Variable::Tmin);
        assert!(matches!(
            "snow".parse::<Variable>(),
            Err(CatalogError::UnknownVariable(_))
        ));
    }

    #[test]
    fn test_resolution_codes() {
        assert_eq!("2.5m".parse::<Resolution>().unwrap(), Resolution::TwoAndHalfMinutes);
        assert_eq!("30s".parse::<Resolution>().unwrap(), Resolution::ThirtySeconds);
        assert!(matches!(
            "1m".parse::<Resolution>(),
            Err(CatalogError::UnknownResolution(_))
        ));
        assert!((Resolution::TenMinutes.cell_size_degrees() - 1.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_layer_counts() {
        assert_eq!(Variable::Bio.layer_count(), 19);
        assert_eq!(Variable::Elev.layer_count(), 1);
        assert_eq!(Variable::Prec.layer_count(), 12);
        assert!(Variable::Wind.is_monthly());
        assert!(!Variable::Bio.is_monthly());
    }

    #[test]
    fn test_member_and_column_names() {
        let bio5 = Variable::Bio.layer(5).unwrap();
        assert_eq!(bio5.member_name(Resolution::ThirtySeconds), "wc2.1_30s_bio_5.tif");
        assert_eq!(bio5.column_name(Resolution::ThirtySeconds), "bio_30s_5");

        let tmin7 = Variable::Tmin.layer(7).unwrap();
        assert_eq!(
            tmin7.member_name(Resolution::TwoAndHalfMinutes),
            "wc2.1_2.5m_tmin_07.tif"
        );
        assert_eq!(tmin7.column_name(Resolution::TwoAndHalfMinutes), "tmin_2.5m_07");

        let elev = Variable::Elev.layer(1).unwrap();
        assert_eq!(elev.member_name(Resolution::TenMinutes), "wc2.1_10m_elev.tif");
        assert_eq!(elev.column_name(Resolution::TenMinutes), "elev_10m");
    }

    #[test]
    fn test_layer_out_of_range() {
        assert!(matches!(
            Variable::Tmax.layer(13),
            Err(CatalogError::LayerOutOfRange { layer: 13, max: 12, .. })
        ));
        assert!(Variable::Bio.layer(0).is_err());
        assert!(Variable::Elev.layer(2).is_err());
    }

    #[test]
    fn test_layer_selection() {
        let all = LayerSelection::resolve(Variable::Bio, None).unwrap();
        assert_eq!(all.len(), 19);

        let subset = LayerSelection::resolve(Variable::Prec, Some(&[12, 1, 12, 6])).unwrap();
        let indices: Vec<u32> = subset.layers().iter().map(|l| l.index()).collect();
        assert_eq!(indices, vec![12, 1, 6]);
        assert_eq!(
            subset.column_names(Resolution::FiveMinutes),
            vec!["prec_5m_12", "prec_5m_01", "prec_5m_06"]
        );

        assert!(LayerSelection::resolve(Variable::Prec, Some(&[])).is_err());
        assert!(LayerSelection::resolve(Variable::Prec, Some(&[0])).is_err());
    }

    #[test]
    fn test_archive_url() {
        assert_eq!(
            archive_url(DEFAULT_BASE_URL, Variable::Bio, Resolution::TenMinutes),
            "https://geodata.ucdavis.edu/climate/worldclim/2_1/base/wc2.1_10m_bio.zip"
        );
        assert_eq!(
            archive_url("http://mirror.local/wc/", Variable::Vapr, Resolution::FiveMinutes),
            "http://mirror.local/wc/wc2.1_5m_vapr.zip"
        );
    }

    #[test]
    fn test_parse_archive_name() {
        assert_eq!(
            parse_archive_name("https://host/base/wc2.1_2.5m_tmin.zip"),
            Some((Variable::Tmin, Resolution::TwoAndHalfMinutes))
        );
        assert_eq!(
            parse_archive_name("wc2.1_30s_elev.zip"),
            Some((Variable::Elev, Resolution::ThirtySeconds))
        );
        assert_eq!(parse_archive_name("/data/wc2.1_10m_snow.zip"), None);
        assert_eq!(parse_archive_name("/data/archive.zip"), None);
    }

    #[test]
    fn test_serde_codes() {
        let variable: Variable = serde_json::from_str("\"srad\"").unwrap();
        assert_eq!(variable, Variable::Srad);
        assert_eq!(serde_json::to_string(&Resolution::TwoAndHalfMinutes).unwrap(), "\"2.5m\"");
        assert!(serde_json::from_str::<Resolution>("\"20m\"").is_err());
    }
}
