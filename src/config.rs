//! Dataset locations and run settings.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::flows::DEFAULT_TOP_N;
use crate::month::{DEFAULT_END, DEFAULT_START, YearMonth};
use crate::transit::{DEFAULT_BUS_SUBDIRS, DEFAULT_ROUTE_COLOR};

/// Where the input datasets live and which slice of them to use.
///
/// Read from a JSON file; every field is optional:
/// ```json
/// {
///   "taxi_dir": "datasets/taxi",
///   "zones_file": "datasets/taxi/taxi_zones.geojson",
///   "subway_dir": "datasets/subway/google_transit",
///   "bus_dir": "datasets/bus",
///   "bus_subdirs": ["gtfs_m", "gtfs_bx"],
///   "start": "2023-10",
///   "end": "2024-09",
///   "route_color_fallback": "#000000",
///   "top_n": 10,
///   "output_dir": "maps",
///   "strict_cleaning": false
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub taxi_dir: PathBuf,
    pub zones_file: PathBuf,
    pub subway_dir: PathBuf,
    pub bus_dir: PathBuf,
    pub bus_subdirs: Vec<String>,
    pub start: YearMonth,
    pub end: YearMonth,
    pub route_color_fallback: String,
    pub top_n: usize,
    pub output_dir: PathBuf,
    /// Validate fare records and trim outliers on top of the standard cleaning.
    pub strict_cleaning: bool,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            taxi_dir: PathBuf::from("datasets/taxi"),
            zones_file: PathBuf::from("datasets/taxi/taxi_zones.geojson"),
            subway_dir: PathBuf::from("datasets/subway/google_transit"),
            bus_dir: PathBuf::from("datasets/bus"),
            bus_subdirs: DEFAULT_BUS_SUBDIRS.iter().map(|s| s.to_string()).collect(),
            start: DEFAULT_START,
            end: DEFAULT_END,
            route_color_fallback: DEFAULT_ROUTE_COLOR.to_string(),
            top_n: DEFAULT_TOP_N,
            output_dir: PathBuf::from("maps"),
            strict_cleaning: false,
        }
    }
}

impl DatasetConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// The default config, or the one at `path` when given.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.output_dir.join(file_name)
    }
}
