//! # Input Configuration Module
//!
//! Job configuration for cora2parquet. A job names the catalog and dataset to
//! open, the node to extract (by index or by coordinates), an optional year
//! range, and where to write the result.
//!
//! ## Example
//!
//! ```rust
//! use cora2parquet::input::{JobConfig, NodeSelector};
//!
//! let json = r#"
//! {
//!   "node": { "kind": "point", "lat": 29.31, "lon": -94.79 },
//!   "years": { "start": 2022, "end": 2022 },
//!   "output_key": "galveston_2022.parquet"
//! }"#;
//! let config = JobConfig::from_json(json)?;
//! assert!(matches!(config.node, NodeSelector::Point { .. }));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::{CoraError, CoraResult};
use crate::time::WindowRule;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Public intake catalog describing the CORA datasets
pub const DEFAULT_CATALOG_URL: &str = "s3://noaa-nos-cora-pds/CORA_intake.yml";

/// Catalog entry for the 500 m grid product
pub const DEFAULT_DATASET: &str = "CORA-V1-500m-grid-1979-2022";

pub const DEFAULT_REGION: &str = "us-east-1";

/// Main configuration structure for cora2parquet jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Intake catalog location (`s3://...` or a local path)
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,
    /// Entry name inside the catalog
    #[serde(default = "default_dataset")]
    pub dataset: String,
    /// AWS region of the bucket holding the data
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub variables: VariableNames,
    /// Which node to extract
    pub node: NodeSelector,
    /// Optional inclusive calendar year range
    #[serde(default)]
    pub years: Option<YearRange>,
    #[serde(default)]
    pub window_rule: WindowRule,
    /// Destination for the Parquet file; nothing is written when absent
    #[serde(default)]
    pub output_key: Option<String>,
}

fn default_catalog_url() -> String {
    DEFAULT_CATALOG_URL.to_string()
}

fn default_dataset() -> String {
    DEFAULT_DATASET.to_string()
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

/// Array names inside the Zarr store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariableNames {
    pub value: String,
    pub time: String,
    pub lat: String,
    pub lon: String,
}

impl Default for VariableNames {
    fn default() -> Self {
        VariableNames {
            value: "zeta".to_string(),
            time: "time".to_string(),
            lat: "lat".to_string(),
            lon: "lon".to_string(),
        }
    }
}

/// How the node of interest is chosen.
///
/// ```rust
/// use cora2parquet::input::NodeSelector;
///
/// let by_index: NodeSelector = serde_json::from_str(r#"{"kind": "index", "index": 0}"#)?;
/// assert_eq!(by_index, NodeSelector::Index { index: 0 });
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeSelector {
    /// Raw mesh index
    Index { index: usize },
    /// Nearest node to a coordinate, in degrees
    Point { lat: f64, lon: f64 },
}

impl NodeSelector {
    pub fn kind(&self) -> &'static str {
        match self {
            NodeSelector::Index { .. } => "index",
            NodeSelector::Point { .. } => "point",
        }
    }
}

/// Inclusive calendar year range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    pub fn new(start: i32, end: i32) -> Self {
        YearRange { start, end }
    }
}

impl JobConfig {
    /// Job with default catalog, dataset, and variables for `node`.
    pub fn for_node(node: NodeSelector) -> Self {
        JobConfig {
            catalog_url: default_catalog_url(),
            dataset: default_dataset(),
            region: default_region(),
            variables: VariableNames::default(),
            node,
            years: None,
            window_rule: WindowRule::default(),
            output_key: None,
        }
    }

    /// Loads a job configuration from a JSON or YAML file, chosen by extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> CoraResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            CoraError::Config(format!("cannot read config file {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Self::from_json(&content),
        }
    }

    pub fn from_json(json_str: &str) -> CoraResult<Self> {
        let config: JobConfig = serde_json::from_str(json_str)
            .map_err(|e| CoraError::Config(format!("invalid JSON config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(yaml_str: &str) -> CoraResult<Self> {
        let config: JobConfig = serde_yaml::from_str(yaml_str)
            .map_err(|e| CoraError::Config(format!("invalid YAML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> CoraResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| CoraError::Config(e.to_string()))
    }

    /// Checks the parts of the job that can be checked without touching the dataset.
    pub fn validate(&self) -> CoraResult<()> {
        if let NodeSelector::Point { lat, lon } = self.node {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(CoraError::Config(format!("latitude {} outside [-90, 90]", lat)));
            }
            if !(-180.0..=360.0).contains(&lon) {
                return Err(CoraError::Config(format!("longitude {} outside [-180, 360]", lon)));
            }
        }
        if let Some(years) = self.years
            && years.start > years.end
        {
            return Err(CoraError::Config(format!(
                "start year {} is after end year {}",
                years.start, years.end
            )));
        }
        if self.catalog_url.trim().is_empty() || self.dataset.trim().is_empty() {
            return Err(CoraError::Config("catalog_url and dataset must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_json_uses_defaults() {
        let config = JobConfig::from_json(r#"{ "node": { "kind": "index", "index": 0 } }"#).unwrap();
        assert_eq!(config.catalog_url, DEFAULT_CATALOG_URL);
        assert_eq!(config.dataset, DEFAULT_DATASET);
        assert_eq!(config.region, DEFAULT_REGION);
        assert_eq!(config.variables.value, "zeta");
        assert_eq!(config.window_rule, WindowRule::FebruaryBoundary);
        assert!(config.years.is_none());
        assert!(config.output_key.is_none());
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
catalog_url: /data/catalog.yml
dataset: local-test
variables:
  value: water_level
node:
  kind: point
  lat: 29.31
  lon: -94.79
years:
  start: 2020
  end: 2021
window_rule: calendar_year
output_key: out.parquet
"#;
        let config = JobConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.dataset, "local-test");
        assert_eq!(config.variables.value, "water_level");
        assert_eq!(config.variables.time, "time");
        assert_eq!(config.node, NodeSelector::Point { lat: 29.31, lon: -94.79 });
        assert_eq!(config.years, Some(YearRange::new(2020, 2021)));
        assert_eq!(config.window_rule, WindowRule::CalendarYear);
        assert_eq!(config.output_key.as_deref(), Some("out.parquet"));
    }

    #[test]
    fn test_validation_rejects_bad_input() {
        assert!(JobConfig::from_json(r#"{ "node": { "kind": "point", "lat": 95.0, "lon": 0.0 } }"#).is_err());
        assert!(
            JobConfig::from_json(
                r#"{ "node": { "kind": "index", "index": 1 }, "years": { "start": 2022, "end": 2021 } }"#
            )
            .is_err()
        );
        assert!(JobConfig::from_json(r#"{ "node": { "kind": "nearest" } }"#).is_err());
        assert!(JobConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_from_file_by_extension() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;

        let json_path = dir.path().join("job.json");
        fs::write(&json_path, JobConfig::for_node(NodeSelector::Index { index: 7 }).to_json()?)?;
        let config = JobConfig::from_file(&json_path)?;
        assert_eq!(config.node, NodeSelector::Index { index: 7 });

        let yaml_path = dir.path().join("job.yaml");
        fs::write(&yaml_path, "node:\n  kind: index\n  index: 3\n")?;
        let config = JobConfig::from_file(&yaml_path)?;
        assert_eq!(config.node, NodeSelector::Index { index: 3 });

        assert!(JobConfig::from_file(dir.path().join("missing.json")).is_err());
        Ok(())
    }
}
