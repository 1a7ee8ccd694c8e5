//! # Intake Catalog
//!
//! Reads an intake-style YAML catalog and resolves a named entry to a
//! [`ZarrDataset`]. Only the parts of the catalog format needed to locate a
//! Zarr store are modelled:
//!
//! ```yaml
//! sources:
//!   CORA-V1-500m-grid-1979-2022:
//!     description: CORA 500 m grid
//!     driver: zarr
//!     args:
//!       urlpath: s3://noaa-nos-cora-pds/CORA_V1.1_Grid.zarr
//!       storage_options:
//!         anon: true
//! ```

use crate::dataset::ZarrDataset;
use crate::error::{CoraError, CoraResult};
use crate::input::VariableNames;
use crate::storage::{StorageBackend, StorageFactory};
use log::{debug, info};
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;

/// Parsed catalog document
#[derive(Debug, Clone, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub sources: BTreeMap<String, CatalogEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    #[serde(default)]
    pub description: Option<String>,
    pub driver: String,
    pub args: EntryArgs,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntryArgs {
    pub urlpath: String,
    #[serde(default)]
    pub storage_options: BTreeMap<String, Value>,
}

impl Catalog {
    pub fn from_yaml(text: &str) -> CoraResult<Self> {
        serde_yaml::from_str(text).map_err(|e| CoraError::remote("parsing intake catalog", e))
    }

    /// Looks up an entry by name.
    pub fn entry(&self, name: &str) -> CoraResult<&CatalogEntry> {
        self.sources.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.sources.keys().map(String::as_str).collect();
            CoraError::remote(
                format!("catalog entry '{}' not found", name),
                format!("available entries: {}", known.join(", ")),
            )
        })
    }

    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }
}

impl CatalogEntry {
    pub fn is_zarr(&self) -> bool {
        self.driver.eq_ignore_ascii_case("zarr") || self.driver.ends_with(".zarr")
    }

    /// Opens the Zarr store this entry points at. Reads metadata only.
    pub fn open_dataset(&self, names: &VariableNames, region: &str) -> CoraResult<ZarrDataset> {
        if !self.is_zarr() {
            return Err(CoraError::remote(
                format!("unsupported catalog driver '{}'", self.driver),
                "only zarr sources can be opened",
            ));
        }
        debug!("Opening {} ({})", self.args.urlpath, self.driver);
        ZarrDataset::open_url(&self.args.urlpath, region, names)
    }
}

/// Fetches and parses the catalog at `url` (`s3://` anonymously, or a local path).
pub async fn open_catalog(url: &str, region: &str) -> CoraResult<Catalog> {
    info!("Reading intake catalog {}", url);
    let storage = StorageFactory::anonymous_from_path(url, region)
        .await
        .map_err(|e| CoraError::remote(format!("connecting to {}", url), e))?;
    let text = storage
        .read_to_string(url)
        .await
        .map_err(|e| CoraError::remote(format!("reading catalog {}", url), e))?;
    Catalog::from_yaml(&text)
}
