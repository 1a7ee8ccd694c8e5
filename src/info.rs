//! # Dataset Information Module
//!
//! Summarizes a catalog entry without reading the value field: shape, chunk
//! layout, time span and the attributes of the value array.

use crate::catalog::open_catalog;
use crate::dataset::MeshDataset;
use crate::input::JobConfig;
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Summary of one dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub catalog_url: String,
    pub dataset: String,
    pub urlpath: String,
    pub times: usize,
    pub nodes: usize,
    pub chunk_shape: Option<Vec<u64>>,
    pub first_time: Option<NaiveDateTime>,
    pub last_time: Option<NaiveDateTime>,
    pub value_attributes: Map<String, Value>,
}

/// Opens the catalog entry named by `config` and describes it.
pub async fn get_dataset_info(config: &JobConfig) -> Result<DatasetInfo> {
    let catalog = open_catalog(&config.catalog_url, &config.region)
        .await
        .context("Failed to open intake catalog")?;
    let entry = catalog.entry(&config.dataset)?.clone();
    let (catalog_url, name) = (config.catalog_url.clone(), config.dataset.clone());
    let (variables, region) = (config.variables.clone(), config.region.clone());

    tokio::task::spawn_blocking(move || {
        let dataset = entry
            .open_dataset(&variables, &region)
            .with_context(|| format!("Failed to open dataset {}", entry.args.urlpath))?;
        describe_dataset(&dataset, &catalog_url, &name, &entry.args.urlpath)
    })
    .await
    .context("Dataset description task failed")?
}

/// Describes an already opened dataset. Reads the time coordinate only.
pub fn describe_dataset(
    dataset: &dyn MeshDataset,
    catalog_url: &str,
    name: &str,
    urlpath: &str,
) -> Result<DatasetInfo> {
    let shape = dataset.shape();
    debug!("Dataset {} has shape {:?}", name, shape);
    let axis = dataset
        .read_time_axis()
        .context("Failed to read time coordinate")?;

    Ok(DatasetInfo {
        catalog_url: catalog_url.to_string(),
        dataset: name.to_string(),
        urlpath: urlpath.to_string(),
        times: shape.times,
        nodes: shape.nodes,
        chunk_shape: shape.chunk_shape,
        first_time: axis.first(),
        last_time: axis.last(),
        value_attributes: dataset.value_attributes(),
    })
}

fn format_time(t: Option<NaiveDateTime>) -> String {
    t.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Print dataset info in human-readable format
pub fn print_dataset_info_human(info: &DatasetInfo) {
    println!("Dataset Information:");
    println!("  Catalog: {}", info.catalog_url);
    println!("  Entry: {}", info.dataset);
    println!("  Location: {}", info.urlpath);
    println!("  Shape: {} times x {} nodes", info.times, info.nodes);
    if let Some(chunks) = &info.chunk_shape {
        println!(
            "  Chunks: [{}]",
            chunks.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", ")
        );
    }
    println!(
        "  Time span: {} .. {}",
        format_time(info.first_time),
        format_time(info.last_time)
    );
    if !info.value_attributes.is_empty() {
        println!("  Value Attributes:");
        for (name, value) in &info.value_attributes {
            match value {
                Value::String(s) => println!("    @{}: {}", name, s),
                other => println!("    @{}: {}", name, other),
            }
        }
    }
}

/// Print dataset info in JSON format
pub fn print_dataset_info_json(info: &DatasetInfo) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(info)?);
    Ok(())
}

/// Print dataset info in YAML format
pub fn print_dataset_info_yaml(info: &DatasetInfo) -> Result<()> {
    let yaml = serde_yaml::to_string(info).context("Failed to serialize dataset info to YAML")?;
    println!("{}", yaml);
    Ok(())
}
