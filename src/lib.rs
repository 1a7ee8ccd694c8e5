//! # cora2parquet
//!
//! A Rust library for pulling single-node time series out of the NOAA Coastal
//! Ocean Reanalysis (CORA) and saving them as Parquet.
//!
//! ## Features
//!
//! - **Remote access**: reads the public intake catalog and Zarr store on S3 without credentials
//! - **Node selection**: by mesh index or by great-circle nearest node to a coordinate
//! - **Year windows**: whole-year ranges resolved to exact indices on the time axis
//! - **Lazy reads**: only the `[time-range, node]` slice of the value field is fetched
//! - **Parquet output**: zstd-compressed `time` / `val` columns, local or S3
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cora2parquet::{process_extraction_job, input::JobConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = JobConfig::from_file("job.yaml")?;
//! let series = process_extraction_job(&config).await?;
//! println!("{} samples", series.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Example
//!
//! ```yaml
//! node:
//!   kind: point
//!   lat: 29.31
//!   lon: -94.79
//! years:
//!   start: 2022
//!   end: 2022
//! output_key: galveston_jan2022.parquet
//! ```

pub mod catalog;
pub mod cli;
pub mod dataset;
pub mod error;
pub mod extract;
pub mod filters;
pub mod info;
pub mod input;
pub mod log;
pub mod output;
pub mod smoke;
pub mod storage;
pub mod time;


use crate::catalog::open_catalog;
use crate::dataset::{MeshDataset, ZarrDataset, run_blocking};
use crate::error::CoraResult;
use crate::extract::{ExtractedSeries, extract_selection};
use crate::input::{JobConfig, VariableNames};
use crate::output::write_series_parquet_async;

/// Opens catalog entry `dataset` from the catalog at `catalog_url`. Reads metadata only.
///
/// Reading from the returned S3 dataset inside async code needs the
/// multi-threaded runtime, or a [`run_blocking`] wrapper.
pub async fn open_dataset(
    catalog_url: &str,
    dataset: &str,
    region: &str,
    variables: &VariableNames,
) -> CoraResult<ZarrDataset> {
    let catalog = open_catalog(catalog_url, region).await?;
    let entry = catalog.entry(dataset)?.clone();
    let (variables, region) = (variables.clone(), region.to_string());
    run_blocking("opening dataset", move || entry.open_dataset(&variables, &region)).await
}

/// Runs the extraction described by `config`.
///
/// This function orchestrates the whole pipeline:
/// 1. Reads the intake catalog and opens the Zarr store of the named entry
/// 2. Resolves the node (index or nearest to a point)
/// 3. Resolves the optional year range to a time window
/// 4. Materializes the node's series over that window
/// 5. Writes it to `output_key` when one is configured
///
/// Steps 2 to 4 run on the blocking pool, so any tokio runtime flavor works.
///
/// # Errors
///
/// Every failure is a [`error::CoraError`]; its [`stage`](error::CoraError::stage)
/// tells which of the steps above went wrong.
pub async fn process_extraction_job(config: &JobConfig) -> CoraResult<ExtractedSeries> {
    config.validate()?;
    let dataset = open_dataset(
        &config.catalog_url,
        &config.dataset,
        &config.region,
        &config.variables,
    )
    .await?;

    let job = config.clone();
    let series = run_blocking("extracting series", move || {
        extract_selection(&dataset, &job.node, job.years, job.window_rule)
    })
    .await?;
    if let Some(output) = &config.output_key {
        write_series_parquet_async(&series, output).await?;
    }
    Ok(series)
}

/// Steps 2 to 5 of [`process_extraction_job`] against an already opened dataset.
///
/// The reads happen on the calling task. For a remote [`ZarrDataset`] that
/// requires the multi-threaded tokio runtime.
pub async fn extract_and_save(
    dataset: &dyn MeshDataset,
    config: &JobConfig,
) -> CoraResult<ExtractedSeries> {
    let series = extract_selection(dataset, &config.node, config.years, config.window_rule)?;
    if let Some(output) = &config.output_key {
        write_series_parquet_async(&series, output).await?;
    }
    Ok(series)
}
