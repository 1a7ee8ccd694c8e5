//! # CLI Module
//!
//! This module provides the command-line interface for cora2parquet, including:
//! - Argument parsing with clap
//! - Configuration file loading (JSON/YAML)
//! - Environment variable support with the CORA2PARQUET_ prefix
//! - Merging of CLI flags, environment, config file and defaults
//! - Parsers for the point, year range and bounding box mini-formats

use crate::error::{CoraError, CoraResult};
use crate::filters::{BoundingBoxFilter, QueryPoint};
use crate::input::{
    DEFAULT_CATALOG_URL, DEFAULT_DATASET, DEFAULT_REGION, JobConfig, NodeSelector, YearRange,
};
use crate::smoke::{DEFAULT_SMOKE_OUTPUT, SmokeTest};
use crate::time::WindowRule;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Extract water-level time series from the NOAA CORA reanalysis into Parquet
#[derive(Parser, Debug)]
#[command(name = "cora2parquet")]
#[command(about = "Extract CORA water-level time series at mesh nodes into Parquet files")]
#[command(version)]
#[command(long_about = "
cora2parquet reads the NOAA Coastal Ocean Reanalysis (CORA) straight from its
public S3 bucket and extracts the hourly water-level series of a single mesh node
into a compressed Parquet file with `time` and `val` columns.

Nodes are chosen by index or by the great-circle nearest node to a coordinate.
An optional year range restricts the series to whole years.

EXAMPLES:
  # Node nearest to Galveston, January 2022
  cora2parquet extract galveston.parquet --point 29.31,-94.79 --years 2022:2022

  # Node 0, whole record, from a config file
  cora2parquet extract --config job.yaml

  # Dataset summary
  cora2parquet info --format json

  # Nodes inside a lon/lat box
  cora2parquet nodes --bbox -95.0:-94.5:29.0:29.5

  # Connectivity check against the public bucket
  cora2parquet smoke-test

  # Generate completions
  cora2parquet completions bash > ~/.bash_completion.d/cora2parquet
")]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode - suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format for structured data
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub output_format: OutputFormat,

    /// Configuration file path (JSON or YAML)
    #[arg(short, long, global = true, env = "CORA2PARQUET_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where to find the dataset
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct DatasetArgs {
    /// Intake catalog location (local path or s3://)
    #[arg(long, env = "CORA2PARQUET_CATALOG")]
    pub catalog: Option<String>,

    /// Catalog entry name
    #[arg(long, env = "CORA2PARQUET_DATASET")]
    pub dataset: Option<String>,

    /// AWS region of the data bucket
    #[arg(long, env = "CORA2PARQUET_REGION")]
    pub region: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract the time series of one node into a Parquet file
    #[command(long_about = "
Extract the time series of one mesh node into a Parquet file.

The node is selected by index (--node) or as the nearest node to a coordinate
(--point LAT,LON). With --years START:END the series starts at Jan 1 of START.
By default it runs through Feb 1 00:00 of END; --calendar-year ends it before
Jan 1 of END+1.

EXAMPLES:
  cora2parquet extract out.parquet --node 0 --years 2022:2022
  cora2parquet extract s3://my-bucket/out.parquet --point 29.31,-94.79
  cora2parquet extract --config job.json --dry-run
")]
    Extract(ExtractArgs),

    /// Run the end-to-end check against the public bucket
    #[command(long_about = "
Open the CORA dataset from AWS, extract node 0 for January 2022, and save it
to a Parquet file. Prints TEST PASSED or FAILED with the failing stage.

The catalog, dataset and region follow --catalog/--dataset/--region, their
environment variables, then the config file, then the public CORA defaults.
")]
    SmokeTest {
        #[command(flatten)]
        source: DatasetArgs,

        /// Output Parquet file
        #[arg(short, long, default_value = DEFAULT_SMOKE_OUTPUT)]
        output: PathBuf,
    },

    /// Show shape, chunking and time span of the dataset
    Info {
        #[command(flatten)]
        source: DatasetArgs,

        /// Output format for dataset information
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// List the nodes inside a lon/lat bounding box
    Nodes {
        #[command(flatten)]
        source: DatasetArgs,

        /// Bounding box: LON_MIN:LON_MAX:LAT_MIN:LAT_MAX
        #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
        bbox: BoundingBoxFilter,
    },

    /// Find the node nearest to a coordinate
    Nearest {
        #[command(flatten)]
        source: DatasetArgs,

        /// Query point: LAT,LON
        #[arg(long, value_parser = parse_point, allow_hyphen_values = true)]
        point: QueryPoint,
    },

    /// Generate shell completions
    #[command(long_about = "
Generate shell completion scripts for bash, zsh, fish, and PowerShell.

EXAMPLES:
  cora2parquet completions bash > ~/.bash_completion.d/cora2parquet
  cora2parquet completions zsh -o _cora2parquet
")]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct ExtractArgs {
    /// Output Parquet file path (local or S3)
    #[arg(value_name = "OUTPUT", env = "CORA2PARQUET_OUTPUT")]
    pub output: Option<String>,

    /// Mesh node index
    #[arg(long, env = "CORA2PARQUET_NODE", conflicts_with = "point")]
    pub node: Option<usize>,

    /// Nearest node to LAT,LON
    #[arg(long, env = "CORA2PARQUET_POINT", value_parser = parse_point, allow_hyphen_values = true)]
    pub point: Option<QueryPoint>,

    /// Inclusive year range START:END
    #[arg(long, env = "CORA2PARQUET_YEARS", value_parser = parse_years)]
    pub years: Option<YearRange>,

    /// End the window at Jan 1 of END+1 instead of Feb 1 of END
    #[arg(long, env = "CORA2PARQUET_CALENDAR_YEAR")]
    pub calendar_year: bool,

    /// Value array name
    #[arg(short = 'n', long, env = "CORA2PARQUET_VARIABLE")]
    pub variable: Option<String>,

    #[command(flatten)]
    pub source: DatasetArgs,

    /// Dry run - resolve the configuration without touching the dataset
    #[arg(long, env = "CORA2PARQUET_DRY_RUN")]
    pub dry_run: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON structured output
    Json,
    /// YAML structured output
    Yaml,
}

/// Parse a query point: LAT,LON
pub fn parse_point(s: &str) -> Result<QueryPoint, String> {
    let (lat, lon) = s
        .split_once(',')
        .ok_or_else(|| "Point must be in format 'LAT,LON'".to_string())?;
    let lat = lat
        .trim()
        .parse::<f64>()
        .map_err(|_| "Invalid latitude value")?;
    let lon = lon
        .trim()
        .parse::<f64>()
        .map_err(|_| "Invalid longitude value")?;

    if !(-90.0..=90.0).contains(&lat) {
        return Err("Latitude must be within [-90, 90]".to_string());
    }
    if !(-180.0..=360.0).contains(&lon) {
        return Err("Longitude must be within [-180, 360]".to_string());
    }

    Ok(QueryPoint::new(lat, lon))
}

/// Parse an inclusive year range: START:END (a single YEAR is also accepted)
pub fn parse_years(s: &str) -> Result<YearRange, String> {
    let (start, end) = s.split_once(':').unwrap_or((s, s));
    let start = start
        .trim()
        .parse::<i32>()
        .map_err(|_| "Invalid start year")?;
    let end = end.trim().parse::<i32>().map_err(|_| "Invalid end year")?;

    if start > end {
        return Err("Start year must not be after end year".to_string());
    }

    Ok(YearRange::new(start, end))
}

/// Parse a bounding box: LON_MIN:LON_MAX:LAT_MIN:LAT_MAX
pub fn parse_bbox(s: &str) -> Result<BoundingBoxFilter, String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 4 {
        return Err("Bounding box must be in format 'LON_MIN:LON_MAX:LAT_MIN:LAT_MAX'".to_string());
    }

    let values = parts
        .iter()
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<Vec<f64>, _>>()
        .map_err(|_| "Invalid numeric value in bounding box")?;
    let (lon_min, lon_max, lat_min, lat_max) = (values[0], values[1], values[2], values[3]);

    if lon_min > lon_max {
        return Err("Minimum longitude must not exceed maximum longitude".to_string());
    }
    if lat_min > lat_max {
        return Err("Minimum latitude must not exceed maximum latitude".to_string());
    }

    Ok(BoundingBoxFilter::new(lon_min, lon_max, lat_min, lat_max))
}

impl DatasetArgs {
    /// Applies these overrides on top of `config`.
    pub fn apply(&self, config: &mut JobConfig) {
        if let Some(catalog) = &self.catalog {
            config.catalog_url = catalog.clone();
        }
        if let Some(dataset) = &self.dataset {
            config.dataset = dataset.clone();
        }
        if let Some(region) = &self.region {
            config.region = region.clone();
        }
    }

    /// Catalog, dataset and region with defaults filled in.
    pub fn resolve(&self, base: Option<&JobConfig>) -> (String, String, String) {
        let pick = |flag: &Option<String>, file: Option<&String>, default: &str| {
            flag.clone()
                .or_else(|| file.cloned())
                .unwrap_or_else(|| default.to_string())
        };
        (
            pick(&self.catalog, base.map(|c| &c.catalog_url), DEFAULT_CATALOG_URL),
            pick(&self.dataset, base.map(|c| &c.dataset), DEFAULT_DATASET),
            pick(&self.region, base.map(|c| &c.region), DEFAULT_REGION),
        )
    }
}

impl ExtractArgs {
    fn node_selector(&self) -> Option<NodeSelector> {
        match (self.node, self.point) {
            (Some(index), _) => Some(NodeSelector::Index { index }),
            (None, Some(p)) => Some(NodeSelector::Point { lat: p.lat, lon: p.lon }),
            (None, None) => None,
        }
    }
}

/// Builds the job for `extract`.
///
/// Priority: CLI arguments (and their environment variables) > config file > defaults.
pub fn build_job_config(base: Option<JobConfig>, args: &ExtractArgs) -> CoraResult<JobConfig> {
    let mut config = match (base, args.node_selector()) {
        (Some(mut config), Some(node)) => {
            config.node = node;
            config
        }
        (Some(config), None) => config,
        (None, Some(node)) => JobConfig::for_node(node),
        (None, None) => {
            return Err(CoraError::Config(
                "a node is required: pass --node N or --point LAT,LON, or set it in the config file"
                    .to_string(),
            ));
        }
    };

    args.source.apply(&mut config);
    if let Some(output) = &args.output {
        config.output_key = Some(output.clone());
    }
    if let Some(years) = args.years {
        config.years = Some(years);
    }
    if args.calendar_year {
        config.window_rule = WindowRule::CalendarYear;
    }
    if let Some(variable) = &args.variable {
        config.variables.value = variable.clone();
    }

    config.validate()?;
    Ok(config)
}

/// Builds the run for `smoke-test`, with the same source priority as `extract`.
pub fn build_smoke_test(base: Option<&JobConfig>, source: &DatasetArgs, output: &Path) -> SmokeTest {
    let (catalog_url, dataset, region) = source.resolve(base);
    SmokeTest {
        catalog_url,
        dataset,
        region,
        variables: base.map(|c| c.variables.clone()).unwrap_or_default(),
        output: output.to_path_buf(),
        ..SmokeTest::default()
    }
}

/// Serializes tests that read or write CORA2PARQUET_* variables
#[cfg(test)]
pub(crate) static ENV_TEST_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
