use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use cora2parquet::cli::{
    Cli, Commands, DatasetArgs, ExtractArgs, OutputFormat, build_job_config, build_smoke_test,
};
use cora2parquet::dataset::{MeshDataset, ZarrDataset};
use cora2parquet::filters::NearestNodeFilter;
use cora2parquet::info::{
    get_dataset_info, print_dataset_info_human, print_dataset_info_json, print_dataset_info_yaml,
};
use cora2parquet::input::{JobConfig, NodeSelector};
use cora2parquet::log::{config_echo, show_farewell_with_timing, show_greeting, show_series_summary};
use cora2parquet::storage::{LocalStorage, StorageBackend, StorageFactory};
use cora2parquet::{open_dataset, process_extraction_job};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use serde::Serialize;
use std::fs::File;
use std::io::{self, Write};
use std::time::{Duration, Instant};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);
    run(cli).await
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

async fn run(cli: Cli) -> Result<()> {
    let base = cli
        .config
        .as_ref()
        .map(JobConfig::from_file)
        .transpose()
        .context("Failed to load configuration file")?;

    match &cli.command {
        Commands::Extract(args) => run_extract(&cli, base, args).await,
        Commands::SmokeTest { source, output } => {
            // Stage failures are reported on stdout, not through the exit code
            let outcome = build_smoke_test(base.as_ref(), source, output).run().await;
            debug!("Smoke test outcome: {:?}", outcome);
            Ok(())
        }
        Commands::Info { source, format } => {
            let mut job = base.unwrap_or_else(|| JobConfig::for_node(NodeSelector::Index { index: 0 }));
            source.apply(&mut job);
            let info = get_dataset_info(&job).await?;
            match format.unwrap_or(cli.output_format) {
                OutputFormat::Human => print_dataset_info_human(&info),
                OutputFormat::Json => print_dataset_info_json(&info)?,
                OutputFormat::Yaml => print_dataset_info_yaml(&info)?,
            }
            Ok(())
        }
        Commands::Nodes { source, bbox } => {
            let dataset = open_from_args(source, base.as_ref()).await?;
            let mesh = dataset.read_mesh()?;
            let nodes: Vec<NodeRow> = bbox
                .apply(&mesh)
                .into_iter()
                .filter_map(|index| {
                    mesh.node(index).map(|(lat, lon)| NodeRow {
                        index,
                        lat,
                        lon,
                        distance_km: None,
                    })
                })
                .collect();
            print_rows(&nodes, cli.output_format)
        }
        Commands::Nearest { source, point } => {
            let dataset = open_from_args(source, base.as_ref()).await?;
            let mesh = dataset.read_mesh()?;
            let nearest = NearestNodeFilter { point: *point }.apply(&mesh)?;
            let (lat, lon) = mesh
                .node(nearest.index)
                .context("Nearest node index outside the mesh")?;
            let row = NodeRow {
                index: nearest.index,
                lat,
                lon,
                distance_km: Some(nearest.distance_km),
            };
            print_rows(&[row], cli.output_format)
        }
        Commands::Completions { shell, output } => {
            let mut command = Cli::command();
            let name = command.get_name().to_string();
            match output {
                Some(path) => {
                    let mut file = File::create(path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    clap_complete::generate(*shell, &mut command, name, &mut file);
                }
                None => clap_complete::generate(*shell, &mut command, name, &mut io::stdout()),
            }
            Ok(())
        }
    }
}

async fn run_extract(cli: &Cli, base: Option<JobConfig>, args: &ExtractArgs) -> Result<()> {
    let start_time = Instant::now();
    let config = build_job_config(base, args)?;

    if !cli.quiet {
        let source = cli
            .config
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "command line".to_string());
        show_greeting(&source);
        config_echo(&config);
    }

    if args.dry_run {
        println!("\nDry run: configuration is valid.");
        println!("{}", config.to_json()?);
        return Ok(());
    }

    if let Some(output) = &config.output_key
        && StorageFactory::is_local_path(output)
        && LocalStorage.exists(output).await?
    {
        warn!("Overwriting existing file {}", output);
    }

    let spinner = if cli.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg} [{elapsed}]")?);
    spinner.set_message(format!("Extracting from {}", config.dataset));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let result = process_extraction_job(&config).await;
    spinner.finish_and_clear();

    let series = result.map_err(|e| anyhow::anyhow!("{} ({} stage)", e.report(), e.stage()))?;
    if !cli.quiet {
        show_series_summary(&series);
        show_farewell_with_timing(start_time.elapsed());
    }
    Ok(())
}

async fn open_from_args(source: &DatasetArgs, base: Option<&JobConfig>) -> Result<ZarrDataset> {
    let (catalog, dataset, region) = source.resolve(base);
    let variables = base.map(|c| c.variables.clone()).unwrap_or_default();
    open_dataset(&catalog, &dataset, &region, &variables)
        .await
        .with_context(|| format!("Failed to open {} from {}", dataset, catalog))
}

#[derive(Serialize)]
struct NodeRow {
    index: usize,
    lat: f64,
    lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    distance_km: Option<f64>,
}

fn print_rows(rows: &[NodeRow], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Human => {
            let mut out = io::stdout().lock();
            for row in rows {
                match row.distance_km {
                    Some(d) => writeln!(out, "{}\t{:.6}\t{:.6}\t{:.3} km", row.index, row.lat, row.lon, d)?,
                    None => writeln!(out, "{}\t{:.6}\t{:.6}", row.index, row.lat, row.lon)?,
                }
            }
            if rows.is_empty() {
                writeln!(out, "No nodes found")?;
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rows)?),
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(rows)?),
    }
    Ok(())
}
