use crate::extract::ExtractedSeries;
use crate::input::{JobConfig, NodeSelector};
use std::time::Duration;

pub fn show_greeting(config_source: &str) {
    println!("=== CORA to Parquet Extractor ===");
    println!("Loading configuration from: {}", config_source);
}

pub fn config_echo(config: &JobConfig) {
    println!("\nConfiguration:");
    println!("  Catalog: {}", config.catalog_url);
    println!("  Dataset: {}", config.dataset);
    println!("  Variable: {}", config.variables.value);
    match config.node {
        NodeSelector::Index { index } => println!("  Node: index {}", index),
        NodeSelector::Point { lat, lon } => println!("  Node: nearest to ({}, {})", lat, lon),
    }
    match config.years {
        Some(years) => println!(
            "  Years: {}..={} ({:?})",
            years.start, years.end, config.window_rule
        ),
        None => println!("  Years: full record"),
    }
    if let Some(output) = &config.output_key {
        println!("  Output Parquet: {}", output);
    }
}

pub fn show_series_summary(series: &ExtractedSeries) {
    println!("\nExtracted Series:");
    println!("  Node: {}", series.node());
    println!("  Samples: {}", series.len());
    if let (Some(first), Some(last)) = (series.times().first(), series.times().last()) {
        println!("  Span: {} .. {}", first, last);
    }
}

pub fn show_farewell_with_timing(elapsed: Duration) {
    println!(
        "\n=== Extraction completed successfully in {:.2}s ===",
        elapsed.as_secs_f64()
    );
}
