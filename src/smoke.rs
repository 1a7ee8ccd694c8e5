//! # Smoke Test
//!
//! End-to-end check against the public CORA bucket: open the dataset, pull one
//! month of hourly water levels for a single node, and save it as Parquet.
//! Progress goes to stdout; a failing stage prints `FAILED.` with the cause
//! chain instead of aborting the process.

use crate::dataset::{MeshDataset, run_blocking};
use crate::error::{CoraError, Stage};
use crate::extract::extract_selection;
use crate::input::{DEFAULT_CATALOG_URL, DEFAULT_DATASET, DEFAULT_REGION, NodeSelector, VariableNames, YearRange};
use crate::output::write_series_parquet;
use crate::time::WindowRule;
use log::info;
use std::path::PathBuf;

/// Output file written by the default smoke test
pub const DEFAULT_SMOKE_OUTPUT: &str = "CORA_Jan2022_test.parquet";

/// How a smoke test run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmokeOutcome {
    Passed { samples: usize },
    Failed { stage: Stage, report: String },
}

impl SmokeOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, SmokeOutcome::Passed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct SmokeTest {
    pub catalog_url: String,
    pub dataset: String,
    pub region: String,
    pub variables: VariableNames,
    pub node: usize,
    pub year: i32,
    pub output: PathBuf,
}

impl Default for SmokeTest {
    fn default() -> Self {
        SmokeTest {
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            dataset: DEFAULT_DATASET.to_string(),
            region: DEFAULT_REGION.to_string(),
            variables: VariableNames::default(),
            node: 0,
            year: 2022,
            output: PathBuf::from(DEFAULT_SMOKE_OUTPUT),
        }
    }
}

impl SmokeTest {
    pub fn with_output(output: impl Into<PathBuf>) -> Self {
        SmokeTest {
            output: output.into(),
            ..Default::default()
        }
    }

    /// Runs all three stages and prints the verdict.
    pub async fn run(&self) -> SmokeOutcome {
        println!("Initializing CORA dataset from AWS storage...");
        let dataset = match crate::open_dataset(
            &self.catalog_url,
            &self.dataset,
            &self.region,
            &self.variables,
        )
        .await
        {
            Ok(dataset) => dataset,
            Err(e) => return fail(e),
        };

        let smoke = self.clone();
        match run_blocking("smoke test", move || Ok(smoke.load_and_save(&dataset))).await {
            Ok(outcome) => outcome,
            Err(e) => fail(e),
        }
    }

    /// Load and save stages against an already opened dataset.
    pub fn load_and_save(&self, dataset: &dyn MeshDataset) -> SmokeOutcome {
        println!("Loading hourly data from January {} into memory...", self.year);
        let series = match extract_selection(
            dataset,
            &NodeSelector::Index { index: self.node },
            Some(YearRange::new(self.year, self.year)),
            WindowRule::FebruaryBoundary,
        ) {
            Ok(series) => series,
            Err(e) => return fail(e),
        };

        println!("Saving a compressed binary version of the data to current directory...");
        if let Err(e) = write_series_parquet(&series, &self.output) {
            return fail(e);
        }

        info!("Wrote {} samples to {}", series.len(), self.output.display());
        println!("TEST PASSED");
        SmokeOutcome::Passed {
            samples: series.len(),
        }
    }
}

fn fail(error: CoraError) -> SmokeOutcome {
    let stage = error.stage();
    let report = error.report();
    println!("FAILED. {}", stage.failure_message());
    println!("  {}", report);
    SmokeOutcome::Failed { stage, report }
}

/// Runs the default smoke test, writing to `output`.
pub async fn run_smoke_test(output: impl Into<PathBuf>) -> SmokeOutcome {
    SmokeTest::with_output(output).run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{InMemoryDataset, Mesh};
    use crate::output::read_series_parquet;
    use crate::time::TimeAxis;
    use chrono::{NaiveDate, TimeDelta};

    fn january_2022() -> InMemoryDataset {
        let start = NaiveDate::from_ymd_opt(2022, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let axis = TimeAxis::regular(start, TimeDelta::hours(1), 744).unwrap();
        let mesh = Mesh::new(vec![0.0, 10.0, -5.0], vec![0.0, 10.0, 5.0]).unwrap();
        InMemoryDataset::from_fn(mesh, axis, |t, n| (t as f64).sin() + n as f64)
    }

    #[test]
    fn test_load_and_save_passes() {
        let dir = tempfile::tempdir().unwrap();
        let smoke = SmokeTest::with_output(dir.path().join(DEFAULT_SMOKE_OUTPUT));

        let outcome = smoke.load_and_save(&january_2022());
        assert_eq!(outcome, SmokeOutcome::Passed { samples: 744 });

        let saved = read_series_parquet(&smoke.output, 0).unwrap();
        assert_eq!(saved.len(), 744);
    }

    #[test]
    fn test_save_failure_reports_stage() {
        let smoke = SmokeTest::with_output("/nonexistent/dir/out.parquet");
        match smoke.load_and_save(&january_2022()) {
            SmokeOutcome::Failed { stage, report } => {
                assert_eq!(stage, Stage::Save);
                assert!(report.contains("caused by"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_load_failure_on_wrong_year() {
        let dir = tempfile::tempdir().unwrap();
        let smoke = SmokeTest {
            year: 2021,
            ..SmokeTest::with_output(dir.path().join("x.parquet"))
        };
        let outcome = smoke.load_and_save(&january_2022());
        assert!(matches!(outcome, SmokeOutcome::Failed { stage: Stage::Load, .. }));
        assert!(!smoke.output.exists());
    }

    #[tokio::test]
    async fn test_initialize_failure_on_missing_catalog() {
        let smoke = SmokeTest {
            catalog_url: "/nonexistent/catalog.yml".to_string(),
            ..SmokeTest::default()
        };
        let outcome = smoke.run().await;
        assert!(matches!(
            outcome,
            SmokeOutcome::Failed { stage: Stage::Initialize, .. }
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore] // Requires network access to the public CORA bucket
    async fn test_public_bucket_smoke() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_smoke_test(dir.path().join(DEFAULT_SMOKE_OUTPUT)).await;
        assert!(outcome.passed(), "{:?}", outcome);
    }
}
