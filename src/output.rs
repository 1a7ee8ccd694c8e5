//! # Parquet Output Module
//!
//! Persists an [`ExtractedSeries`] as a zstd-compressed Parquet file with two
//! columns, `time` (nanosecond datetime) and `val` (f64), and reads it back.
//!
//! Existing files are overwritten. The parent directory must already exist.
//! Destinations starting with `s3://` are written to a temporary file first and
//! then uploaded through the storage layer.

use crate::error::{CoraError, CoraResult};
use crate::extract::ExtractedSeries;
use crate::storage::{StorageBackend, StorageFactory};
use chrono::{DateTime, NaiveDateTime};
use log::debug;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;

/// Writes `series` to a local Parquet file at `path`.
///
/// # Errors
///
/// [`CoraError::Persistence`] when the file cannot be created (for example,
/// the directory does not exist) or the frame cannot be encoded.
pub fn write_series_parquet<P: AsRef<Path>>(series: &ExtractedSeries, path: P) -> CoraResult<()> {
    let path = path.as_ref();
    let display = path.display().to_string();

    let mut df = series
        .to_dataframe()
        .map_err(|e| CoraError::persistence(&display, e))?;
    debug!("DataFrame shape: {:?}", df.shape());
    debug!("First few rows:\n{}", df.head(Some(5)));

    let file = File::create(path).map_err(|e| CoraError::persistence(&display, e))?;
    ParquetWriter::new(file)
        .with_compression(ParquetCompression::Zstd(None))
        .finish(&mut df)
        .map_err(|e| CoraError::persistence(&display, e))?;

    debug!("Wrote {} rows to {}", series.len(), display);
    Ok(())
}

/// Reads a file produced by [`write_series_parquet`].
///
/// The node index is not stored in the file and must be supplied.
pub fn read_series_parquet<P: AsRef<Path>>(path: P, node: usize) -> CoraResult<ExtractedSeries> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let fail = |e: PolarsError| CoraError::persistence(&display, e);

    let file = File::open(path).map_err(|e| CoraError::persistence(&display, e))?;
    let df = ParquetReader::new(file).finish().map_err(fail)?;

    let time = df.column("time").map_err(fail)?;
    let unit = match time.dtype() {
        DataType::Datetime(unit, _) => *unit,
        other => {
            return Err(CoraError::persistence(
                &display,
                format!("'time' column has type {}, expected a datetime", other),
            ));
        }
    };
    let raw = time
        .as_materialized_series()
        .cast(&DataType::Int64)
        .map_err(fail)?;
    let values = df.column("val").map_err(fail)?.as_materialized_series().clone();

    let times = raw
        .i64()
        .map_err(fail)?
        .into_iter()
        .map(|v| v.and_then(|v| to_datetime(v, unit)))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| CoraError::persistence(&display, "null or out-of-range timestamp"))?;
    let values = values
        .f64()
        .map_err(fail)?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect();

    ExtractedSeries::new(node, times, values)
}

fn to_datetime(value: i64, unit: TimeUnit) -> Option<NaiveDateTime> {
    let utc = match unit {
        TimeUnit::Nanoseconds => DateTime::from_timestamp_nanos(value),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(value)?,
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(value)?,
    };
    Some(utc.naive_utc())
}

/// Writes `series` to a local path or an `s3://` destination.
pub async fn write_series_parquet_async(series: &ExtractedSeries, output_path: &str) -> CoraResult<()> {
    if !StorageFactory::is_s3_path(output_path) {
        return write_series_parquet(series, output_path);
    }

    let temp_file =
        tempfile::NamedTempFile::new().map_err(|e| CoraError::persistence(output_path, e))?;
    write_series_parquet(series, temp_file.path())?;

    let data = tokio::fs::read(temp_file.path())
        .await
        .map_err(|e| CoraError::persistence(output_path, e))?;
    let storage = StorageFactory::from_path(output_path)
        .await
        .map_err(|e| CoraError::persistence(output_path, e))?;
    storage
        .write(output_path, &data)
        .await
        .map_err(|e| CoraError::persistence(output_path, e))?;

    debug!("Uploaded {} bytes to {}", data.len(), output_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeDelta};
    use tempfile::TempDir;

    fn series(values: Vec<f64>) -> ExtractedSeries {
        let start = NaiveDate::from_ymd_opt(2022, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let times = (0..values.len() as i64)
            .map(|h| start + TimeDelta::hours(h))
            .collect();
        ExtractedSeries::new(0, times, values).unwrap()
    }

    #[test]
    fn test_round_trip_is_bit_exact() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("series.parquet");
        let original = series(vec![0.1, -1.234_567_890_123, 1e-300, f64::MAX, 0.0, -0.0]);

        write_series_parquet(&original, &path)?;
        let restored = read_series_parquet(&path, 0)?;

        assert_eq!(restored.times(), original.times());
        let bits = |s: &ExtractedSeries| s.values().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&restored), bits(&original));
        Ok(())
    }

    #[test]
    fn test_sub_millisecond_times_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("fine.parquet");
        let t0 = NaiveDate::from_ymd_opt(2022, 1, 1)
            .unwrap()
            .and_hms_nano_opt(0, 0, 0, 250_000)
            .unwrap();
        // Two samples inside the same millisecond
        let times = vec![t0, t0 + TimeDelta::nanoseconds(1), t0 + TimeDelta::microseconds(3)];
        let original = ExtractedSeries::new(7, times, vec![1.0, 2.0, 3.0])?;

        write_series_parquet(&original, &path)?;
        let restored = read_series_parquet(&path, 7)?;
        assert_eq!(restored, original);
        Ok(())
    }

    #[test]
    fn test_nan_survives_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("nan.parquet");
        write_series_parquet(&series(vec![1.0, f64::NAN, 3.0]), &path)?;

        let restored = read_series_parquet(&path, 0)?;
        assert!(restored.values()[1].is_nan());
        assert_eq!(restored.values()[2], 3.0);
        Ok(())
    }

    #[test]
    fn test_empty_series_writes_valid_file() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("empty.parquet");
        write_series_parquet(&series(vec![]), &path)?;
        assert!(read_series_parquet(&path, 0)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_overwrite_existing_file() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("series.parquet");
        write_series_parquet(&series(vec![1.0; 10]), &path)?;
        write_series_parquet(&series(vec![2.0; 3]), &path)?;
        assert_eq!(read_series_parquet(&path, 0)?.values(), &[2.0, 2.0, 2.0]);
        Ok(())
    }

    #[test]
    fn test_missing_directory_is_persistence_error() {
        let result = write_series_parquet(&series(vec![1.0]), "/nonexistent/dir/out.parquet");
        match result {
            Err(CoraError::Persistence { path, .. }) => assert!(path.contains("out.parquet")),
            other => panic!("expected persistence error, got {:?}", other),
        }
    }

    #[test]
    fn test_async_local_write() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("async.parquet");
        tokio_test::block_on(write_series_parquet_async(
            &series(vec![4.0, 5.0]),
            path.to_str().unwrap(),
        ))?;
        assert_eq!(read_series_parquet(&path, 0)?.len(), 2);
        Ok(())
    }
}
