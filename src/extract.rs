//! # Series Extraction
//!
//! Pulls the time series of a single mesh node out of a [`MeshDataset`],
//! optionally restricted to a [`TimeWindow`]. Only the `[time-range, node]`
//! slice is materialized.
//!
//! ## Key Components
//!
//! - [`ExtractedSeries`]: ordered `(timestamp, value)` pairs for one node
//! - [`extract_series`]: single-node extraction
//! - [`extract_selection`]: node selection, window resolution and extraction in one call
//! - [`extract_nodes`]: several nodes at once on the blocking thread pool

use crate::dataset::MeshDataset;
use crate::error::{CoraError, CoraResult};
use crate::filters::NearestNodeFilter;
use crate::input::{NodeSelector, YearRange};
use crate::time::{TimeAxis, TimeWindow, WindowRule, resolve_year_window};
use chrono::NaiveDateTime;
use log::{debug, info};
use polars::prelude::*;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Time series of one node; timestamps strictly increasing, one value per timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedSeries {
    node: usize,
    times: Vec<NaiveDateTime>,
    values: Vec<f64>,
}

impl ExtractedSeries {
    pub fn new(node: usize, times: Vec<NaiveDateTime>, values: Vec<f64>) -> CoraResult<Self> {
        if times.len() != values.len() {
            return Err(CoraError::InvalidData(format!(
                "series has {} timestamps but {} values",
                times.len(),
                values.len()
            )));
        }
        if times.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CoraError::InvalidData(
                "series timestamps are not strictly increasing".to_string(),
            ));
        }
        Ok(ExtractedSeries { node, times, values })
    }

    pub fn node(&self) -> usize {
        self.node
    }

    pub fn times(&self) -> &[NaiveDateTime] {
        &self.times
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// `(timestamp, value)` pairs in time order
    pub fn iter(&self) -> impl Iterator<Item = (NaiveDateTime, f64)> + '_ {
        self.times.iter().copied().zip(self.values.iter().copied())
    }

    /// Two-column frame: `time` (nanosecond datetime) and `val` (f64).
    ///
    /// Fails for timestamps outside the nanosecond range (years 1677 to 2262).
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let nanos = self
            .times
            .iter()
            .map(|t| {
                t.and_utc().timestamp_nanos_opt().ok_or_else(|| {
                    PolarsError::ComputeError(
                        format!("timestamp {} does not fit in nanoseconds", t).into(),
                    )
                })
            })
            .collect::<PolarsResult<Vec<i64>>>()?;
        let time = Series::new("time".into(), nanos)
            .cast(&DataType::Datetime(polars::prelude::TimeUnit::Nanoseconds, None))?;
        let val = Series::new("val".into(), self.values.clone());
        DataFrame::new(vec![time.into(), val.into()])
    }
}

/// Extracts the series of `node`, over `window` when given, else the whole axis.
pub fn extract_series(
    dataset: &dyn MeshDataset,
    axis: &TimeAxis,
    node: usize,
    window: Option<TimeWindow>,
) -> CoraResult<ExtractedSeries> {
    let shape = dataset.shape();
    if node >= shape.nodes {
        return Err(CoraError::NodeOutOfRange {
            index: node,
            count: shape.nodes,
        });
    }
    if axis.len() != shape.times {
        return Err(CoraError::InvalidData(format!(
            "time axis has {} samples but the value field has {}",
            axis.len(),
            shape.times
        )));
    }

    let range = match window {
        Some(window) => window.range(),
        None => 0..axis.len(),
    };
    if range.end > axis.len() {
        return Err(CoraError::InvalidWindow(format!(
            "window [{}, {}] exceeds axis of {} samples",
            range.start,
            range.end.saturating_sub(1),
            axis.len()
        )));
    }

    debug!("Materializing node {} over indices {:?}", node, range);
    let values = dataset.read_values(node, range.clone())?;
    if values.len() != range.len() {
        return Err(CoraError::extraction(
            format!("reading node {} over {:?}", node, range),
            format!("expected {} values, got {}", range.len(), values.len()),
        ));
    }

    ExtractedSeries::new(node, axis.slice(range).to_vec(), values)
}

/// Resolves a [`NodeSelector`] to a mesh index.
///
/// Index selection checks bounds against the dataset shape without reading the
/// mesh; point selection reads the coordinates and runs the nearest-node search.
pub fn resolve_node(dataset: &dyn MeshDataset, selector: &NodeSelector) -> CoraResult<usize> {
    match *selector {
        NodeSelector::Index { index } => {
            let count = dataset.shape().nodes;
            if index >= count {
                return Err(CoraError::NodeOutOfRange { index, count });
            }
            Ok(index)
        }
        NodeSelector::Point { lat, lon } => {
            let mesh = dataset.read_mesh()?;
            let nearest = NearestNodeFilter::new(lat, lon).apply(&mesh)?;
            info!(
                "Nearest node to ({}, {}) is {} at {:.3} km",
                lat, lon, nearest.index, nearest.distance_km
            );
            Ok(nearest.index)
        }
    }
}

/// Selects a node, resolves the optional year range and extracts the series.
pub fn extract_selection(
    dataset: &dyn MeshDataset,
    selector: &NodeSelector,
    years: Option<YearRange>,
    rule: WindowRule,
) -> CoraResult<ExtractedSeries> {
    let node = resolve_node(dataset, selector)?;
    let axis = dataset.read_time_axis()?;
    let window = years
        .map(|y| resolve_year_window(&axis, y.start, y.end, rule))
        .transpose()?;
    let series = extract_series(dataset, &axis, node, window)?;
    info!("Extracted {} samples for node {}", series.len(), node);
    Ok(series)
}

/// Extracts several nodes concurrently, at most `workers` at a time.
///
/// Each read runs on Tokio's blocking pool. Results come back in the order of
/// `nodes`; the first failure is returned once all started reads finish.
pub async fn extract_nodes(
    dataset: Arc<dyn MeshDataset>,
    axis: Arc<TimeAxis>,
    nodes: &[usize],
    window: Option<TimeWindow>,
    workers: usize,
) -> CoraResult<Vec<ExtractedSeries>> {
    let permits = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();

    for (slot, &node) in nodes.iter().enumerate() {
        let dataset = Arc::clone(&dataset);
        let axis = Arc::clone(&axis);
        let permits = Arc::clone(&permits);
        tasks.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| CoraError::extraction("acquiring worker slot", e))?;
            let series = tokio::task::spawn_blocking(move || {
                extract_series(dataset.as_ref(), &axis, node, window)
            })
            .await
            .map_err(|e| CoraError::extraction(format!("worker for node {}", node), e))??;
            Ok::<_, CoraError>((slot, series))
        });
    }

    let mut results: Vec<Option<ExtractedSeries>> = vec![None; nodes.len()];
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok((slot, series))) => results[slot] = Some(series),
            Ok(Err(e)) => {
                first_error.get_or_insert(e);
            }
            Err(e) => {
                first_error.get_or_insert(CoraError::extraction("extraction task", e));
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    results
        .into_iter()
        .zip(nodes)
        .map(|(series, node)| {
            series.ok_or_else(|| {
                CoraError::extraction(format!("node {}", node), "no result produced")
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{InMemoryDataset, Mesh};
    use chrono::{NaiveDate, TimeDelta};

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn dataset(hours: usize) -> (InMemoryDataset, TimeAxis) {
        let mesh = Mesh::new(vec![0.0, 10.0, -5.0], vec![0.0, 10.0, 5.0]).unwrap();
        let axis = TimeAxis::regular(start(), TimeDelta::hours(1), hours).unwrap();
        let ds = InMemoryDataset::from_fn(mesh, axis.clone(), |t, n| n as f64 * 1000.0 + t as f64);
        (ds, axis)
    }

    #[test]
    fn test_full_series_without_window() {
        let (ds, axis) = dataset(48);
        let series = extract_series(&ds, &axis, 1, None).unwrap();
        assert_eq!(series.len(), 48);
        assert_eq!(series.node(), 1);
        assert_eq!(series.values()[0], 1000.0);
        assert_eq!(series.values()[47], 1047.0);
        assert_eq!(series.times(), axis.as_slice());
    }

    #[test]
    fn test_windowed_series_length() {
        let (ds, axis) = dataset(48);
        let window = TimeWindow::new(10, 19).unwrap();
        let series = extract_series(&ds, &axis, 2, Some(window)).unwrap();
        assert_eq!(series.len(), 10);
        let pairs: Vec<_> = series.iter().collect();
        assert_eq!(pairs[0], (axis.as_slice()[10], 2010.0));
        assert_eq!(pairs[9], (axis.as_slice()[19], 2019.0));
    }

    #[test]
    fn test_single_sample_window() {
        let (ds, axis) = dataset(5);
        let series = extract_series(&ds, &axis, 0, Some(TimeWindow::new(4, 4).unwrap())).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.values(), &[4.0]);
    }

    #[test]
    fn test_out_of_range_node_and_window() {
        let (ds, axis) = dataset(5);
        assert!(matches!(
            extract_series(&ds, &axis, 3, None),
            Err(CoraError::NodeOutOfRange { index: 3, count: 3 })
        ));
        assert!(matches!(
            extract_series(&ds, &axis, 0, Some(TimeWindow::new(2, 5).unwrap())),
            Err(CoraError::InvalidWindow(_))
        ));
    }

    #[test]
    fn test_resolve_node() {
        let (ds, _) = dataset(1);
        assert_eq!(resolve_node(&ds, &NodeSelector::Index { index: 2 }).unwrap(), 2);
        assert_eq!(resolve_node(&ds, &NodeSelector::Point { lat: 9.0, lon: 9.5 }).unwrap(), 1);
        assert!(resolve_node(&ds, &NodeSelector::Index { index: 9 }).is_err());
    }

    #[test]
    fn test_extract_selection_january() {
        let (ds, _) = dataset(744);
        let series = extract_selection(
            &ds,
            &NodeSelector::Point { lat: 0.1, lon: 0.1 },
            Some(YearRange::new(2022, 2022)),
            WindowRule::FebruaryBoundary,
        )
        .unwrap();
        assert_eq!(series.node(), 0);
        assert_eq!(series.len(), 744);
        assert_eq!(series.times()[743], start() + TimeDelta::hours(743));
    }

    #[test]
    fn test_series_invariants() {
        let t = start();
        assert!(ExtractedSeries::new(0, vec![t], vec![]).is_err());
        assert!(ExtractedSeries::new(0, vec![t, t], vec![1.0, 2.0]).is_err());
        assert!(ExtractedSeries::new(0, vec![], vec![]).unwrap().is_empty());
    }

    #[test]
    fn test_to_dataframe_columns() {
        let (ds, axis) = dataset(3);
        let df = extract_series(&ds, &axis, 0, None).unwrap().to_dataframe().unwrap();
        assert_eq!(df.height(), 3);
        let names: Vec<String> = df.get_column_names().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, ["time", "val"]);
        assert!(matches!(
            df.column("time").unwrap().dtype(),
            DataType::Datetime(polars::prelude::TimeUnit::Nanoseconds, None)
        ));
    }

    #[test]
    fn test_to_dataframe_rejects_unrepresentable_time() {
        let far = NaiveDate::from_ymd_opt(2300, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let series = ExtractedSeries::new(0, vec![far], vec![1.0]).unwrap();
        assert!(series.to_dataframe().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_extract_nodes_keeps_request_order() {
        let (ds, axis) = dataset(24);
        let ds: Arc<dyn MeshDataset> = Arc::new(ds);
        let series = extract_nodes(ds, Arc::new(axis), &[2, 0, 1, 2], None, 2)
            .await
            .unwrap();
        let nodes: Vec<usize> = series.iter().map(ExtractedSeries::node).collect();
        assert_eq!(nodes, vec![2, 0, 1, 2]);
        assert_eq!(series[1].values()[5], 5.0);
    }

    #[tokio::test]
    async fn test_extract_nodes_reports_failure() {
        let (ds, axis) = dataset(24);
        let ds: Arc<dyn MeshDataset> = Arc::new(ds);
        let result = extract_nodes(ds, Arc::new(axis), &[0, 7], None, 4).await;
        assert!(matches!(result, Err(CoraError::NodeOutOfRange { index: 7, .. })));
    }
}
