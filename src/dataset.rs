//! # Mesh Datasets
//!
//! A [`MeshDataset`] is a lazy view of a `[time, node]` value field together
//! with its coordinate arrays. Opening one reads metadata only; data moves
//! over the wire when [`MeshDataset::read_mesh`], [`MeshDataset::read_time_axis`]
//! or [`MeshDataset::read_values`] is called.
//!
//! Two implementations are provided:
//!
//! - [`ZarrDataset`]: a Zarr store on S3 (anonymous access) or on local disk
//! - [`InMemoryDataset`]: fully materialized arrays, handy for tests and small meshes

use crate::error::{CoraError, CoraResult};
use crate::input::VariableNames;
use crate::time::{TimeAxis, TimeEncoding};
use log::debug;
use object_store::aws::AmazonS3Builder;
use object_store::prefix::PrefixStore;
use serde_json::{Map, Value};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use zarrs::array::{Array, DataType};
use zarrs::array_subset::ArraySubset;
use zarrs::storage::{ReadableStorage, ReadableStorageTraits};
use zarrs_filesystem::FilesystemStore;
use zarrs_object_store::AsyncObjectStore;
use zarrs_storage::storage_adapter::async_to_sync::{
    AsyncToSyncBlockOn, AsyncToSyncStorageAdapter,
};

/// Immutable node coordinates in degrees; a node's index is its identity
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    lat: Vec<f64>,
    lon: Vec<f64>,
}

impl Mesh {
    pub fn new(lat: Vec<f64>, lon: Vec<f64>) -> CoraResult<Self> {
        if lat.len() != lon.len() {
            return Err(CoraError::InvalidData(format!(
                "latitude has {} nodes but longitude has {}",
                lat.len(),
                lon.len()
            )));
        }
        Ok(Mesh { lat, lon })
    }

    pub fn len(&self) -> usize {
        self.lat.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lat.is_empty()
    }

    pub fn lat(&self) -> &[f64] {
        &self.lat
    }

    pub fn lon(&self) -> &[f64] {
        &self.lon
    }

    /// `(lat, lon)` of node `index`
    pub fn node(&self, index: usize) -> Option<(f64, f64)> {
        Some((*self.lat.get(index)?, *self.lon.get(index)?))
    }
}

/// Shape of the value field, known without reading any data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetShape {
    pub times: usize,
    pub nodes: usize,
    /// Chunk extent along `[time, node]`, when the backend is chunked
    pub chunk_shape: Option<Vec<u64>>,
}

/// Read-only access to a `[time, node]` value field and its coordinates
pub trait MeshDataset: Send + Sync {
    fn shape(&self) -> DatasetShape;

    /// Reads both coordinate arrays fully.
    fn read_mesh(&self) -> CoraResult<Mesh>;

    /// Reads and decodes the whole time coordinate.
    fn read_time_axis(&self) -> CoraResult<TimeAxis>;

    /// Materializes `values[time, node]` for a contiguous time range.
    fn read_values(&self, node: usize, time: Range<usize>) -> CoraResult<Vec<f64>>;

    /// Metadata attached to the value array.
    fn value_attributes(&self) -> Map<String, Value> {
        Map::new()
    }
}

fn check_slice(shape: &DatasetShape, node: usize, time: &Range<usize>) -> CoraResult<()> {
    if node >= shape.nodes {
        return Err(CoraError::NodeOutOfRange {
            index: node,
            count: shape.nodes,
        });
    }
    if time.start > time.end || time.end > shape.times {
        return Err(CoraError::InvalidWindow(format!(
            "time range {}..{} outside axis of {} samples",
            time.start, time.end, shape.times
        )));
    }
    Ok(())
}

/// Dataset held entirely in memory, values stored row-major as `[time][node]`
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    mesh: Mesh,
    axis: TimeAxis,
    values: Vec<f64>,
}

impl InMemoryDataset {
    pub fn new(mesh: Mesh, axis: TimeAxis, values: Vec<f64>) -> CoraResult<Self> {
        let expected = mesh.len() * axis.len();
        if values.len() != expected {
            return Err(CoraError::InvalidData(format!(
                "value field has {} elements, expected {} x {} = {}",
                values.len(),
                axis.len(),
                mesh.len(),
                expected
            )));
        }
        Ok(InMemoryDataset { mesh, axis, values })
    }

    /// Builds the field from a function of `(time_index, node_index)`.
    pub fn from_fn(mesh: Mesh, axis: TimeAxis, f: impl Fn(usize, usize) -> f64) -> Self {
        let nodes = mesh.len();
        let values = (0..axis.len())
            .flat_map(|t| (0..nodes).map(move |n| (t, n)))
            .map(|(t, n)| f(t, n))
            .collect();
        InMemoryDataset { mesh, axis, values }
    }
}

impl MeshDataset for InMemoryDataset {
    fn shape(&self) -> DatasetShape {
        DatasetShape {
            times: self.axis.len(),
            nodes: self.mesh.len(),
            chunk_shape: None,
        }
    }

    fn read_mesh(&self) -> CoraResult<Mesh> {
        Ok(self.mesh.clone())
    }

    fn read_time_axis(&self) -> CoraResult<TimeAxis> {
        Ok(self.axis.clone())
    }

    fn read_values(&self, node: usize, time: Range<usize>) -> CoraResult<Vec<f64>> {
        let shape = self.shape();
        check_slice(&shape, node, &time)?;
        Ok(time.map(|t| self.values[t * shape.nodes + node]).collect())
    }
}

/// Blocking executor that works from within a tokio runtime.
///
/// `block_in_place` moves the current task off the async worker thread so the
/// runtime handle can drive the future without nesting runtimes. Called directly
/// from async code this needs the multi-threaded runtime; wrap the work in
/// [`run_blocking`] to use it from any runtime flavor.
#[derive(Clone, Copy)]
pub struct TokioBlockOn;

impl AsyncToSyncBlockOn for TokioBlockOn {
    fn block_on<F: core::future::Future>(&self, future: F) -> F::Output {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
    }
}

/// Runs synchronous dataset work on tokio's blocking pool.
pub async fn run_blocking<T, F>(context: &str, work: F) -> CoraResult<T>
where
    F: FnOnce() -> CoraResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CoraError::extraction(context.to_string(), e))?
}

/// Storage type alias for anonymous S3 Zarr access (async).
pub type AsyncS3Storage = AsyncObjectStore<PrefixStore<object_store::aws::AmazonS3>>;

/// Splits `s3://bucket/prefix` into bucket and (possibly empty) key prefix.
pub fn split_s3_url(url: &str) -> CoraResult<(String, String)> {
    let rest = url
        .strip_prefix("s3://")
        .ok_or_else(|| CoraError::Config(format!("not an S3 url: {}", url)))?;
    let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        return Err(CoraError::Config(format!("missing bucket in S3 url: {}", url)));
    }
    Ok((bucket.to_string(), prefix.trim_matches('/').to_string()))
}

/// Creates an unsigned (public bucket) Zarr storage rooted at `url`.
pub fn create_anonymous_s3_storage(url: &str, region: &str) -> CoraResult<ReadableStorage> {
    let (bucket, prefix) = split_s3_url(url)?;
    let s3 = AmazonS3Builder::new()
        .with_bucket_name(&bucket)
        .with_region(region)
        .with_skip_signature(true)
        .build()
        .map_err(|e| CoraError::remote(format!("creating S3 client for bucket '{}'", bucket), e))?;

    let prefixed = PrefixStore::new(s3, prefix.as_str());
    let async_store: Arc<AsyncS3Storage> = Arc::new(AsyncObjectStore::new(prefixed));
    let sync_store = AsyncToSyncStorageAdapter::new(async_store, TokioBlockOn);

    Ok(Arc::new(sync_store))
}

type DynArray = Array<dyn ReadableStorageTraits>;

/// Zarr-backed dataset laid out the way xarray writes it: one array per variable
pub struct ZarrDataset {
    location: String,
    names: VariableNames,
    value: DynArray,
    time: DynArray,
    lat: DynArray,
    lon: DynArray,
}

impl ZarrDataset {
    /// Opens the four arrays and checks their shapes agree. Reads metadata only.
    pub fn open(storage: ReadableStorage, location: &str, names: &VariableNames) -> CoraResult<Self> {
        let open_array = |name: &str| -> CoraResult<DynArray> {
            debug!("Opening Zarr array '{}' in {}", name, location);
            Array::open(storage.clone(), &format!("/{}", name))
                .map_err(|e| CoraError::remote(format!("opening array '{}' in {}", name, location), e))
        };

        let dataset = ZarrDataset {
            location: location.to_string(),
            names: names.clone(),
            value: open_array(&names.value)?,
            time: open_array(&names.time)?,
            lat: open_array(&names.lat)?,
            lon: open_array(&names.lon)?,
        };
        dataset.validate_shapes()?;
        Ok(dataset)
    }

    pub fn open_local<P: AsRef<Path>>(path: P, names: &VariableNames) -> CoraResult<Self> {
        let location = path.as_ref().display().to_string();
        let store = FilesystemStore::new(path.as_ref())
            .map_err(|e| CoraError::remote(format!("opening Zarr directory {}", location), e))?;
        let storage: ReadableStorage = Arc::new(store);
        Self::open(storage, &location, names)
    }

    pub fn open_s3(url: &str, region: &str, names: &VariableNames) -> CoraResult<Self> {
        let storage = create_anonymous_s3_storage(url, region)?;
        Self::open(storage, url, names)
    }

    /// Dispatches on the url scheme: `s3://` or a local directory.
    pub fn open_url(url: &str, region: &str, names: &VariableNames) -> CoraResult<Self> {
        if url.starts_with("s3://") {
            Self::open_s3(url, region, names)
        } else {
            Self::open_local(url.strip_prefix("file://").unwrap_or(url), names)
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    fn validate_shapes(&self) -> CoraResult<()> {
        let value_shape = self.value.shape();
        let times = self.time.shape();
        let lat = self.lat.shape();
        let lon = self.lon.shape();

        if times.len() != 1 || lat.len() != 1 || lon.len() != 1 {
            return Err(CoraError::InvalidData(format!(
                "coordinate arrays must be one-dimensional (time {:?}, lat {:?}, lon {:?})",
                times, lat, lon
            )));
        }
        if lat[0] != lon[0] {
            return Err(CoraError::InvalidData(format!(
                "'{}' has {} nodes but '{}' has {}",
                self.names.lat, lat[0], self.names.lon, lon[0]
            )));
        }
        if value_shape != [times[0], lat[0]] {
            return Err(CoraError::InvalidData(format!(
                "'{}' has shape {:?}, expected [{}, {}] as [time, node]",
                self.names.value, value_shape, times[0], lat[0]
            )));
        }
        Ok(())
    }

    fn read_coordinate(&self, array: &DynArray, name: &str) -> CoraResult<Vec<f64>> {
        let subset = ArraySubset::new_with_shape(array.shape().to_vec());
        read_as_f64(array, &subset).map_err(|e| {
            CoraError::remote(format!("reading coordinate '{}' from {}", name, self.location), e)
        })
    }
}

impl MeshDataset for ZarrDataset {
    fn shape(&self) -> DatasetShape {
        let shape = self.value.shape();
        let origin = vec![0; shape.len()];
        let chunk_shape = self
            .value
            .chunk_shape(&origin)
            .ok()
            .map(|chunk| chunk.iter().map(|d| d.get()).collect());
        DatasetShape {
            times: shape[0] as usize,
            nodes: shape[1] as usize,
            chunk_shape,
        }
    }

    fn read_mesh(&self) -> CoraResult<Mesh> {
        let lat = self.read_coordinate(&self.lat, &self.names.lat)?;
        let lon = self.read_coordinate(&self.lon, &self.names.lon)?;
        Mesh::new(lat, lon)
    }

    fn read_time_axis(&self) -> CoraResult<TimeAxis> {
        let units = self
            .time
            .attributes()
            .get("units")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CoraError::InvalidData(format!("'{}' has no string 'units' attribute", self.names.time))
            })?;
        let encoding = TimeEncoding::parse(units)?;

        let subset = ArraySubset::new_with_shape(self.time.shape().to_vec());
        let decoded = match self.time.data_type() {
            DataType::Float32 | DataType::Float64 => read_as_f64(&self.time, &subset)
                .map_err(|e| CoraError::remote(format!("reading '{}'", self.names.time), e))?
                .into_iter()
                .map(|offset| encoding.decode_float(offset))
                .collect::<Option<Vec<_>>>(),
            _ => read_as_i64(&self.time, &subset)
                .map_err(|e| CoraError::remote(format!("reading '{}'", self.names.time), e))?
                .into_iter()
                .map(|offset| encoding.decode_integer(offset))
                .collect::<Option<Vec<_>>>(),
        };
        let times = decoded.ok_or_else(|| {
            CoraError::InvalidData(format!("'{}' holds offsets outside the calendar", self.names.time))
        })?;

        debug!("Decoded {} timestamps using '{}'", times.len(), units);
        TimeAxis::new(times)
    }

    fn read_values(&self, node: usize, time: Range<usize>) -> CoraResult<Vec<f64>> {
        check_slice(&self.shape(), node, &time)?;

        let subset = ArraySubset::new_with_ranges(&[
            time.start as u64..time.end as u64,
            node as u64..node as u64 + 1,
        ]);
        let raw = read_as_f64(&self.value, &subset).map_err(|e| {
            CoraError::extraction(
                format!(
                    "reading {}[{}..{}, {}] from {}",
                    self.names.value, time.start, time.end, node, self.location
                ),
                e,
            )
        })?;
        let masked = mask_fill_values(raw, &fill_values(&self.value));
        Ok(apply_cf_scaling(masked, self.value.attributes()))
    }

    fn value_attributes(&self) -> Map<String, Value> {
        self.value.attributes().clone()
    }
}

/// Sentinels that mark missing data: the array's own fill value plus the
/// CF `_FillValue` and `missing_value` attributes (scalar or list).
fn fill_values(array: &DynArray) -> Vec<f64> {
    let mut sentinels: Vec<f64> = array_fill_value(array).into_iter().collect();
    for key in ["_FillValue", "missing_value"] {
        match array.attributes().get(key) {
            Some(Value::Array(items)) => sentinels.extend(items.iter().filter_map(Value::as_f64)),
            Some(value) => sentinels.extend(value.as_f64()),
            None => {}
        }
    }
    sentinels.retain(|v| !v.is_nan());
    sentinels
}

fn array_fill_value(array: &DynArray) -> Option<f64> {
    let bytes = array.fill_value().as_ne_bytes();
    let value = match array.data_type() {
        DataType::Float32 => f32::from_ne_bytes(bytes.try_into().ok()?) as f64,
        DataType::Float64 => f64::from_ne_bytes(bytes.try_into().ok()?),
        DataType::Int16 => i16::from_ne_bytes(bytes.try_into().ok()?) as f64,
        DataType::Int32 => i32::from_ne_bytes(bytes.try_into().ok()?) as f64,
        DataType::UInt16 => u16::from_ne_bytes(bytes.try_into().ok()?) as f64,
        DataType::UInt32 => u32::from_ne_bytes(bytes.try_into().ok()?) as f64,
        DataType::Int64 => i64::from_ne_bytes(bytes.try_into().ok()?) as f64,
        _ => return None,
    };
    Some(value)
}

/// Replaces raw values equal to any sentinel with NaN.
fn mask_fill_values(values: Vec<f64>, sentinels: &[f64]) -> Vec<f64> {
    if sentinels.is_empty() {
        return values;
    }
    values
        .into_iter()
        .map(|v| if sentinels.contains(&v) { f64::NAN } else { v })
        .collect()
}

/// Applies CF `scale_factor` / `add_offset` when present.
fn apply_cf_scaling(values: Vec<f64>, attributes: &Map<String, Value>) -> Vec<f64> {
    let scale = attributes.get("scale_factor").and_then(Value::as_f64);
    let offset = attributes.get("add_offset").and_then(Value::as_f64);
    match (scale, offset) {
        (None, None) => values,
        (scale, offset) => {
            let (scale, offset) = (scale.unwrap_or(1.0), offset.unwrap_or(0.0));
            values.into_iter().map(|v| v * scale + offset).collect()
        }
    }
}

type ReadError = Box<dyn std::error::Error + Send + Sync>;

fn read_as_f64(array: &DynArray, subset: &ArraySubset) -> Result<Vec<f64>, ReadError> {
    fn widen<T: Into<f64>>(v: Vec<T>) -> Vec<f64> {
        v.into_iter().map(Into::into).collect()
    }

    let values = match array.data_type() {
        DataType::Float32 => widen(array.retrieve_array_subset_elements::<f32>(subset)?),
        DataType::Float64 => array.retrieve_array_subset_elements::<f64>(subset)?,
        DataType::Int16 => widen(array.retrieve_array_subset_elements::<i16>(subset)?),
        DataType::Int32 => widen(array.retrieve_array_subset_elements::<i32>(subset)?),
        DataType::UInt16 => widen(array.retrieve_array_subset_elements::<u16>(subset)?),
        DataType::UInt32 => widen(array.retrieve_array_subset_elements::<u32>(subset)?),
        DataType::Int64 => array
            .retrieve_array_subset_elements::<i64>(subset)?
            .into_iter()
            .map(|v| v as f64)
            .collect(),
        other => return Err(format!("unsupported data type {:?}", other).into()),
    };
    Ok(values)
}

fn read_as_i64(array: &DynArray, subset: &ArraySubset) -> Result<Vec<i64>, ReadError> {
    fn widen<T: Into<i64>>(v: Vec<T>) -> Vec<i64> {
        v.into_iter().map(Into::into).collect()
    }

    let values = match array.data_type() {
        DataType::Int64 => array.retrieve_array_subset_elements::<i64>(subset)?,
        DataType::Int32 => widen(array.retrieve_array_subset_elements::<i32>(subset)?),
        DataType::Int16 => widen(array.retrieve_array_subset_elements::<i16>(subset)?),
        DataType::UInt32 => widen(array.retrieve_array_subset_elements::<u32>(subset)?),
        DataType::UInt16 => widen(array.retrieve_array_subset_elements::<u16>(subset)?),
        other => return Err(format!("unsupported time data type {:?}", other).into()),
    };
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeDelta};

    fn small_dataset() -> InMemoryDataset {
        let mesh = Mesh::new(vec![0.0, 10.0, -5.0], vec![0.0, 10.0, 5.0]).unwrap();
        let start = NaiveDate::from_ymd_opt(2022, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let axis = TimeAxis::regular(start, TimeDelta::hours(1), 5).unwrap();
        InMemoryDataset::from_fn(mesh, axis, |t, n| (t * 10 + n) as f64)
    }

    #[test]
    fn test_mesh_length_mismatch() {
        assert!(matches!(
            Mesh::new(vec![0.0, 1.0], vec![0.0]),
            Err(CoraError::InvalidData(_))
        ));
    }

    #[test]
    fn test_in_memory_read_values() {
        let ds = small_dataset();
        assert_eq!(ds.shape().times, 5);
        assert_eq!(ds.shape().nodes, 3);
        assert_eq!(ds.read_values(2, 1..4).unwrap(), vec![12.0, 22.0, 32.0]);
        assert_eq!(ds.read_values(0, 0..5).unwrap().len(), 5);
    }

    #[test]
    fn test_in_memory_rejects_bad_slices() {
        let ds = small_dataset();
        assert!(matches!(
            ds.read_values(3, 0..1),
            Err(CoraError::NodeOutOfRange { index: 3, count: 3 })
        ));
        assert!(matches!(ds.read_values(0, 2..6), Err(CoraError::InvalidWindow(_))));
    }

    #[test]
    fn test_in_memory_size_check() {
        let mesh = Mesh::new(vec![0.0], vec![0.0]).unwrap();
        let axis = TimeAxis::new(vec![]).unwrap();
        assert!(InMemoryDataset::new(mesh, axis, vec![1.0]).is_err());
    }

    #[test]
    fn test_split_s3_url() {
        let (bucket, prefix) = split_s3_url("s3://noaa-nos-cora-pds/CORA_V1.1_Grid.zarr/").unwrap();
        assert_eq!(bucket, "noaa-nos-cora-pds");
        assert_eq!(prefix, "CORA_V1.1_Grid.zarr");

        let (bucket, prefix) = split_s3_url("s3://bucket").unwrap();
        assert_eq!(bucket, "bucket");
        assert_eq!(prefix, "");

        assert!(split_s3_url("https://bucket/key").is_err());
        assert!(split_s3_url("s3:///key").is_err());
    }

    #[test]
    fn test_cf_scaling() {
        let mut attrs = Map::new();
        assert_eq!(apply_cf_scaling(vec![1.0, 2.0], &attrs), vec![1.0, 2.0]);

        attrs.insert("scale_factor".to_string(), serde_json::json!(0.5));
        attrs.insert("add_offset".to_string(), serde_json::json!(1.0));
        assert_eq!(apply_cf_scaling(vec![2.0, 4.0], &attrs), vec![2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_block_on_adapter_on_current_thread_runtime() {
        let store = Arc::new(AsyncObjectStore::new(object_store::memory::InMemory::new()));
        let sync_store = AsyncToSyncStorageAdapter::new(store, TokioBlockOn);
        let key = zarrs_storage::StoreKey::new("zeta/zarr.json").unwrap();

        let value = run_blocking("reading from memory", move || {
            sync_store
                .get(&key)
                .map_err(|e| CoraError::remote("reading zeta/zarr.json", e))
        })
        .await
        .unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_run_blocking_propagates_errors() {
        let result: CoraResult<()> =
            run_blocking("failing work", || Err(CoraError::Config("bad".to_string()))).await;
        assert!(matches!(result, Err(CoraError::Config(_))));
    }

    #[test]
    fn test_mask_fill_values() {
        let masked = mask_fill_values(vec![1.0, -9999.0, 2.0, -32768.0], &[-9999.0, -32768.0]);
        assert_eq!(masked[0], 1.0);
        assert!(masked[1].is_nan());
        assert_eq!(masked[2], 2.0);
        assert!(masked[3].is_nan());

        assert_eq!(mask_fill_values(vec![0.0, 3.0], &[]), vec![0.0, 3.0]);
    }
}
