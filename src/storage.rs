//! # Storage Abstraction Module
//!
//! Whole-object reads and writes against the local filesystem or Amazon S3,
//! selected from the path: `s3://bucket/key` goes to S3, anything else is local.
//!
//! The CORA bucket is public, so catalog reads use an unsigned client
//! ([`S3Storage::anonymous`]). Uploads use the default credential chain.
//!
//! ```rust,no_run
//! use cora2parquet::storage::{StorageBackend, StorageFactory};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let url = "s3://noaa-nos-cora-pds/CORA_intake.yml";
//!     let storage = StorageFactory::anonymous_from_path(url, "us-east-1").await?;
//!     let catalog = storage.read(url).await?;
//!     println!("{} bytes", catalog.len());
//!     Ok(())
//! }
//! ```

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::Region;
use thiserror::Error;
use tokio::fs;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("AWS S3 GetObject error: {0}")]
    S3GetObject(#[from] aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::get_object::GetObjectError>),

    #[error("AWS S3 PutObject error: {0}")]
    S3PutObject(#[from] aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::put_object::PutObjectError>),

    #[error("AWS S3 HeadObject error: {0}")]
    S3HeadObject(#[from] aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::head_object::HeadObjectError>),

    #[error("AWS ByteStream error: {0}")]
    ByteStream(String),

    #[error("Invalid S3 path format: {0}")]
    InvalidS3Path(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Unified interface over local and S3 objects
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Reads the entire contents of an object
    async fn read(&self, path: &str) -> StorageResult<Vec<u8>>;

    /// Writes an object, replacing any existing one
    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()>;

    async fn exists(&self, path: &str) -> StorageResult<bool>;

    async fn read_to_string(&self, path: &str) -> StorageResult<String> {
        let bytes = self.read(path).await?;
        String::from_utf8(bytes).map_err(|e| {
            StorageError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }
}

/// Local filesystem storage backend
#[derive(Debug, Clone)]
pub struct LocalStorage;

fn map_local_error(path: &str, e: std::io::Error) -> StorageError {
    match e.kind() {
        std::io::ErrorKind::NotFound => StorageError::PathNotFound(path.to_string()),
        std::io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(path.to_string()),
        _ => StorageError::Io(e),
    }
}

#[async_trait::async_trait]
impl StorageBackend for LocalStorage {
    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        fs::read(path).await.map_err(|e| map_local_error(path, e))
    }

    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        // Parent directories are not created; a missing directory is an error
        fs::write(path, data).await.map_err(|e| map_local_error(path, e))
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        match fs::metadata(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

/// Amazon S3 storage backend
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: S3Client,
}

impl S3Storage {
    /// Client using the default AWS credential chain
    pub async fn new() -> StorageResult<Self> {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Ok(S3Storage {
            client: S3Client::new(&config),
        })
    }

    /// Unsigned client for public buckets such as `noaa-nos-cora-pds`
    pub async fn anonymous(region: &str) -> StorageResult<Self> {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .no_credentials()
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Ok(S3Storage {
            client: S3Client::new(&config),
        })
    }

    /// Parses `s3://bucket/key` into bucket and key
    pub(crate) fn parse_s3_path(s3_path: &str) -> StorageResult<(String, String)> {
        let rest = s3_path.strip_prefix("s3://").ok_or_else(|| {
            StorageError::InvalidS3Path(format!("S3 path must start with 's3://': {}", s3_path))
        })?;

        match rest.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                Ok((bucket.to_string(), key.to_string()))
            }
            _ => Err(StorageError::InvalidS3Path(format!(
                "Invalid S3 path format. Expected 's3://bucket/key': {}",
                s3_path
            ))),
        }
    }
}

#[async_trait::async_trait]
impl StorageBackend for S3Storage {
    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        let (bucket, key) = Self::parse_s3_path(path)?;

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match &e {
                aws_sdk_s3::error::SdkError::ServiceError(service_err)
                    if service_err.err().is_no_such_key() =>
                {
                    StorageError::PathNotFound(path.to_string())
                }
                _ => StorageError::S3GetObject(e),
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::ByteStream(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(data)
    }

    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        let (bucket, key) = Self::parse_s3_path(path)?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(aws_sdk_s3::primitives::ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(StorageError::S3PutObject)?;

        Ok(())
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        let (bucket, key) = Self::parse_s3_path(path)?;

        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(aws_sdk_s3::error::SdkError::ServiceError(service_err))
                if service_err.err().is_not_found() =>
            {
                Ok(false)
            }
            Err(e) => Err(StorageError::S3HeadObject(e)),
        }
    }
}

/// Storage backend selected from a path
#[derive(Debug)]
pub enum Storage {
    Local(LocalStorage),
    S3(S3Storage),
}

#[async_trait::async_trait]
impl StorageBackend for Storage {
    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        match self {
            Storage::Local(storage) => storage.read(path).await,
            Storage::S3(storage) => storage.read(path).await,
        }
    }

    async fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        match self {
            Storage::Local(storage) => storage.write(path, data).await,
            Storage::S3(storage) => storage.write(path, data).await,
        }
    }

    async fn exists(&self, path: &str) -> StorageResult<bool> {
        match self {
            Storage::Local(storage) => storage.exists(path).await,
            Storage::S3(storage) => storage.exists(path).await,
        }
    }
}

/// Picks a backend from the path pattern
pub struct StorageFactory;

impl StorageFactory {
    /// Credentialed S3 for `s3://` paths, local otherwise
    pub async fn from_path(path: &str) -> StorageResult<Storage> {
        if Self::is_s3_path(path) {
            Ok(Storage::S3(S3Storage::new().await?))
        } else {
            Ok(Storage::Local(LocalStorage))
        }
    }

    /// Unsigned S3 for `s3://` paths, local otherwise
    pub async fn anonymous_from_path(path: &str, region: &str) -> StorageResult<Storage> {
        if Self::is_s3_path(path) {
            Ok(Storage::S3(S3Storage::anonymous(region).await?))
        } else {
            Ok(Storage::Local(LocalStorage))
        }
    }

    pub fn is_s3_path(path: &str) -> bool {
        path.starts_with("s3://")
    }

    pub fn is_local_path(path: &str) -> bool {
        !Self::is_s3_path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_storage_write_read() -> Result<(), Box<dyn std::error::Error>> {
        let storage = LocalStorage;
        let temp_dir = TempDir::new()?;
        let file_path = temp_dir.path().join("catalog.yml");
        let file_path_str = file_path.to_str().unwrap();

        storage.write(file_path_str, b"sources: {}\n").await?;
        assert_eq!(storage.read_to_string(file_path_str).await?, "sources: {}\n");
        assert!(storage.exists(file_path_str).await?);

        // Overwrite replaces the previous contents
        storage.write(file_path_str, b"x").await?;
        assert_eq!(storage.read(file_path_str).await?, b"x");

        Ok(())
    }

    #[tokio::test]
    async fn test_local_storage_not_found() -> Result<(), Box<dyn std::error::Error>> {
        let storage = LocalStorage;

        let result = storage.read("/nonexistent/path/catalog.yml").await;
        assert!(matches!(result, Err(StorageError::PathNotFound(_))));
        assert!(!storage.exists("/nonexistent/path/catalog.yml").await?);

        let result = storage.write("/nonexistent/dir/out.parquet", b"data").await;
        assert!(result.is_err());

        Ok(())
    }

    #[test]
    fn test_s3_path_parsing() {
        let (bucket, key) = S3Storage::parse_s3_path("s3://noaa-nos-cora-pds/CORA_intake.yml").unwrap();
        assert_eq!(bucket, "noaa-nos-cora-pds");
        assert_eq!(key, "CORA_intake.yml");

        assert!(S3Storage::parse_s3_path("http://bucket/file.yml").is_err());
        assert!(S3Storage::parse_s3_path("s3://").is_err());
        assert!(S3Storage::parse_s3_path("s3://bucket").is_err());
        assert!(S3Storage::parse_s3_path("s3:///file.yml").is_err());
    }

    #[tokio::test]
    async fn test_storage_factory_path_detection() -> Result<(), Box<dyn std::error::Error>> {
        assert!(StorageFactory::is_s3_path("s3://my-bucket/file.yml"));
        assert!(!StorageFactory::is_s3_path("relative/path/file.yml"));
        assert!(StorageFactory::is_local_path("/local/path/file.yml"));

        let local = StorageFactory::from_path("/local/path/out.parquet").await?;
        assert!(matches!(local, Storage::Local(_)));

        let local = StorageFactory::anonymous_from_path("catalog.yml", "us-east-1").await?;
        assert!(matches!(local, Storage::Local(_)));

        Ok(())
    }
}
