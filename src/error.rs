//! # Error Types
//!
//! Every fallible operation in the crate returns [`CoraError`]. Each variant
//! keeps its underlying cause so the driver can report the stage that failed
//! together with the full cause chain.

use chrono::NaiveDateTime;
use std::fmt;
use thiserror::Error;

/// Boxed cause carried by the I/O-flavoured variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type used throughout the crate
pub type CoraResult<T> = Result<T, CoraError>;

/// Errors raised while opening, extracting from, or persisting the dataset
#[derive(Error, Debug)]
pub enum CoraError {
    /// Catalog or dataset metadata could not be fetched
    #[error("remote access failed: {context}")]
    RemoteAccess {
        context: String,
        #[source]
        source: BoxError,
    },

    /// An exact timestamp is missing from the time axis
    #[error("no timestamp equal to {timestamp} in the time axis")]
    Lookup { timestamp: NaiveDateTime },

    /// Nearest-node search produced no candidate
    #[error("node lookup failed: {0}")]
    NodeLookup(String),

    #[error("node index {index} out of range for mesh of {count} nodes")]
    NodeOutOfRange { index: usize, count: usize },

    #[error("invalid time window: {0}")]
    InvalidWindow(String),

    /// Coordinate arrays or time axis violate their invariants
    #[error("invalid dataset contents: {0}")]
    InvalidData(String),

    /// Reading a slice of the value field failed
    #[error("extraction failed: {context}")]
    ExtractionIo {
        context: String,
        #[source]
        source: BoxError,
    },

    #[error("could not persist series to '{path}'")]
    Persistence {
        path: String,
        #[source]
        source: BoxError,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl CoraError {
    pub fn remote(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        CoraError::RemoteAccess {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn extraction(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        CoraError::ExtractionIo {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn persistence(path: impl Into<String>, source: impl Into<BoxError>) -> Self {
        CoraError::Persistence {
            path: path.into(),
            source: source.into(),
        }
    }

    /// The pipeline stage this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            CoraError::RemoteAccess { .. } => Stage::Initialize,
            CoraError::Lookup { .. }
            | CoraError::NodeLookup(_)
            | CoraError::NodeOutOfRange { .. }
            | CoraError::InvalidWindow(_)
            | CoraError::InvalidData(_)
            | CoraError::ExtractionIo { .. } => Stage::Load,
            CoraError::Persistence { .. } => Stage::Save,
            CoraError::Config(_) => Stage::Configure,
        }
    }

    /// Renders the error and every nested source, one per line.
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str(&format!("\n  caused by: {}", cause));
            source = cause.source();
        }
        out
    }
}

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configure,
    Initialize,
    Load,
    Save,
}

impl Stage {
    /// Human-readable summary printed after `FAILED.`
    pub fn failure_message(&self) -> &'static str {
        match self {
            Stage::Configure => "Something went wrong reading the job configuration.",
            Stage::Initialize => "Something went wrong initializing the data from AWS storage.",
            Stage::Load => "Something went wrong loading the dataset into memory.",
            Stage::Save => {
                "Something went wrong saving the dataset locally in compressed binary (parquet) format."
            }
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Configure => "configure",
            Stage::Initialize => "initialize",
            Stage::Load => "load",
            Stage::Save => "save",
        };
        write!(f, "{}", name)
    }
}
