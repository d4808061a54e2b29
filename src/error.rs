use std::path::PathBuf;

/// Structural failure while decoding a single record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("buffer too small for {field}: need {needed} bytes, {remaining} remaining")]
    SizeMismatch {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },
    #[error("{remaining} bytes of trailing data after last field")]
    TrailingData { remaining: usize },
    #[error("invalid value {value} for {field}")]
    InvalidValue { field: &'static str, value: u8 },
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },
    #[error("{field} timestamp {timestamp} is not a UTC midnight")]
    InvalidDate { field: &'static str, timestamp: i64 },
    #[error("record key {key:?} does not match its content ({expected:?})")]
    KeyMismatch { key: String, expected: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to decode {entity} {key:?}: {source}")]
    Decode {
        entity: &'static str,
        key: String,
        #[source]
        source: CodecError,
    },
    #[error("{entity} not found: {key:?}")]
    NotFound { entity: &'static str, key: String },
    #[error("store version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("container is missing section {0:?}")]
    MissingSection(&'static str),
    #[error("malformed container metadata: {0}")]
    Metadata(String),
    #[error("{0} collection is read-only")]
    ReadOnly(&'static str),
    #[error("agency {agency:?} has unknown timezone {timezone:?}")]
    UnknownTimezone { agency: String, timezone: String },
    #[error("invalid time range: {0}")]
    InvalidTimeRange(String),
    #[error("ingest failed: {0}")]
    Ingest(String),
    #[error("store has no backing path")]
    NoBackingPath,
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid container archive: {0}")]
    Archive(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> StoreError {
        let path = path.into();
        move |source| StoreError::Io { path, source }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
