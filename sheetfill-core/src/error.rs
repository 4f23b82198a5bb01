//! Error types for sheetfill jobs

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T, E = FillError> = std::result::Result<T, E>;

/// Failures surfaced by the job runner.
///
/// `InvalidAddress`, `SheetNotFound`, `MissingParameter` and `InvalidValue` are
/// per-operation failures: the write pass logs them and moves on. The remaining
/// variants abort the whole job.
#[derive(Debug, Error)]
pub enum FillError {
    #[error("Invalid cell address format: {0}")]
    InvalidAddress(String),

    #[error("Sheet '{0}' not found")]
    SheetNotFound(String),

    #[error("Missing or empty parameter '{0}'")]
    MissingParameter(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid job description: {0}")]
    InvalidJob(#[source] serde_json::Error),

    #[error("Failed to load configuration from {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("Failed to open workbook {}", path.display())]
    WorkbookLoad {
        path: PathBuf,
        #[source]
        source: StoreError,
    },

    #[error("Failed to save workbook {}", path.display())]
    WorkbookSave {
        path: PathBuf,
        #[source]
        source: StoreError,
    },

    #[error("Workbook {} is opened read-only", path.display())]
    ReadOnly { path: PathBuf },
}

impl FillError {
    /// Whether the write pass should skip the operation instead of aborting the job
    pub fn is_operation_local(&self) -> bool {
        matches!(
            self,
            FillError::InvalidAddress(_)
                | FillError::SheetNotFound(_)
                | FillError::MissingParameter(_)
                | FillError::InvalidValue { .. }
        )
    }
}

/// Low-level failures from the workbook store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),

    #[error(transparent)]
    Calamine(#[from] calamine::Error),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Malformed package: {0}")]
    Malformed(String),
}
