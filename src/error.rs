//! Typed errors for the upload pipeline and publisher lifecycle

use thiserror::Error;
use uuid::Uuid;

use crate::types::{GamStatus, UserRole};

/// Structural problems with an uploaded CSV file. Parsing is all-or-nothing.
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("CSV file is empty or has no data rows")]
    EmptyFile,

    #[error("Missing required headers: {}", .0.join(", "))]
    MissingHeaders(Vec<String>),

    #[error("No valid data rows found in CSV")]
    NoDataRows,

    #[error("Maximum {max} publishers per upload ({count} found). Please split your file into smaller batches.")]
    TooManyRows { count: usize, max: usize },
}

impl CsvError {
    /// Stable code reported to clients
    pub fn code(&self) -> &'static str {
        match self {
            CsvError::EmptyFile => "EMPTY_FILE",
            CsvError::MissingHeaders(_) => "MISSING_HEADERS",
            CsvError::NoDataRows => "NO_DATA_ROWS",
            CsvError::TooManyRows { .. } => "TOO_MANY_ROWS",
        }
    }
}

/// Whole-batch failures; row-level problems never surface here.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Csv(#[from] CsvError),

    #[error("Failed to load parent account mapping: {0:#}")]
    ParentAccounts(anyhow::Error),
}

/// Reasons a GAM status change is refused
#[derive(Debug, Error)]
pub enum StatusChangeError {
    #[error("Unknown GAM status '{0}'")]
    UnknownStatus(String),

    #[error("Publisher {0} not found")]
    NotFound(Uuid),

    #[error("Role {role:?} may not change status from {from:?} to {to:?}")]
    Forbidden {
        role: UserRole,
        from: GamStatus,
        to: GamStatus,
    },

    #[error("Partner does not own publisher {0}")]
    NotOwner(Uuid),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Reasons a queue request for one publisher is refused
#[derive(Debug, Error)]
pub enum QueueAccessError {
    #[error("Publisher {0} not found")]
    NotFound(Uuid),

    #[error("Partner does not own publisher {0}")]
    NotOwner(Uuid),

    #[error("{0:#}")]
    Store(#[from] anyhow::Error),
}
