use thiserror::Error;

use crate::file::FileError;
use crate::record::RecordError;

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors that can occur during index operations
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Index metadata mismatch: {0}")]
    BadIndexInfo(String),

    #[error("Scan operators must be GT/GTE for the low bound and LT/LTE for the high bound")]
    BadOpcodes,

    #[error("Invalid scan range: low {low} > high {high}")]
    BadScanrange { low: i32, high: i32 },

    #[error("No key in the index satisfies the scan range")]
    NoSuchKeyFound,

    #[error("The scan has returned every matching entry")]
    IndexScanCompleted,

    #[error("No scan is currently executing")]
    ScanNotInitialized,
}
