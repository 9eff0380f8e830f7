use thiserror::Error;

use crate::file::FileError;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Record is {actual} bytes but the file stores {expected}-byte records")]
    WrongRecordSize { expected: usize, actual: usize },

    #[error("Not a heap file: {0}")]
    NotAHeapFile(String),
}

pub type RecordResult<T> = Result<T, RecordError>;
