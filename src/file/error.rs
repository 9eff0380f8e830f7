use std::io;
use thiserror::Error;

use super::PageId;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("Invalid file handle: {0}")]
    InvalidHandle(usize),

    #[error("Invalid page size: expected {expected}, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("File handle limit reached")]
    TooManyOpenFiles,

    #[error("Page 0 is reserved for the file header")]
    PageZeroReserved,

    #[error("All buffer frames are pinned")]
    BufferExceeded,

    #[error("Page {0} is not pinned")]
    PageNotPinned(PageId),

    #[error("Page {0} is still pinned")]
    PagePinned(PageId),
}

pub type FileResult<T> = Result<T, FileError>;
