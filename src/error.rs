use nom::error::{ErrorKind, ParseError};
use std::io;
use thiserror::Error;

/// Errors raised while opening, reading or scanning a capture
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The capture could not be opened or read
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The first four bytes are not a known capture magic number
    #[error("capture header not recognized (magic {0:#010x})")]
    HeaderNotRecognized(u32),

    /// The input ended before the global header was complete
    #[error("capture header truncated: {needed} more bytes required")]
    HeaderTruncated { needed: usize },

    /// A pcapng block declares an impossible length
    #[error("malformed capture block (type {block_type:#x}, length {block_len})")]
    MalformedBlock { block_type: u32, block_len: u32 },

    /// The background analysis thread terminated abnormally
    #[error("analysis worker panicked")]
    WorkerPanicked,

    #[error("parser error: {0:?}")]
    NomError(ErrorKind),
}

impl<I> ParseError<I> for CaptureError {
    fn from_error_kind(_input: I, kind: ErrorKind) -> Self {
        CaptureError::NomError(kind)
    }
    fn append(_input: I, kind: ErrorKind, _other: Self) -> Self {
        CaptureError::NomError(kind)
    }
}

/// Errors raised while writing an analysis result
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV serialization failed: {0}")]
    Csv(#[from] csv::Error),
}
