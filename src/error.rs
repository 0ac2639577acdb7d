/// Errors produced by the engine.
///
/// Construction and validation failures are never recoverable; shape and
/// parse failures abort the single operation that triggered them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("index ({row}, {col}) out of range for {rows}x{cols} matrix")]
    OutOfRange {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("invalid architecture: {0}")]
    InvalidArchitecture(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        Error::DimensionMismatch(msg.into())
    }

    pub(crate) fn architecture(msg: impl Into<String>) -> Self {
        Error::InvalidArchitecture(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::InvalidConfiguration(msg.into())
    }

    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }
}
