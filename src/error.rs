use ndarray_linalg::error::LinalgError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CdlError {
    /// A dimension that must be even, or divisible by the codeword count, is not.
    #[error("shape mismatch: {context}")]
    Shape { context: String },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("singular system: {context}")]
    SingularSystem { context: String },

    #[error("codeword {index} has zero norm")]
    DegenerateCodeword { index: usize },

    /// A parallel encoder worker failed; the whole batch is discarded.
    #[error("encoder worker for columns {start}..{end} failed: {source}")]
    Worker {
        start: usize,
        end: usize,
        #[source]
        source: Box<CdlError>,
    },

    #[error("thread pool: {0}")]
    ThreadPool(String),

    #[error(transparent)]
    Linalg(#[from] LinalgError),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CdlError>;

impl CdlError {
    pub(crate) fn shape(context: impl Into<String>) -> Self {
        CdlError::Shape { context: context.into() }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        CdlError::Configuration(message.into())
    }
}
