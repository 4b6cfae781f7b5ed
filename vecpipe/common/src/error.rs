use thiserror::Error;

use crate::metric::Metric;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("Unknown index type: {0}")]
    UnknownIndexType(String),
    #[error("Metric {metric} is not supported by {index_type}")]
    UnsupportedMetric { index_type: String, metric: Metric },
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Index is not trained")]
    NotTrained,
    #[error("Refine codes out of sync: base holds {base} vectors, refine holds {refine}")]
    RefineOutOfSync { base: usize, refine: usize },
    #[error("Incompatible merge: {0}")]
    IncompatibleMerge(String),
    #[error("Id {id} is out of range (ntotal = {ntotal})")]
    IdOutOfRange { id: i64, ntotal: usize },
    #[error("Not supported: {0}")]
    NotSupported(String),
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}
