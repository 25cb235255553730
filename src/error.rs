//! Application-wide error types.

use thiserror::Error;

use crate::pipeline::PipelineError;
use crate::ragflow::RagFlowError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("backend error: {0}")]
    Backend(#[from] RagFlowError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
