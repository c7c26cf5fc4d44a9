//! Error taxonomy for the service.
//!
//! Two tiers only: anything raised on the load path (fetch, model,
//! tokenizer, session) aborts startup; anything raised on the answer
//! path is reported for that request and the server keeps serving.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SquadronError {
    /// Input rejected before any model work was attempted.
    #[error("validation error: {0}")]
    Validation(String),

    /// Artifact download failed (network, HTTP status, truncated body).
    #[error("fetch error: {0}")]
    Fetch(String),

    /// The fetched artifacts do not describe a usable QA model.
    #[error("model error: {0}")]
    Model(String),

    /// Tokenizer could not be loaded or refused the input.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// ONNX Runtime failure during init, session build, or run.
    #[error("onnx runtime error: {0}")]
    Onnx(#[from] ort::Error),

    /// The model ran but produced a result we could not interpret.
    #[error("inference error: {0}")]
    Inference(String),

    /// A single request exceeded the configured time budget.
    #[error("inference timed out after {0}s")]
    Timeout(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SquadronError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn tokenizer(msg: impl Into<String>) -> Self {
        Self::Tokenizer(msg.into())
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }
}
