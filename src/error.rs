//! Error type shared by every pipeline stage.
//!
//! Only layout, capture, compose and emit failures are fatal to a generation
//! run. Asset problems never surface here at runtime: the readiness barrier
//! turns them into per-asset outcomes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CardError {
    #[error("layout error: {0}")]
    Layout(String),

    #[error("capture error: {0}")]
    Capture(String),

    #[error("compose error: {0}")]
    Compose(String),

    #[error("emit error: {0}")]
    Emit(String),

    #[error("asset error: {0}")]
    Asset(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CardError>;
