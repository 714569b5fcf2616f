// ============================================================
// Layer 3 — Error Types
// ============================================================
// Every fallible library operation returns `domain::error::Result`.
// The application and CLI layers wrap these in anyhow with context.

use thiserror::Error;

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, CtcError>;

/// Errors raised by the CTC adapter and its data pipeline
#[derive(Error, Debug)]
pub enum CtcError {
    /// Invalid decode parameters or node layout, detected at compile time
    #[error("Config error: {0}")]
    Config(String),

    /// An operation that needs the compiled heads ran before `compile`
    #[error("Model not compiled: call compile() before {0}")]
    NotCompiled(&'static str),

    /// A batch does not match the shape contract
    #[error("Batch shape error: {0}")]
    BatchShape(String),

    /// The generator ended before the requested number of batches
    #[error("Generator exhausted after {0} batches")]
    GeneratorExhausted(usize),

    /// A producer failed or the prefetch queue broke down
    #[error("Generator error: {0}")]
    Generator(String),

    /// Reading or writing model weights failed
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Tensor data could not be read back to the host
    #[error("Tensor data error: {0}")]
    TensorData(String),

    /// A transcription contains a character missing from the charset
    #[error("Unknown character {0:?} in transcription")]
    UnknownCharacter(char),

    /// I/O error during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error (datasets, config files)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
