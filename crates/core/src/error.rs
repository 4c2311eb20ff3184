//! Errors raised by the I/O-free core: job validation, asset decoding
//! and configuration parsing.

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid asset encoding: {0}")]
    InvalidAssetEncoding(String),

    #[error("Invalid configuration for {var}: {message}")]
    Config { var: &'static str, message: String },
}
