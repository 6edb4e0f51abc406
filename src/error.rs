//! Error types for wvcdm.

use thiserror::Error;

/// Main error type for wvcdm operations.
///
/// Every variant is terminal for the session that produced it. A retry means
/// building a new session and repeating the handshake.
#[derive(Debug, Error)]
pub enum Error {
    /// Init data, certificate or license response could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The private key is not an RSA key in a supported PEM encoding.
    #[error("Unsupported private key format: {0}")]
    KeyFormat(String),

    /// The session key or a content key could not be decrypted.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// The license signature did not match.
    #[error("Signature mismatch: {0}")]
    SignatureMismatch(String),

    /// The session is not in a state that allows the operation.
    #[error("Protocol state error: {0}")]
    ProtocolState(String),

    /// Invalid WVD file.
    #[error("Invalid WVD file: {0}")]
    InvalidWvdFile(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// RSA error.
    #[error("RSA error: {0}")]
    RsaError(#[from] rsa::Error),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64DecodeError(#[from] base64::DecodeError),

    /// YAML error.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias for wvcdm operations.
pub type Result<T> = std::result::Result<T, Error>;
