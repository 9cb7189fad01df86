use thiserror::Error;

/// Error type for codec decoding.
///
/// Encoding is infallible (it writes into a growable buffer); every variant
/// here describes malformed or truncated input on the read side.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("stream ended or failed mid-value: {0}")]
    Io(#[from] std::io::Error),
    #[error("negative length prefix: {0}")]
    NegativeLength(i32),
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("boolean byte must be 0x00 or 0x01, got {0:#04x}")]
    BadBoolean(u8),
}
