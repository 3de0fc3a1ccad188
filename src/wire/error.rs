use thiserror::Error;

/// Reasons a datagram could not be decoded.
///
/// Every variant is recoverable: receive loops log the error, drop the frame and continue.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("frame is not valid UTF-8")]
    NotText,

    #[error("unknown frame type '{0}'")]
    UnknownFrame(String),

    #[error("missing field '{field}' in {frame} frame")]
    MissingField {
        frame: &'static str,
        field: &'static str,
    },

    #[error("invalid value '{value}' for field '{field}'")]
    InvalidField { field: &'static str, value: String },

    #[error("frame truncated: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("invalid role flag {0}")]
    InvalidRole(u8),

    #[error("{len} bytes is not a multiple of the {record_size}-byte record size")]
    Misaligned { len: usize, record_size: usize },
}
