use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in SDP processing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A session description failed to parse
    #[error("SDP parsing error: {0}")]
    Parse(String),

    /// A well-formed description failed semantic validation
    #[error("SDP validation error: {0}")]
    Validation(String),

    /// Operation not valid in the current negotiation state
    #[error("invalid negotiation state: {0}")]
    InvalidState(String),

    /// The peer offered only crypto we do not support
    #[error("unsupported crypto: {0}")]
    UnsupportedCrypto(String),

    /// A required attribute is missing
    #[error("missing attribute: {0}")]
    MissingAttribute(String),
}
