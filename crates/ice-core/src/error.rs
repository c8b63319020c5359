use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during ICE processing
#[derive(Error, Debug)]
pub enum Error {
    /// A candidate line or candidate parameter could not be parsed
    #[error("invalid candidate: {0}")]
    InvalidCandidate(String),

    /// A STUN message failed to decode
    #[error("malformed STUN message: {0}")]
    MalformedStun(String),

    /// The remote sent a STUN error response
    #[error("STUN error response: {code} {reason}")]
    StunErrorResponse {
        /// Error code (e.g. 401, 438)
        code: u16,
        /// Reason phrase from the ERROR-CODE attribute
        reason: String,
    },

    /// A STUN transaction ran out of retransmit attempts
    #[error("STUN transaction timed out")]
    Timeout,

    /// TURN allocation failed for a non-credential reason
    #[error("TURN allocation failed: {0}")]
    TurnFailed(String),

    /// The TURN server rejected the supplied credentials
    #[error("TURN credentials rejected: {0}")]
    CredentialsRejected(String),

    /// Operation invoked in a state that does not permit it
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Socket-level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS setup failure for TURN-over-TCP
    #[error("TLS error: {0}")]
    Tls(String),
}
