use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the media session coordinator
#[derive(Error, Debug)]
pub enum Error {
    /// Bad SDP, out-of-range values, malformed candidate lines
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted before its prerequisites were satisfied
    #[error("not ready: {0}")]
    NotReady(String),

    /// ICE, DTLS or TURN ran out of time
    #[error("timeout: {0}")]
    Timeout(String),

    /// Fingerprint mismatch or rejected TURN credentials
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Malformed STUN/DTLS/RTP from the peer
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Allocation failure
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<mediaflow_sdp_core::Error> for Error {
    fn from(e: mediaflow_sdp_core::Error) -> Self {
        use mediaflow_sdp_core::Error as Sdp;
        match e {
            Sdp::Parse(m) | Sdp::Validation(m) | Sdp::MissingAttribute(m) => {
                Error::InvalidArgument(m)
            }
            Sdp::InvalidState(m) => Error::InvalidArgument(m),
            Sdp::UnsupportedCrypto(m) => Error::InvalidArgument(m),
        }
    }
}

impl From<mediaflow_ice_core::Error> for Error {
    fn from(e: mediaflow_ice_core::Error) -> Self {
        use mediaflow_ice_core::Error as Ice;
        match e {
            Ice::Timeout => Error::Timeout("ICE transaction".into()),
            Ice::CredentialsRejected(m) => Error::AuthenticationFailed(m),
            Ice::MalformedStun(m) | Ice::StunErrorResponse { reason: m, .. } => {
                Error::ProtocolError(m)
            }
            Ice::InvalidCandidate(m) => Error::InvalidArgument(m),
            Ice::InvalidState(m) => Error::NotReady(m),
            Ice::TurnFailed(m) | Ice::Tls(m) => Error::Internal(m),
            Ice::Io(e) => Error::Internal(e.to_string()),
        }
    }
}

impl From<mediaflow_rtp_core::Error> for Error {
    fn from(e: mediaflow_rtp_core::Error) -> Self {
        use mediaflow_rtp_core::Error as Rtp;
        match e {
            Rtp::FingerprintMismatch { expected, actual } => Error::AuthenticationFailed(
                format!("fingerprint mismatch: expected {expected}, got {actual}"),
            ),
            Rtp::HandshakeTimeout => Error::Timeout("DTLS handshake".into()),
            Rtp::MalformedPacket(m) | Rtp::RtcpError(m) => Error::ProtocolError(m),
            Rtp::SrtpError(m) | Rtp::DtlsError(m) => Error::ProtocolError(m),
            Rtp::Io(e) => Error::Internal(e.to_string()),
        }
    }
}

/// Reason handed to the close handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Orderly shutdown
    Normal,

    /// ICE or DTLS establishment timed out
    Timeout,

    /// Unrecoverable protocol failure
    Protocol,

    /// Fingerprint mismatch or credential rejection
    Authentication,

    /// Unexpected internal failure
    Internal,
}

impl CloseReason {
    /// Classic errno-style code for callers bridging to C conventions
    pub fn code(&self) -> i32 {
        match self {
            CloseReason::Normal => 0,
            CloseReason::Timeout => 110,       // ETIMEDOUT
            CloseReason::Protocol => 71,       // EPROTO
            CloseReason::Authentication => 80, // EAUTH
            CloseReason::Internal => 5,        // EIO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_codes() {
        assert_eq!(CloseReason::Normal.code(), 0);
        assert_eq!(CloseReason::Timeout.code(), 110);
        assert_eq!(CloseReason::Protocol.code(), 71);
        assert_eq!(CloseReason::Authentication.code(), 80);
    }

    #[test]
    fn test_ice_timeout_maps_to_timeout() {
        let e: Error = mediaflow_ice_core::Error::Timeout.into();
        assert!(matches!(e, Error::Timeout(_)));
    }

    #[test]
    fn test_sdp_state_error_maps_to_invalid_argument() {
        let e: Error = mediaflow_sdp_core::Error::InvalidState("x".into()).into();
        assert!(matches!(e, Error::InvalidArgument(_)));
    }
}
