use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in RTP/RTCP/SRTP/DTLS processing
#[derive(Error, Debug)]
pub enum Error {
    /// A packet failed structural validation
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// RTCP-specific parse or build failure
    #[error("RTCP error: {0}")]
    RtcpError(String),

    /// SRTP protect/unprotect failure
    #[error("SRTP error: {0}")]
    SrtpError(String),

    /// DTLS handshake or transport failure
    #[error("DTLS error: {0}")]
    DtlsError(String),

    /// The DTLS handshake did not finish within its window
    #[error("DTLS handshake timed out")]
    HandshakeTimeout,

    /// The peer certificate did not match the signalled fingerprint
    #[error("certificate fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch {
        /// Fingerprint advertised in SDP
        expected: String,
        /// Fingerprint computed from the peer certificate
        actual: String,
    },

    /// Socket-level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
