//! SDP session descriptions and offer/answer negotiation
//!
//! Parses and serializes RFC 4566 session descriptions with the
//! attributes a bundled DTLS-SRTP session needs (`ice-ufrag`/`ice-pwd`,
//! `fingerprint`, `setup`, `ssrc`, `candidate`, `end-of-candidates`,
//! `group:BUNDLE`), and drives the offer/answer state machine including
//! payload type assignment from the bundle-safe dynamic ranges (audio
//! 96-99, video 100-110).

pub mod error;
pub mod negotiator;
pub mod parser;
pub mod types;

pub use error::{Error, Result};
pub use negotiator::{
    CodecSpec, LocalParams, RemoteParams, SdpNegotiator, SdpState, PT_AUDIO_END, PT_AUDIO_START,
    PT_VIDEO_END, PT_VIDEO_START,
};
pub use parser::parse_session_description;
pub use types::{
    Fingerprint, MediaDescription, MediaKind, Origin, RtpMap, SdpSetup, SessionDescription,
    SsrcAttribute,
};
