//! Media flow configuration

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use mediaflow_ice_core::TurnServerConfig;

use crate::codec::AudioCodec;

/// NAT traversal mode of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatMode {
    /// Direct addressing, no ICE processing
    None,

    /// Full trickle ICE over IPv4/IPv6
    TrickleDualstack,

    /// Respond-only ICE
    IceLite,

    /// Relay everything through TURN
    TurnOnly,
}

impl NatMode {
    /// Canonical name
    pub fn name(&self) -> &'static str {
        match self {
            NatMode::None => "none",
            NatMode::TrickleDualstack => "ice",
            NatMode::IceLite => "lite",
            NatMode::TurnOnly => "turn",
        }
    }

    /// Parse a canonical name
    pub fn resolve(name: &str) -> Option<Self> {
        match name {
            "none" => Some(NatMode::None),
            "ice" => Some(NatMode::TrickleDualstack),
            "lite" => Some(NatMode::IceLite),
            "turn" => Some(NatMode::TurnOnly),
            _ => None,
        }
    }
}

/// Enabled key-agreement mechanisms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CryptoMask {
    /// DTLS-SRTP key agreement
    pub dtls_srtp: bool,

    /// SDES key lines (accepted in the mask, rejected at negotiation)
    pub sdes: bool,
}

impl CryptoMask {
    /// DTLS-SRTP only, the common configuration
    pub fn dtls_srtp() -> Self {
        Self {
            dtls_srtp: true,
            sdes: false,
        }
    }
}

/// DTLS role preference, mirroring `a=setup`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSetup {
    /// Either role; offers carry this
    ActPass,

    /// Handshake initiator
    Active,

    /// Handshake responder
    Passive,
}

/// Media types carried in the bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// Audio stream
    Audio,

    /// Video stream
    Video,

    /// Video retransmission stream (RFC 4588)
    VideoRtx,
}

/// Configuration for one media flow
pub struct MediaFlowConfig {
    /// Local address to bind the session socket on
    pub local_addr: IpAddr,

    /// NAT traversal mode
    pub nat_mode: NatMode,

    /// Enabled crypto mechanisms
    pub cryptos: CryptoMask,

    /// Caller brings its own encoders; audio is delivered as raw RTP
    pub external_rtp: bool,

    /// Audio codecs in offer preference order
    pub audio_codecs: Vec<Arc<dyn AudioCodec>>,

    /// TURN server used when gathering requests it
    pub turn_server: Option<TurnServerConfig>,

    /// Window for ICE to nominate a pair
    pub ice_timeout: Duration,

    /// Window for the DTLS handshake
    pub dtls_timeout: Duration,
}

impl MediaFlowConfig {
    /// A flow on `local_addr` with DTLS-SRTP and the L16 test codec
    pub fn new(local_addr: IpAddr) -> Self {
        Self {
            local_addr,
            nat_mode: NatMode::TrickleDualstack,
            cryptos: CryptoMask::dtls_srtp(),
            external_rtp: false,
            audio_codecs: vec![Arc::new(crate::codec::L16Codec::default_rate())],
            turn_server: None,
            ice_timeout: Duration::from_secs(40),
            dtls_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nat_mode_names_round_trip() {
        for mode in [
            NatMode::None,
            NatMode::TrickleDualstack,
            NatMode::IceLite,
            NatMode::TurnOnly,
        ] {
            assert_eq!(NatMode::resolve(mode.name()), Some(mode));
        }
        assert_eq!(NatMode::resolve("bogus"), None);
    }
}
