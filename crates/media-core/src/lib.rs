//! Media session coordinator
//!
//! One [`MediaFlow`] establishes and drives a single peer-to-peer
//! audio/video flow: ICE connectivity, DTLS-SRTP key agreement, SDP
//! offer/answer and the RTP/RTCP media path, all multiplexed over one
//! UDP socket. The audio routing side of a calling client lives in
//! `mediaflow-audio-core`.
//!
//! # Establishment order
//!
//! 1. `allocate` binds the socket, generates the DTLS certificate and
//!    the ICE credentials
//! 2. `add_local_host_candidate` + `start_gather`/`gather_stun`/
//!    `gather_turn` discover candidates
//! 3. The SDP offer/answer exchange carries candidates, credentials and
//!    fingerprints (`generate_offer`, `handle_offer`, `generate_answer`,
//!    `handle_answer`)
//! 4. `start_ice` runs connectivity checks; nomination triggers the DTLS
//!    handshake; the exporter installs SRTP keys
//! 5. `start_media` opens the media path; `send_audio` / the audio
//!    handler carry PCM
//!
//! # Example
//!
//! ```rust,no_run
//! use mediaflow_media_core::{MediaFlow, MediaFlowConfig, MediaFlowHandlers};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MediaFlowConfig::new("0.0.0.0".parse()?);
//! let flow = MediaFlow::allocate(config, MediaFlowHandlers::default()).await?;
//!
//! let offer = flow.generate_offer()?;
//! // ... signal `offer`, apply the answer, then:
//! // flow.start_ice().await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod flow;
pub mod stats;

pub use codec::{AudioCodec, L16Codec};
pub use config::{CryptoMask, MediaFlowConfig, MediaSetup, MediaType, NatMode};
pub use error::{CloseReason, Error, Result};
pub use flow::{
    AudioHandler, CloseHandler, EstablishedHandler, LocalCandidateHandler, MediaFlow,
    MediaFlowHandlers, RtcpHandler, RtpHandler,
};
pub use stats::{MediaStats, STAT_ERROR, STAT_INIT};

// Re-export the types that appear on the public surface
pub use mediaflow_ice_core::IceCandidate;
pub use mediaflow_sdp_core::{CodecSpec, SdpState};
