//! ICE connectivity establishment
//!
//! This crate implements the ICE side of a peer-to-peer media session:
//! candidate gathering (host, server-reflexive via STUN, relayed via
//! TURN), the connectivity check list with aggressive nomination, and an
//! ice-lite responder mode. It owns no socket read loop; the media
//! session's packet demultiplexer classifies inbound datagrams and hands
//! STUN traffic to [`IceAgent::handle_packet`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mediaflow_ice_core::{IceAgent, IceConfig, IceRole};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let socket = Arc::new(tokio::net::UdpSocket::bind("0.0.0.0:0").await?);
//! let local = socket.local_addr()?;
//!
//! let (agent, mut events) = IceAgent::new(socket, IceConfig {
//!     role: IceRole::Controlling,
//!     ..Default::default()
//! });
//! agent.add_local_host_candidate("en0", local).await?;
//! agent.start_gather(None, None).await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod candidate;
pub mod error;
pub mod stun;
pub mod turn;

pub use agent::{
    IceAgent, IceAgentEvent, IceAgentState, IceConfig, IceCredentials, IceRole,
    STUN_MAX_ATTEMPTS, STUN_RTO_INITIAL,
};
pub use candidate::{CandidatePair, CandidateType, IceCandidate, PairState, TransportProtocol};
pub use error::{Error, Result};
pub use turn::{TurnServerConfig, TurnTransport};
