//! RTP/RTCP transport, packet demultiplexing, SRTP and DTLS-SRTP
//!
//! This crate owns the media-plane wire formats of a session:
//!
//! - **Demultiplexing**: every inbound datagram is classified by its
//!   first octet (STUN / DTLS / RTP / RTCP) before any engine sees it
//! - **RTP/RTCP**: RFC 3550 packet codecs
//! - **DTLS-SRTP**: handshake over the ICE-nominated path, peer
//!   fingerprint verification, SRTP key derivation via the
//!   `"EXTRACTOR-dtls_srtp"` exporter
//! - **SRTP**: AES-128-CM / HMAC-SHA1-80 protection contexts

pub mod demux;
pub mod dtls;
pub mod error;
pub mod packet;
pub mod rtcp;
pub mod srtp;

pub use demux::{classify, DemuxCounters, PacketClass};
pub use dtls::{
    certificate_fingerprint, DemuxConn, DtlsEngine, EstablishedDtls, DTLS_HANDSHAKE_TIMEOUT,
    DTLS_SRTP_EXPORTER_LABEL,
};
pub use error::{Error, Result};
pub use packet::{RtpHeader, RtpPacket, RtpSsrc, RTP_HEADER_LEN, RTP_VERSION};
pub use rtcp::{NtpTimestamp, ReceiverReport, ReportBlock, RtcpPacket, RtcpPacketType, SenderReport};
pub use srtp::{SrtpContext, SrtpKeys, SRTP_MASTER_KEY_LEN, SRTP_MASTER_SALT_LEN};
