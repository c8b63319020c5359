//! SRTP protection contexts
//!
//! Thin policy layer over `webrtc-srtp`: holds the master key material
//! derived from the DTLS handshake and protects/unprotects RTP and RTCP
//! with AES-128-CM / HMAC-SHA1-80.

use bytes::Bytes;
use webrtc_srtp::context::Context;
use webrtc_srtp::protection_profile::ProtectionProfile;

use crate::error::{Error, Result};

/// SRTP master key length for AES-128-CM
pub const SRTP_MASTER_KEY_LEN: usize = 16;

/// SRTP master salt length
pub const SRTP_MASTER_SALT_LEN: usize = 14;

/// One direction's master key material
#[derive(Clone)]
pub struct SrtpKeys {
    /// Master key
    pub master_key: Vec<u8>,

    /// Master salt
    pub master_salt: Vec<u8>,
}

impl SrtpKeys {
    /// Create key material from raw bytes
    pub fn new(master_key: Vec<u8>, master_salt: Vec<u8>) -> Self {
        Self {
            master_key,
            master_salt,
        }
    }
}

impl std::fmt::Debug for SrtpKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs
        f.debug_struct("SrtpKeys")
            .field("master_key_len", &self.master_key.len())
            .field("master_salt_len", &self.master_salt.len())
            .finish()
    }
}

/// Bidirectional SRTP context for one session
pub struct SrtpContext {
    outbound: Context,
    inbound: Context,
}

impl SrtpContext {
    /// Build protection contexts from local (outbound) and remote
    /// (inbound) key material.
    pub fn new(local: &SrtpKeys, remote: &SrtpKeys) -> Result<Self> {
        let profile = ProtectionProfile::Aes128CmHmacSha1_80;
        let outbound = Context::new(
            &local.master_key,
            &local.master_salt,
            profile,
            None,
            None,
        )
        .map_err(|e| Error::SrtpError(format!("outbound context: {e}")))?;
        let inbound = Context::new(
            &remote.master_key,
            &remote.master_salt,
            profile,
            None,
            None,
        )
        .map_err(|e| Error::SrtpError(format!("inbound context: {e}")))?;
        Ok(Self { outbound, inbound })
    }

    /// Protect an outbound RTP packet
    pub fn protect_rtp(&mut self, packet: &[u8]) -> Result<Bytes> {
        self.outbound
            .encrypt_rtp(packet)
            .map_err(|e| Error::SrtpError(format!("protect rtp: {e}")))
    }

    /// Unprotect an inbound SRTP packet
    pub fn unprotect_rtp(&mut self, packet: &[u8]) -> Result<Bytes> {
        self.inbound
            .decrypt_rtp(packet)
            .map_err(|e| Error::SrtpError(format!("unprotect rtp: {e}")))
    }

    /// Protect an outbound RTCP packet
    pub fn protect_rtcp(&mut self, packet: &[u8]) -> Result<Bytes> {
        self.outbound
            .encrypt_rtcp(packet)
            .map_err(|e| Error::SrtpError(format!("protect rtcp: {e}")))
    }

    /// Unprotect an inbound SRTCP packet
    pub fn unprotect_rtcp(&mut self, packet: &[u8]) -> Result<Bytes> {
        self.inbound
            .decrypt_rtcp(packet)
            .map_err(|e| Error::SrtpError(format!("unprotect rtcp: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{RtpHeader, RtpPacket};

    fn keys(seed: u8) -> SrtpKeys {
        SrtpKeys::new(
            vec![seed; SRTP_MASTER_KEY_LEN],
            vec![seed.wrapping_add(1); SRTP_MASTER_SALT_LEN],
        )
    }

    #[test]
    fn test_protect_unprotect_round_trip() {
        // Sender's local keys are the receiver's remote keys.
        let a = keys(1);
        let b = keys(2);
        let mut sender = SrtpContext::new(&a, &b).unwrap();
        let mut receiver = SrtpContext::new(&b, &a).unwrap();

        let packet = RtpPacket::new(
            RtpHeader::new(96, 10, 480, 0xABCD),
            Bytes::from_static(b"\x01\x02\x03\x04"),
        );
        let plain = packet.serialize();

        let protected = sender.protect_rtp(&plain).unwrap();
        assert_ne!(&protected[..], &plain[..]);

        let unprotected = receiver.unprotect_rtp(&protected).unwrap();
        assert_eq!(&unprotected[..], &plain[..]);
    }

    #[test]
    fn test_tampered_packet_rejected() {
        let a = keys(3);
        let b = keys(4);
        let mut sender = SrtpContext::new(&a, &b).unwrap();
        let mut receiver = SrtpContext::new(&b, &a).unwrap();

        let plain = RtpPacket::new(
            RtpHeader::new(96, 11, 960, 0xABCD),
            Bytes::from_static(b"data"),
        )
        .serialize();

        let mut protected = sender.protect_rtp(&plain).unwrap().to_vec();
        let last = protected.len() - 1;
        protected[last] ^= 0xFF;
        assert!(receiver.unprotect_rtp(&protected).is_err());
    }

    #[test]
    fn test_debug_does_not_leak_keys() {
        let rendered = format!("{:?}", keys(5));
        assert!(!rendered.contains('5'));
        assert!(rendered.contains("master_key_len"));
    }
}
