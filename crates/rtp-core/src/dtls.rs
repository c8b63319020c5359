//! DTLS-SRTP engine
//!
//! Runs the DTLS handshake over the ICE-nominated path and derives the
//! SRTP session keys with the `"EXTRACTOR-dtls_srtp"` exporter. DTLS
//! records reach the engine through [`DemuxConn`], a channel-backed
//! transport fed by the session's packet demultiplexer; outbound records
//! are drained by the session and sent on the shared socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use webrtc_dtls::config::{ClientAuthType, Config, ExtendedMasterSecretType};
pub use webrtc_dtls::conn::DTLSConn;
use webrtc_dtls::crypto::Certificate;
use webrtc_dtls::extension::extension_use_srtp::SrtpProtectionProfile;
use webrtc_util::conn::Conn;
use webrtc_util::KeyingMaterialExporter;

use crate::error::{Error, Result};
use crate::srtp::{SrtpContext, SrtpKeys, SRTP_MASTER_KEY_LEN, SRTP_MASTER_SALT_LEN};

/// TLS exporter label for SRTP key derivation (RFC 5764)
pub const DTLS_SRTP_EXPORTER_LABEL: &str = "EXTRACTOR-dtls_srtp";

/// Default DTLS handshake timeout
pub const DTLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Channel-backed datagram transport between the demultiplexer and the
/// DTLS stack.
///
/// Inbound DTLS records are pushed by the session; records arriving
/// before the handshake starts simply queue in the channel (the
/// early-DTLS buffering behavior).
pub struct DemuxConn {
    local: SocketAddr,
    remote: RwLock<Option<SocketAddr>>,
    inbound: Mutex<mpsc::Receiver<Bytes>>,
    outbound: mpsc::Sender<Bytes>,
    packets_sent: AtomicU32,
    packets_received: AtomicU32,
}

impl DemuxConn {
    /// Create the transport. Returns the connection, the sender the demux
    /// pushes inbound records into, and the receiver the session drains
    /// for outbound records.
    pub fn new(local: SocketAddr) -> (Arc<Self>, mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
        let (in_tx, in_rx) = mpsc::channel(256);
        let (out_tx, out_rx) = mpsc::channel(256);
        let conn = Arc::new(Self {
            local,
            remote: RwLock::new(None),
            inbound: Mutex::new(in_rx),
            outbound: out_tx,
            packets_sent: AtomicU32::new(0),
            packets_received: AtomicU32::new(0),
        });
        (conn, in_tx, out_rx)
    }

    /// Pin the remote address once ICE has nominated a pair
    pub fn set_remote(&self, addr: SocketAddr) {
        *self.remote.write().expect("remote lock") = Some(addr);
    }

    /// Handshake packets sent so far
    pub fn packets_sent(&self) -> u32 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    /// Handshake packets received so far
    pub fn packets_received(&self) -> u32 {
        self.packets_received.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Conn for DemuxConn {
    async fn connect(&self, addr: SocketAddr) -> webrtc_util::Result<()> {
        self.set_remote(addr);
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> webrtc_util::Result<usize> {
        let packet = self
            .inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| webrtc_util::Error::Other("demux channel closed".to_owned()))?;
        let len = packet.len().min(buf.len());
        buf[..len].copy_from_slice(&packet[..len]);
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        Ok(len)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> webrtc_util::Result<(usize, SocketAddr)> {
        let len = self.recv(buf).await?;
        let remote = self
            .remote
            .read()
            .expect("remote lock")
            .ok_or_else(|| webrtc_util::Error::Other("remote address not set".to_owned()))?;
        Ok((len, remote))
    }

    async fn send(&self, buf: &[u8]) -> webrtc_util::Result<usize> {
        self.outbound
            .send(Bytes::copy_from_slice(buf))
            .await
            .map_err(|_| webrtc_util::Error::Other("demux channel closed".to_owned()))?;
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        Ok(buf.len())
    }

    async fn send_to(&self, buf: &[u8], _target: SocketAddr) -> webrtc_util::Result<usize> {
        self.send(buf).await
    }

    fn local_addr(&self) -> webrtc_util::Result<SocketAddr> {
        Ok(self.local)
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        *self.remote.read().expect("remote lock")
    }

    async fn close(&self) -> webrtc_util::Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &(dyn std::any::Any + Send + Sync) {
        self
    }
}

/// SHA-256 certificate fingerprint in the SDP colon-hex form
pub fn certificate_fingerprint(der: &[u8]) -> String {
    let digest = Sha256::digest(der);
    digest
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// An established DTLS-SRTP association
pub struct EstablishedDtls {
    /// SRTP contexts keyed from the exporter output
    pub srtp: SrtpContext,

    /// The underlying DTLS connection, kept for alerts and teardown
    pub conn: Arc<DTLSConn>,
}

/// DTLS-SRTP engine for one session
pub struct DtlsEngine {
    certificate: Certificate,
    local_fingerprint: String,
}

impl DtlsEngine {
    /// Generate a self-signed certificate for this session
    pub fn new() -> Result<Self> {
        let certificate = Certificate::generate_self_signed(vec!["mediaflow".to_owned()])
            .map_err(|e| Error::DtlsError(format!("certificate generation: {e}")))?;
        let der = certificate
            .certificate
            .first()
            .ok_or_else(|| Error::DtlsError("generated certificate is empty".into()))?;
        let local_fingerprint = certificate_fingerprint(der.as_ref());
        Ok(Self {
            certificate,
            local_fingerprint,
        })
    }

    /// SHA-256 fingerprint of the local certificate, for `a=fingerprint`
    pub fn local_fingerprint(&self) -> &str {
        &self.local_fingerprint
    }

    /// Run the DTLS handshake and derive the SRTP contexts.
    ///
    /// `remote_fingerprint` is the value from the peer's
    /// `a=fingerprint:sha-256` line; a mismatch with the certificate the
    /// peer actually presents is fatal.
    pub async fn handshake(
        &self,
        conn: Arc<DemuxConn>,
        is_client: bool,
        remote_fingerprint: &str,
        handshake_timeout: Duration,
    ) -> Result<EstablishedDtls> {
        let mut config = Config::default();
        config.certificates = vec![self.certificate.clone()];
        config.srtp_protection_profiles = vec![SrtpProtectionProfile::Srtp_Aes128_Cm_Hmac_Sha1_80];
        config.extended_master_secret = ExtendedMasterSecretType::Require;
        // The certificate is authenticated against the SDP fingerprint
        // below, not a CA chain.
        config.insecure_skip_verify = true;
        if !is_client {
            config.client_auth = ClientAuthType::RequireAnyClientCert;
        }

        debug!("dtls: starting handshake (client={})", is_client);
        let dtls_conn = timeout(
            handshake_timeout,
            DTLSConn::new(
                conn.clone() as Arc<dyn Conn + Send + Sync>,
                config,
                is_client,
                None,
            ),
        )
        .await
        .map_err(|_| {
            warn!("dtls: handshake timed out after {:?}", handshake_timeout);
            Error::HandshakeTimeout
        })?
        .map_err(|e| Error::DtlsError(format!("handshake: {e}")))?;

        let state = dtls_conn.connection_state().await;

        let peer_der = state
            .peer_certificates
            .first()
            .ok_or_else(|| Error::DtlsError("peer presented no certificate".into()))?;
        let actual = certificate_fingerprint(peer_der);
        if !actual.eq_ignore_ascii_case(remote_fingerprint) {
            return Err(Error::FingerprintMismatch {
                expected: remote_fingerprint.to_owned(),
                actual,
            });
        }

        // RFC 5764 section 4.2: client_write_key | server_write_key |
        // client_write_salt | server_write_salt
        let material = state
            .export_keying_material(
                DTLS_SRTP_EXPORTER_LABEL,
                &[],
                2 * (SRTP_MASTER_KEY_LEN + SRTP_MASTER_SALT_LEN),
            )
            .await
            .map_err(|e| Error::DtlsError(format!("keying material export: {e}")))?;

        let (client_key, rest) = material.split_at(SRTP_MASTER_KEY_LEN);
        let (server_key, rest) = rest.split_at(SRTP_MASTER_KEY_LEN);
        let (client_salt, server_salt) = rest.split_at(SRTP_MASTER_SALT_LEN);

        let client_keys = SrtpKeys::new(client_key.to_vec(), client_salt.to_vec());
        let server_keys = SrtpKeys::new(server_key.to_vec(), server_salt.to_vec());
        let (local_keys, remote_keys) = if is_client {
            (client_keys, server_keys)
        } else {
            (server_keys, client_keys)
        };

        let srtp = SrtpContext::new(&local_keys, &remote_keys)?;
        info!("dtls: established, SRTP keys installed");
        Ok(EstablishedDtls {
            srtp,
            conn: Arc::new(dtls_conn),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_format() {
        let fp = certificate_fingerprint(b"not a real certificate");
        // 32 bytes -> 32 hex pairs joined by colons
        assert_eq!(fp.len(), 32 * 2 + 31);
        assert!(fp
            .split(':')
            .all(|pair| pair.len() == 2 && pair.chars().all(|c| c.is_ascii_hexdigit())));
        assert_eq!(fp, fp.to_uppercase());
    }

    #[test]
    fn test_engine_exposes_fingerprint() {
        let engine = DtlsEngine::new().unwrap();
        assert_eq!(engine.local_fingerprint().split(':').count(), 32);
    }

    #[tokio::test]
    async fn test_demux_conn_passes_records() {
        let local: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let (conn, in_tx, mut out_rx) = DemuxConn::new(local);
        conn.set_remote("127.0.0.1:4001".parse().unwrap());

        // Records queued before anyone reads are buffered, not dropped.
        in_tx.send(Bytes::from_static(b"\x16record")).await.unwrap();
        let mut buf = [0u8; 32];
        let n = conn.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"\x16record");
        assert_eq!(conn.packets_received(), 1);

        conn.send(b"\x16reply").await.unwrap();
        assert_eq!(out_rx.recv().await.unwrap(), Bytes::from_static(b"\x16reply"));
        assert_eq!(conn.packets_sent(), 1);
    }

    #[tokio::test]
    async fn test_demux_conn_recv_from_requires_remote() {
        let local: SocketAddr = "127.0.0.1:4002".parse().unwrap();
        let (conn, in_tx, _out_rx) = DemuxConn::new(local);
        in_tx.send(Bytes::from_static(b"x")).await.unwrap();
        let mut buf = [0u8; 4];
        assert!(conn.recv_from(&mut buf).await.is_err());
    }
}
