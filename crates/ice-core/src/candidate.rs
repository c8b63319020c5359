//! ICE candidate types and priority computation
//!
//! Candidates carry the transport addresses discovered during gathering.
//! Priorities follow RFC 8445 section 5.1.2.1, candidate pair priorities
//! follow section 6.1.2.3.

use std::fmt;
use std::net::SocketAddr;

use crate::error::{Error, Result};

/// Type of an ICE candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateType {
    /// Local interface address
    Host,

    /// Address observed by a STUN server
    ServerReflexive,

    /// Address learned from an inbound check from an unknown source
    PeerReflexive,

    /// Address allocated on a TURN relay
    Relayed,
}

impl CandidateType {
    /// Type preference used in the candidate priority formula
    pub fn preference(&self) -> u32 {
        match self {
            CandidateType::Host => 126,
            CandidateType::PeerReflexive => 110,
            CandidateType::ServerReflexive => 100,
            CandidateType::Relayed => 0,
        }
    }

    /// SDP token for this candidate type
    pub fn sdp_token(&self) -> &'static str {
        match self {
            CandidateType::Host => "host",
            CandidateType::ServerReflexive => "srflx",
            CandidateType::PeerReflexive => "prflx",
            CandidateType::Relayed => "relay",
        }
    }

    /// Parse the SDP token form
    pub fn from_sdp_token(token: &str) -> Result<Self> {
        match token {
            "host" => Ok(CandidateType::Host),
            "srflx" => Ok(CandidateType::ServerReflexive),
            "prflx" => Ok(CandidateType::PeerReflexive),
            "relay" => Ok(CandidateType::Relayed),
            other => Err(Error::InvalidCandidate(format!(
                "unknown candidate type: {other}"
            ))),
        }
    }
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sdp_token())
    }
}

/// Transport protocol of a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProtocol {
    /// UDP transport
    Udp,

    /// TCP transport (TURN-TCP relays only)
    Tcp,
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportProtocol::Udp => f.write_str("UDP"),
            TransportProtocol::Tcp => f.write_str("TCP"),
        }
    }
}

/// A single ICE candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    /// Foundation identifier grouping candidates of the same base
    pub foundation: String,

    /// Component id (1 = RTP; RTCP is multiplexed so only 1 is used)
    pub component: u16,

    /// Transport protocol
    pub transport: TransportProtocol,

    /// Candidate priority
    pub priority: u32,

    /// Transport address
    pub address: SocketAddr,

    /// Candidate type
    pub candidate_type: CandidateType,

    /// Related (base) address for reflexive and relayed candidates
    pub related_address: Option<SocketAddr>,
}

impl IceCandidate {
    /// Create a candidate with the priority computed from its type
    pub fn new(
        foundation: impl Into<String>,
        component: u16,
        transport: TransportProtocol,
        address: SocketAddr,
        candidate_type: CandidateType,
        related_address: Option<SocketAddr>,
    ) -> Self {
        let priority = compute_priority(candidate_type, 65535, component);
        Self {
            foundation: foundation.into(),
            component,
            transport,
            priority,
            address,
            candidate_type,
            related_address,
        }
    }

    /// Render the value part of an `a=candidate` SDP attribute
    pub fn to_sdp_value(&self) -> String {
        let mut s = format!(
            "{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component,
            self.transport,
            self.priority,
            self.address.ip(),
            self.address.port(),
            self.candidate_type
        );
        if let Some(rel) = self.related_address {
            s.push_str(&format!(" raddr {} rport {}", rel.ip(), rel.port()));
        }
        s
    }

    /// Parse the value part of an `a=candidate` SDP attribute
    pub fn from_sdp_value(value: &str) -> Result<Self> {
        let fields: Vec<&str> = value.split_whitespace().collect();
        if fields.len() < 8 || fields[6] != "typ" {
            return Err(Error::InvalidCandidate(format!(
                "short candidate line: {value}"
            )));
        }

        let foundation = fields[0].to_string();
        let component: u16 = fields[1]
            .parse()
            .map_err(|_| Error::InvalidCandidate(format!("bad component: {}", fields[1])))?;
        let transport = match fields[2].to_ascii_uppercase().as_str() {
            "UDP" => TransportProtocol::Udp,
            "TCP" => TransportProtocol::Tcp,
            other => {
                return Err(Error::InvalidCandidate(format!("bad transport: {other}")));
            }
        };
        let priority: u32 = fields[3]
            .parse()
            .map_err(|_| Error::InvalidCandidate(format!("bad priority: {}", fields[3])))?;
        let ip = fields[4]
            .parse()
            .map_err(|_| Error::InvalidCandidate(format!("bad address: {}", fields[4])))?;
        let port: u16 = fields[5]
            .parse()
            .map_err(|_| Error::InvalidCandidate(format!("bad port: {}", fields[5])))?;
        let candidate_type = CandidateType::from_sdp_token(fields[7])?;

        // Optional raddr/rport tail
        let mut related_address = None;
        let mut rest = fields[8..].iter();
        let mut raddr = None;
        let mut rport = None;
        while let Some(key) = rest.next() {
            match (*key, rest.next()) {
                ("raddr", Some(v)) => raddr = v.parse().ok(),
                ("rport", Some(v)) => rport = v.parse().ok(),
                _ => {}
            }
        }
        if let (Some(ip), Some(port)) = (raddr, rport) {
            related_address = Some(SocketAddr::new(ip, port));
        }

        Ok(Self {
            foundation,
            component,
            transport,
            priority,
            address: SocketAddr::new(ip, port),
            candidate_type,
            related_address,
        })
    }
}

/// Candidate priority per RFC 8445 section 5.1.2.1
///
/// priority = (2^24) * type_pref + (2^8) * local_pref + (256 - component)
pub fn compute_priority(candidate_type: CandidateType, local_pref: u32, component: u16) -> u32 {
    (1 << 24) * candidate_type.preference() + (1 << 8) * local_pref + (256 - component as u32)
}

/// Candidate pair check state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    /// Not yet eligible for checking
    Frozen,

    /// In the check list, not yet probed
    Waiting,

    /// A check transaction is outstanding
    InProgress,

    /// A check succeeded on this pair
    Succeeded,

    /// All check attempts failed
    Failed,
}

/// An ordered (local, remote) candidate pair
#[derive(Debug, Clone)]
pub struct CandidatePair {
    /// Local candidate
    pub local: IceCandidate,

    /// Remote candidate
    pub remote: IceCandidate,

    /// Pair priority per RFC 8445 section 6.1.2.3
    pub priority: u64,

    /// Current check state
    pub state: PairState,

    /// Whether this pair has been nominated
    pub nominated: bool,
}

impl CandidatePair {
    /// Create a pair; `controlling` selects which side is G in the formula
    pub fn new(local: IceCandidate, remote: IceCandidate, controlling: bool) -> Self {
        let (g, d) = if controlling {
            (local.priority as u64, remote.priority as u64)
        } else {
            (remote.priority as u64, local.priority as u64)
        };

        // pairPriority = 2^32*MIN(G,D) + 2*MAX(G,D) + (G>D?1:0)
        let priority = (1u64 << 32) * g.min(d) + 2 * g.max(d) + u64::from(g > d);

        Self {
            local,
            remote,
            priority,
            state: PairState::Frozen,
            nominated: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_formula() {
        // Host candidate, component 1, max local preference
        let p = compute_priority(CandidateType::Host, 65535, 1);
        assert_eq!(p, 126 * (1 << 24) + 65535 * (1 << 8) + 255);

        // Relay is always lowest
        let relay = compute_priority(CandidateType::Relayed, 65535, 1);
        assert!(relay < compute_priority(CandidateType::ServerReflexive, 65535, 1));
        assert!(p > relay);
    }

    #[test]
    fn test_candidate_sdp_round_trip() {
        let cand = IceCandidate::new(
            "1",
            1,
            TransportProtocol::Udp,
            "192.168.1.4:46416".parse().unwrap(),
            CandidateType::Host,
            None,
        );
        let line = cand.to_sdp_value();
        let parsed = IceCandidate::from_sdp_value(&line).unwrap();
        assert_eq!(parsed, cand);
    }

    #[test]
    fn test_candidate_with_related_address() {
        let value = "2 1 UDP 1677729535 203.0.113.5 3478 typ srflx raddr 10.0.0.2 rport 9000";
        let cand = IceCandidate::from_sdp_value(value).unwrap();
        assert_eq!(cand.candidate_type, CandidateType::ServerReflexive);
        assert_eq!(
            cand.related_address,
            Some("10.0.0.2:9000".parse().unwrap())
        );
        assert_eq!(cand.to_sdp_value(), value);
    }

    #[test]
    fn test_malformed_candidate_rejected() {
        assert!(IceCandidate::from_sdp_value("1 1 UDP").is_err());
        assert!(IceCandidate::from_sdp_value("1 1 SCTP 1 1.2.3.4 5 typ host").is_err());
        assert!(IceCandidate::from_sdp_value("1 1 UDP 1 1.2.3.4 5 typ funky").is_err());
    }

    #[test]
    fn test_pair_priority_controlling_symmetry() {
        let local = IceCandidate::new(
            "1",
            1,
            TransportProtocol::Udp,
            "10.0.0.1:1000".parse().unwrap(),
            CandidateType::Host,
            None,
        );
        let remote = IceCandidate::new(
            "1",
            1,
            TransportProtocol::Udp,
            "10.0.0.2:2000".parse().unwrap(),
            CandidateType::Relayed,
            None,
        );

        // Both agents must order the pair the same regardless of role.
        let a = CandidatePair::new(local.clone(), remote.clone(), true);
        let b = CandidatePair::new(remote, local, false);
        assert_eq!(a.priority, b.priority);
    }
}
