//! STUN message codec
//!
//! Implements the subset of RFC 5389 (STUN), RFC 5766 (TURN) and RFC 8445
//! (ICE) needed for candidate gathering and connectivity checks: Binding,
//! Allocate and Refresh transactions, Send/Data indications for relayed
//! traffic, short-term credential MESSAGE-INTEGRITY and FINGERPRINT.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bytes::{BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_32_ISO_HDLC};
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::{Error, Result};

/// STUN magic cookie (RFC 5389)
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

/// FINGERPRINT XOR value, the ASCII bytes of "STUN"
const FINGERPRINT_XOR: u32 = 0x5354_554e;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

type HmacSha1 = Hmac<Sha1>;

/// STUN header length in bytes
pub const HEADER_LEN: usize = 20;

/// STUN message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    /// Binding Request (RFC 5389)
    BindingRequest = 0x0001,
    /// Binding Success Response
    BindingResponse = 0x0101,
    /// Binding Error Response
    BindingErrorResponse = 0x0111,
    /// Allocate Request (RFC 5766)
    AllocateRequest = 0x0003,
    /// Allocate Success Response
    AllocateResponse = 0x0103,
    /// Allocate Error Response
    AllocateErrorResponse = 0x0113,
    /// Refresh Request (RFC 5766)
    RefreshRequest = 0x0004,
    /// Refresh Success Response
    RefreshResponse = 0x0104,
    /// Refresh Error Response
    RefreshErrorResponse = 0x0114,
    /// Send Indication (RFC 5766)
    SendIndication = 0x0016,
    /// Data Indication (RFC 5766)
    DataIndication = 0x0017,
}

impl MessageType {
    fn from_u16(value: u16) -> Result<Self> {
        match value {
            0x0001 => Ok(Self::BindingRequest),
            0x0101 => Ok(Self::BindingResponse),
            0x0111 => Ok(Self::BindingErrorResponse),
            0x0003 => Ok(Self::AllocateRequest),
            0x0103 => Ok(Self::AllocateResponse),
            0x0113 => Ok(Self::AllocateErrorResponse),
            0x0004 => Ok(Self::RefreshRequest),
            0x0104 => Ok(Self::RefreshResponse),
            0x0114 => Ok(Self::RefreshErrorResponse),
            0x0016 => Ok(Self::SendIndication),
            0x0017 => Ok(Self::DataIndication),
            other => Err(Error::MalformedStun(format!(
                "unknown message type 0x{other:04x}"
            ))),
        }
    }

    /// True for success responses
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::BindingResponse | Self::AllocateResponse | Self::RefreshResponse
        )
    }

    /// True for error responses
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::BindingErrorResponse | Self::AllocateErrorResponse | Self::RefreshErrorResponse
        )
    }
}

/// Attribute type codes
mod attr {
    pub const USERNAME: u16 = 0x0006;
    pub const MESSAGE_INTEGRITY: u16 = 0x0008;
    pub const ERROR_CODE: u16 = 0x0009;
    pub const LIFETIME: u16 = 0x000D;
    pub const XOR_PEER_ADDRESS: u16 = 0x0012;
    pub const DATA: u16 = 0x0013;
    pub const REALM: u16 = 0x0014;
    pub const NONCE: u16 = 0x0015;
    pub const XOR_RELAYED_ADDRESS: u16 = 0x0016;
    pub const REQUESTED_TRANSPORT: u16 = 0x0019;
    pub const XOR_MAPPED_ADDRESS: u16 = 0x0020;
    pub const PRIORITY: u16 = 0x0024;
    pub const USE_CANDIDATE: u16 = 0x0025;
    pub const SOFTWARE: u16 = 0x8022;
    pub const FINGERPRINT: u16 = 0x8028;
    pub const ICE_CONTROLLED: u16 = 0x8029;
    pub const ICE_CONTROLLING: u16 = 0x802A;
}

/// Parsed STUN attribute
#[derive(Debug, Clone)]
pub enum Attribute {
    /// XOR-MAPPED-ADDRESS
    XorMappedAddress(SocketAddr),
    /// XOR-RELAYED-ADDRESS (TURN)
    XorRelayedAddress(SocketAddr),
    /// XOR-PEER-ADDRESS (TURN Send/Data indications)
    XorPeerAddress(SocketAddr),
    /// USERNAME (`remote-ufrag:local-ufrag` for checks)
    Username(String),
    /// MESSAGE-INTEGRITY, 20-byte HMAC-SHA1
    MessageIntegrity([u8; 20]),
    /// ERROR-CODE
    ErrorCode {
        /// Numeric code, e.g. 401
        code: u16,
        /// Reason phrase
        reason: String,
    },
    /// LIFETIME seconds (TURN)
    Lifetime(u32),
    /// REQUESTED-TRANSPORT protocol number (TURN; 17 = UDP)
    RequestedTransport(u8),
    /// PRIORITY of a peer-reflexive candidate (ICE)
    Priority(u32),
    /// USE-CANDIDATE nomination flag (ICE)
    UseCandidate,
    /// ICE-CONTROLLING with tiebreaker
    IceControlling(u64),
    /// ICE-CONTROLLED with tiebreaker
    IceControlled(u64),
    /// DATA payload of a Send/Data indication (TURN)
    Data(Bytes),
    /// SOFTWARE description
    Software(String),
    /// REALM (TURN long-term credentials, parsed but not negotiated)
    Realm(String),
    /// NONCE (TURN long-term credentials, parsed but not negotiated)
    Nonce(Vec<u8>),
    /// Anything unrecognized, kept for debugging
    Unknown {
        /// Raw attribute type
        attr_type: u16,
        /// Raw value bytes
        data: Vec<u8>,
    },
}

/// A STUN message
#[derive(Debug, Clone)]
pub struct Message {
    /// Message type
    pub msg_type: MessageType,

    /// 12-byte transaction id
    pub transaction_id: [u8; 12],

    /// Attributes in wire order
    pub attributes: Vec<Attribute>,
}

impl Message {
    /// Create an empty message
    pub fn new(msg_type: MessageType, transaction_id: [u8; 12]) -> Self {
        Self {
            msg_type,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    /// Generate a random transaction id
    pub fn random_transaction_id() -> [u8; 12] {
        let mut id = [0u8; 12];
        rand::Rng::fill(&mut rand::thread_rng(), &mut id[..]);
        id
    }

    /// Create a Binding Request
    pub fn binding_request(transaction_id: [u8; 12]) -> Self {
        Self::new(MessageType::BindingRequest, transaction_id)
    }

    /// Create a Binding Success Response mirroring `transaction_id`
    pub fn binding_response(transaction_id: [u8; 12], mapped: SocketAddr) -> Self {
        Self::new(MessageType::BindingResponse, transaction_id)
            .with_attribute(Attribute::XorMappedAddress(mapped))
    }

    /// Create an Allocate Request for a UDP relay
    pub fn allocate_request(transaction_id: [u8; 12]) -> Self {
        Self::new(MessageType::AllocateRequest, transaction_id)
            .with_attribute(Attribute::RequestedTransport(17))
    }

    /// Create a Refresh Request
    pub fn refresh_request(transaction_id: [u8; 12], lifetime_secs: u32) -> Self {
        Self::new(MessageType::RefreshRequest, transaction_id)
            .with_attribute(Attribute::Lifetime(lifetime_secs))
    }

    /// Create a Send Indication carrying `data` toward `peer`
    pub fn send_indication(transaction_id: [u8; 12], peer: SocketAddr, data: Bytes) -> Self {
        Self::new(MessageType::SendIndication, transaction_id)
            .with_attribute(Attribute::XorPeerAddress(peer))
            .with_attribute(Attribute::Data(data))
    }

    /// Append an attribute, builder-style
    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// First XOR-MAPPED-ADDRESS, if any
    pub fn xor_mapped_address(&self) -> Option<SocketAddr> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::XorMappedAddress(addr) => Some(*addr),
            _ => None,
        })
    }

    /// First XOR-RELAYED-ADDRESS, if any
    pub fn relayed_address(&self) -> Option<SocketAddr> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::XorRelayedAddress(addr) => Some(*addr),
            _ => None,
        })
    }

    /// XOR-PEER-ADDRESS of a Data indication, if any
    pub fn peer_address(&self) -> Option<SocketAddr> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::XorPeerAddress(addr) => Some(*addr),
            _ => None,
        })
    }

    /// DATA payload, if any
    pub fn data(&self) -> Option<&Bytes> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Data(data) => Some(data),
            _ => None,
        })
    }

    /// LIFETIME seconds, if any
    pub fn lifetime(&self) -> Option<u32> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Lifetime(secs) => Some(*secs),
            _ => None,
        })
    }

    /// ERROR-CODE, if any
    pub fn error_code(&self) -> Option<(u16, &str)> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::ErrorCode { code, reason } => Some((*code, reason.as_str())),
            _ => None,
        })
    }

    /// USERNAME, if any
    pub fn username(&self) -> Option<&str> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Username(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// PRIORITY, if any
    pub fn priority(&self) -> Option<u32> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Priority(p) => Some(*p),
            _ => None,
        })
    }

    /// True when a USE-CANDIDATE flag is present
    pub fn has_use_candidate(&self) -> bool {
        self.attributes
            .iter()
            .any(|a| matches!(a, Attribute::UseCandidate))
    }

    /// Serialize the message.
    ///
    /// When `integrity_key` is set a MESSAGE-INTEGRITY attribute is
    /// appended (HMAC-SHA1 over the message with the length adjusted per
    /// RFC 5389 section 15.4); a FINGERPRINT attribute is always appended
    /// last.
    pub fn encode(&self, integrity_key: Option<&[u8]>) -> Vec<u8> {
        let mut attrs = BytesMut::with_capacity(128);

        for attribute in &self.attributes {
            encode_attribute(&mut attrs, attribute, &self.transaction_id);
        }

        if let Some(key) = integrity_key {
            // Length for the HMAC covers everything up to and including
            // MESSAGE-INTEGRITY, but not FINGERPRINT.
            let hmac_len = attrs.len() + 24;
            let mut input = Vec::with_capacity(HEADER_LEN + attrs.len());
            put_header(&mut input, self.msg_type, hmac_len, &self.transaction_id);
            input.extend_from_slice(&attrs);

            let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(&input);
            let digest = mac.finalize().into_bytes();
            put_raw_attribute(&mut attrs, attr::MESSAGE_INTEGRITY, &digest);
        }

        // FINGERPRINT covers the message with the length including itself
        let crc_len = attrs.len() + 8;
        let mut input = Vec::with_capacity(HEADER_LEN + attrs.len());
        put_header(&mut input, self.msg_type, crc_len, &self.transaction_id);
        input.extend_from_slice(&attrs);
        let crc = CRC32.checksum(&input) ^ FINGERPRINT_XOR;
        put_raw_attribute(&mut attrs, attr::FINGERPRINT, &crc.to_be_bytes());

        let mut out = Vec::with_capacity(HEADER_LEN + attrs.len());
        put_header(&mut out, self.msg_type, attrs.len(), &self.transaction_id);
        out.extend_from_slice(&attrs);
        out
    }

    /// Quick check whether a datagram could be STUN: the two top bits of
    /// the first octet are zero and the magic cookie is present.
    pub fn is_stun(data: &[u8]) -> bool {
        data.len() >= HEADER_LEN
            && data[0] & 0xC0 == 0
            && u32::from_be_bytes([data[4], data[5], data[6], data[7]]) == MAGIC_COOKIE
    }

    /// Parse a STUN message from raw bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::MalformedStun(format!("short message: {}", data.len())));
        }

        let msg_type = MessageType::from_u16(u16::from_be_bytes([data[0], data[1]]))?;
        let msg_len = u16::from_be_bytes([data[2], data[3]]) as usize;

        let cookie = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if cookie != MAGIC_COOKIE {
            return Err(Error::MalformedStun(format!("bad magic cookie 0x{cookie:08x}")));
        }

        let mut transaction_id = [0u8; 12];
        transaction_id.copy_from_slice(&data[8..HEADER_LEN]);

        if data.len() < HEADER_LEN + msg_len {
            return Err(Error::MalformedStun("truncated attributes".into()));
        }

        let mut attributes = Vec::new();
        let mut offset = HEADER_LEN;
        let end = HEADER_LEN + msg_len;

        while offset + 4 <= end {
            let attr_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let attr_len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4;

            if offset + attr_len > end {
                return Err(Error::MalformedStun("attribute overruns message".into()));
            }
            let value = &data[offset..offset + attr_len];
            attributes.push(decode_attribute(attr_type, value, &transaction_id)?);

            offset += attr_len;
            offset += (4 - attr_len % 4) % 4;
        }

        Ok(Self {
            msg_type,
            transaction_id,
            attributes,
        })
    }

    /// Verify the MESSAGE-INTEGRITY of a received message against `key`.
    ///
    /// `raw` must be the exact bytes the message was decoded from. Returns
    /// false when no MESSAGE-INTEGRITY attribute is present.
    pub fn verify_integrity(raw: &[u8], key: &[u8]) -> bool {
        let Some((mi_offset, expected)) = find_message_integrity(raw) else {
            return false;
        };

        // Recompute with the length field patched to end at MESSAGE-INTEGRITY
        let patched_len = mi_offset - HEADER_LEN + 24;
        let mut input = Vec::with_capacity(mi_offset);
        input.extend_from_slice(&raw[..2]);
        input.extend_from_slice(&(patched_len as u16).to_be_bytes());
        input.extend_from_slice(&raw[4..mi_offset]);

        let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(&input);
        mac.verify_slice(&expected).is_ok()
    }
}

fn put_header(buf: &mut Vec<u8>, msg_type: MessageType, len: usize, transaction_id: &[u8; 12]) {
    buf.extend_from_slice(&(msg_type as u16).to_be_bytes());
    buf.extend_from_slice(&(len as u16).to_be_bytes());
    buf.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
    buf.extend_from_slice(transaction_id);
}

fn put_raw_attribute(buf: &mut BytesMut, attr_type: u16, value: &[u8]) {
    buf.put_u16(attr_type);
    buf.put_u16(value.len() as u16);
    buf.put_slice(value);
    let padding = (4 - value.len() % 4) % 4;
    buf.put_bytes(0, padding);
}

fn encode_attribute(buf: &mut BytesMut, attribute: &Attribute, transaction_id: &[u8; 12]) {
    match attribute {
        Attribute::XorMappedAddress(addr) => {
            let v = encode_xor_address(addr, transaction_id);
            put_raw_attribute(buf, attr::XOR_MAPPED_ADDRESS, &v);
        }
        Attribute::XorRelayedAddress(addr) => {
            let v = encode_xor_address(addr, transaction_id);
            put_raw_attribute(buf, attr::XOR_RELAYED_ADDRESS, &v);
        }
        Attribute::XorPeerAddress(addr) => {
            let v = encode_xor_address(addr, transaction_id);
            put_raw_attribute(buf, attr::XOR_PEER_ADDRESS, &v);
        }
        Attribute::Username(name) => put_raw_attribute(buf, attr::USERNAME, name.as_bytes()),
        Attribute::MessageIntegrity(digest) => {
            put_raw_attribute(buf, attr::MESSAGE_INTEGRITY, digest)
        }
        Attribute::ErrorCode { code, reason } => {
            let mut v = Vec::with_capacity(4 + reason.len());
            v.extend_from_slice(&[0, 0, (code / 100) as u8, (code % 100) as u8]);
            v.extend_from_slice(reason.as_bytes());
            put_raw_attribute(buf, attr::ERROR_CODE, &v);
        }
        Attribute::Lifetime(secs) => put_raw_attribute(buf, attr::LIFETIME, &secs.to_be_bytes()),
        Attribute::RequestedTransport(proto) => {
            put_raw_attribute(buf, attr::REQUESTED_TRANSPORT, &[*proto, 0, 0, 0])
        }
        Attribute::Priority(p) => put_raw_attribute(buf, attr::PRIORITY, &p.to_be_bytes()),
        Attribute::UseCandidate => put_raw_attribute(buf, attr::USE_CANDIDATE, &[]),
        Attribute::IceControlling(tb) => {
            put_raw_attribute(buf, attr::ICE_CONTROLLING, &tb.to_be_bytes())
        }
        Attribute::IceControlled(tb) => {
            put_raw_attribute(buf, attr::ICE_CONTROLLED, &tb.to_be_bytes())
        }
        Attribute::Data(data) => put_raw_attribute(buf, attr::DATA, data),
        Attribute::Software(s) => put_raw_attribute(buf, attr::SOFTWARE, s.as_bytes()),
        Attribute::Realm(s) => put_raw_attribute(buf, attr::REALM, s.as_bytes()),
        Attribute::Nonce(n) => put_raw_attribute(buf, attr::NONCE, n),
        Attribute::Unknown { attr_type, data } => put_raw_attribute(buf, *attr_type, data),
    }
}

fn decode_attribute(attr_type: u16, value: &[u8], transaction_id: &[u8; 12]) -> Result<Attribute> {
    let attribute = match attr_type {
        attr::XOR_MAPPED_ADDRESS => {
            Attribute::XorMappedAddress(decode_xor_address(value, transaction_id)?)
        }
        attr::XOR_RELAYED_ADDRESS => {
            Attribute::XorRelayedAddress(decode_xor_address(value, transaction_id)?)
        }
        attr::XOR_PEER_ADDRESS => {
            Attribute::XorPeerAddress(decode_xor_address(value, transaction_id)?)
        }
        attr::USERNAME => Attribute::Username(String::from_utf8_lossy(value).into_owned()),
        attr::MESSAGE_INTEGRITY => {
            let digest: [u8; 20] = value
                .try_into()
                .map_err(|_| Error::MalformedStun("MESSAGE-INTEGRITY length".into()))?;
            Attribute::MessageIntegrity(digest)
        }
        attr::ERROR_CODE => {
            if value.len() < 4 {
                return Err(Error::MalformedStun("short ERROR-CODE".into()));
            }
            let code = (value[2] & 0x07) as u16 * 100 + value[3] as u16;
            Attribute::ErrorCode {
                code,
                reason: String::from_utf8_lossy(&value[4..]).into_owned(),
            }
        }
        attr::LIFETIME => {
            let secs: [u8; 4] = value
                .try_into()
                .map_err(|_| Error::MalformedStun("LIFETIME length".into()))?;
            Attribute::Lifetime(u32::from_be_bytes(secs))
        }
        attr::REQUESTED_TRANSPORT => {
            if value.is_empty() {
                return Err(Error::MalformedStun("empty REQUESTED-TRANSPORT".into()));
            }
            Attribute::RequestedTransport(value[0])
        }
        attr::PRIORITY => {
            let p: [u8; 4] = value
                .try_into()
                .map_err(|_| Error::MalformedStun("PRIORITY length".into()))?;
            Attribute::Priority(u32::from_be_bytes(p))
        }
        attr::USE_CANDIDATE => Attribute::UseCandidate,
        attr::ICE_CONTROLLING => {
            let tb: [u8; 8] = value
                .try_into()
                .map_err(|_| Error::MalformedStun("ICE-CONTROLLING length".into()))?;
            Attribute::IceControlling(u64::from_be_bytes(tb))
        }
        attr::ICE_CONTROLLED => {
            let tb: [u8; 8] = value
                .try_into()
                .map_err(|_| Error::MalformedStun("ICE-CONTROLLED length".into()))?;
            Attribute::IceControlled(u64::from_be_bytes(tb))
        }
        attr::DATA => Attribute::Data(Bytes::copy_from_slice(value)),
        attr::SOFTWARE => Attribute::Software(String::from_utf8_lossy(value).into_owned()),
        attr::REALM => Attribute::Realm(String::from_utf8_lossy(value).into_owned()),
        attr::NONCE => Attribute::Nonce(value.to_vec()),
        _ => Attribute::Unknown {
            attr_type,
            data: value.to_vec(),
        },
    };
    Ok(attribute)
}

fn encode_xor_address(addr: &SocketAddr, transaction_id: &[u8; 12]) -> Vec<u8> {
    let cookie = MAGIC_COOKIE.to_be_bytes();
    let xport = addr.port() ^ (MAGIC_COOKIE >> 16) as u16;

    match addr.ip() {
        IpAddr::V4(ip) => {
            let mut octets = ip.octets();
            for (o, c) in octets.iter_mut().zip(cookie.iter()) {
                *o ^= c;
            }
            let mut v = Vec::with_capacity(8);
            v.extend_from_slice(&[0, 0x01]);
            v.extend_from_slice(&xport.to_be_bytes());
            v.extend_from_slice(&octets);
            v
        }
        IpAddr::V6(ip) => {
            let mut octets = ip.octets();
            for (o, c) in octets.iter_mut().take(4).zip(cookie.iter()) {
                *o ^= c;
            }
            for (o, t) in octets.iter_mut().skip(4).zip(transaction_id.iter()) {
                *o ^= t;
            }
            let mut v = Vec::with_capacity(20);
            v.extend_from_slice(&[0, 0x02]);
            v.extend_from_slice(&xport.to_be_bytes());
            v.extend_from_slice(&octets);
            v
        }
    }
}

fn decode_xor_address(value: &[u8], transaction_id: &[u8; 12]) -> Result<SocketAddr> {
    if value.len() < 4 {
        return Err(Error::MalformedStun("short address attribute".into()));
    }
    let family = value[1];
    let port = u16::from_be_bytes([value[2], value[3]]) ^ (MAGIC_COOKIE >> 16) as u16;
    let cookie = MAGIC_COOKIE.to_be_bytes();

    let ip = match family {
        0x01 => {
            if value.len() < 8 {
                return Err(Error::MalformedStun("short IPv4 address".into()));
            }
            let mut octets = [value[4], value[5], value[6], value[7]];
            for (o, c) in octets.iter_mut().zip(cookie.iter()) {
                *o ^= c;
            }
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        0x02 => {
            if value.len() < 20 {
                return Err(Error::MalformedStun("short IPv6 address".into()));
            }
            let mut octets: [u8; 16] = value[4..20].try_into().unwrap();
            for (o, c) in octets.iter_mut().take(4).zip(cookie.iter()) {
                *o ^= c;
            }
            for (o, t) in octets.iter_mut().skip(4).zip(transaction_id.iter()) {
                *o ^= t;
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        other => {
            return Err(Error::MalformedStun(format!("unknown address family {other}")));
        }
    };

    Ok(SocketAddr::new(ip, port))
}

/// Locate the MESSAGE-INTEGRITY attribute in a raw message, returning its
/// byte offset and digest value.
fn find_message_integrity(raw: &[u8]) -> Option<(usize, [u8; 20])> {
    if raw.len() < HEADER_LEN {
        return None;
    }
    let msg_len = u16::from_be_bytes([raw[2], raw[3]]) as usize;
    let end = (HEADER_LEN + msg_len).min(raw.len());

    let mut offset = HEADER_LEN;
    while offset + 4 <= end {
        let attr_type = u16::from_be_bytes([raw[offset], raw[offset + 1]]);
        let attr_len = u16::from_be_bytes([raw[offset + 2], raw[offset + 3]]) as usize;
        if attr_type == attr::MESSAGE_INTEGRITY && attr_len == 20 && offset + 24 <= end {
            let digest: [u8; 20] = raw[offset + 4..offset + 24].try_into().ok()?;
            return Some((offset, digest));
        }
        offset += 4 + attr_len + (4 - attr_len % 4) % 4;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_request_round_trip() {
        let txid = Message::random_transaction_id();
        let msg = Message::binding_request(txid)
            .with_attribute(Attribute::Username("remote:local".into()))
            .with_attribute(Attribute::Priority(0x6e7f00ff))
            .with_attribute(Attribute::IceControlling(42))
            .with_attribute(Attribute::UseCandidate);

        let encoded = msg.encode(None);
        let decoded = Message::decode(&encoded).unwrap();

        assert_eq!(decoded.msg_type, MessageType::BindingRequest);
        assert_eq!(decoded.transaction_id, txid);
        assert_eq!(decoded.username(), Some("remote:local"));
        assert_eq!(decoded.priority(), Some(0x6e7f00ff));
        assert!(decoded.has_use_candidate());
    }

    #[test]
    fn test_xor_mapped_address_v4() {
        let txid = [7u8; 12];
        let addr: SocketAddr = "192.0.2.1:32853".parse().unwrap();
        let msg = Message::binding_response(txid, addr);
        let decoded = Message::decode(&msg.encode(None)).unwrap();
        assert_eq!(decoded.xor_mapped_address(), Some(addr));
    }

    #[test]
    fn test_xor_mapped_address_v6() {
        let txid = [0x21u8; 12];
        let addr: SocketAddr = "[2001:db8::42]:9".parse().unwrap();
        let msg = Message::binding_response(txid, addr);
        let decoded = Message::decode(&msg.encode(None)).unwrap();
        assert_eq!(decoded.xor_mapped_address(), Some(addr));
    }

    #[test]
    fn test_message_integrity_verifies() {
        let txid = Message::random_transaction_id();
        let key = b"swordfish";
        let msg = Message::binding_request(txid)
            .with_attribute(Attribute::Username("a:b".into()));

        let encoded = msg.encode(Some(key));
        assert!(Message::verify_integrity(&encoded, key));
        assert!(!Message::verify_integrity(&encoded, b"wrong"));

        // No MESSAGE-INTEGRITY present at all
        let plain = msg.encode(None);
        assert!(!Message::verify_integrity(&plain, key));
    }

    #[test]
    fn test_is_stun_requires_cookie() {
        let txid = [1u8; 12];
        let encoded = Message::binding_request(txid).encode(None);
        assert!(Message::is_stun(&encoded));

        let mut broken = encoded.clone();
        broken[4] = 0xFF;
        assert!(!Message::is_stun(&broken));
        assert!(!Message::is_stun(&[0u8; 4]));
    }

    #[test]
    fn test_allocate_error_response() {
        let txid = [3u8; 12];
        let msg = Message::new(MessageType::AllocateErrorResponse, txid).with_attribute(
            Attribute::ErrorCode {
                code: 401,
                reason: "Unauthorized".into(),
            },
        );
        let decoded = Message::decode(&msg.encode(None)).unwrap();
        assert!(decoded.msg_type.is_error());
        assert_eq!(decoded.error_code(), Some((401, "Unauthorized")));
    }

    #[test]
    fn test_send_indication_carries_data() {
        let txid = [9u8; 12];
        let peer: SocketAddr = "198.51.100.7:4000".parse().unwrap();
        let payload = Bytes::from_static(b"\x80\x60datagram");
        let msg = Message::send_indication(txid, peer, payload.clone());
        let decoded = Message::decode(&msg.encode(None)).unwrap();
        assert_eq!(decoded.peer_address(), Some(peer));
        assert_eq!(decoded.data(), Some(&payload));
    }

    #[test]
    fn test_truncated_message_rejected() {
        let txid = [4u8; 12];
        let mut encoded = Message::binding_request(txid)
            .with_attribute(Attribute::Username("x:y".into()))
            .encode(None);
        encoded.truncate(HEADER_LEN + 2);
        assert!(Message::decode(&encoded).is_err());
    }
}
