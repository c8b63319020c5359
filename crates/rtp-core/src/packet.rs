//! RTP packet codec per RFC 3550 section 5.1

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// RTP protocol version, always 2
pub const RTP_VERSION: u8 = 2;

/// Fixed header length without CSRCs
pub const RTP_HEADER_LEN: usize = 12;

/// SSRC identifier
pub type RtpSsrc = u32;

/// RTP fixed header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// Protocol version
    pub version: u8,

    /// Padding flag
    pub padding: bool,

    /// Extension flag
    pub extension: bool,

    /// Marker bit
    pub marker: bool,

    /// Payload type
    pub payload_type: u8,

    /// Sequence number
    pub sequence: u16,

    /// Media timestamp
    pub timestamp: u32,

    /// Synchronization source
    pub ssrc: RtpSsrc,

    /// Contributing sources
    pub csrc: Vec<RtpSsrc>,
}

impl RtpHeader {
    /// Create a header with the given identifiers and no flags set
    pub fn new(payload_type: u8, sequence: u16, timestamp: u32, ssrc: RtpSsrc) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            marker: false,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            csrc: Vec::new(),
        }
    }

    /// Serialized length of this header
    pub fn len(&self) -> usize {
        RTP_HEADER_LEN + self.csrc.len() * 4
    }

    /// Parse a header from the front of `data`, returning the header and
    /// the offset where the payload begins.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < RTP_HEADER_LEN {
            return Err(Error::MalformedPacket(format!(
                "RTP packet too short: {} bytes",
                data.len()
            )));
        }

        let b0 = data[0];
        let version = b0 >> 6;
        if version != RTP_VERSION {
            return Err(Error::MalformedPacket(format!("RTP version {version}")));
        }
        let padding = b0 & 0x20 != 0;
        let extension = b0 & 0x10 != 0;
        let csrc_count = (b0 & 0x0F) as usize;

        let b1 = data[1];
        let marker = b1 & 0x80 != 0;
        let payload_type = b1 & 0x7F;

        let mut buf = &data[2..];
        let sequence = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        let mut offset = RTP_HEADER_LEN;
        if data.len() < offset + csrc_count * 4 {
            return Err(Error::MalformedPacket("truncated CSRC list".into()));
        }
        let mut csrc = Vec::with_capacity(csrc_count);
        for _ in 0..csrc_count {
            csrc.push(buf.get_u32());
        }
        offset += csrc_count * 4;

        // Header extensions are skipped, not interpreted
        if extension {
            if data.len() < offset + 4 {
                return Err(Error::MalformedPacket("truncated extension header".into()));
            }
            let ext_len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize * 4;
            offset += 4 + ext_len;
            if data.len() < offset {
                return Err(Error::MalformedPacket("truncated extension body".into()));
            }
        }

        Ok((
            Self {
                version,
                padding,
                extension,
                marker,
                payload_type,
                sequence,
                timestamp,
                ssrc,
                csrc,
            },
            offset,
        ))
    }

    /// Serialize the header into `buf`
    pub fn serialize(&self, buf: &mut BytesMut) {
        let mut b0 = self.version << 6;
        if self.padding {
            b0 |= 0x20;
        }
        if self.extension {
            b0 |= 0x10;
        }
        b0 |= self.csrc.len() as u8 & 0x0F;
        buf.put_u8(b0);

        let mut b1 = self.payload_type & 0x7F;
        if self.marker {
            b1 |= 0x80;
        }
        buf.put_u8(b1);
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        for csrc in &self.csrc {
            buf.put_u32(*csrc);
        }
    }
}

/// A full RTP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// Packet header
    pub header: RtpHeader,

    /// Media payload
    pub payload: Bytes,
}

impl RtpPacket {
    /// Create a packet from header and payload
    pub fn new(header: RtpHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Parse a packet
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (header, offset) = RtpHeader::parse(data)?;
        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(&data[offset..]),
        })
    }

    /// Serialize into a fresh buffer
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.header.len() + self.payload.len());
        self.header.serialize(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let header = RtpHeader::new(96, 1000, 48000, 0xDEADBEEF);
        let mut buf = BytesMut::new();
        header.serialize(&mut buf);
        assert_eq!(buf.len(), RTP_HEADER_LEN);

        let (parsed, offset) = RtpHeader::parse(&buf).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(offset, RTP_HEADER_LEN);
    }

    #[test]
    fn test_packet_round_trip_with_marker() {
        let mut header = RtpHeader::new(100, 7, 90000, 42);
        header.marker = true;
        let packet = RtpPacket::new(header, Bytes::from_static(b"payload"));
        let wire = packet.serialize();
        let parsed = RtpPacket::parse(&wire).unwrap();
        assert_eq!(parsed, packet);
        assert!(parsed.header.marker);
    }

    #[test]
    fn test_csrc_list() {
        let mut header = RtpHeader::new(96, 1, 2, 3);
        header.csrc = vec![10, 20, 30];
        let mut buf = BytesMut::new();
        header.serialize(&mut buf);
        let (parsed, offset) = RtpHeader::parse(&buf).unwrap();
        assert_eq!(parsed.csrc, vec![10, 20, 30]);
        assert_eq!(offset, RTP_HEADER_LEN + 12);
    }

    #[test]
    fn test_bad_version_rejected() {
        let mut buf = BytesMut::new();
        RtpHeader::new(96, 1, 2, 3).serialize(&mut buf);
        buf[0] = 0x40 | (buf[0] & 0x3F);
        assert!(RtpHeader::parse(&buf).is_err());
    }

    #[test]
    fn test_short_packet_rejected() {
        assert!(RtpHeader::parse(&[0x80, 96, 0, 1]).is_err());
    }
}
