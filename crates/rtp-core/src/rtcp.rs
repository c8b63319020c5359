//! RTCP packet codec per RFC 3550 section 6
//!
//! Covers the packet types the session needs for keepalive reporting:
//! Sender Report, Receiver Report, SDES (CNAME) and BYE. Compound packets
//! are parsed chunk by chunk.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::packet::RtpSsrc;

/// RTCP version (same as RTP, always 2)
pub const RTCP_VERSION: u8 = 2;

/// RTCP packet types as defined in RFC 3550
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RtcpPacketType {
    /// Sender Report (SR)
    SenderReport = 200,

    /// Receiver Report (RR)
    ReceiverReport = 201,

    /// Source Description (SDES)
    SourceDescription = 202,

    /// Goodbye (BYE)
    Goodbye = 203,

    /// Application-Defined (APP)
    ApplicationDefined = 204,
}

impl TryFrom<u8> for RtcpPacketType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            200 => Ok(RtcpPacketType::SenderReport),
            201 => Ok(RtcpPacketType::ReceiverReport),
            202 => Ok(RtcpPacketType::SourceDescription),
            203 => Ok(RtcpPacketType::Goodbye),
            204 => Ok(RtcpPacketType::ApplicationDefined),
            _ => Err(Error::RtcpError(format!(
                "unknown RTCP packet type: {value}"
            ))),
        }
    }
}

/// NTP timestamp representation (64 bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NtpTimestamp {
    /// Seconds since January 1, 1900
    pub seconds: u32,

    /// Fraction of a second
    pub fraction: u32,
}

impl NtpTimestamp {
    /// Current system time as an NTP timestamp.
    ///
    /// The NTP epoch starts 2208988800 seconds before the UNIX epoch.
    pub fn now() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0));
        let ntp_seconds = now.as_secs() + 2_208_988_800;
        let ntp_fraction = (u64::from(now.subsec_nanos()) * 0x1_0000_0000 / 1_000_000_000) as u32;
        Self {
            seconds: ntp_seconds as u32,
            fraction: ntp_fraction,
        }
    }

    /// Convert to a 64-bit representation
    pub fn to_u64(self) -> u64 {
        (u64::from(self.seconds)) << 32 | u64::from(self.fraction)
    }

    /// Convert from a 64-bit representation
    pub fn from_u64(value: u64) -> Self {
        Self {
            seconds: (value >> 32) as u32,
            fraction: value as u32,
        }
    }
}

/// Report block in SR/RR packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReportBlock {
    /// SSRC this report is about
    pub ssrc: RtpSsrc,

    /// Fraction of packets lost since the last report
    pub fraction_lost: u8,

    /// Cumulative packets lost (24 bits on the wire)
    pub cumulative_lost: u32,

    /// Extended highest sequence number received
    pub highest_seq: u32,

    /// Interarrival jitter estimate
    pub jitter: u32,

    /// Middle 32 bits of the last SR NTP timestamp
    pub last_sr: u32,

    /// Delay since the last SR in 1/65536 s units
    pub delay_since_last_sr: u32,
}

impl ReportBlock {
    fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < 24 {
            return Err(Error::RtcpError("short report block".into()));
        }
        let ssrc = buf.get_u32();
        let word = buf.get_u32();
        Ok(Self {
            ssrc,
            fraction_lost: (word >> 24) as u8,
            cumulative_lost: word & 0x00FF_FFFF,
            highest_seq: buf.get_u32(),
            jitter: buf.get_u32(),
            last_sr: buf.get_u32(),
            delay_since_last_sr: buf.get_u32(),
        })
    }

    fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u32(self.ssrc);
        buf.put_u32(u32::from(self.fraction_lost) << 24 | (self.cumulative_lost & 0x00FF_FFFF));
        buf.put_u32(self.highest_seq);
        buf.put_u32(self.jitter);
        buf.put_u32(self.last_sr);
        buf.put_u32(self.delay_since_last_sr);
    }
}

/// Sender Report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderReport {
    /// Sender SSRC
    pub ssrc: RtpSsrc,

    /// NTP timestamp of this report
    pub ntp: NtpTimestamp,

    /// RTP timestamp correlated with `ntp`
    pub rtp_timestamp: u32,

    /// Total packets sent
    pub packet_count: u32,

    /// Total payload octets sent
    pub octet_count: u32,

    /// Reception report blocks
    pub reports: Vec<ReportBlock>,
}

/// Receiver Report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverReport {
    /// Reporter SSRC
    pub ssrc: RtpSsrc,

    /// Reception report blocks
    pub reports: Vec<ReportBlock>,
}

/// One RTCP packet in a compound datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    /// Sender Report
    SenderReport(SenderReport),

    /// Receiver Report
    ReceiverReport(ReceiverReport),

    /// SDES with a single CNAME chunk
    SourceDescription {
        /// Described SSRC
        ssrc: RtpSsrc,
        /// CNAME string
        cname: String,
    },

    /// BYE
    Goodbye {
        /// Departing SSRCs
        ssrcs: Vec<RtpSsrc>,
    },
}

impl RtcpPacket {
    /// Serialize a single packet, padding the body to 32-bit words
    pub fn serialize(&self) -> Bytes {
        let mut body = BytesMut::new();
        let (packet_type, count) = match self {
            RtcpPacket::SenderReport(sr) => {
                body.put_u32(sr.ssrc);
                body.put_u32(sr.ntp.seconds);
                body.put_u32(sr.ntp.fraction);
                body.put_u32(sr.rtp_timestamp);
                body.put_u32(sr.packet_count);
                body.put_u32(sr.octet_count);
                for report in &sr.reports {
                    report.serialize(&mut body);
                }
                (RtcpPacketType::SenderReport, sr.reports.len() as u8)
            }
            RtcpPacket::ReceiverReport(rr) => {
                body.put_u32(rr.ssrc);
                for report in &rr.reports {
                    report.serialize(&mut body);
                }
                (RtcpPacketType::ReceiverReport, rr.reports.len() as u8)
            }
            RtcpPacket::SourceDescription { ssrc, cname } => {
                body.put_u32(*ssrc);
                body.put_u8(1); // CNAME item type
                body.put_u8(cname.len() as u8);
                body.put_slice(cname.as_bytes());
                body.put_u8(0); // end of items
                while body.len() % 4 != 0 {
                    body.put_u8(0);
                }
                (RtcpPacketType::SourceDescription, 1)
            }
            RtcpPacket::Goodbye { ssrcs } => {
                for ssrc in ssrcs {
                    body.put_u32(*ssrc);
                }
                (RtcpPacketType::Goodbye, ssrcs.len() as u8)
            }
        };

        let length_words = (body.len() / 4) as u16;
        let mut out = BytesMut::with_capacity(4 + body.len());
        out.put_u8(RTCP_VERSION << 6 | (count & 0x1F));
        out.put_u8(packet_type as u8);
        out.put_u16(length_words);
        out.put_slice(&body);
        out.freeze()
    }

    /// Parse every packet in a compound RTCP datagram
    pub fn parse_compound(data: &[u8]) -> Result<Vec<RtcpPacket>> {
        let mut packets = Vec::new();
        let mut offset = 0;

        while offset + 4 <= data.len() {
            let b0 = data[offset];
            if b0 >> 6 != RTCP_VERSION {
                return Err(Error::RtcpError(format!("bad RTCP version {}", b0 >> 6)));
            }
            let count = (b0 & 0x1F) as usize;
            let packet_type = RtcpPacketType::try_from(data[offset + 1])?;
            let length_words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            let packet_len = 4 + length_words * 4;
            if offset + packet_len > data.len() {
                return Err(Error::RtcpError("truncated compound packet".into()));
            }

            let mut body = &data[offset + 4..offset + packet_len];
            match packet_type {
                RtcpPacketType::SenderReport => {
                    if body.remaining() < 24 {
                        return Err(Error::RtcpError("short sender report".into()));
                    }
                    let ssrc = body.get_u32();
                    let ntp = NtpTimestamp {
                        seconds: body.get_u32(),
                        fraction: body.get_u32(),
                    };
                    let rtp_timestamp = body.get_u32();
                    let packet_count = body.get_u32();
                    let octet_count = body.get_u32();
                    let mut reports = Vec::with_capacity(count);
                    for _ in 0..count {
                        reports.push(ReportBlock::parse(&mut body)?);
                    }
                    packets.push(RtcpPacket::SenderReport(SenderReport {
                        ssrc,
                        ntp,
                        rtp_timestamp,
                        packet_count,
                        octet_count,
                        reports,
                    }));
                }
                RtcpPacketType::ReceiverReport => {
                    if body.remaining() < 4 {
                        return Err(Error::RtcpError("short receiver report".into()));
                    }
                    let ssrc = body.get_u32();
                    let mut reports = Vec::with_capacity(count);
                    for _ in 0..count {
                        reports.push(ReportBlock::parse(&mut body)?);
                    }
                    packets.push(RtcpPacket::ReceiverReport(ReceiverReport { ssrc, reports }));
                }
                RtcpPacketType::SourceDescription => {
                    if body.remaining() >= 6 {
                        let ssrc = body.get_u32();
                        let item_type = body.get_u8();
                        if item_type == 1 {
                            let len = body.get_u8() as usize;
                            if body.remaining() >= len {
                                let cname =
                                    String::from_utf8_lossy(&body.chunk()[..len]).into_owned();
                                packets.push(RtcpPacket::SourceDescription { ssrc, cname });
                            }
                        }
                    }
                }
                RtcpPacketType::Goodbye => {
                    let mut ssrcs = Vec::with_capacity(count);
                    for _ in 0..count {
                        if body.remaining() < 4 {
                            return Err(Error::RtcpError("short BYE".into()));
                        }
                        ssrcs.push(body.get_u32());
                    }
                    packets.push(RtcpPacket::Goodbye { ssrcs });
                }
                RtcpPacketType::ApplicationDefined => {
                    // APP packets are skipped
                }
            }

            offset += packet_len;
        }

        if packets.is_empty() {
            return Err(Error::RtcpError("empty compound packet".into()));
        }
        Ok(packets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ntp_round_trip() {
        let ts = NtpTimestamp::now();
        assert_eq!(NtpTimestamp::from_u64(ts.to_u64()), ts);
    }

    #[test]
    fn test_sender_report_round_trip() {
        let sr = RtcpPacket::SenderReport(SenderReport {
            ssrc: 0x1234,
            ntp: NtpTimestamp {
                seconds: 100,
                fraction: 200,
            },
            rtp_timestamp: 48000,
            packet_count: 50,
            octet_count: 48000,
            reports: vec![ReportBlock {
                ssrc: 0x5678,
                fraction_lost: 3,
                cumulative_lost: 12,
                highest_seq: 1050,
                jitter: 7,
                last_sr: 0,
                delay_since_last_sr: 0,
            }],
        });
        let wire = sr.serialize();
        let parsed = RtcpPacket::parse_compound(&wire).unwrap();
        assert_eq!(parsed, vec![sr]);
    }

    #[test]
    fn test_receiver_report_round_trip() {
        let rr = RtcpPacket::ReceiverReport(ReceiverReport {
            ssrc: 9,
            reports: vec![],
        });
        let parsed = RtcpPacket::parse_compound(&rr.serialize()).unwrap();
        assert_eq!(parsed, vec![rr]);
    }

    #[test]
    fn test_compound_sr_plus_sdes() {
        let sr = RtcpPacket::SenderReport(SenderReport {
            ssrc: 1,
            ntp: NtpTimestamp::default(),
            rtp_timestamp: 0,
            packet_count: 0,
            octet_count: 0,
            reports: vec![],
        });
        let sdes = RtcpPacket::SourceDescription {
            ssrc: 1,
            cname: "flow@host".into(),
        };
        let mut compound = BytesMut::new();
        compound.put_slice(&sr.serialize());
        compound.put_slice(&sdes.serialize());

        let parsed = RtcpPacket::parse_compound(&compound).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], sr);
        match &parsed[1] {
            RtcpPacket::SourceDescription { ssrc, cname } => {
                assert_eq!(*ssrc, 1);
                assert_eq!(cname, "flow@host");
            }
            other => panic!("unexpected packet: {other:?}"),
        }
    }

    #[test]
    fn test_bad_version_rejected() {
        let rr = RtcpPacket::ReceiverReport(ReceiverReport {
            ssrc: 9,
            reports: vec![],
        });
        let mut wire = BytesMut::from(&rr.serialize()[..]);
        wire[0] = 0x40 | (wire[0] & 0x3F);
        assert!(RtcpPacket::parse_compound(&wire).is_err());
    }
}
