//! SDP session description model
//!
//! A [`SessionDescription`] mirrors the RFC 4566 structure the session
//! exchanges: session-level origin/timing, a BUNDLE group, and one media
//! section per media kind with the ICE, DTLS and SSRC attributes carried
//! as typed fields. Candidates are kept in their SDP value form; the ICE
//! layer owns their interpretation.

use std::fmt;

use crate::error::{Error, Result};

/// Media section kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Audio media
    Audio,

    /// Video media
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

impl MediaKind {
    /// Parse the `m=` media token
    pub fn from_token(token: &str) -> Result<Self> {
        match token {
            "audio" => Ok(MediaKind::Audio),
            "video" => Ok(MediaKind::Video),
            other => Err(Error::Parse(format!("unknown media kind: {other}"))),
        }
    }
}

/// DTLS setup role from `a=setup`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpSetup {
    /// Can act as either endpoint; offers carry this
    ActPass,

    /// Initiates the DTLS handshake
    Active,

    /// Waits for the peer's ClientHello
    Passive,
}

impl SdpSetup {
    /// SDP token form
    pub fn token(&self) -> &'static str {
        match self {
            SdpSetup::ActPass => "actpass",
            SdpSetup::Active => "active",
            SdpSetup::Passive => "passive",
        }
    }

    /// Parse the SDP token
    pub fn from_token(token: &str) -> Result<Self> {
        match token {
            "actpass" => Ok(SdpSetup::ActPass),
            "active" => Ok(SdpSetup::Active),
            "passive" => Ok(SdpSetup::Passive),
            other => Err(Error::Parse(format!("unknown setup value: {other}"))),
        }
    }

    /// The answerer's setup for a given offered setup: `active` against
    /// actpass or passive offers, `passive` against active offers.
    pub fn answer_to(offered: SdpSetup) -> SdpSetup {
        match offered {
            SdpSetup::ActPass | SdpSetup::Passive => SdpSetup::Active,
            SdpSetup::Active => SdpSetup::Passive,
        }
    }
}

impl fmt::Display for SdpSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// One `a=rtpmap` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpMap {
    /// Payload type
    pub payload_type: u8,

    /// Encoding name, e.g. `opus`
    pub encoding: String,

    /// Clock rate in Hz
    pub clock_rate: u32,

    /// Channel count when present (audio)
    pub channels: Option<u8>,
}

impl fmt::Display for RtpMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{}",
            self.payload_type, self.encoding, self.clock_rate
        )?;
        if let Some(channels) = self.channels {
            write!(f, "/{channels}")?;
        }
        Ok(())
    }
}

/// Certificate fingerprint from `a=fingerprint`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Hash function, e.g. `sha-256`
    pub algorithm: String,

    /// Colon-separated hex digest
    pub value: String,
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.algorithm, self.value)
    }
}

/// One `a=ssrc` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsrcAttribute {
    /// The SSRC being described
    pub ssrc: u32,

    /// Attribute name, e.g. `cname`
    pub attribute: String,

    /// Attribute value when present
    pub value: Option<String>,
}

/// `o=` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// Username field, conventionally `-`
    pub username: String,

    /// Session id
    pub session_id: u64,

    /// Session version, bumped on renegotiation
    pub session_version: u64,

    /// Unicast address
    pub address: String,
}

impl Origin {
    /// Create an origin for `address` with a random session id
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            username: "-".into(),
            session_id: rand::random::<u32>() as u64,
            session_version: 1,
            address: address.into(),
        }
    }
}

/// One `m=` section with its attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    /// Media kind
    pub kind: MediaKind,

    /// Port from the `m=` line (the ICE-selected port for the offerer)
    pub port: u16,

    /// Transport profile, `UDP/TLS/RTP/SAVPF` for DTLS-SRTP
    pub protocol: String,

    /// Payload types in preference order
    pub formats: Vec<u8>,

    /// `a=mid`
    pub mid: Option<String>,

    /// Connection address for the `c=` line
    pub connection: Option<String>,

    /// `a=rtpmap` entries
    pub rtpmaps: Vec<RtpMap>,

    /// `a=fmtp` entries as (payload type, parameter string)
    pub fmtps: Vec<(u8, String)>,

    /// `a=ssrc` entries
    pub ssrcs: Vec<SsrcAttribute>,

    /// Media-level `a=ice-ufrag`
    pub ice_ufrag: Option<String>,

    /// Media-level `a=ice-pwd`
    pub ice_pwd: Option<String>,

    /// Media-level `a=fingerprint`
    pub fingerprint: Option<Fingerprint>,

    /// `a=setup`
    pub setup: Option<SdpSetup>,

    /// Candidate attribute values, uninterpreted
    pub candidates: Vec<String>,

    /// `a=end-of-candidates` present
    pub end_of_candidates: bool,

    /// `a=rtcp-mux` present
    pub rtcp_mux: bool,

    /// Attributes this layer does not interpret, kept verbatim
    pub extra_attributes: Vec<(String, Option<String>)>,
}

impl MediaDescription {
    /// Create an empty section for `kind` on `port`
    pub fn new(kind: MediaKind, port: u16) -> Self {
        Self {
            kind,
            port,
            protocol: "UDP/TLS/RTP/SAVPF".into(),
            formats: Vec::new(),
            mid: None,
            connection: None,
            rtpmaps: Vec::new(),
            fmtps: Vec::new(),
            ssrcs: Vec::new(),
            ice_ufrag: None,
            ice_pwd: None,
            fingerprint: None,
            setup: None,
            candidates: Vec::new(),
            end_of_candidates: false,
            rtcp_mux: false,
            extra_attributes: Vec::new(),
        }
    }

    /// The rtpmap for `payload_type`, if declared
    pub fn rtpmap(&self, payload_type: u8) -> Option<&RtpMap> {
        self.rtpmaps.iter().find(|m| m.payload_type == payload_type)
    }

    /// First SSRC declared for this section
    pub fn first_ssrc(&self) -> Option<u32> {
        self.ssrcs.first().map(|s| s.ssrc)
    }
}

/// A complete session description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    /// `o=` line
    pub origin: Origin,

    /// `s=` line, conventionally `-`
    pub session_name: String,

    /// mids in the `a=group:BUNDLE` line
    pub bundle: Vec<String>,

    /// Session-level `a=ice-ufrag`
    pub ice_ufrag: Option<String>,

    /// Session-level `a=ice-pwd`
    pub ice_pwd: Option<String>,

    /// Session-level `a=fingerprint`
    pub fingerprint: Option<Fingerprint>,

    /// Uninterpreted session attributes
    pub extra_attributes: Vec<(String, Option<String>)>,

    /// Media sections in order
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    /// Create a description with no media sections
    pub fn new(origin: Origin) -> Self {
        Self {
            origin,
            session_name: "-".into(),
            bundle: Vec::new(),
            ice_ufrag: None,
            ice_pwd: None,
            fingerprint: None,
            extra_attributes: Vec::new(),
            media: Vec::new(),
        }
    }

    /// The media section for `kind`, if present
    pub fn media_section(&self, kind: MediaKind) -> Option<&MediaDescription> {
        self.media.iter().find(|m| m.kind == kind)
    }

    /// Effective ice-ufrag for a section: media-level wins over session
    pub fn effective_ice_ufrag<'a>(&'a self, media: &'a MediaDescription) -> Option<&'a str> {
        media
            .ice_ufrag
            .as_deref()
            .or(self.ice_ufrag.as_deref())
    }

    /// Effective ice-pwd for a section
    pub fn effective_ice_pwd<'a>(&'a self, media: &'a MediaDescription) -> Option<&'a str> {
        media.ice_pwd.as_deref().or(self.ice_pwd.as_deref())
    }

    /// Effective fingerprint for a section
    pub fn effective_fingerprint<'a>(&'a self, media: &'a MediaDescription) -> Option<&'a Fingerprint> {
        media.fingerprint.as_ref().or(self.fingerprint.as_ref())
    }
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "v=0\r\no={} {} {} IN IP4 {}\r\ns={}\r\nt=0 0\r\n",
            self.origin.username,
            self.origin.session_id,
            self.origin.session_version,
            self.origin.address,
            self.session_name
        )?;

        if !self.bundle.is_empty() {
            write!(f, "a=group:BUNDLE {}\r\n", self.bundle.join(" "))?;
        }
        if let Some(ufrag) = &self.ice_ufrag {
            write!(f, "a=ice-ufrag:{ufrag}\r\n")?;
        }
        if let Some(pwd) = &self.ice_pwd {
            write!(f, "a=ice-pwd:{pwd}\r\n")?;
        }
        if let Some(fp) = &self.fingerprint {
            write!(f, "a=fingerprint:{fp}\r\n")?;
        }
        for (name, value) in &self.extra_attributes {
            match value {
                Some(v) => write!(f, "a={name}:{v}\r\n")?,
                None => write!(f, "a={name}\r\n")?,
            }
        }

        for media in &self.media {
            let formats: Vec<String> = media.formats.iter().map(|pt| pt.to_string()).collect();
            write!(
                f,
                "m={} {} {} {}\r\n",
                media.kind,
                media.port,
                media.protocol,
                formats.join(" ")
            )?;
            if let Some(connection) = &media.connection {
                write!(f, "c=IN IP4 {connection}\r\n")?;
            }
            if let Some(mid) = &media.mid {
                write!(f, "a=mid:{mid}\r\n")?;
            }
            if media.rtcp_mux {
                write!(f, "a=rtcp-mux\r\n")?;
            }
            for rtpmap in &media.rtpmaps {
                write!(f, "a=rtpmap:{rtpmap}\r\n")?;
            }
            for (pt, params) in &media.fmtps {
                write!(f, "a=fmtp:{pt} {params}\r\n")?;
            }
            if let Some(ufrag) = &media.ice_ufrag {
                write!(f, "a=ice-ufrag:{ufrag}\r\n")?;
            }
            if let Some(pwd) = &media.ice_pwd {
                write!(f, "a=ice-pwd:{pwd}\r\n")?;
            }
            if let Some(fp) = &media.fingerprint {
                write!(f, "a=fingerprint:{fp}\r\n")?;
            }
            if let Some(setup) = &media.setup {
                write!(f, "a=setup:{setup}\r\n")?;
            }
            for ssrc in &media.ssrcs {
                match &ssrc.value {
                    Some(value) => {
                        write!(f, "a=ssrc:{} {}:{}\r\n", ssrc.ssrc, ssrc.attribute, value)?
                    }
                    None => write!(f, "a=ssrc:{} {}\r\n", ssrc.ssrc, ssrc.attribute)?,
                }
            }
            for candidate in &media.candidates {
                write!(f, "a=candidate:{candidate}\r\n")?;
            }
            if media.end_of_candidates {
                write!(f, "a=end-of-candidates\r\n")?;
            }
            for (name, value) in &media.extra_attributes {
                match value {
                    Some(v) => write!(f, "a={name}:{v}\r\n")?,
                    None => write!(f, "a={name}\r\n")?,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_answer_resolution() {
        assert_eq!(SdpSetup::answer_to(SdpSetup::ActPass), SdpSetup::Active);
        assert_eq!(SdpSetup::answer_to(SdpSetup::Passive), SdpSetup::Active);
        assert_eq!(SdpSetup::answer_to(SdpSetup::Active), SdpSetup::Passive);
    }

    #[test]
    fn test_media_level_overrides_session_level() {
        let mut sdp = SessionDescription::new(Origin::new("10.0.0.1"));
        sdp.ice_ufrag = Some("sessionufrag".into());
        let mut media = MediaDescription::new(MediaKind::Audio, 9);
        media.ice_ufrag = Some("mediaufrag".into());
        sdp.media.push(media);

        assert_eq!(
            sdp.effective_ice_ufrag(&sdp.media[0]),
            Some("mediaufrag")
        );

        let plain = MediaDescription::new(MediaKind::Video, 9);
        assert_eq!(sdp.effective_ice_ufrag(&plain), Some("sessionufrag"));
    }

    #[test]
    fn test_serialized_line_order() {
        let mut sdp = SessionDescription::new(Origin::new("192.0.2.1"));
        sdp.bundle = vec!["audio".into()];
        let mut media = MediaDescription::new(MediaKind::Audio, 40000);
        media.formats = vec![96];
        media.mid = Some("audio".into());
        media.rtpmaps.push(RtpMap {
            payload_type: 96,
            encoding: "opus".into(),
            clock_rate: 48000,
            channels: Some(2),
        });
        sdp.media.push(media);

        let text = sdp.to_string();
        assert!(text.starts_with("v=0\r\n"));
        let v_pos = text.find("v=0").unwrap();
        let group_pos = text.find("a=group:BUNDLE audio").unwrap();
        let m_pos = text.find("m=audio 40000 UDP/TLS/RTP/SAVPF 96").unwrap();
        let rtpmap_pos = text.find("a=rtpmap:96 opus/48000/2").unwrap();
        assert!(v_pos < group_pos && group_pos < m_pos && m_pos < rtpmap_pos);
        assert!(text.ends_with("\r\n"));
    }
}
