//! SDP offer/answer negotiation
//!
//! Tracks the negotiation state machine
//! (`INIT -> LOCAL_OFFER -> REMOTE_ANSWER -> COMPLETE` or
//! `INIT -> REMOTE_OFFER -> LOCAL_ANSWER -> COMPLETE`), assigns payload
//! types from the bundle-safe dynamic ranges and resolves the DTLS setup
//! roles. The negotiator holds no sockets; local candidates and the
//! certificate fingerprint are pushed in by the session.

use std::fmt;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::parser::parse_session_description;
use crate::types::{
    Fingerprint, MediaDescription, MediaKind, Origin, RtpMap, SdpSetup, SessionDescription,
    SsrcAttribute,
};

/// First payload type for audio codecs
pub const PT_AUDIO_START: u8 = 96;

/// Last payload type for audio codecs
pub const PT_AUDIO_END: u8 = 99;

/// First payload type for video codecs
pub const PT_VIDEO_START: u8 = 100;

/// Last payload type for video codecs (RTX pairs included)
pub const PT_VIDEO_END: u8 = 110;

/// Negotiation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpState {
    /// Nothing exchanged yet
    Init,

    /// We generated the offer, waiting for the remote answer
    LocalOffer,

    /// We received the offer, an answer must be generated
    RemoteOffer,

    /// Offer and answer both processed
    Complete,
}

impl fmt::Display for SdpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpState::Init => f.write_str("init"),
            SdpState::LocalOffer => f.write_str("local-offer"),
            SdpState::RemoteOffer => f.write_str("remote-offer"),
            SdpState::Complete => f.write_str("complete"),
        }
    }
}

/// A codec the session can offer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecSpec {
    /// Encoding name as it appears in rtpmap, e.g. `opus`
    pub name: String,

    /// Clock rate in Hz
    pub clock_rate: u32,

    /// Channel count (audio)
    pub channels: u8,
}

impl CodecSpec {
    /// Convenience constructor
    pub fn new(name: impl Into<String>, clock_rate: u32, channels: u8) -> Self {
        Self {
            name: name.into(),
            clock_rate,
            channels,
        }
    }
}

/// Everything learned about the remote side from its description
#[derive(Debug, Clone, Default)]
pub struct RemoteParams {
    /// Remote ICE credentials (ufrag, pwd)
    pub ice_credentials: Option<(String, String)>,

    /// Remote certificate fingerprint
    pub fingerprint: Option<Fingerprint>,

    /// Remote setup role
    pub setup: Option<SdpSetup>,

    /// Selected audio codec (remote's payload type)
    pub audio_codec: Option<RtpMap>,

    /// Selected video codec (remote's payload type)
    pub video_codec: Option<RtpMap>,

    /// Remote audio SSRC
    pub audio_ssrc: Option<u32>,

    /// Remote video SSRC
    pub video_ssrc: Option<u32>,

    /// Remote video RTX SSRC
    pub video_rtx_ssrc: Option<u32>,

    /// Candidate values with their mid, in arrival order
    pub candidates: Vec<(String, Option<String>)>,

    /// Remote signalled end-of-candidates
    pub end_of_candidates: bool,
}

/// Local identifiers the negotiator advertises
#[derive(Debug, Clone)]
pub struct LocalParams {
    /// Local ICE ufrag
    pub ice_ufrag: String,

    /// Local ICE pwd
    pub ice_pwd: String,

    /// SHA-256 fingerprint of the local DTLS certificate
    pub fingerprint: String,

    /// Address advertised in o=/c= lines
    pub address: String,

    /// Port advertised in m= lines
    pub port: u16,

    /// Local audio SSRC
    pub audio_ssrc: u32,

    /// Local video SSRC when video was added
    pub video_ssrc: Option<u32>,

    /// Local video RTX SSRC when video was added
    pub video_rtx_ssrc: Option<u32>,

    /// CNAME for ssrc lines
    pub cname: String,
}

/// SDP offer/answer negotiator for one session
pub struct SdpNegotiator {
    state: SdpState,
    local: LocalParams,
    local_setup: SdpSetup,
    audio_codecs: Vec<CodecSpec>,
    video_codecs: Vec<CodecSpec>,
    privacy: bool,
    dtls_required: bool,

    /// Candidate SDP values gathered so far
    local_candidates: Vec<String>,
    local_eoc: bool,

    remote: RemoteParams,

    /// Payload types assigned to our audio codecs, parallel to
    /// `audio_codecs`
    audio_pts: Vec<u8>,
    video_pts: Vec<u8>,
    video_rtx_pts: Vec<u8>,
}

impl SdpNegotiator {
    /// Create a negotiator offering `audio_codecs` in preference order
    pub fn new(local: LocalParams, audio_codecs: Vec<CodecSpec>, dtls_required: bool) -> Result<Self> {
        if audio_codecs.is_empty() {
            return Err(Error::Validation("empty audio codec list".into()));
        }
        let span = (PT_AUDIO_END - PT_AUDIO_START + 1) as usize;
        if audio_codecs.len() > span {
            return Err(Error::Validation(format!(
                "audio codec list exceeds payload type range ({} > {span})",
                audio_codecs.len()
            )));
        }
        let audio_pts = (0..audio_codecs.len())
            .map(|i| PT_AUDIO_START + i as u8)
            .collect();

        Ok(Self {
            state: SdpState::Init,
            local,
            local_setup: SdpSetup::ActPass,
            audio_codecs,
            video_codecs: Vec::new(),
            privacy: false,
            dtls_required,
            local_candidates: Vec::new(),
            local_eoc: false,
            remote: RemoteParams::default(),
            audio_pts,
            video_pts: Vec::new(),
            video_rtx_pts: Vec::new(),
        })
    }

    /// Current negotiation state
    pub fn state(&self) -> SdpState {
        self.state
    }

    /// True once both sides of the exchange have been processed and the
    /// attributes the session needs are present.
    pub fn is_complete(&self) -> bool {
        self.state == SdpState::Complete
            && self.remote.ice_credentials.is_some()
            && (!self.dtls_required || self.remote.fingerprint.is_some())
    }

    /// Everything learned about the remote side
    pub fn remote_params(&self) -> &RemoteParams {
        &self.remote
    }

    /// The local setup role
    pub fn local_setup(&self) -> SdpSetup {
        self.local_setup
    }

    /// Force the local setup role (before generating an offer)
    pub fn set_local_setup(&mut self, setup: SdpSetup) {
        self.local_setup = setup;
    }

    /// Suppress host candidates from outgoing descriptions
    pub fn set_privacy(&mut self, enabled: bool) {
        self.privacy = enabled;
    }

    /// Add video codecs; pairs each with an RTX payload type
    pub fn add_video(&mut self, codecs: Vec<CodecSpec>) -> Result<()> {
        if codecs.is_empty() {
            return Err(Error::Validation("empty video codec list".into()));
        }
        let needed = codecs.len() * 2; // codec + RTX each
        let span = (PT_VIDEO_END - PT_VIDEO_START + 1) as usize;
        if needed > span {
            return Err(Error::Validation(format!(
                "video codec list exceeds payload type range ({needed} > {span})"
            )));
        }
        self.video_pts = (0..codecs.len())
            .map(|i| PT_VIDEO_START + (i * 2) as u8)
            .collect();
        self.video_rtx_pts = (0..codecs.len())
            .map(|i| PT_VIDEO_START + (i * 2) as u8 + 1)
            .collect();
        self.video_codecs = codecs;
        Ok(())
    }

    /// True when a video section is negotiated
    pub fn has_video(&self) -> bool {
        !self.video_codecs.is_empty()
    }

    /// Record a gathered local candidate (SDP value form)
    pub fn add_local_candidate(&mut self, candidate_value: String) {
        // Privacy mode keeps host addresses out of SDP entirely
        if self.privacy && candidate_value.contains(" typ host") {
            debug!("sdp: privacy mode, suppressing host candidate");
            return;
        }
        self.local_candidates.push(candidate_value);
    }

    /// Mark local gathering finished; outgoing SDP gains
    /// `a=end-of-candidates`.
    pub fn set_local_end_of_candidates(&mut self) {
        self.local_eoc = true;
    }

    /// Generate the local offer. Valid only in INIT.
    pub fn generate_offer(&mut self) -> Result<String> {
        if self.state != SdpState::Init {
            return Err(Error::InvalidState(format!(
                "generate_offer in state {}",
                self.state
            )));
        }

        let sdp = self.build_description(self.local_setup, None)?;
        self.state = SdpState::LocalOffer;
        debug!("sdp: offer generated, state {}", self.state);
        Ok(sdp.to_string())
    }

    /// Apply the remote offer. Valid only in INIT.
    pub fn handle_offer(&mut self, sdp: &str) -> Result<()> {
        if self.state != SdpState::Init {
            return Err(Error::InvalidState(format!(
                "handle_offer in state {}",
                self.state
            )));
        }

        let description = parse_session_description(sdp)?;
        self.extract_remote(&description, true)?;
        self.state = SdpState::RemoteOffer;
        debug!("sdp: offer applied, state {}", self.state);
        Ok(())
    }

    /// Generate the local answer. Valid only after `handle_offer`.
    pub fn generate_answer(&mut self) -> Result<String> {
        if self.state != SdpState::RemoteOffer {
            return Err(Error::InvalidState(format!(
                "generate_answer in state {}",
                self.state
            )));
        }

        let remote_setup = self.remote.setup.unwrap_or(SdpSetup::ActPass);
        self.local_setup = SdpSetup::answer_to(remote_setup);

        // Echo the payload types the offerer assigned
        let audio_echo = self.remote.audio_codec.clone();
        let video_echo = self.remote.video_codec.clone();
        let sdp = self.build_description(self.local_setup, Some((audio_echo, video_echo)))?;
        self.state = SdpState::Complete;
        debug!("sdp: answer generated, state {}", self.state);
        Ok(sdp.to_string())
    }

    /// Apply the remote answer. Valid only after `generate_offer`.
    pub fn handle_answer(&mut self, sdp: &str) -> Result<()> {
        if self.state != SdpState::LocalOffer {
            return Err(Error::InvalidState(format!(
                "handle_answer in state {}",
                self.state
            )));
        }

        let description = parse_session_description(sdp)?;
        self.extract_remote(&description, false)?;

        // The answer resolves our actpass
        if self.local_setup == SdpSetup::ActPass {
            let remote_setup = self.remote.setup.unwrap_or(SdpSetup::Active);
            self.local_setup = match remote_setup {
                SdpSetup::Active => SdpSetup::Passive,
                _ => SdpSetup::Active,
            };
        }

        self.state = SdpState::Complete;
        debug!("sdp: answer applied, state {}", self.state);
        Ok(())
    }

    /// Convenience: apply `offer` and produce the answer in one step
    pub fn offer_answer(&mut self, offer: &str) -> Result<String> {
        self.handle_offer(offer)?;
        self.generate_answer()
    }

    /// Return to INIT, forgetting all remote state
    pub fn reset(&mut self) {
        self.state = SdpState::Init;
        self.local_setup = SdpSetup::ActPass;
        self.remote = RemoteParams::default();
        debug!("sdp: negotiation state reset");
    }

    fn build_description(
        &self,
        setup: SdpSetup,
        echo_codecs: Option<(Option<RtpMap>, Option<RtpMap>)>,
    ) -> Result<SessionDescription> {
        let mut sdp = SessionDescription::new(Origin::new(self.local.address.clone()));
        sdp.ice_ufrag = Some(self.local.ice_ufrag.clone());
        sdp.ice_pwd = Some(self.local.ice_pwd.clone());
        sdp.fingerprint = Some(Fingerprint {
            algorithm: "sha-256".into(),
            value: self.local.fingerprint.clone(),
        });

        sdp.bundle.push("audio".into());
        if self.has_video() {
            sdp.bundle.push("video".into());
        }

        let (audio_echo, video_echo) = echo_codecs.unwrap_or((None, None));

        // Audio section
        let mut audio = MediaDescription::new(MediaKind::Audio, self.local.port);
        audio.mid = Some("audio".into());
        audio.connection = Some(self.local.address.clone());
        audio.rtcp_mux = true;
        audio.setup = Some(setup);
        match audio_echo {
            Some(selected) => {
                audio.formats.push(selected.payload_type);
                audio.rtpmaps.push(selected);
            }
            None => {
                for (codec, pt) in self.audio_codecs.iter().zip(&self.audio_pts) {
                    audio.formats.push(*pt);
                    audio.rtpmaps.push(RtpMap {
                        payload_type: *pt,
                        encoding: codec.name.clone(),
                        clock_rate: codec.clock_rate,
                        channels: Some(codec.channels),
                    });
                }
            }
        }
        audio.ssrcs.push(SsrcAttribute {
            ssrc: self.local.audio_ssrc,
            attribute: "cname".into(),
            value: Some(self.local.cname.clone()),
        });
        for candidate in &self.local_candidates {
            audio.candidates.push(candidate.clone());
        }
        audio.end_of_candidates = self.local_eoc;
        sdp.media.push(audio);

        // Video section
        if self.has_video() {
            let mut video = MediaDescription::new(MediaKind::Video, self.local.port);
            video.mid = Some("video".into());
            video.connection = Some(self.local.address.clone());
            video.rtcp_mux = true;
            video.setup = Some(setup);
            match video_echo {
                Some(selected) => {
                    video.formats.push(selected.payload_type);
                    video.rtpmaps.push(selected);
                }
                None => {
                    for (i, (codec, pt)) in
                        self.video_codecs.iter().zip(&self.video_pts).enumerate()
                    {
                        video.formats.push(*pt);
                        video.rtpmaps.push(RtpMap {
                            payload_type: *pt,
                            encoding: codec.name.clone(),
                            clock_rate: codec.clock_rate,
                            channels: None,
                        });
                        // RTX pairing per RFC 4588
                        let rtx_pt = self.video_rtx_pts[i];
                        video.formats.push(rtx_pt);
                        video.rtpmaps.push(RtpMap {
                            payload_type: rtx_pt,
                            encoding: "rtx".into(),
                            clock_rate: codec.clock_rate,
                            channels: None,
                        });
                        video.fmtps.push((rtx_pt, format!("apt={pt}")));
                    }
                }
            }
            if let Some(ssrc) = self.local.video_ssrc {
                video.ssrcs.push(SsrcAttribute {
                    ssrc,
                    attribute: "cname".into(),
                    value: Some(self.local.cname.clone()),
                });
            }
            if let Some(ssrc) = self.local.video_rtx_ssrc {
                video.ssrcs.push(SsrcAttribute {
                    ssrc,
                    attribute: "cname".into(),
                    value: Some(self.local.cname.clone()),
                });
            }
            sdp.media.push(video);
        }

        Ok(sdp)
    }

    fn extract_remote(&mut self, description: &SessionDescription, is_offer: bool) -> Result<()> {
        let audio = description
            .media_section(MediaKind::Audio)
            .ok_or_else(|| Error::Validation("no audio section".into()))?;

        if audio.protocol != "UDP/TLS/RTP/SAVPF" && self.dtls_required {
            return Err(Error::UnsupportedCrypto(format!(
                "transport profile {}",
                audio.protocol
            )));
        }

        let ufrag = description
            .effective_ice_ufrag(audio)
            .ok_or_else(|| Error::MissingAttribute("ice-ufrag".into()))?;
        let pwd = description
            .effective_ice_pwd(audio)
            .ok_or_else(|| Error::MissingAttribute("ice-pwd".into()))?;
        self.remote.ice_credentials = Some((ufrag.to_string(), pwd.to_string()));

        match description.effective_fingerprint(audio) {
            Some(fingerprint) => self.remote.fingerprint = Some(fingerprint.clone()),
            None if self.dtls_required => {
                return Err(Error::MissingAttribute("fingerprint".into()));
            }
            None => {}
        }

        self.remote.setup = audio.setup;

        // Audio codec selection: first offered payload type whose
        // encoding we also have, else the first declared one.
        let selected_audio = audio
            .formats
            .iter()
            .filter_map(|pt| audio.rtpmap(*pt))
            .find(|map| {
                self.audio_codecs
                    .iter()
                    .any(|c| c.name.eq_ignore_ascii_case(&map.encoding))
            })
            .or_else(|| audio.formats.first().and_then(|pt| audio.rtpmap(*pt)));
        match selected_audio {
            Some(map) => {
                if !(PT_AUDIO_START..=PT_AUDIO_END).contains(&map.payload_type) && is_offer {
                    warn!(
                        "sdp: audio payload type {} outside bundle range",
                        map.payload_type
                    );
                }
                self.remote.audio_codec = Some(map.clone());
            }
            None => return Err(Error::Validation("audio section without rtpmap".into())),
        }
        self.remote.audio_ssrc = audio.first_ssrc();

        for candidate in &audio.candidates {
            self.remote
                .candidates
                .push((candidate.clone(), audio.mid.clone()));
        }
        self.remote.end_of_candidates |= audio.end_of_candidates;

        if let Some(video) = description.media_section(MediaKind::Video) {
            let selected_video = video
                .formats
                .iter()
                .filter_map(|pt| video.rtpmap(*pt))
                .find(|map| !map.encoding.eq_ignore_ascii_case("rtx"));
            self.remote.video_codec = selected_video.cloned();

            // First SSRC is the media source, second the RTX source
            self.remote.video_ssrc = video.ssrcs.first().map(|s| s.ssrc);
            self.remote.video_rtx_ssrc = video.ssrcs.get(1).map(|s| s.ssrc);

            for candidate in &video.candidates {
                self.remote
                    .candidates
                    .push((candidate.clone(), video.mid.clone()));
            }
            self.remote.end_of_candidates |= video.end_of_candidates;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_params() -> LocalParams {
        LocalParams {
            ice_ufrag: "localufrag".into(),
            ice_pwd: "localpassword123456789".into(),
            fingerprint: "AA:BB:CC:DD".into(),
            address: "192.0.2.10".into(),
            port: 40000,
            audio_ssrc: 1111,
            video_ssrc: None,
            video_rtx_ssrc: None,
            cname: "flow@host".into(),
        }
    }

    fn negotiator() -> SdpNegotiator {
        SdpNegotiator::new(
            local_params(),
            vec![CodecSpec::new("opus", 48000, 2)],
            true,
        )
        .unwrap()
    }

    #[test]
    fn test_offer_contains_required_attributes() {
        let mut negotiator = negotiator();
        let offer = negotiator.generate_offer().unwrap();

        assert!(offer.contains("v=0\r\n"));
        assert!(offer.contains("a=group:BUNDLE audio\r\n"));
        assert!(offer.contains("a=ice-ufrag:localufrag\r\n"));
        assert!(offer.contains("a=ice-pwd:localpassword123456789\r\n"));
        assert!(offer.contains("a=fingerprint:sha-256 AA:BB:CC:DD\r\n"));
        assert!(offer.contains("a=setup:actpass\r\n"));
        assert!(offer.contains("a=rtpmap:96 opus/48000/2\r\n"));
        assert!(offer.contains("a=ssrc:1111 cname:flow@host\r\n"));
        assert_eq!(negotiator.state(), SdpState::LocalOffer);
    }

    #[test]
    fn test_audio_payload_types_stay_in_range() {
        let mut local = local_params();
        local.video_ssrc = Some(2222);
        local.video_rtx_ssrc = Some(3333);
        let mut negotiator = SdpNegotiator::new(
            local,
            vec![
                CodecSpec::new("opus", 48000, 2),
                CodecSpec::new("PCMU", 8000, 1),
            ],
            true,
        )
        .unwrap();
        negotiator
            .add_video(vec![CodecSpec::new("VP8", 90000, 0)])
            .unwrap();
        let offer = negotiator.generate_offer().unwrap();

        // Audio 96/97; video 100, RTX 101 with apt
        assert!(offer.contains("m=audio 40000 UDP/TLS/RTP/SAVPF 96 97\r\n"));
        assert!(offer.contains("m=video 40000 UDP/TLS/RTP/SAVPF 100 101\r\n"));
        assert!(offer.contains("a=rtpmap:100 VP8/90000\r\n"));
        assert!(offer.contains("a=rtpmap:101 rtx/90000\r\n"));
        assert!(offer.contains("a=fmtp:101 apt=100\r\n"));
        assert!(offer.contains("a=group:BUNDLE audio video\r\n"));
    }

    #[test]
    fn test_offer_answer_completes_both_sides() {
        let mut offerer = negotiator();
        let mut answerer = SdpNegotiator::new(
            LocalParams {
                ice_ufrag: "remoteufrag".into(),
                ice_pwd: "remotepassword12345678".into(),
                fingerprint: "EE:FF:00:11".into(),
                address: "192.0.2.20".into(),
                port: 41000,
                audio_ssrc: 2222,
                video_ssrc: None,
                video_rtx_ssrc: None,
                cname: "peer@host".into(),
            },
            vec![CodecSpec::new("opus", 48000, 2)],
            true,
        )
        .unwrap();

        let offer = offerer.generate_offer().unwrap();
        let answer = answerer.offer_answer(&offer).unwrap();
        offerer.handle_answer(&answer).unwrap();

        assert_eq!(offerer.state(), SdpState::Complete);
        assert_eq!(answerer.state(), SdpState::Complete);
        assert!(offerer.is_complete());
        assert!(answerer.is_complete());

        // Answer echoes the offered payload type and resolves setup
        assert!(answer.contains("a=rtpmap:96 opus/48000/2\r\n"));
        assert!(answer.contains("a=setup:active\r\n"));
        assert_eq!(answerer.local_setup(), SdpSetup::Active);
        assert_eq!(offerer.local_setup(), SdpSetup::Passive);

        // Both sides agree on codecs and learn each other's SSRC
        assert_eq!(offerer.remote_params().audio_ssrc, Some(2222));
        assert_eq!(answerer.remote_params().audio_ssrc, Some(1111));
        assert_eq!(
            offerer.remote_params().audio_codec.as_ref().unwrap().encoding,
            "opus"
        );
    }

    #[test]
    fn test_handle_answer_before_offer_fails() {
        let mut negotiator = negotiator();
        let result = negotiator.handle_answer("v=0\r\n");
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_generate_answer_without_offer_fails() {
        let mut negotiator = negotiator();
        assert!(matches!(
            negotiator.generate_answer(),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_missing_fingerprint_is_fatal_when_dtls_required() {
        let mut negotiator = negotiator();
        let offer = "v=0\r\n\
                     o=- 1 1 IN IP4 192.0.2.20\r\n\
                     s=-\r\n\
                     t=0 0\r\n\
                     m=audio 41000 UDP/TLS/RTP/SAVPF 96\r\n\
                     a=rtpmap:96 opus/48000/2\r\n\
                     a=ice-ufrag:x\r\n\
                     a=ice-pwd:y\r\n\
                     a=setup:actpass\r\n";
        assert!(matches!(
            negotiator.handle_offer(offer),
            Err(Error::MissingAttribute(_))
        ));
    }

    #[test]
    fn test_privacy_suppresses_host_candidates() {
        let mut negotiator = negotiator();
        negotiator.set_privacy(true);
        negotiator
            .add_local_candidate("1 1 UDP 2130706431 10.0.0.1 40000 typ host".into());
        negotiator.add_local_candidate(
            "2 1 UDP 16777215 203.0.113.1 49152 typ relay raddr 10.0.0.1 rport 40000".into(),
        );
        let offer = negotiator.generate_offer().unwrap();
        assert!(!offer.contains("typ host"));
        assert!(offer.contains("typ relay"));
    }

    #[test]
    fn test_reset_returns_to_init() {
        let mut negotiator = negotiator();
        negotiator.generate_offer().unwrap();
        assert_eq!(negotiator.state(), SdpState::LocalOffer);
        negotiator.reset();
        assert_eq!(negotiator.state(), SdpState::Init);
        // A fresh offer can be generated after reset
        negotiator.generate_offer().unwrap();
    }

    #[test]
    fn test_trickled_candidates_and_eoc_appear() {
        let mut negotiator = negotiator();
        negotiator.add_local_candidate("1 1 UDP 2130706431 192.0.2.10 40000 typ host".into());
        negotiator.set_local_end_of_candidates();
        let offer = negotiator.generate_offer().unwrap();
        assert!(offer.contains("a=candidate:1 1 UDP 2130706431 192.0.2.10 40000 typ host\r\n"));
        assert!(offer.contains("a=end-of-candidates\r\n"));
    }
}
