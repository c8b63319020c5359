//! Media session coordinator
//!
//! One `MediaFlow` drives a single audio/video flow between two
//! endpoints: it owns the session socket, classifies every inbound
//! datagram (STUN / DTLS / RTP / RTCP), and sequences the three
//! establishment machines — ICE must nominate a pair before the DTLS
//! handshake can finish, SDP must be complete before checks start, and
//! media cannot flow until DTLS has installed the SRTP keys.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use mediaflow_ice_core::{
    IceAgent, IceAgentEvent, IceAgentState, IceCandidate, IceConfig, IceCredentials, IceRole,
    TurnServerConfig, TurnTransport,
};
use mediaflow_rtp_core::{
    classify, DemuxConn, DemuxCounters, DtlsEngine, PacketClass, ReceiverReport, RtcpPacket,
    RtpHeader, RtpPacket, SrtpContext,
};
use mediaflow_sdp_core::{
    CodecSpec, LocalParams, SdpNegotiator, SdpSetup, SdpState, PT_AUDIO_END, PT_AUDIO_START,
};

use crate::codec::AudioCodec;
use crate::config::{MediaFlowConfig, MediaSetup, MediaType, NatMode};
use crate::error::{CloseReason, Error, Result};
use crate::stats::{MediaStats, STAT_ERROR};

/// Invoked for each local candidate (per candidate when trickling, as a
/// batch when gathering completes otherwise)
pub type LocalCandidateHandler = Box<dyn Fn(&IceCandidate) + Send + Sync>;

/// Invoked once the flow is established (crypto kind, codec name)
pub type EstablishedHandler = Box<dyn Fn(&str, &str) + Send + Sync>;

/// Invoked when the flow closes
pub type CloseHandler = Box<dyn Fn(CloseReason) + Send + Sync>;

/// Invoked with decoded inbound audio
pub type AudioHandler = Box<dyn Fn(&[i16]) + Send + Sync>;

/// Invoked with inbound RTP (external-RTP mode and video)
pub type RtpHandler = Box<dyn Fn(&RtpHeader, &[u8]) + Send + Sync>;

/// Invoked with inbound RTCP compound packets
pub type RtcpHandler = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Handlers installed at allocation
#[derive(Default)]
pub struct MediaFlowHandlers {
    /// Local candidate observer
    pub local_candidate: Option<LocalCandidateHandler>,

    /// Establishment observer
    pub established: Option<EstablishedHandler>,

    /// Close observer
    pub close: Option<CloseHandler>,
}

struct Handlers {
    local_candidate: Mutex<Option<LocalCandidateHandler>>,
    established: Mutex<Option<EstablishedHandler>>,
    close: Mutex<Option<CloseHandler>>,
    audio: Mutex<Option<AudioHandler>>,
    rtp: Mutex<Option<RtpHandler>>,
    rtcp: Mutex<Option<RtcpHandler>>,
}

struct Timeline {
    gather_started: Option<Instant>,
    checks_started: Option<Instant>,
}

struct LocalSsrcs {
    audio: u32,
    video: u32,
    video_rtx: u32,
}

struct Inner {
    config: MediaFlowConfig,
    socket: Arc<UdpSocket>,
    ice: Arc<IceAgent>,
    dtls: DtlsEngine,
    negotiator: Mutex<SdpNegotiator>,

    dtls_conn: Arc<DemuxConn>,
    dtls_in: mpsc::Sender<Bytes>,
    dtls_established: Mutex<Option<Arc<mediaflow_rtp_core::dtls::DTLSConn>>>,
    srtp: Mutex<Option<SrtpContext>>,

    /// Nominated remote address and whether it is reached via the relay
    remote_media_addr: RwLock<Option<(SocketAddr, bool)>>,

    local_ssrcs: LocalSsrcs,
    seq: AtomicU32,
    rtp_timestamp: AtomicU32,

    established: AtomicBool,
    started: AtomicBool,
    hold: AtomicBool,
    closed: AtomicBool,
    dtls_handshake_started: AtomicBool,
    early_dtls: AtomicBool,
    video_added: AtomicBool,
    video_send_active: AtomicBool,
    turn_requested: AtomicBool,

    stats: Mutex<MediaStats>,
    timeline: Mutex<Timeline>,
    counters: Mutex<DemuxCounters>,
    handlers: Handlers,
}

/// A single media flow between two endpoints
pub struct MediaFlow {
    inner: Arc<Inner>,
    tasks: Vec<JoinHandle<()>>,
}

impl MediaFlow {
    /// Allocate a flow: bind the session socket, create the engines and
    /// start the demultiplexer loop.
    pub async fn allocate(
        config: MediaFlowConfig,
        handlers: MediaFlowHandlers,
    ) -> Result<MediaFlow> {
        if config.audio_codecs.is_empty() {
            return Err(Error::InvalidArgument("empty audio codec list".into()));
        }
        if !config.cryptos.dtls_srtp {
            return Err(Error::InvalidArgument(
                "DTLS-SRTP is the only supported key agreement".into(),
            ));
        }

        let socket = Arc::new(
            UdpSocket::bind((config.local_addr, 0))
                .await
                .map_err(|e| Error::ResourceExhausted(format!("bind: {e}")))?,
        );
        let local_addr = socket
            .local_addr()
            .map_err(|e| Error::Internal(e.to_string()))?;

        let ice_config = IceConfig {
            role: if config.nat_mode == NatMode::IceLite {
                IceRole::Controlled
            } else {
                IceRole::Controlling
            },
            lite: config.nat_mode == NatMode::IceLite,
            trickle: config.nat_mode == NatMode::TrickleDualstack,
            check_timeout: config.ice_timeout,
        };
        let (ice, ice_events) = IceAgent::new(Arc::clone(&socket), ice_config);

        let dtls = DtlsEngine::new().map_err(Error::from)?;
        let (dtls_conn, dtls_in, dtls_out) = DemuxConn::new(local_addr);

        let cname = format!("flow-{:08x}@{}", rand::random::<u32>(), local_addr.ip());
        let local_ssrcs = LocalSsrcs {
            audio: rand::random(),
            video: rand::random(),
            video_rtx: rand::random(),
        };

        let credentials: IceCredentials = ice.local_credentials().clone();
        let codec_specs: Vec<CodecSpec> = config
            .audio_codecs
            .iter()
            .map(|c| CodecSpec::new(c.name().to_string(), c.clock_rate(), c.channels()))
            .collect();

        let negotiator = SdpNegotiator::new(
            LocalParams {
                ice_ufrag: credentials.ufrag,
                ice_pwd: credentials.pwd,
                fingerprint: dtls.local_fingerprint().to_string(),
                address: local_addr.ip().to_string(),
                port: local_addr.port(),
                audio_ssrc: local_ssrcs.audio,
                video_ssrc: None,
                video_rtx_ssrc: None,
                cname,
            },
            codec_specs,
            true,
        )
        .map_err(Error::from)?;

        let inner = Arc::new(Inner {
            config,
            socket,
            ice,
            dtls,
            negotiator: Mutex::new(negotiator),
            dtls_conn,
            dtls_in,
            dtls_established: Mutex::new(None),
            srtp: Mutex::new(None),
            remote_media_addr: RwLock::new(None),
            local_ssrcs,
            seq: AtomicU32::new(rand::random::<u16>() as u32),
            rtp_timestamp: AtomicU32::new(rand::random()),
            established: AtomicBool::new(false),
            started: AtomicBool::new(false),
            hold: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            dtls_handshake_started: AtomicBool::new(false),
            early_dtls: AtomicBool::new(false),
            video_added: AtomicBool::new(false),
            video_send_active: AtomicBool::new(false),
            turn_requested: AtomicBool::new(false),
            stats: Mutex::new(MediaStats::default()),
            timeline: Mutex::new(Timeline {
                gather_started: None,
                checks_started: None,
            }),
            counters: Mutex::new(DemuxCounters::default()),
            handlers: Handlers {
                local_candidate: Mutex::new(handlers.local_candidate),
                established: Mutex::new(handlers.established),
                close: Mutex::new(handlers.close),
                audio: Mutex::new(None),
                rtp: Mutex::new(None),
                rtcp: Mutex::new(None),
            },
        });

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(socket_loop(Arc::clone(&inner))));
        tasks.push(tokio::spawn(ice_event_loop(Arc::clone(&inner), ice_events)));
        tasks.push(tokio::spawn(dtls_out_loop(Arc::clone(&inner), dtls_out)));

        info!("mediaflow: allocated on {}", local_addr);
        Ok(MediaFlow { inner, tasks })
    }

    /// Local port of the session socket
    pub fn local_port(&self) -> u16 {
        self.inner.ice.local_port()
    }

    /// Install the decoded-audio handler
    pub fn set_audio_handler(&self, handler: AudioHandler) {
        *self.inner.handlers.audio.lock().expect("handler lock") = Some(handler);
    }

    /// Install raw RTP/RTCP handlers (external-RTP mode and video)
    pub fn set_rtp_handlers(&self, rtp: RtpHandler, rtcp: RtcpHandler) {
        *self.inner.handlers.rtp.lock().expect("handler lock") = Some(rtp);
        *self.inner.handlers.rtcp.lock().expect("handler lock") = Some(rtcp);
    }

    /// Force the local DTLS role before the offer is generated
    pub fn set_setup(&self, setup: MediaSetup) {
        let setup = match setup {
            MediaSetup::ActPass => SdpSetup::ActPass,
            MediaSetup::Active => SdpSetup::Active,
            MediaSetup::Passive => SdpSetup::Passive,
        };
        self.inner
            .negotiator
            .lock()
            .expect("negotiator lock")
            .set_local_setup(setup);
    }

    /// The current local DTLS role
    pub fn local_setup(&self) -> MediaSetup {
        match self
            .inner
            .negotiator
            .lock()
            .expect("negotiator lock")
            .local_setup()
        {
            SdpSetup::ActPass => MediaSetup::ActPass,
            SdpSetup::Active => MediaSetup::Active,
            SdpSetup::Passive => MediaSetup::Passive,
        }
    }

    /// Allow the DTLS handshake to start on the first peer datagram,
    /// before nomination formally completes.
    pub fn set_early_dtls(&self, enabled: bool) {
        self.inner.early_dtls.store(enabled, Ordering::Release);
    }

    /// Whether early DTLS is enabled
    pub fn early_dtls_supported(&self) -> bool {
        self.inner.early_dtls.load(Ordering::Acquire)
    }

    /// Keep host candidates out of outgoing SDP
    pub fn enable_privacy(&self, enabled: bool) {
        self.inner
            .negotiator
            .lock()
            .expect("negotiator lock")
            .set_privacy(enabled);
    }

    /// Add a video section (and its RTX pairing) to the negotiation
    pub fn add_video(&self, codecs: Vec<CodecSpec>) -> Result<()> {
        {
            let mut negotiator = self.inner.negotiator.lock().expect("negotiator lock");
            negotiator.add_video(codecs)?;
        }
        self.inner.video_added.store(true, Ordering::Release);
        Ok(())
    }

    /// Whether video was negotiated into the bundle
    pub fn has_video(&self) -> bool {
        self.inner.video_added.load(Ordering::Acquire)
    }

    /// Gate outbound video without renegotiating
    pub fn set_video_send_active(&self, active: bool) {
        self.inner.video_send_active.store(active, Ordering::Release);
    }

    /// Whether outbound video is currently active
    pub fn is_sending_video(&self) -> bool {
        self.inner.video_send_active.load(Ordering::Acquire)
    }

    /// Register a local host candidate for `ifname`/`addr`
    pub async fn add_local_host_candidate(&self, ifname: &str, addr: SocketAddr) -> Result<()> {
        self.inner
            .ice
            .add_local_host_candidate(ifname, addr)
            .await
            .map_err(Error::from)
    }

    /// Gather from the configured servers: host candidates only, plus
    /// the configured TURN server in turn-only mode.
    pub async fn start_gather(&self) -> Result<()> {
        self.mark_gather_started();
        let turn = if self.inner.config.nat_mode == NatMode::TurnOnly {
            let turn = self.inner.config.turn_server.clone();
            if turn.is_none() {
                return Err(Error::InvalidArgument(
                    "turn-only mode without a TURN server".into(),
                ));
            }
            self.inner.turn_requested.store(true, Ordering::Release);
            turn
        } else {
            None
        };
        self.inner
            .ice
            .start_gather(None, turn)
            .await
            .map_err(Error::from)
    }

    /// Gather a server-reflexive candidate from `server`
    pub async fn gather_stun(&self, server: SocketAddr) -> Result<()> {
        self.mark_gather_started();
        self.inner
            .ice
            .start_gather(Some(server), None)
            .await
            .map_err(Error::from)
    }

    /// Gather a relayed candidate from a TURN server over UDP
    pub async fn gather_turn(
        &self,
        server: SocketAddr,
        username: &str,
        password: &str,
    ) -> Result<()> {
        self.gather_turn_inner(server, username, password, TurnTransport::Udp)
            .await
    }

    /// Gather a relayed candidate from a TURN server over TCP, with TLS
    /// when `secure` is set
    pub async fn gather_turn_tcp(
        &self,
        server: SocketAddr,
        username: &str,
        password: &str,
        secure: bool,
    ) -> Result<()> {
        self.gather_turn_inner(server, username, password, TurnTransport::Tcp { secure })
            .await
    }

    async fn gather_turn_inner(
        &self,
        server: SocketAddr,
        username: &str,
        password: &str,
        transport: TurnTransport,
    ) -> Result<()> {
        self.mark_gather_started();
        self.inner.turn_requested.store(true, Ordering::Release);
        let turn = TurnServerConfig {
            server,
            username: username.to_string(),
            password: password.to_string(),
            transport,
        };
        self.inner
            .ice
            .start_gather(None, Some(turn))
            .await
            .map_err(Error::from)
    }

    fn mark_gather_started(&self) {
        let mut timeline = self.inner.timeline.lock().expect("timeline lock");
        if timeline.gather_started.is_none() {
            timeline.gather_started = Some(Instant::now());
        }
    }

    /// Generate the local offer
    pub fn generate_offer(&self) -> Result<String> {
        let offer = self
            .inner
            .negotiator
            .lock()
            .expect("negotiator lock")
            .generate_offer()?;
        Ok(offer)
    }

    /// Generate the local answer
    pub fn generate_answer(&self) -> Result<String> {
        let answer = self
            .inner
            .negotiator
            .lock()
            .expect("negotiator lock")
            .generate_answer()?;
        Ok(answer)
    }

    /// Apply the remote offer
    pub async fn handle_offer(&self, sdp: &str) -> Result<()> {
        self.inner
            .negotiator
            .lock()
            .expect("negotiator lock")
            .handle_offer(sdp)?;
        // The offerer controls; receiving an offer makes us controlled
        self.inner.ice.set_role(IceRole::Controlled).await;
        self.sync_remote_into_ice().await
    }

    /// Apply the remote answer
    pub async fn handle_answer(&self, sdp: &str) -> Result<()> {
        self.inner
            .negotiator
            .lock()
            .expect("negotiator lock")
            .handle_answer(sdp)?;
        self.sync_remote_into_ice().await?;
        // Nomination may have raced the answer
        Inner::start_dtls_if_ready(&self.inner).await;
        Ok(())
    }

    /// Apply `offer` and produce the answer in one step
    pub async fn offer_answer(&self, offer: &str) -> Result<String> {
        self.handle_offer(offer).await?;
        self.generate_answer()
    }

    /// Forget all negotiation state
    pub fn sdp_reset(&self) {
        self.inner
            .negotiator
            .lock()
            .expect("negotiator lock")
            .reset();
    }

    /// Negotiation state
    pub fn sdp_state(&self) -> SdpState {
        self.inner
            .negotiator
            .lock()
            .expect("negotiator lock")
            .state()
    }

    /// True when offer and answer have both been processed
    pub fn sdp_is_complete(&self) -> bool {
        self.inner
            .negotiator
            .lock()
            .expect("negotiator lock")
            .is_complete()
    }

    async fn sync_remote_into_ice(&self) -> Result<()> {
        let (credentials, candidates, eoc) = {
            let negotiator = self.inner.negotiator.lock().expect("negotiator lock");
            let remote = negotiator.remote_params();
            let credentials = remote.ice_credentials.clone();
            (
                credentials,
                remote.candidates.clone(),
                remote.end_of_candidates,
            )
        };

        if let Some((ufrag, pwd)) = credentials {
            self.inner
                .ice
                .set_remote_credentials(IceCredentials { ufrag, pwd })
                .await;
        }
        for (value, mid) in candidates {
            if let Err(e) = self.add_remote_candidate(&value, mid.as_deref(), 0).await {
                warn!("mediaflow: bad remote candidate in SDP: {}", e);
            }
        }
        if eoc {
            self.inner.ice.set_end_of_candidates();
        }
        Ok(())
    }

    /// Add a trickled remote candidate.
    ///
    /// `value` is the candidate attribute value, with or without the
    /// `candidate:` prefix; candidates after end-of-candidates are
    /// ignored.
    pub async fn add_remote_candidate(
        &self,
        value: &str,
        _mid: Option<&str>,
        _index: u32,
    ) -> Result<()> {
        let value = value
            .trim_start_matches("a=")
            .trim_start_matches("candidate:");
        let candidate = IceCandidate::from_sdp_value(value).map_err(Error::from)?;
        self.inner
            .ice
            .add_remote_candidate(candidate)
            .await
            .map_err(Error::from)
    }

    /// Mark the local candidate set final
    pub fn set_local_eoc(&self) {
        self.inner
            .negotiator
            .lock()
            .expect("negotiator lock")
            .set_local_end_of_candidates();
    }

    /// True once the remote signalled end-of-candidates
    pub fn have_eoc(&self) -> bool {
        self.inner.ice.have_end_of_candidates()
    }

    /// Start ICE connectivity checks (requires the SDP exchange to have
    /// delivered the remote credentials).
    pub async fn start_ice(&self) -> Result<()> {
        {
            let mut timeline = self.inner.timeline.lock().expect("timeline lock");
            if timeline.checks_started.is_none() {
                timeline.checks_started = Some(Instant::now());
            }
        }
        self.inner.ice.start_checks().await?;
        Inner::start_dtls_if_ready(&self.inner).await;
        Ok(())
    }

    /// True once ICE nominated a pair
    pub async fn ice_ready(&self) -> bool {
        self.inner.ice.state().await == IceAgentState::Ready
    }

    /// True once DTLS established and installed SRTP keys
    pub fn dtls_ready(&self) -> bool {
        self.inner.established.load(Ordering::Acquire)
    }

    /// True once the flow is fully established
    pub async fn is_ready(&self) -> bool {
        self.sdp_is_complete() && self.ice_ready().await && self.dtls_ready()
    }

    /// True while media transport is started
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// True once gathering finished
    pub fn is_gathered(&self) -> bool {
        self.inner.ice.is_gathered()
    }

    /// Number of remote candidates received
    pub async fn remote_cand_count(&self) -> usize {
        self.inner.ice.remote_candidate_count().await
    }

    /// Start media transport. Requires SDP complete, ICE ready and DTLS
    /// ready; otherwise fails with `NotReady`.
    pub async fn start_media(&self) -> Result<()> {
        if !self.sdp_is_complete() {
            return Err(Error::NotReady("SDP exchange incomplete".into()));
        }
        if !self.ice_ready().await {
            return Err(Error::NotReady("no nominated ICE pair".into()));
        }
        if !self.dtls_ready() {
            return Err(Error::NotReady("DTLS not established".into()));
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("mediaflow: media started");

        // RTCP keepalive; keeps running during hold, stops with the
        // media path.
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(5));
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                if inner.closed.load(Ordering::Acquire) || !inner.started.load(Ordering::Acquire)
                {
                    break;
                }
                let report = RtcpPacket::ReceiverReport(ReceiverReport {
                    ssrc: inner.local_ssrcs.audio,
                    reports: Vec::new(),
                });
                let wire = report.serialize();
                let protected = {
                    let mut srtp = inner.srtp.lock().expect("srtp lock");
                    match srtp.as_mut() {
                        Some(context) => match context.protect_rtcp(&wire) {
                            Ok(protected) => protected,
                            Err(e) => {
                                debug!("mediaflow: keepalive protect failed: {}", e);
                                continue;
                            }
                        },
                        None => continue,
                    }
                };
                let remote = *inner.remote_media_addr.read().expect("remote addr lock");
                if let Some((addr, via_relay)) = remote {
                    if let Err(e) = inner.ice.send_datagram(&protected, addr, via_relay).await {
                        debug!("mediaflow: keepalive send failed: {}", e);
                    }
                }
            }
        });
        Ok(())
    }

    /// Stop media transport; a no-op when already stopped
    pub fn stop_media(&self) {
        if self.inner.started.swap(false, Ordering::AcqRel) {
            info!("mediaflow: media stopped");
        }
    }

    /// Suspend or resume outbound RTP without touching ICE/DTLS
    pub fn hold_media(&self, hold: bool) {
        self.inner.hold.store(hold, Ordering::Release);
        debug!("mediaflow: hold={}", hold);
    }

    /// Local SSRC for `media`
    pub fn local_ssrc(&self, media: MediaType) -> u32 {
        match media {
            MediaType::Audio => self.inner.local_ssrcs.audio,
            MediaType::Video => self.inner.local_ssrcs.video,
            MediaType::VideoRtx => self.inner.local_ssrcs.video_rtx,
        }
    }

    /// Remote SSRC for `media`, once learned from SDP
    pub fn remote_ssrc(&self, media: MediaType) -> Option<u32> {
        let negotiator = self.inner.negotiator.lock().expect("negotiator lock");
        let remote = negotiator.remote_params();
        match media {
            MediaType::Audio => remote.audio_ssrc,
            MediaType::Video => remote.video_ssrc,
            MediaType::VideoRtx => remote.video_rtx_ssrc,
        }
    }

    /// Send one frame of interleaved PCM.
    ///
    /// Encodes with the negotiated codec, packetizes, protects and
    /// sends. During hold the frame is dropped silently.
    pub async fn send_audio(&self, samples: &[i16]) -> Result<()> {
        if !self.is_started() {
            return Err(Error::NotReady("media not started".into()));
        }
        if self.inner.hold.load(Ordering::Acquire) {
            return Ok(());
        }

        let (payload, payload_type) = {
            let negotiator = self.inner.negotiator.lock().expect("negotiator lock");
            let selected = negotiator
                .remote_params()
                .audio_codec
                .clone()
                .ok_or_else(|| Error::NotReady("no negotiated audio codec".into()))?;
            let codec = self.select_codec(&selected.encoding)?;
            (codec.encode(samples), selected.payload_type)
        };

        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed) as u16;
        let timestamp = self
            .inner
            .rtp_timestamp
            .fetch_add(samples.len() as u32, Ordering::Relaxed);

        let header = RtpHeader::new(payload_type, seq, timestamp, self.inner.local_ssrcs.audio);
        let packet = RtpPacket::new(header, Bytes::from(payload));
        self.protect_and_send_rtp(&packet.serialize()).await
    }

    /// Send RTP with a caller-built header (external encoder path)
    pub async fn send_rtp(&self, header: &RtpHeader, payload: &[u8]) -> Result<()> {
        if !self.is_started() {
            return Err(Error::NotReady("media not started".into()));
        }
        if self.inner.hold.load(Ordering::Acquire) {
            return Ok(());
        }
        let packet = RtpPacket::new(header.clone(), Bytes::copy_from_slice(payload));
        self.protect_and_send_rtp(&packet.serialize()).await
    }

    /// Send a fully formed RTP packet (protection still applied here)
    pub async fn send_raw_rtp(&self, packet: &[u8]) -> Result<()> {
        if !self.is_started() {
            return Err(Error::NotReady("media not started".into()));
        }
        self.protect_and_send_rtp(packet).await
    }

    /// Send a fully formed RTCP packet (protection still applied here)
    pub async fn send_raw_rtcp(&self, packet: &[u8]) -> Result<()> {
        if !self.is_started() {
            return Err(Error::NotReady("media not started".into()));
        }
        let protected = {
            let mut srtp = self.inner.srtp.lock().expect("srtp lock");
            let context = srtp
                .as_mut()
                .ok_or_else(|| Error::NotReady("SRTP not installed".into()))?;
            context.protect_rtcp(packet)?
        };
        self.send_to_peer(&protected).await
    }

    async fn protect_and_send_rtp(&self, packet: &[u8]) -> Result<()> {
        let protected = {
            let mut srtp = self.inner.srtp.lock().expect("srtp lock");
            let context = srtp
                .as_mut()
                .ok_or_else(|| Error::NotReady("SRTP not installed".into()))?;
            context.protect_rtp(packet)?
        };
        self.send_to_peer(&protected).await
    }

    async fn send_to_peer(&self, data: &[u8]) -> Result<()> {
        let remote = *self
            .inner
            .remote_media_addr
            .read()
            .expect("remote addr lock");
        let (addr, via_relay) =
            remote.ok_or_else(|| Error::NotReady("no nominated ICE pair".into()))?;
        self.inner
            .ice
            .send_datagram(data, addr, via_relay)
            .await
            .map_err(Error::from)
    }

    fn select_codec(&self, encoding: &str) -> Result<Arc<dyn AudioCodec>> {
        self.inner
            .config
            .audio_codecs
            .iter()
            .find(|c| c.name().eq_ignore_ascii_case(encoding))
            .cloned()
            .ok_or_else(|| Error::Internal(format!("negotiated codec {encoding} not configured")))
    }

    /// Establishment statistics snapshot
    pub fn stats(&self) -> MediaStats {
        let mut stats = *self.inner.stats.lock().expect("stats lock");
        stats.dtls_pkt_sent = self.inner.dtls_conn.packets_sent();
        stats.dtls_pkt_recv = self.inner.dtls_conn.packets_received();
        stats
    }

    /// Demultiplexer counters snapshot
    pub fn demux_counters(&self) -> DemuxCounters {
        *self.inner.counters.lock().expect("counters lock")
    }

    /// Close the flow with `reason`; idempotent
    pub async fn close(&self, reason: CloseReason) {
        Inner::close_with(&self.inner, reason).await;
    }
}

impl Drop for MediaFlow {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Inner {
    async fn close_with(inner: &Arc<Inner>, reason: CloseReason) {
        if inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.started.store(false, Ordering::Release);
        inner.ice.close().await;
        let established = inner.dtls_established.lock().expect("dtls lock").take();
        if let Some(conn) = established {
            let _ = conn.close().await;
        }
        info!("mediaflow: closed ({:?})", reason);
        if let Some(handler) = inner.handlers.close.lock().expect("handler lock").as_ref() {
            handler(reason);
        }
    }

    fn fire_local_candidate(&self, candidate: &IceCandidate) {
        if let Some(handler) = self
            .handlers
            .local_candidate
            .lock()
            .expect("handler lock")
            .as_ref()
        {
            handler(candidate);
        }
    }

    async fn start_dtls_if_ready(inner: &Arc<Inner>) {
        let remote_set = inner
            .remote_media_addr
            .read()
            .expect("remote addr lock")
            .is_some();
        if !remote_set {
            return;
        }

        let (setup, fingerprint) = {
            let negotiator = inner.negotiator.lock().expect("negotiator lock");
            if negotiator.state() != SdpState::Complete {
                return;
            }
            let fingerprint = negotiator
                .remote_params()
                .fingerprint
                .as_ref()
                .map(|f| f.value.clone());
            (negotiator.local_setup(), fingerprint)
        };
        let Some(fingerprint) = fingerprint else {
            warn!("mediaflow: SDP complete without remote fingerprint");
            return;
        };
        let is_client = match setup {
            SdpSetup::Active => true,
            SdpSetup::Passive => false,
            SdpSetup::ActPass => {
                warn!("mediaflow: DTLS role unresolved, deferring handshake");
                return;
            }
        };

        if inner.dtls_handshake_started.swap(true, Ordering::AcqRel) {
            return;
        }

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let started_at = Instant::now();
            let result = inner
                .dtls
                .handshake(
                    Arc::clone(&inner.dtls_conn),
                    is_client,
                    &fingerprint,
                    inner.config.dtls_timeout,
                )
                .await;

            match result {
                Ok(established) => {
                    {
                        let mut stats = inner.stats.lock().expect("stats lock");
                        stats.dtls_estab_ms = started_at.elapsed().as_millis() as i32;
                    }
                    *inner.srtp.lock().expect("srtp lock") = Some(established.srtp);
                    *inner.dtls_established.lock().expect("dtls lock") =
                        Some(established.conn);
                    inner.established.store(true, Ordering::Release);

                    let codec_name = {
                        let negotiator = inner.negotiator.lock().expect("negotiator lock");
                        negotiator
                            .remote_params()
                            .audio_codec
                            .as_ref()
                            .map(|c| c.encoding.clone())
                            .unwrap_or_default()
                    };
                    info!("mediaflow: established (dtls_srtp, {})", codec_name);
                    if let Some(handler) = inner
                        .handlers
                        .established
                        .lock()
                        .expect("handler lock")
                        .as_ref()
                    {
                        handler("dtls_srtp", &codec_name);
                    }
                }
                Err(e) => {
                    {
                        let mut stats = inner.stats.lock().expect("stats lock");
                        stats.dtls_estab_ms = STAT_ERROR;
                    }
                    warn!("mediaflow: DTLS failed: {}", e);
                    let reason = match e {
                        mediaflow_rtp_core::Error::FingerprintMismatch { .. } => {
                            CloseReason::Authentication
                        }
                        mediaflow_rtp_core::Error::HandshakeTimeout => CloseReason::Timeout,
                        _ => CloseReason::Protocol,
                    };
                    Inner::close_with(&inner, reason).await;
                }
            }
        });
    }

    fn handle_rtp(&self, data: &[u8]) {
        let plain = {
            let mut srtp = self.srtp.lock().expect("srtp lock");
            let Some(context) = srtp.as_mut() else {
                trace!("mediaflow: RTP before SRTP keys, dropping");
                self.counters.lock().expect("counters lock").dropped += 1;
                return;
            };
            match context.unprotect_rtp(data) {
                Ok(plain) => plain,
                Err(e) => {
                    debug!("mediaflow: SRTP unprotect failed: {}", e);
                    self.counters.lock().expect("counters lock").dropped += 1;
                    return;
                }
            }
        };

        let packet = match RtpPacket::parse(&plain) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("mediaflow: bad RTP packet: {}", e);
                self.counters.lock().expect("counters lock").dropped += 1;
                return;
            }
        };

        if self.config.external_rtp {
            if let Some(handler) = self.handlers.rtp.lock().expect("handler lock").as_ref() {
                handler(&packet.header, &packet.payload);
            }
            return;
        }

        // Route inside the bundle: SSRC first, payload-type range second
        let (audio_ssrc, video_ssrc) = {
            let negotiator = self.negotiator.lock().expect("negotiator lock");
            let remote = negotiator.remote_params();
            (remote.audio_ssrc, remote.video_ssrc)
        };
        let is_audio = if audio_ssrc == Some(packet.header.ssrc) {
            true
        } else if video_ssrc == Some(packet.header.ssrc) {
            false
        } else {
            (PT_AUDIO_START..=PT_AUDIO_END).contains(&packet.header.payload_type)
        };

        if is_audio {
            let codec_name = {
                let negotiator = self.negotiator.lock().expect("negotiator lock");
                negotiator
                    .remote_params()
                    .audio_codec
                    .as_ref()
                    .map(|c| c.encoding.clone())
            };
            let Some(codec_name) = codec_name else {
                return;
            };
            let Some(codec) = self
                .config
                .audio_codecs
                .iter()
                .find(|c| c.name().eq_ignore_ascii_case(&codec_name))
            else {
                return;
            };
            let samples = codec.decode(&packet.payload);
            if let Some(handler) = self.handlers.audio.lock().expect("handler lock").as_ref() {
                handler(&samples);
            }
        } else if let Some(handler) = self.handlers.rtp.lock().expect("handler lock").as_ref() {
            handler(&packet.header, &packet.payload);
        }
    }

    fn handle_rtcp(&self, data: &[u8]) {
        let plain = {
            let mut srtp = self.srtp.lock().expect("srtp lock");
            let Some(context) = srtp.as_mut() else {
                self.counters.lock().expect("counters lock").dropped += 1;
                return;
            };
            match context.unprotect_rtcp(data) {
                Ok(plain) => plain,
                Err(e) => {
                    debug!("mediaflow: SRTCP unprotect failed: {}", e);
                    self.counters.lock().expect("counters lock").dropped += 1;
                    return;
                }
            }
        };
        if let Some(handler) = self.handlers.rtcp.lock().expect("handler lock").as_ref() {
            handler(&plain);
        }
    }
}

async fn socket_loop(inner: Arc<Inner>) {
    let mut buf = vec![0u8; 2048];
    loop {
        let (len, src) = match inner.socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("mediaflow: socket error: {}", e);
                Inner::close_with(&inner, CloseReason::Internal).await;
                return;
            }
        };
        handle_datagram(&inner, &buf[..len], src).await;
    }
}

async fn handle_datagram(inner: &Arc<Inner>, data: &[u8], src: SocketAddr) {
    let class = classify(data);
    inner.counters.lock().expect("counters lock").record(class);

    match class {
        PacketClass::Stun => match inner.ice.handle_packet(data, src).await {
            Ok(Some((payload, peer))) => {
                // Unwrapped relay traffic goes back through the demux
                Box::pin(handle_datagram(inner, &payload, peer)).await;
            }
            Ok(None) => {}
            Err(e) => {
                debug!("mediaflow: dropping bad STUN from {}: {}", src, e);
                inner.counters.lock().expect("counters lock").dropped += 1;
            }
        },
        PacketClass::Dtls => {
            // Records arriving before the handshake starts queue in the
            // channel.
            if inner.dtls_in.send(Bytes::copy_from_slice(data)).await.is_err() {
                debug!("mediaflow: DTLS channel closed");
            }
            if inner.early_dtls.load(Ordering::Acquire)
                && !inner.dtls_handshake_started.load(Ordering::Acquire)
            {
                {
                    let mut remote = inner.remote_media_addr.write().expect("remote addr lock");
                    if remote.is_none() {
                        debug!("mediaflow: early DTLS trigger from {}", src);
                        *remote = Some((src, false));
                        inner.dtls_conn.set_remote(src);
                    }
                }
                Inner::start_dtls_if_ready(inner).await;
            }
        }
        PacketClass::Rtp => inner.handle_rtp(data),
        PacketClass::Rtcp => inner.handle_rtcp(data),
        PacketClass::Unknown => {
            trace!("mediaflow: dropped unclassifiable datagram from {}", src);
        }
    }
}

async fn ice_event_loop(inner: Arc<Inner>, mut events: mpsc::Receiver<IceAgentEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            IceAgentEvent::NewLocalCandidate(candidate) => {
                {
                    let mut negotiator = inner.negotiator.lock().expect("negotiator lock");
                    negotiator.add_local_candidate(candidate.to_sdp_value());
                }
                if candidate.candidate_type
                    == mediaflow_ice_core::CandidateType::Relayed
                {
                    let elapsed = inner
                        .timeline
                        .lock()
                        .expect("timeline lock")
                        .gather_started
                        .map(|t| t.elapsed().as_millis() as i32);
                    if let Some(ms) = elapsed {
                        inner.stats.lock().expect("stats lock").turn_alloc_ms = ms;
                    }
                }
                if inner.config.nat_mode == NatMode::TrickleDualstack {
                    inner.fire_local_candidate(&candidate);
                }
            }
            IceAgentEvent::GatheringComplete => {
                {
                    let mut negotiator = inner.negotiator.lock().expect("negotiator lock");
                    negotiator.set_local_end_of_candidates();
                }
                if inner.turn_requested.load(Ordering::Acquire) {
                    let mut stats = inner.stats.lock().expect("stats lock");
                    if stats.turn_alloc_ms < 0 {
                        stats.turn_alloc_ms = STAT_ERROR;
                    }
                }
                if inner.config.nat_mode != NatMode::TrickleDualstack {
                    for candidate in inner.ice.local_candidates().await {
                        inner.fire_local_candidate(&candidate);
                    }
                }
            }
            IceAgentEvent::SelectedPair { local, remote } => {
                let elapsed = inner
                    .timeline
                    .lock()
                    .expect("timeline lock")
                    .checks_started
                    .map(|t| t.elapsed().as_millis() as i32)
                    .unwrap_or(0);
                inner.stats.lock().expect("stats lock").nat_estab_ms = elapsed;
                let via_relay =
                    local.candidate_type == mediaflow_ice_core::CandidateType::Relayed;
                *inner.remote_media_addr.write().expect("remote addr lock") =
                    Some((remote.address, via_relay));
                inner.dtls_conn.set_remote(remote.address);
                Inner::start_dtls_if_ready(&inner).await;
            }
            IceAgentEvent::StateChange(IceAgentState::Failed) => {
                inner.stats.lock().expect("stats lock").nat_estab_ms = STAT_ERROR;
                Inner::close_with(&inner, CloseReason::Timeout).await;
            }
            IceAgentEvent::StateChange(_) => {}
        }
    }
}

async fn dtls_out_loop(inner: Arc<Inner>, mut records: mpsc::Receiver<Bytes>) {
    while let Some(record) = records.recv().await {
        let remote = *inner.remote_media_addr.read().expect("remote addr lock");
        let Some((addr, via_relay)) = remote else {
            debug!("mediaflow: dropping DTLS record, no remote path yet");
            continue;
        };
        if let Err(e) = inner.ice.send_datagram(&record, addr, via_relay).await {
            warn!("mediaflow: DTLS send failed: {}", e);
        }
    }
}
