//! ICE agent
//!
//! Drives candidate gathering (host, server-reflexive via STUN, relayed
//! via TURN), the connectivity check list and pair nomination for a single
//! component over a single UDP socket. The agent does not own the socket
//! read loop; the session's demultiplexer feeds classified STUN datagrams
//! into [`IceAgent::handle_packet`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};

use crate::candidate::{
    compute_priority, CandidatePair, CandidateType, IceCandidate, PairState, TransportProtocol,
};
use crate::error::{Error, Result};
use crate::stun::{Attribute, Message, MessageType};
use crate::turn::{self, TurnServerConfig, TurnTransport};

/// Initial retransmission timeout for STUN transactions
pub const STUN_RTO_INITIAL: Duration = Duration::from_millis(500);

/// Maximum STUN transmission attempts (initial send plus retransmits)
pub const STUN_MAX_ATTEMPTS: u32 = 7;

/// Pacing interval between new connectivity checks
const CHECK_PACING: Duration = Duration::from_millis(50);

/// Overall TURN allocation timeout
const TURN_ALLOC_TIMEOUT: Duration = Duration::from_secs(10);

/// ICE role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceRole {
    /// Initiating side, performs aggressive nomination
    Controlling,

    /// Answering side, accepts the remote nomination
    Controlled,
}

/// Local ICE credentials carried in SDP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCredentials {
    /// ice-ufrag
    pub ufrag: String,

    /// ice-pwd
    pub pwd: String,
}

impl IceCredentials {
    /// Generate fresh random credentials
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let ufrag: String = (&mut rng)
            .sample_iter(Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        let pwd: String = (&mut rng)
            .sample_iter(Alphanumeric)
            .take(22)
            .map(char::from)
            .collect();
        Self { ufrag, pwd }
    }
}

/// ICE agent configuration
#[derive(Debug, Clone)]
pub struct IceConfig {
    /// Controlling or controlled
    pub role: IceRole,

    /// Ice-lite: respond to checks but never originate them
    pub lite: bool,

    /// Emit candidates as they are discovered instead of in one batch
    pub trickle: bool,

    /// Window within which a pair must be nominated before the agent fails
    pub check_timeout: Duration,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            role: IceRole::Controlling,
            lite: false,
            trickle: true,
            check_timeout: Duration::from_secs(40),
        }
    }
}

/// ICE agent state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceAgentState {
    /// Initial state
    New,

    /// Gathering candidates
    Gathering,

    /// All configured gathering sources finished
    Gathered,

    /// Connectivity checks in progress
    Checking,

    /// A pair has been nominated
    Ready,

    /// No pair could be nominated within the window
    Failed,

    /// Agent shut down
    Closed,
}

impl std::fmt::Display for IceAgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Gathering => write!(f, "gathering"),
            Self::Gathered => write!(f, "gathered"),
            Self::Checking => write!(f, "checking"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// ICE agent events
#[derive(Debug, Clone)]
pub enum IceAgentEvent {
    /// State change
    StateChange(IceAgentState),

    /// New local candidate discovered
    NewLocalCandidate(IceCandidate),

    /// All gathering sources finished
    GatheringComplete,

    /// A pair was nominated
    SelectedPair {
        /// Local side of the nominated pair
        local: IceCandidate,
        /// Remote side of the nominated pair
        remote: IceCandidate,
    },
}

/// Non-STUN payload unwrapped from a TURN Data indication; the caller must
/// run it back through the demultiplexer.
pub type RelayedDatagram = (Bytes, SocketAddr);

/// ICE agent for a single media component
pub struct IceAgent {
    config: IceConfig,
    role: RwLock<IceRole>,
    socket: Arc<UdpSocket>,
    local_credentials: IceCredentials,
    remote_credentials: RwLock<Option<IceCredentials>>,
    tiebreaker: u64,
    foundation_seq: AtomicU32,

    state: RwLock<IceAgentState>,
    local_candidates: RwLock<Vec<IceCandidate>>,
    remote_candidates: RwLock<Vec<IceCandidate>>,
    remote_eoc: AtomicBool,
    gathered: AtomicBool,
    checks_started: AtomicBool,

    pairs: Mutex<Vec<CandidatePair>>,
    selected: RwLock<Option<(IceCandidate, IceCandidate)>>,

    /// Outstanding STUN transactions keyed by transaction id
    pending: Mutex<HashMap<[u8; 12], oneshot::Sender<Message>>>,

    /// Relay server address once an allocation exists
    relay_server: RwLock<Option<SocketAddr>>,

    event_tx: mpsc::Sender<IceAgentEvent>,
}

impl IceAgent {
    /// Create an agent on an already-bound session socket
    pub fn new(
        socket: Arc<UdpSocket>,
        config: IceConfig,
    ) -> (Arc<Self>, mpsc::Receiver<IceAgentEvent>) {
        let (event_tx, event_rx) = mpsc::channel(64);
        let agent = Arc::new(Self {
            role: RwLock::new(config.role),
            config,
            socket,
            local_credentials: IceCredentials::generate(),
            remote_credentials: RwLock::new(None),
            tiebreaker: rand::random(),
            foundation_seq: AtomicU32::new(1),
            state: RwLock::new(IceAgentState::New),
            local_candidates: RwLock::new(Vec::new()),
            remote_candidates: RwLock::new(Vec::new()),
            remote_eoc: AtomicBool::new(false),
            gathered: AtomicBool::new(false),
            checks_started: AtomicBool::new(false),
            pairs: Mutex::new(Vec::new()),
            selected: RwLock::new(None),
            pending: Mutex::new(HashMap::new()),
            relay_server: RwLock::new(None),
            event_tx,
        });
        (agent, event_rx)
    }

    /// Local ice-ufrag / ice-pwd
    pub fn local_credentials(&self) -> &IceCredentials {
        &self.local_credentials
    }

    /// Current role
    pub async fn role(&self) -> IceRole {
        *self.role.read().await
    }

    /// Change the role (the offerer controls, the answerer is
    /// controlled); must happen before checks start.
    pub async fn set_role(&self, role: IceRole) {
        let mut guard = self.role.write().await;
        if *guard != role {
            debug!("ice: role {:?} -> {:?}", *guard, role);
            *guard = role;
        }
    }

    /// Install the remote credentials learned from SDP
    pub async fn set_remote_credentials(&self, credentials: IceCredentials) {
        *self.remote_credentials.write().await = Some(credentials);
    }

    /// Current state
    pub async fn state(&self) -> IceAgentState {
        *self.state.read().await
    }

    /// Local port of the session socket
    pub fn local_port(&self) -> u16 {
        self.socket.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    /// Snapshot of local candidates
    pub async fn local_candidates(&self) -> Vec<IceCandidate> {
        self.local_candidates.read().await.clone()
    }

    /// Number of remote candidates received so far
    pub async fn remote_candidate_count(&self) -> usize {
        self.remote_candidates.read().await.len()
    }

    /// The nominated pair, once ready
    pub async fn selected_pair(&self) -> Option<(IceCandidate, IceCandidate)> {
        self.selected.read().await.clone()
    }

    /// True once all gathering sources have finished
    pub fn is_gathered(&self) -> bool {
        self.gathered.load(Ordering::Acquire)
    }

    async fn set_state(&self, new_state: IceAgentState) {
        let old = {
            let mut guard = self.state.write().await;
            std::mem::replace(&mut *guard, new_state)
        };
        if old != new_state {
            debug!("ice: state {} -> {}", old, new_state);
            self.emit(IceAgentEvent::StateChange(new_state)).await;
        }
    }

    async fn emit(&self, event: IceAgentEvent) {
        if self.event_tx.send(event).await.is_err() {
            trace!("ice: event receiver dropped");
        }
    }

    /// Register a host candidate for a local interface address
    pub async fn add_local_host_candidate(&self, ifname: &str, addr: SocketAddr) -> Result<()> {
        let seq = self.foundation_seq.fetch_add(1, Ordering::Relaxed);
        let candidate = IceCandidate::new(
            seq.to_string(),
            1,
            TransportProtocol::Udp,
            addr,
            CandidateType::Host,
            None,
        );
        debug!("ice: host candidate on {}: {}", ifname, addr);
        self.local_candidates.write().await.push(candidate.clone());
        self.pair_new_local(&candidate).await;
        self.emit(IceAgentEvent::NewLocalCandidate(candidate)).await;
        Ok(())
    }

    /// Start gathering from the given STUN/TURN servers.
    ///
    /// Host candidates must already have been added. Emits
    /// [`IceAgentEvent::GatheringComplete`] when all sources have finished.
    pub async fn start_gather(
        self: &Arc<Self>,
        stun_server: Option<SocketAddr>,
        turn_server: Option<TurnServerConfig>,
    ) -> Result<()> {
        self.set_state(IceAgentState::Gathering).await;

        let agent = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(stun_server) = stun_server {
                if let Err(e) = agent.gather_server_reflexive(stun_server).await {
                    warn!("ice: srflx gathering failed: {}", e);
                }
            }
            if let Some(turn) = turn_server {
                if let Err(e) = agent.gather_relayed(&turn).await {
                    warn!("ice: relay gathering failed: {}", e);
                }
            }

            agent.gathered.store(true, Ordering::Release);
            if agent.state().await == IceAgentState::Gathering {
                agent.set_state(IceAgentState::Gathered).await;
            }
            info!(
                "ice: gathering complete, {} local candidates",
                agent.local_candidates.read().await.len()
            );
            agent.emit(IceAgentEvent::GatheringComplete).await;
        });
        Ok(())
    }

    async fn gather_server_reflexive(self: &Arc<Self>, server: SocketAddr) -> Result<()> {
        let request = Message::binding_request(Message::random_transaction_id());
        let response = self.transaction(request, None, server, false).await?;

        let mapped = response.xor_mapped_address().ok_or_else(|| {
            Error::MalformedStun("binding response without mapped address".into())
        })?;

        let base = self
            .local_candidates
            .read()
            .await
            .iter()
            .find(|c| c.candidate_type == CandidateType::Host)
            .map(|c| c.address);

        if base.map(|b| b == mapped).unwrap_or(false) {
            debug!("ice: reflexive address equals base, no srflx candidate");
            return Ok(());
        }

        let seq = self.foundation_seq.fetch_add(1, Ordering::Relaxed);
        let candidate = IceCandidate::new(
            seq.to_string(),
            1,
            TransportProtocol::Udp,
            mapped,
            CandidateType::ServerReflexive,
            base,
        );
        info!("ice: srflx candidate {}", mapped);
        self.local_candidates.write().await.push(candidate.clone());
        self.pair_new_local(&candidate).await;
        self.emit(IceAgentEvent::NewLocalCandidate(candidate)).await;
        Ok(())
    }

    async fn gather_relayed(self: &Arc<Self>, turn_cfg: &TurnServerConfig) -> Result<()> {
        // One automatic rebind after a failed attempt before giving up.
        let allocation = match self.allocate_once(turn_cfg).await {
            Ok(allocation) => allocation,
            Err(Error::CredentialsRejected(reason)) => {
                return Err(Error::CredentialsRejected(reason));
            }
            Err(first) => {
                warn!("ice: turn allocation failed ({}), rebinding once", first);
                self.allocate_once(turn_cfg).await?
            }
        };

        *self.relay_server.write().await = Some(turn_cfg.server);

        let base = self.socket.local_addr().ok();
        let seq = self.foundation_seq.fetch_add(1, Ordering::Relaxed);
        let candidate = IceCandidate::new(
            seq.to_string(),
            1,
            TransportProtocol::Udp,
            allocation.relayed,
            CandidateType::Relayed,
            base,
        );
        info!(
            "ice: relayed candidate {} (lifetime {:?})",
            allocation.relayed, allocation.lifetime
        );
        self.local_candidates.write().await.push(candidate.clone());
        self.pair_new_local(&candidate).await;
        self.emit(IceAgentEvent::NewLocalCandidate(candidate)).await;

        // Keep the allocation alive for the session's lifetime.
        let agent = Arc::clone(self);
        let turn_cfg = turn_cfg.clone();
        let refresh_after = allocation.lifetime / 2;
        tokio::spawn(async move {
            loop {
                sleep(refresh_after).await;
                if agent.state().await == IceAgentState::Closed {
                    break;
                }
                let request = Message::refresh_request(Message::random_transaction_id(), 600)
                    .with_attribute(Attribute::Username(turn_cfg.username.clone()));
                match agent
                    .transaction(
                        request,
                        Some(turn_cfg.password.as_bytes().to_vec()),
                        turn_cfg.server,
                        false,
                    )
                    .await
                {
                    Ok(_) => trace!("ice: turn allocation refreshed"),
                    Err(e) => {
                        warn!("ice: turn refresh failed: {}", e);
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    async fn allocate_once(
        self: &Arc<Self>,
        turn_cfg: &TurnServerConfig,
    ) -> Result<turn::TurnAllocation> {
        match turn_cfg.transport {
            TurnTransport::Udp => {
                let request = turn::allocate_request(turn_cfg);
                let response = timeout(
                    TURN_ALLOC_TIMEOUT,
                    self.transaction(
                        request,
                        Some(turn_cfg.password.as_bytes().to_vec()),
                        turn_cfg.server,
                        false,
                    ),
                )
                .await
                .map_err(|_| Error::Timeout)??;
                turn::interpret_allocate_response(&response)
            }
            TurnTransport::Tcp { .. } => turn::allocate_tcp(turn_cfg, TURN_ALLOC_TIMEOUT).await,
        }
    }

    /// Add a candidate received from the remote side.
    ///
    /// Candidates arriving after end-of-candidates are ignored.
    pub async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if self.remote_eoc.load(Ordering::Acquire) {
            debug!(
                "ice: ignoring remote candidate after end-of-candidates: {}",
                candidate.address
            );
            return Ok(());
        }

        {
            let mut remotes = self.remote_candidates.write().await;
            if remotes.iter().any(|c| c.address == candidate.address) {
                trace!("ice: duplicate remote candidate {}", candidate.address);
                return Ok(());
            }
            remotes.push(candidate.clone());
        }
        debug!("ice: remote candidate {}", candidate.to_sdp_value());

        let locals = self.local_candidates.read().await.clone();
        let controlling = self.role().await == IceRole::Controlling;
        let checking = self.checks_started.load(Ordering::Acquire);
        let mut pairs = self.pairs.lock().await;
        for local in locals {
            if local.component != candidate.component {
                continue;
            }
            let mut pair = CandidatePair::new(local, candidate.clone(), controlling);
            if checking {
                pair.state = PairState::Waiting;
            }
            pairs.push(pair);
        }
        pairs.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(())
    }

    /// Mark the remote candidate list complete
    pub fn set_end_of_candidates(&self) {
        self.remote_eoc.store(true, Ordering::Release);
    }

    /// True once end-of-candidates has been observed
    pub fn have_end_of_candidates(&self) -> bool {
        self.remote_eoc.load(Ordering::Acquire)
    }

    async fn pair_new_local(&self, local: &IceCandidate) {
        let remotes = self.remote_candidates.read().await.clone();
        if remotes.is_empty() {
            return;
        }
        let controlling = self.role().await == IceRole::Controlling;
        let checking = self.checks_started.load(Ordering::Acquire);
        let mut pairs = self.pairs.lock().await;
        for remote in remotes {
            if remote.component != local.component {
                continue;
            }
            let mut pair = CandidatePair::new(local.clone(), remote, controlling);
            if checking {
                pair.state = PairState::Waiting;
            }
            pairs.push(pair);
        }
        pairs.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Start connectivity checks.
    ///
    /// In ice-lite mode this only arms the failure window; the agent keeps
    /// responding to checks and waits for the remote controller to
    /// nominate.
    pub async fn start_checks(self: &Arc<Self>) -> Result<()> {
        if self.checks_started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // The remote controller may already have nominated
        if self.selected.read().await.is_none() {
            self.set_state(IceAgentState::Checking).await;
        }

        // Arm the connectivity window regardless of mode.
        let agent = Arc::clone(self);
        tokio::spawn(async move {
            sleep(agent.config.check_timeout).await;
            if agent.selected.read().await.is_none()
                && agent.state().await != IceAgentState::Closed
            {
                warn!("ice: no pair nominated within the connectivity window");
                agent.set_state(IceAgentState::Failed).await;
            }
        });

        if self.config.lite {
            info!("ice: lite mode, responder only");
            return Ok(());
        }

        if self.remote_credentials.read().await.is_none() {
            return Err(Error::InvalidState(
                "remote credentials not set before start_checks".into(),
            ));
        }

        {
            let mut pairs = self.pairs.lock().await;
            for pair in pairs.iter_mut() {
                if pair.state == PairState::Frozen {
                    pair.state = PairState::Waiting;
                }
            }
        }

        let agent = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if agent.selected.read().await.is_some() {
                    break;
                }
                match agent.state().await {
                    IceAgentState::Failed | IceAgentState::Closed => break,
                    _ => {}
                }

                let next = {
                    let mut pairs = agent.pairs.lock().await;
                    let idx = pairs.iter().position(|p| p.state == PairState::Waiting);
                    if let Some(idx) = idx {
                        pairs[idx].state = PairState::InProgress;
                        Some(pairs[idx].clone())
                    } else {
                        None
                    }
                };

                if let Some(pair) = next {
                    let agent = Arc::clone(&agent);
                    tokio::spawn(async move {
                        agent.check_pair(pair).await;
                    });
                }

                sleep(CHECK_PACING).await;
            }
        });
        Ok(())
    }

    async fn check_pair(self: Arc<Self>, pair: CandidatePair) {
        let Some(remote_creds) = self.remote_credentials.read().await.clone() else {
            return;
        };
        let username = format!("{}:{}", remote_creds.ufrag, self.local_credentials.ufrag);
        let controlling = self.role().await == IceRole::Controlling;

        let mut request = Message::binding_request(Message::random_transaction_id())
            .with_attribute(Attribute::Username(username))
            .with_attribute(Attribute::Priority(compute_priority(
                CandidateType::PeerReflexive,
                65535,
                pair.local.component,
            )));
        request = if controlling {
            // Aggressive nomination: every check carries USE-CANDIDATE.
            request
                .with_attribute(Attribute::IceControlling(self.tiebreaker))
                .with_attribute(Attribute::UseCandidate)
        } else {
            request.with_attribute(Attribute::IceControlled(self.tiebreaker))
        };

        let via_relay = pair.local.candidate_type == CandidateType::Relayed;
        trace!(
            "ice: checking pair {} -> {} (relay={})",
            pair.local.address,
            pair.remote.address,
            via_relay
        );

        let result = self
            .transaction(
                request,
                Some(remote_creds.pwd.as_bytes().to_vec()),
                pair.remote.address,
                via_relay,
            )
            .await;

        match result {
            Ok(response) if response.msg_type == MessageType::BindingResponse => {
                self.mark_pair(&pair, PairState::Succeeded).await;
                debug!(
                    "ice: pair succeeded {} -> {}",
                    pair.local.address, pair.remote.address
                );
                if controlling {
                    self.try_nominate(&pair).await;
                }
            }
            Ok(response) => {
                warn!(
                    "ice: check answered with {:?} for {} -> {}",
                    response.msg_type, pair.local.address, pair.remote.address
                );
                self.mark_pair(&pair, PairState::Failed).await;
            }
            Err(e) => {
                debug!(
                    "ice: check failed {} -> {}: {}",
                    pair.local.address, pair.remote.address, e
                );
                self.mark_pair(&pair, PairState::Failed).await;
            }
        }
    }

    async fn mark_pair(&self, pair: &CandidatePair, state: PairState) {
        let mut pairs = self.pairs.lock().await;
        if let Some(p) = pairs.iter_mut().find(|p| {
            p.local.address == pair.local.address && p.remote.address == pair.remote.address
        }) {
            p.state = state;
        }
    }

    /// Nominate `pair` unless a pair is already nominated; nomination is
    /// monotonic per component.
    async fn try_nominate(&self, pair: &CandidatePair) {
        {
            let mut selected = self.selected.write().await;
            if selected.is_some() {
                return;
            }
            *selected = Some((pair.local.clone(), pair.remote.clone()));
        }
        {
            let mut pairs = self.pairs.lock().await;
            if let Some(p) = pairs.iter_mut().find(|p| {
                p.local.address == pair.local.address && p.remote.address == pair.remote.address
            }) {
                p.state = PairState::Succeeded;
                p.nominated = true;
            }
        }
        info!(
            "ice: nominated pair {} -> {}",
            pair.local.address, pair.remote.address
        );
        self.set_state(IceAgentState::Ready).await;
        self.emit(IceAgentEvent::SelectedPair {
            local: pair.local.clone(),
            remote: pair.remote.clone(),
        })
        .await;
    }

    /// Feed one inbound STUN datagram into the agent.
    ///
    /// Returns a relayed payload when the datagram was a TURN Data
    /// indication wrapping non-STUN traffic; the caller re-runs it through
    /// the demultiplexer.
    pub async fn handle_packet(
        self: &Arc<Self>,
        data: &[u8],
        src: SocketAddr,
    ) -> Result<Option<RelayedDatagram>> {
        let message = Message::decode(data)?;

        match message.msg_type {
            MessageType::DataIndication => {
                let Some(peer) = message.peer_address() else {
                    return Err(Error::MalformedStun("data indication without peer".into()));
                };
                let Some(payload) = message.data().cloned() else {
                    return Err(Error::MalformedStun("data indication without data".into()));
                };
                if Message::is_stun(&payload) {
                    // Checks arriving through the relay
                    return Box::pin(self.handle_packet(&payload, peer)).await;
                }
                return Ok(Some((payload, peer)));
            }
            MessageType::BindingRequest => {
                self.handle_binding_request(&message, data, src).await?;
            }
            t if t.is_success() || t.is_error() => {
                let waiter = self.pending.lock().await.remove(&message.transaction_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(message);
                    }
                    None => trace!("ice: response for unknown transaction from {}", src),
                }
            }
            other => {
                debug!("ice: ignoring {:?} from {}", other, src);
            }
        }
        Ok(None)
    }

    async fn handle_binding_request(
        self: &Arc<Self>,
        request: &Message,
        raw: &[u8],
        src: SocketAddr,
    ) -> Result<()> {
        // Short-term credentials: inbound requests are keyed by our pwd.
        if self.remote_credentials.read().await.is_some()
            && !Message::verify_integrity(raw, self.local_credentials.pwd.as_bytes())
        {
            warn!(
                "ice: dropping binding request with bad integrity from {}",
                src
            );
            return Ok(());
        }

        let response = Message::binding_response(request.transaction_id, src);
        let encoded = response.encode(Some(self.local_credentials.pwd.as_bytes()));
        self.send_datagram(&encoded, src, false).await?;

        // Learn a peer-reflexive candidate from unknown sources.
        let known = {
            let remotes = self.remote_candidates.read().await;
            remotes.iter().any(|c| c.address == src)
        };
        if !known && !self.remote_eoc.load(Ordering::Acquire) {
            let seq = self.foundation_seq.fetch_add(1, Ordering::Relaxed);
            let mut candidate = IceCandidate::new(
                seq.to_string(),
                1,
                TransportProtocol::Udp,
                src,
                CandidateType::PeerReflexive,
                None,
            );
            if let Some(priority) = request.priority() {
                candidate.priority = priority;
            }
            debug!("ice: learned prflx candidate {}", src);
            self.add_remote_candidate(candidate).await?;
        }

        // The remote controller nominates with USE-CANDIDATE.
        let passive_role = self.config.lite || self.role().await == IceRole::Controlled;
        if passive_role && request.has_use_candidate() {
            let pair = {
                let pairs = self.pairs.lock().await;
                pairs.iter().find(|p| p.remote.address == src).cloned()
            };
            if let Some(pair) = pair {
                // Inbound request plus our response demonstrates both
                // directions on this path.
                self.try_nominate(&pair).await;
            }
        }
        Ok(())
    }

    /// Run one STUN transaction with RTO backoff (500 ms doubling, up to
    /// [`STUN_MAX_ATTEMPTS`] transmissions).
    async fn transaction(
        self: &Arc<Self>,
        request: Message,
        integrity_key: Option<Vec<u8>>,
        dest: SocketAddr,
        via_relay: bool,
    ) -> Result<Message> {
        let transaction_id = request.transaction_id;
        let encoded = request.encode(integrity_key.as_deref());

        let (tx, mut rx) = oneshot::channel();
        self.pending.lock().await.insert(transaction_id, tx);

        let mut rto = STUN_RTO_INITIAL;
        for attempt in 0..STUN_MAX_ATTEMPTS {
            if attempt > 0 {
                trace!("ice: retransmit {} to {} (rto {:?})", attempt, dest, rto);
            }
            if let Err(e) = self.send_datagram(&encoded, dest, via_relay).await {
                self.pending.lock().await.remove(&transaction_id);
                return Err(e);
            }

            match timeout(rto, &mut rx).await {
                Ok(Ok(response)) => {
                    if let Some((code, reason)) = response.error_code() {
                        return Err(Error::StunErrorResponse {
                            code,
                            reason: reason.to_string(),
                        });
                    }
                    return Ok(response);
                }
                Ok(Err(_)) => break,
                Err(_) => rto *= 2,
            }
        }

        self.pending.lock().await.remove(&transaction_id);
        Err(Error::Timeout)
    }

    /// Send raw bytes toward `dest`, wrapping in a TURN Send indication
    /// when the path goes through the relay.
    pub async fn send_datagram(
        &self,
        data: &[u8],
        dest: SocketAddr,
        via_relay: bool,
    ) -> Result<()> {
        if via_relay {
            if let Some(relay) = *self.relay_server.read().await {
                let indication = Message::send_indication(
                    Message::random_transaction_id(),
                    dest,
                    Bytes::copy_from_slice(data),
                );
                self.socket.send_to(&indication.encode(None), relay).await?;
                return Ok(());
            }
        }
        self.socket.send_to(data, dest).await?;
        Ok(())
    }

    /// Shut the agent down; outstanding transactions will time out.
    pub async fn close(&self) {
        self.set_state(IceAgentState::Closed).await;
        self.pending.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_agent(config: IceConfig) -> (Arc<IceAgent>, mpsc::Receiver<IceAgentEvent>) {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        IceAgent::new(socket, config)
    }

    #[tokio::test]
    async fn test_credentials_generated() {
        let (agent, _rx) = test_agent(IceConfig::default()).await;
        let creds = agent.local_credentials();
        assert_eq!(creds.ufrag.len(), 8);
        assert_eq!(creds.pwd.len(), 22);
    }

    #[tokio::test]
    async fn test_remote_candidate_after_eoc_is_ignored() {
        let (agent, _rx) = test_agent(IceConfig::default()).await;
        let cand = IceCandidate::new(
            "1",
            1,
            TransportProtocol::Udp,
            "127.0.0.1:5000".parse().unwrap(),
            CandidateType::Host,
            None,
        );
        agent.add_remote_candidate(cand.clone()).await.unwrap();
        assert_eq!(agent.remote_candidate_count().await, 1);

        agent.set_end_of_candidates();
        let late = IceCandidate::new(
            "2",
            1,
            TransportProtocol::Udp,
            "127.0.0.1:5001".parse().unwrap(),
            CandidateType::Host,
            None,
        );
        agent.add_remote_candidate(late).await.unwrap();
        assert_eq!(agent.remote_candidate_count().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_remote_candidate_dropped() {
        let (agent, _rx) = test_agent(IceConfig::default()).await;
        let cand = IceCandidate::new(
            "1",
            1,
            TransportProtocol::Udp,
            "127.0.0.1:6000".parse().unwrap(),
            CandidateType::Host,
            None,
        );
        agent.add_remote_candidate(cand.clone()).await.unwrap();
        agent.add_remote_candidate(cand).await.unwrap();
        assert_eq!(agent.remote_candidate_count().await, 1);
    }

    #[tokio::test]
    async fn test_host_candidate_emits_event() {
        let (agent, mut rx) = test_agent(IceConfig::default()).await;
        let addr = agent.socket.local_addr().unwrap();
        agent.add_local_host_candidate("lo", addr).await.unwrap();

        match rx.recv().await {
            Some(IceAgentEvent::NewLocalCandidate(c)) => {
                assert_eq!(c.address, addr);
                assert_eq!(c.candidate_type, CandidateType::Host);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pairs_form_on_remote_candidate() {
        let (agent, _rx) = test_agent(IceConfig::default()).await;
        let addr = agent.socket.local_addr().unwrap();
        agent.add_local_host_candidate("lo", addr).await.unwrap();
        agent
            .add_remote_candidate(IceCandidate::new(
                "9",
                1,
                TransportProtocol::Udp,
                "127.0.0.1:7000".parse().unwrap(),
                CandidateType::Host,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(agent.pairs.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_start_checks_requires_remote_credentials() {
        let (agent, _rx) = test_agent(IceConfig::default()).await;
        assert!(matches!(
            agent.start_checks().await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_lite_agent_does_not_originate_checks() {
        let (agent, _rx) = test_agent(IceConfig {
            lite: true,
            role: IceRole::Controlled,
            ..Default::default()
        })
        .await;
        // No remote credentials needed in lite mode; it only responds.
        agent.start_checks().await.unwrap();
        assert_eq!(agent.state().await, IceAgentState::Checking);
    }
}
