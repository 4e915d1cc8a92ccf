//! In-memory stand-ins for the platform seams.
//!
//! A [`LoopbackSignalHub`] plays the signaling server, [`LoopbackPeerFactory`]
//! produces links that "connect" as soon as both descriptions are set, and
//! [`LoopbackMedia`] / [`LoopbackMicrophone`] hand out fake tracks. Every piece
//! exposes controls so tests and the demo can inject failures.
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::debug;

use crate::audio::{AudioConstraints, CaptureStream, Microphone};
use crate::config::IceServer;
use crate::media::{
    AudioTrack, LocalMedia, MediaConstraints, MediaDevices, MediaError, VideoTrack,
};
use crate::messages::{
    AudioChunk, ClientMessage, IceCandidate, LanguageSettings, LiveSubtitle, SessionDescription,
    ServerMessage,
};
use crate::peer::{
    IceConnectionState, LinkEvents, LinkStats, PeerConnectionState, PeerError, PeerEvent, PeerLink,
    PeerLinkFactory, StatsProbe, TrackSwap,
};
use crate::profile::VideoProfile;
use crate::signal::{SignalError, SignalTransport};

const INBOUND_CAPACITY: usize = 256;
const MIC_CAPACITY: usize = 64;
const DEFAULT_MIC_RATE: u32 = 48_000;

fn ice_credential(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn fake_sdp(kind: &str, ufrag: &str, pwd: &str, media: &[String]) -> String {
    let mut sdp = format!(
        "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns={kind}\r\na=ice-ufrag:{ufrag}\r\na=ice-pwd:{pwd}\r\n"
    );
    for id in media {
        sdp.push_str(&format!("a=msid:{id}\r\n"));
    }
    sdp
}

#[derive(Debug)]
struct LinkInner {
    local_set: bool,
    remote_set: bool,
    connected: bool,
    closed: bool,
    /// A local offer is out and its answer has not been applied.
    offer_pending: bool,
    ufrag: String,
    pwd: String,
    applied: Vec<IceCandidate>,
    restarts: u32,
    tracks: Vec<String>,
    video: Option<VideoTrack>,
    packets_sent: u64,
    packets_lost: u64,
    bytes_sent: u64,
}

#[derive(Debug, Clone, Copy)]
struct StatsStep {
    packets_sent: u64,
    packets_lost: u64,
    bytes_sent: u64,
}

impl Default for StatsStep {
    // 1000 packets, no loss, 2.5 Mbit per poll.
    fn default() -> Self {
        Self {
            packets_sent: 1_000,
            packets_lost: 0,
            bytes_sent: 625_000,
        }
    }
}

#[derive(Debug, Default)]
struct FactoryControls {
    fail_restarts: bool,
    renegotiate_on_swap: bool,
    stats_step: StatsStep,
}

/// Handle on one loopback link.
#[derive(Debug, Clone)]
pub struct LoopbackLink {
    events: LinkEvents,
    inner: Arc<Mutex<LinkInner>>,
    controls: Arc<Mutex<FactoryControls>>,
}

impl LoopbackLink {
    fn new(events: LinkEvents, controls: Arc<Mutex<FactoryControls>>) -> Self {
        Self {
            events,
            inner: Arc::new(Mutex::new(LinkInner {
                local_set: false,
                remote_set: false,
                connected: false,
                closed: false,
                offer_pending: false,
                ufrag: ice_credential(8),
                pwd: ice_credential(24),
                applied: Vec::new(),
                restarts: 0,
                tracks: Vec::new(),
                video: None,
                packets_sent: 0,
                packets_lost: 0,
                bytes_sent: 0,
            })),
            controls,
        }
    }

    /// Remote candidates applied so far, in order.
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.inner.lock().applied.clone()
    }

    pub fn restarts(&self) -> u32 {
        self.inner.lock().restarts
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn video_track(&self) -> Option<VideoTrack> {
        self.inner.lock().video.clone()
    }

    /// Simulates the native link failing.
    pub fn fail(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.connected = false;
        }
        self.events.emit(PeerEvent::IceState(IceConnectionState::Failed));
        self.events
            .emit(PeerEvent::ConnectionState(PeerConnectionState::Failed));
    }

    fn attach(&self, media: &LocalMedia) {
        let mut inner = self.inner.lock();
        inner.tracks = media.track_ids();
        inner.video = media.video.clone();
    }

    fn description(&self, kind: &str) -> String {
        let inner = self.inner.lock();
        fake_sdp(kind, &inner.ufrag, &inner.pwd, &inner.tracks)
    }

    fn emit_local_candidate(&self) {
        let restarts = self.inner.lock().restarts;
        let candidate = IceCandidate::new(format!(
            "candidate:{restarts} 1 udp 2130706431 127.0.0.1 {} typ host",
            50_000 + restarts
        ));
        self.events.emit(PeerEvent::LocalCandidate(candidate));
    }

    fn maybe_connect(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.closed || inner.connected || !(inner.local_set && inner.remote_set) {
                return;
            }
            inner.connected = true;
        }
        self.events
            .emit(PeerEvent::ConnectionState(PeerConnectionState::Connecting));
        self.events.emit(PeerEvent::IceState(IceConnectionState::Checking));
        self.events.emit(PeerEvent::IceState(IceConnectionState::Connected));
        self.events
            .emit(PeerEvent::ConnectionState(PeerConnectionState::Connected));
    }

    fn ensure_open(&self) -> Result<(), PeerError> {
        if self.inner.lock().closed {
            Err(PeerError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StatsProbe for LoopbackLink {
    async fn stats(&self) -> Result<LinkStats, PeerError> {
        let step = self.controls.lock().stats_step;
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(PeerError::Closed);
        }
        inner.packets_sent += step.packets_sent;
        inner.packets_lost += step.packets_lost;
        inner.bytes_sent += step.bytes_sent;
        Ok(LinkStats {
            at: tokio::time::Instant::now().into_std(),
            packets_sent: inner.packets_sent,
            packets_lost: inner.packets_lost,
            bytes_sent: inner.bytes_sent,
        })
    }
}

#[async_trait]
impl PeerLink for LoopbackLink {
    async fn create_offer(&self, media: &LocalMedia) -> Result<SessionDescription, PeerError> {
        self.ensure_open()?;
        self.attach(media);
        {
            let mut inner = self.inner.lock();
            inner.local_set = true;
            inner.offer_pending = true;
        }
        let offer = SessionDescription::offer(self.description("offer"));
        self.emit_local_candidate();
        Ok(offer)
    }

    async fn accept_offer(
        &self,
        offer: &SessionDescription,
        media: Option<&LocalMedia>,
    ) -> Result<SessionDescription, PeerError> {
        self.ensure_open()?;
        if !offer.sdp.starts_with("v=0") {
            return Err(PeerError::Negotiation("malformed offer".into()));
        }
        if self.inner.lock().offer_pending {
            return Err(PeerError::Negotiation("offer while local offer pending".into()));
        }
        if let Some(media) = media {
            self.attach(media);
        }
        {
            let mut inner = self.inner.lock();
            inner.remote_set = true;
            inner.local_set = true;
        }
        let answer = SessionDescription::answer(self.description("answer"));
        self.emit_local_candidate();
        self.maybe_connect();
        Ok(answer)
    }

    async fn set_answer(&self, answer: &SessionDescription) -> Result<(), PeerError> {
        self.ensure_open()?;
        if !self.inner.lock().local_set {
            return Err(PeerError::Negotiation("answer without local offer".into()));
        }
        if !answer.sdp.starts_with("v=0") {
            return Err(PeerError::Negotiation("malformed answer".into()));
        }
        {
            let mut inner = self.inner.lock();
            inner.remote_set = true;
            inner.offer_pending = false;
        }
        self.maybe_connect();
        Ok(())
    }

    async fn add_candidate(&self, candidate: &IceCandidate) -> Result<(), PeerError> {
        self.ensure_open()?;
        let mut inner = self.inner.lock();
        if !inner.remote_set {
            return Err(PeerError::SignalAppliedBeforeReady);
        }
        inner.applied.push(candidate.clone());
        Ok(())
    }

    async fn restart_ice(&self) -> Result<SessionDescription, PeerError> {
        self.ensure_open()?;
        if self.controls.lock().fail_restarts {
            return Err(PeerError::Negotiation("ice restart refused".into()));
        }
        {
            let mut inner = self.inner.lock();
            inner.restarts += 1;
            inner.ufrag = ice_credential(8);
            inner.pwd = ice_credential(24);
            inner.remote_set = false;
            inner.connected = false;
        }
        let offer = SessionDescription::offer(self.description("offer"));
        {
            let mut inner = self.inner.lock();
            inner.local_set = true;
            inner.offer_pending = true;
        }
        self.emit_local_candidate();
        Ok(offer)
    }

    async fn replace_video_track(&self, track: &VideoTrack) -> Result<TrackSwap, PeerError> {
        self.ensure_open()?;
        let renegotiate = self.controls.lock().renegotiate_on_swap;
        {
            let mut inner = self.inner.lock();
            if let Some(old) = inner.video.replace(track.clone()) {
                inner.tracks.retain(|id| id != &old.id);
            }
            inner.tracks.push(track.id.clone());
            if renegotiate {
                inner.offer_pending = true;
                inner.remote_set = false;
            }
        }
        if renegotiate {
            Ok(TrackSwap::Renegotiate(SessionDescription::offer(
                self.description("offer"),
            )))
        } else {
            Ok(TrackSwap::Replaced)
        }
    }

    async fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.connected = false;
    }
}

/// Builds [`LoopbackLink`]s and keeps a handle on each.
#[derive(Debug, Clone, Default)]
pub struct LoopbackPeerFactory {
    controls: Arc<Mutex<FactoryControls>>,
    links: Arc<Mutex<Vec<LoopbackLink>>>,
}

impl LoopbackPeerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_link(&self) -> Option<LoopbackLink> {
        self.links.lock().last().cloned()
    }

    pub fn links_created(&self) -> usize {
        self.links.lock().len()
    }

    /// Makes every subsequent ICE restart fail.
    pub fn fail_restarts(&self, fail: bool) {
        self.controls.lock().fail_restarts = fail;
    }

    /// Track swaps produce a renegotiation offer instead of replacing in place.
    pub fn renegotiate_on_swap(&self, renegotiate: bool) {
        self.controls.lock().renegotiate_on_swap = renegotiate;
    }

    /// Counter growth per stats read.
    pub fn set_stats_step(&self, packets_sent: u64, packets_lost: u64, bytes_sent: u64) {
        self.controls.lock().stats_step = StatsStep {
            packets_sent,
            packets_lost,
            bytes_sent,
        };
    }
}

#[async_trait]
impl PeerLinkFactory for LoopbackPeerFactory {
    type Link = LoopbackLink;

    async fn create(
        &self,
        ice_servers: &[IceServer],
        events: LinkEvents,
    ) -> Result<LoopbackLink, PeerError> {
        debug!(servers = ice_servers.len(), "creating loopback link");
        let link = LoopbackLink::new(events, self.controls.clone());
        self.links.lock().push(link.clone());
        Ok(link)
    }
}

#[derive(Debug)]
struct MediaInner {
    deny: Option<MediaError>,
    cameras: Vec<String>,
    broken_cameras: HashSet<String>,
    next_id: u64,
    live: Vec<String>,
    stopped: Vec<String>,
}

/// Fake camera and microphone tracks.
#[derive(Debug, Clone)]
pub struct LoopbackMedia {
    inner: Arc<Mutex<MediaInner>>,
}

impl Default for LoopbackMedia {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackMedia {
    pub fn new() -> Self {
        let cameras = vec!["cam-front".to_string(), "cam-back".to_string()];
        Self {
            inner: Arc::new(Mutex::new(MediaInner {
                deny: None,
                cameras,
                broken_cameras: HashSet::new(),
                next_id: 0,
                live: Vec::new(),
                stopped: Vec::new(),
            })),
        }
    }

    /// Makes `acquire` fail with `err`; `None` restores it.
    pub fn deny(&self, err: Option<MediaError>) {
        self.inner.lock().deny = err;
    }

    /// Makes opening `device_id` fail as busy.
    pub fn break_camera(&self, device_id: &str) {
        self.inner.lock().broken_cameras.insert(device_id.to_string());
    }

    pub fn live_tracks(&self) -> Vec<String> {
        self.inner.lock().live.clone()
    }

    pub fn stopped_tracks(&self) -> Vec<String> {
        self.inner.lock().stopped.clone()
    }

    fn open_video(
        inner: &mut MediaInner,
        device_id: Option<&str>,
        profile: &VideoProfile,
    ) -> Result<VideoTrack, MediaError> {
        let device = match device_id {
            Some(id) => inner
                .cameras
                .iter()
                .find(|c| *c == id)
                .ok_or_else(|| MediaError::NotFound(id.to_string()))?,
            None => inner
                .cameras
                .first()
                .ok_or_else(|| MediaError::NotFound("camera".into()))?,
        };
        let device_id = device.clone();
        if inner.broken_cameras.contains(&device_id) {
            return Err(MediaError::DeviceBusy(device_id));
        }
        inner.next_id += 1;
        let track = VideoTrack {
            id: format!("video-{}", inner.next_id),
            device_id,
            profile: *profile,
        };
        inner.live.push(track.id.clone());
        Ok(track)
    }
}

#[async_trait]
impl MediaDevices for LoopbackMedia {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia, MediaError> {
        let mut inner = self.inner.lock();
        if let Some(err) = inner.deny.clone() {
            return Err(err);
        }
        let video = match &constraints.video {
            Some(profile) => Some(Self::open_video(
                &mut inner,
                constraints.camera.as_deref(),
                profile,
            )?),
            None => None,
        };
        let audio = if constraints.audio {
            inner.next_id += 1;
            let track = AudioTrack {
                id: format!("audio-{}", inner.next_id),
                device_id: "mic-default".into(),
            };
            inner.live.push(track.id.clone());
            Some(track)
        } else {
            None
        };
        Ok(LocalMedia { audio, video })
    }

    async fn open_camera(
        &self,
        device_id: Option<&str>,
        profile: &VideoProfile,
    ) -> Result<VideoTrack, MediaError> {
        let mut inner = self.inner.lock();
        Self::open_video(&mut inner, device_id, profile)
    }

    fn stop_track(&self, track_id: &str) {
        let mut inner = self.inner.lock();
        let before = inner.live.len();
        inner.live.retain(|id| id != track_id);
        if inner.live.len() != before {
            inner.stopped.push(track_id.to_string());
        }
    }
}

#[derive(Debug, Default)]
struct MicInner {
    deny: bool,
    reject_enhanced: bool,
    granted_rate: Option<u32>,
    sender: Option<mpsc::Sender<Vec<f32>>>,
    opened_with: Vec<AudioConstraints>,
    closed: Vec<String>,
    next_id: u64,
}

/// Microphone fed by [`LoopbackMicrophone::push`].
#[derive(Debug, Clone, Default)]
pub struct LoopbackMicrophone {
    inner: Arc<Mutex<MicInner>>,
}

impl LoopbackMicrophone {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny(&self, deny: bool) {
        self.inner.lock().deny = deny;
    }

    /// Rejects requests that enable the voice processing chain.
    pub fn reject_enhanced(&self, reject: bool) {
        self.inner.lock().reject_enhanced = reject;
    }

    /// Overrides the rate reported back to the caller.
    pub fn grant_rate(&self, rate: u32) {
        self.inner.lock().granted_rate = Some(rate);
    }

    /// Delivers one capture buffer. Returns false when the mic is closed or full.
    pub fn push(&self, samples: Vec<f32>) -> bool {
        match &self.inner.lock().sender {
            Some(tx) => tx.try_send(samples).is_ok(),
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().sender.is_some()
    }

    pub fn opened_with(&self) -> Vec<AudioConstraints> {
        self.inner.lock().opened_with.clone()
    }

    pub fn closed_tracks(&self) -> Vec<String> {
        self.inner.lock().closed.clone()
    }
}

#[async_trait]
impl Microphone for LoopbackMicrophone {
    async fn open(&self, constraints: &AudioConstraints) -> Result<CaptureStream, MediaError> {
        let mut inner = self.inner.lock();
        inner.opened_with.push(constraints.clone());
        if inner.deny {
            return Err(MediaError::PermissionDenied);
        }
        if inner.reject_enhanced && constraints.echo_cancellation {
            return Err(MediaError::ConstraintsRejected("voice processing".into()));
        }
        let (tx, rx) = mpsc::channel(MIC_CAPACITY);
        inner.sender = Some(tx);
        inner.next_id += 1;
        let sample_rate = inner
            .granted_rate
            .or(constraints.sample_rate)
            .unwrap_or(DEFAULT_MIC_RATE);
        Ok(CaptureStream {
            track_id: format!("mic-{}", inner.next_id),
            sample_rate,
            buffers: rx,
        })
    }

    async fn close(&self, track_id: &str) {
        let mut inner = self.inner.lock();
        inner.sender = None;
        inner.closed.push(track_id.to_string());
    }
}

#[derive(Debug)]
struct HubClient {
    username: Option<String>,
    tx: mpsc::Sender<ServerMessage>,
    connected: Arc<AtomicBool>,
    partner: Option<String>,
}

#[derive(Debug, Default)]
struct HubInner {
    clients: HashMap<u64, HubClient>,
    next_id: u64,
    audio: Vec<(String, AudioChunk)>,
    languages: HashMap<String, LanguageSettings>,
}

impl HubInner {
    fn id_of(&self, username: &str) -> Option<u64> {
        self.clients
            .iter()
            .find(|(_, c)| c.username.as_deref() == Some(username))
            .map(|(id, _)| *id)
    }

    fn deliver(&self, id: u64, msg: ServerMessage) {
        if let Some(client) = self.clients.get(&id) {
            if client.tx.try_send(msg).is_err() {
                debug!(client = id, "hub delivery dropped");
            }
        }
    }

    fn deliver_to(&self, username: &str, msg: ServerMessage) -> bool {
        match self.id_of(username) {
            Some(id) => {
                self.deliver(id, msg);
                true
            }
            None => false,
        }
    }

    fn broadcast_roster(&self) {
        let mut online: Vec<String> = self
            .clients
            .values()
            .filter_map(|c| c.username.clone())
            .collect();
        online.sort();
        for id in self.clients.keys() {
            self.deliver(*id, ServerMessage::UpdateOnlineUsers(online.clone()));
        }
    }

    /// Links `a` to `b`. A `b` already in another call keeps its partner.
    fn pair(&mut self, a: u64, b: &str) {
        let a_name = self.clients.get(&a).and_then(|c| c.username.clone());
        if let Some(client) = self.clients.get_mut(&a) {
            client.partner = Some(b.to_string());
        }
        if let (Some(a_name), Some(b_id)) = (a_name, self.id_of(b)) {
            if let Some(client) = self.clients.get_mut(&b_id) {
                client.partner.get_or_insert(a_name);
            }
        }
    }

    /// Dissolves `id`'s pairing and returns the partner if it was paired back.
    fn unpair(&mut self, id: u64) -> Option<String> {
        let me = self.clients.get(&id).and_then(|c| c.username.clone())?;
        let partner = self.clients.get_mut(&id).and_then(|c| c.partner.take())?;
        let pid = self.id_of(&partner)?;
        let client = self.clients.get_mut(&pid)?;
        if client.partner.as_deref() != Some(me.as_str()) {
            return None;
        }
        client.partner = None;
        Some(partner)
    }
}

/// In-memory signaling server.
#[derive(Debug, Clone, Default)]
pub struct LoopbackSignalHub {
    inner: Arc<Mutex<HubInner>>,
}

impl LoopbackSignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a client connection.
    pub fn connect(&self) -> (HubTransport, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.clients.insert(
            id,
            HubClient {
                username: None,
                tx,
                connected: connected.clone(),
                partner: None,
            },
        );
        (
            HubTransport {
                hub: self.clone(),
                id,
                connected,
            },
            rx,
        )
    }

    /// Severs a registered client as if its socket died.
    pub fn disconnect(&self, username: &str) {
        let mut inner = self.inner.lock();
        let Some(id) = inner.id_of(username) else {
            return;
        };
        if let Some(partner) = inner.unpair(id) {
            inner.deliver_to(&partner, ServerMessage::PeerDisconnected);
        }
        if let Some(client) = inner.clients.remove(&id) {
            client.connected.store(false, Ordering::SeqCst);
        }
        inner.broadcast_roster();
    }

    /// Pushes a transcript line to `username`.
    pub fn push_subtitle(&self, username: &str, subtitle: LiveSubtitle) -> bool {
        self.inner
            .lock()
            .deliver_to(username, ServerMessage::LiveSubtitle(subtitle))
    }

    pub fn online(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .lock()
            .clients
            .values()
            .filter_map(|c| c.username.clone())
            .collect();
        names.sort();
        names
    }

    pub fn audio_from(&self, username: &str) -> Vec<AudioChunk> {
        self.inner
            .lock()
            .audio
            .iter()
            .filter(|(from, _)| from == username)
            .map(|(_, chunk)| chunk.clone())
            .collect()
    }

    pub fn language_settings(&self, username: &str) -> Option<LanguageSettings> {
        self.inner.lock().languages.get(username).cloned()
    }

    fn route(&self, id: u64, msg: ClientMessage) {
        let mut inner = self.inner.lock();
        let from = inner.clients.get(&id).and_then(|c| c.username.clone());
        match msg {
            ClientMessage::RegisterUsername(name) => {
                let name = name.trim().to_string();
                let taken = inner.id_of(&name).map(|owner| owner != id).unwrap_or(false);
                if name.is_empty() || taken {
                    let reason = if name.is_empty() {
                        "Username required"
                    } else {
                        "Username already taken"
                    };
                    inner.deliver(id, ServerMessage::RegistrationFailed(reason.into()));
                    return;
                }
                if let Some(client) = inner.clients.get_mut(&id) {
                    client.username = Some(name.clone());
                }
                inner.deliver(id, ServerMessage::RegistrationSuccess(name));
                inner.broadcast_roster();
            }
            ClientMessage::OutgoingCall {
                user_to_call,
                signal_data,
            } => {
                let Some(from) = from else { return };
                if inner.id_of(&user_to_call).is_none() {
                    inner.deliver(id, ServerMessage::CallFailed { user: user_to_call });
                    return;
                }
                inner.pair(id, &user_to_call);
                inner.deliver_to(
                    &user_to_call,
                    ServerMessage::CallUser {
                        from,
                        signal_data,
                    },
                );
            }
            ClientMessage::AnswerCall { to, signal } => {
                let Some(from) = from else { return };
                inner.pair(id, &to);
                inner.deliver_to(&to, ServerMessage::CallAccepted { from, signal });
            }
            ClientMessage::DisconnectCall => {
                if let Some(partner) = inner.unpair(id) {
                    inner.deliver_to(&partner, ServerMessage::PeerDisconnected);
                }
            }
            ClientMessage::UpdateLanguageSettings(settings) => {
                if let Some(from) = from {
                    inner.languages.insert(from, settings);
                }
            }
            ClientMessage::AudioChunk(chunk) => {
                if let Some(from) = from {
                    inner.audio.push((from, chunk));
                }
            }
        }
    }
}

/// A client's connection to a [`LoopbackSignalHub`].
#[derive(Debug)]
pub struct HubTransport {
    hub: LoopbackSignalHub,
    id: u64,
    connected: Arc<AtomicBool>,
}

impl HubTransport {
    /// Flips the connected flag without closing the session on the hub.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl SignalTransport for HubTransport {
    fn send(&self, msg: ClientMessage) -> Result<(), SignalError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SignalError::NotConnected);
        }
        self.hub.route(self.id, msg);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
