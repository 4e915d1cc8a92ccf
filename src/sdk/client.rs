use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::presence::{register, Presence};
use super::ClientError;
use crate::audio::{AudioPipeline, Microphone};
use crate::config::CallConfig;
use crate::media::{LocalMedia, MediaConstraints, MediaDevices, MediaError};
use crate::messages::{ClientMessage, LanguageSettings, ServerMessage};
use crate::peer::{LinkEvent, PeerConnectionManager, PeerEvent, PeerLinkFactory, TrackSwap};
use crate::profile::VideoQualityTier;
use crate::quality::{AdaptiveController, QualityLevel, QualityMonitor, QualityReport};
use crate::session::{CallEffect, CallInput, CallMachine, CallNotice, CallPhase, TransitionError};
use crate::signal::{SignalTransport, WsSignalTransport};
use crate::subtitles::{SubtitleBuffer, SubtitleEntry};

const SUBTITLE_SWEEP: Duration = Duration::from_secs(1);

/// Requests from the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum CallCommand {
    PlaceCall(String),
    Accept,
    Decline,
    HangUp,
    /// Moves video to another camera; takes effect on the next call when idle.
    SwitchCamera(String),
    /// Manual tier choice, held against automatic adaptation for a while.
    SetVideoQuality(VideoQualityTier),
    UpdateLanguages {
        source: Option<String>,
        target: String,
    },
    Shutdown,
}

/// What the UI layer gets to see.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    Registered(String),
    Roster(Vec<String>),
    Phase {
        phase: CallPhase,
        remote: Option<String>,
    },
    Notice(CallNotice),
    /// A command was not valid in the current phase.
    Rejected {
        command: &'static str,
        error: TransitionError,
    },
    Subtitles(Vec<SubtitleEntry>),
    Quality {
        level: QualityLevel,
        tier: VideoQualityTier,
    },
    TierChanged {
        tier: VideoQualityTier,
        manual: bool,
    },
    RemoteTrack {
        kind: String,
        id: String,
    },
}

/// Cloneable command sender for a running [`CallClient`].
#[derive(Debug, Clone)]
pub struct CallHandle {
    tx: mpsc::UnboundedSender<CallCommand>,
}

impl CallHandle {
    pub fn send(&self, command: CallCommand) -> Result<(), ClientError> {
        self.tx.send(command).map_err(|_| ClientError::Closed)
    }

    pub fn place_call(&self, remote: impl Into<String>) -> Result<(), ClientError> {
        self.send(CallCommand::PlaceCall(remote.into()))
    }

    pub fn accept(&self) -> Result<(), ClientError> {
        self.send(CallCommand::Accept)
    }

    pub fn decline(&self) -> Result<(), ClientError> {
        self.send(CallCommand::Decline)
    }

    pub fn hang_up(&self) -> Result<(), ClientError> {
        self.send(CallCommand::HangUp)
    }

    pub fn switch_camera(&self, device_id: impl Into<String>) -> Result<(), ClientError> {
        self.send(CallCommand::SwitchCamera(device_id.into()))
    }

    pub fn set_video_quality(&self, tier: VideoQualityTier) -> Result<(), ClientError> {
        self.send(CallCommand::SetVideoQuality(tier))
    }

    pub fn update_language_settings(
        &self,
        source: Option<String>,
        target: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.send(CallCommand::UpdateLanguages {
            source,
            target: target.into(),
        })
    }
}

/// A registered endpoint with its controller running.
///
/// # Guarantees
/// * Registration completes (or fails) before `start` returns.
/// * All call state lives in a single controller task; helpers only post events.
/// * `close()` hangs up any live call and waits for teardown; dropping the client
///   aborts the controller instead.
pub struct CallClient {
    identity: String,
    handle: CallHandle,
    task: Option<JoinHandle<Result<(), ClientError>>>,
}

impl CallClient {
    /// Connects to `config.signaling_url` over WebSocket and starts.
    pub async fn connect<F>(
        config: CallConfig,
        identity: &str,
        factory: F,
        devices: Arc<dyn MediaDevices>,
        mic: Arc<dyn Microphone>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<CallEvent>), ClientError>
    where
        F: PeerLinkFactory + 'static,
    {
        config.validate()?;
        let (transport, inbound) =
            WsSignalTransport::connect(&config.signaling_url, config.connect_timeout()).await?;
        Self::start(
            config,
            identity,
            factory,
            devices,
            mic,
            Arc::new(transport),
            inbound,
        )
        .await
    }

    /// Registers over an already connected transport and spawns the controller.
    ///
    /// # Errors
    /// Returns `ClientError::Config` for an invalid configuration and the
    /// registration errors of [`register`].
    pub async fn start<F>(
        config: CallConfig,
        identity: &str,
        factory: F,
        devices: Arc<dyn MediaDevices>,
        mic: Arc<dyn Microphone>,
        transport: Arc<dyn SignalTransport>,
        mut inbound: mpsc::Receiver<ServerMessage>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<CallEvent>), ClientError>
    where
        F: PeerLinkFactory + 'static,
    {
        config.validate()?;
        let (presence, backlog) = register(
            transport.as_ref(),
            &mut inbound,
            identity,
            config.registration_timeout(),
        )
        .await?;
        let identity = presence.identity().to_string();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let _ = event_tx.send(CallEvent::Registered(identity.clone()));
        if !presence.roster().is_empty() {
            let _ = event_tx.send(CallEvent::Roster(presence.roster().to_vec()));
        }

        let controller = CallController::new(config, presence, factory, devices, mic, transport, event_tx);
        controller.send_language_settings();
        let task = tokio::spawn(controller.run(inbound, command_rx, backlog));

        Ok((
            Self {
                identity,
                handle: CallHandle { tx: command_tx },
                task: Some(task),
            },
            event_rx,
        ))
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn handle(&self) -> CallHandle {
        self.handle.clone()
    }

    /// Waits for the controller to finish on its own (transport loss or shutdown).
    pub async fn join(mut self) -> Result<(), ClientError> {
        match self.task.take() {
            Some(task) => task.await.map_err(|_| ClientError::Closed)?,
            None => Ok(()),
        }
    }

    /// Hangs up, tears down and stops the controller.
    pub async fn close(mut self) {
        let _ = self.handle.send(CallCommand::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "call controller ended abnormally");
            }
        }
    }
}

impl Drop for CallClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Results from helper tasks, tagged with the session they belong to.
#[derive(Debug)]
enum Internal {
    MediaAcquired {
        session_id: Option<Uuid>,
        result: Result<LocalMedia, MediaError>,
    },
    RingTimeout {
        session_id: Option<Uuid>,
    },
    ReconnectDue {
        session_id: Option<Uuid>,
        attempt: u32,
    },
}

struct CallController<F: PeerLinkFactory> {
    config: CallConfig,
    machine: CallMachine,
    presence: Presence,
    manager: PeerConnectionManager<F>,
    link_events: mpsc::UnboundedReceiver<LinkEvent>,
    devices: Arc<dyn MediaDevices>,
    mic: Arc<dyn Microphone>,
    transport: Arc<dyn SignalTransport>,
    events: mpsc::UnboundedSender<CallEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    quality_tx: mpsc::UnboundedSender<QualityReport>,
    quality_rx: mpsc::UnboundedReceiver<QualityReport>,
    media: Option<LocalMedia>,
    audio: Option<AudioPipeline>,
    monitor: Option<QualityMonitor>,
    session_token: CancellationToken,
    adaptive: AdaptiveController,
    subtitles: SubtitleBuffer,
    camera: Option<String>,
    languages: LanguageSettings,
    published_phase: CallPhase,
}

impl<F: PeerLinkFactory + 'static> CallController<F> {
    fn new(
        config: CallConfig,
        presence: Presence,
        factory: F,
        devices: Arc<dyn MediaDevices>,
        mic: Arc<dyn Microphone>,
        transport: Arc<dyn SignalTransport>,
        events: mpsc::UnboundedSender<CallEvent>,
    ) -> Self {
        let (manager, link_events) = PeerConnectionManager::new(factory, config.ice_servers.clone());
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (quality_tx, quality_rx) = mpsc::unbounded_channel();
        let machine = CallMachine::new(presence.identity(), &config);
        let adaptive = AdaptiveController::new(
            config.quality.initial_tier,
            config.quality.manual_override_hold(),
        );
        let subtitles = SubtitleBuffer::from_config(&config.subtitles);
        let languages = LanguageSettings {
            source_language: Some(config.languages.source_language.clone()),
            target_language: config.languages.target_language.clone(),
            stt_source_languages: config.languages.stt_source_languages.clone(),
        };
        Self {
            config,
            machine,
            presence,
            manager,
            link_events,
            devices,
            mic,
            transport,
            events,
            internal_tx,
            internal_rx,
            quality_tx,
            quality_rx,
            media: None,
            audio: None,
            monitor: None,
            session_token: CancellationToken::new(),
            adaptive,
            subtitles,
            camera: None,
            languages,
            published_phase: CallPhase::Idle,
        }
    }

    async fn run(
        mut self,
        mut inbound: mpsc::Receiver<ServerMessage>,
        mut commands: mpsc::UnboundedReceiver<CallCommand>,
        backlog: VecDeque<ServerMessage>,
    ) -> Result<(), ClientError> {
        for msg in backlog {
            self.on_server_message(msg).await;
        }
        let mut sweep = tokio::time::interval(SUBTITLE_SWEEP);
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(CallCommand::Shutdown) | None => {
                        self.shutdown().await;
                        return Ok(());
                    }
                    Some(command) => self.on_command(command).await,
                },
                msg = inbound.recv() => match msg {
                    Some(msg) => self.on_server_message(msg).await,
                    None => {
                        warn!(identity = %self.presence.identity(), "signaling transport lost");
                        let in_call = self.machine.phase() != CallPhase::Idle;
                        if let Err(error) = self.drive(CallInput::TransportLost).await {
                            debug!(%error, "transport loss outside a call");
                        }
                        if !in_call {
                            self.emit(CallEvent::Notice(CallNotice::SignalingLost));
                        }
                        self.teardown().await;
                        return Err(ClientError::Signal(crate::signal::SignalError::Closed));
                    }
                },
                Some(event) = self.link_events.recv() => self.on_link_event(event).await,
                Some(internal) = self.internal_rx.recv() => self.on_internal(internal).await,
                Some(report) = self.quality_rx.recv() => self.on_quality(report).await,
                _ = sweep.tick(), if !self.subtitles.is_empty() => self.sweep_subtitles(),
            }
        }
    }

    fn emit(&self, event: CallEvent) {
        // A UI that stopped listening does not stop the call.
        let _ = self.events.send(event);
    }

    fn send(&self, msg: ClientMessage) {
        let event = msg.event_name();
        if let Err(err) = self.transport.send(msg) {
            warn!(event, error = %err, "signal not sent");
        }
    }

    fn send_language_settings(&self) {
        self.send(ClientMessage::UpdateLanguageSettings(self.languages.clone()));
    }

    async fn on_command(&mut self, command: CallCommand) {
        let (name, input) = match command {
            CallCommand::PlaceCall(remote) => ("place_call", CallInput::PlaceCall { remote }),
            CallCommand::Accept => ("accept", CallInput::Accept),
            CallCommand::Decline => ("decline", CallInput::Decline),
            CallCommand::HangUp => ("hang_up", CallInput::HangUp),
            CallCommand::SwitchCamera(device_id) => {
                self.switch_camera(device_id).await;
                return;
            }
            CallCommand::SetVideoQuality(tier) => {
                self.set_manual_tier(tier).await;
                return;
            }
            CallCommand::UpdateLanguages { source, target } => {
                self.languages.source_language = source;
                self.languages.target_language = target;
                self.send_language_settings();
                return;
            }
            CallCommand::Shutdown => return,
        };
        if let Err(error) = self.drive(input).await {
            debug!(command = name, error = %error, "command rejected");
            self.emit(CallEvent::Rejected {
                command: name,
                error,
            });
        }
    }

    async fn on_server_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::RegistrationSuccess(name) => {
                debug!(%name, "registration confirmed again");
            }
            ServerMessage::RegistrationFailed(reason) => {
                warn!(%reason, "registration failure after login ignored");
            }
            ServerMessage::UpdateOnlineUsers(users) => {
                if self.presence.update_roster(users) {
                    self.emit(CallEvent::Roster(self.presence.roster().to_vec()));
                }
            }
            ServerMessage::CallUser { from, signal_data } => {
                let _ = self
                    .drive(CallInput::Signal {
                        from,
                        data: signal_data,
                    })
                    .await;
            }
            ServerMessage::CallAccepted { from, signal } => {
                let _ = self.drive(CallInput::Signal { from, data: signal }).await;
            }
            ServerMessage::CallFailed { user } => {
                let _ = self.drive(CallInput::CallFailed { user }).await;
            }
            ServerMessage::PeerDisconnected => {
                let _ = self.drive(CallInput::PeerDisconnected).await;
            }
            ServerMessage::LiveSubtitle(line) => {
                if self.machine.phase() == CallPhase::Idle {
                    return;
                }
                self.subtitles.apply(line, Instant::now());
                self.emit(CallEvent::Subtitles(self.subtitles.entries()));
            }
        }
    }

    async fn on_link_event(&mut self, event: LinkEvent) {
        let Some(event) = self.manager.accept_event(event) else {
            return;
        };
        match event {
            PeerEvent::ConnectionState(state) => {
                let _ = self.drive(CallInput::LinkState(state)).await;
            }
            PeerEvent::IceState(state) => {
                debug!(?state, "ice state");
            }
            PeerEvent::LocalCandidate(candidate) => {
                let _ = self.drive(CallInput::LocalCandidate(candidate)).await;
            }
            PeerEvent::RemoteTrack { kind, id } => {
                self.emit(CallEvent::RemoteTrack { kind, id });
            }
        }
    }

    async fn on_internal(&mut self, internal: Internal) {
        let current = self.machine.session_id();
        match internal {
            Internal::MediaAcquired { session_id, result } => {
                let waiting = matches!(
                    self.machine.phase(),
                    CallPhase::Calling | CallPhase::Connecting
                );
                if session_id != current || !waiting || self.media.is_some() {
                    if let Ok(media) = result {
                        debug!("releasing media acquired for a finished call");
                        self.devices.release(&media);
                    }
                    return;
                }
                let input = match result {
                    Ok(media) => {
                        self.media = Some(media);
                        CallInput::MediaReady
                    }
                    Err(err) => CallInput::MediaFailed {
                        reason: err.to_string(),
                    },
                };
                let _ = self.drive(input).await;
            }
            Internal::RingTimeout { session_id } if session_id == current => {
                let _ = self.drive(CallInput::RingTimeout).await;
            }
            Internal::ReconnectDue {
                session_id,
                attempt,
            } if session_id == current => {
                let _ = self.drive(CallInput::ReconnectDue { attempt }).await;
            }
            _ => debug!("dropping timer for a finished call"),
        }
    }

    async fn on_quality(&mut self, report: QualityReport) {
        if Some(report.session_id) != self.machine.session_id()
            || self.machine.phase() != CallPhase::Active
        {
            return;
        }
        self.emit(CallEvent::Quality {
            level: report.level,
            tier: self.adaptive.tier(),
        });
        let Some(next) = self
            .adaptive
            .observe(report.level, report.sample.as_ref(), Instant::now())
        else {
            return;
        };
        info!(from = %self.adaptive.tier(), to = %next, level = %report.level, "adapting video tier");
        match self.swap_video(self.camera.clone(), next).await {
            Ok(()) => {
                self.adaptive.commit(next);
                self.emit(CallEvent::TierChanged {
                    tier: next,
                    manual: false,
                });
            }
            Err(reason) => warn!(%reason, tier = %next, "tier change failed; keeping current"),
        }
    }

    async fn set_manual_tier(&mut self, tier: VideoQualityTier) {
        if self.machine.phase() != CallPhase::Active {
            self.emit(CallEvent::Rejected {
                command: "set_video_quality",
                error: TransitionError::NotAllowed {
                    action: "set_video_quality",
                    phase: self.machine.phase(),
                },
            });
            return;
        }
        match self.swap_video(self.camera.clone(), tier).await {
            Ok(()) => {
                self.adaptive.manual_override(tier, Instant::now());
                self.emit(CallEvent::TierChanged { tier, manual: true });
            }
            Err(reason) => self.emit(CallEvent::Notice(CallNotice::CameraSwitchFailed(reason))),
        }
    }

    async fn switch_camera(&mut self, device_id: String) {
        let live = self.machine.phase().has_link()
            && self.media.as_ref().map(|m| m.video.is_some()).unwrap_or(false);
        if !live {
            debug!(%device_id, "camera preference stored for the next call");
            self.camera = Some(device_id);
            return;
        }
        match self.swap_video(Some(device_id.clone()), self.adaptive.tier()).await {
            Ok(()) => {
                info!(%device_id, "camera switched");
                self.camera = Some(device_id);
            }
            Err(reason) => self.emit(CallEvent::Notice(CallNotice::CameraSwitchFailed(reason))),
        }
    }

    /// Opens `device` at `tier` and puts it on the link. On any failure the
    /// previous track stays active.
    async fn swap_video(
        &mut self,
        device: Option<String>,
        tier: VideoQualityTier,
    ) -> Result<(), String> {
        if !self.manager.has_link() {
            return Err("no peer link".into());
        }
        let track = self
            .devices
            .open_camera(device.as_deref(), &tier.profile())
            .await
            .map_err(|err| err.to_string())?;
        let swap = match self.manager.replace_video_track(&track).await {
            Ok(swap) => swap,
            Err(err) => {
                self.devices.stop_track(&track.id);
                return Err(err.to_string());
            }
        };
        let previous = self
            .media
            .as_mut()
            .and_then(|media| media.video.replace(track));
        if let Some(previous) = previous {
            self.devices.stop_track(&previous.id);
        }
        if let TrackSwap::Renegotiate(offer) = swap {
            debug!("track swap needs renegotiation");
            let _ = self.drive(CallInput::OfferCreated(offer)).await;
        }
        Ok(())
    }

    fn sweep_subtitles(&mut self) {
        let before = self.subtitles.len();
        self.subtitles.expire(Instant::now());
        if self.subtitles.len() != before {
            self.emit(CallEvent::Subtitles(self.subtitles.entries()));
        }
    }

    /// Steps the machine with `input` and runs the resulting effects, feeding
    /// their results back in until nothing is left.
    ///
    /// Only the error for `input` itself is returned; rejected follow-ups are
    /// logged.
    async fn drive(&mut self, input: CallInput) -> Result<(), TransitionError> {
        let mut queue = VecDeque::new();
        let mut first = Some(input);
        loop {
            let (input, is_first) = match first.take() {
                Some(input) => (input, true),
                None => match queue.pop_front() {
                    Some(input) => (input, false),
                    None => break,
                },
            };
            let effects = match self.machine.step(input) {
                Ok(effects) => effects,
                Err(err) if is_first => return Err(err),
                Err(err) => {
                    warn!(error = %err, "follow-up input rejected");
                    continue;
                }
            };
            for effect in effects {
                if let Some(next) = self.execute(effect).await {
                    queue.push_back(next);
                }
            }
            self.publish_phase();
        }
        Ok(())
    }

    fn publish_phase(&mut self) {
        let phase = self.machine.phase();
        if phase == self.published_phase {
            return;
        }
        self.published_phase = phase;
        let remote = self.machine.session().map(|s| s.remote_identity.clone());
        self.emit(CallEvent::Phase { phase, remote });
    }

    async fn execute(&mut self, effect: CallEffect) -> Option<CallInput> {
        let session_id = self.machine.session_id();
        match effect {
            CallEffect::AcquireMedia => {
                let constraints = MediaConstraints {
                    audio: true,
                    video: Some(self.adaptive.tier().profile()),
                    camera: self.camera.clone(),
                };
                let devices = self.devices.clone();
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let result = devices.acquire(&constraints).await;
                    let _ = tx.send(Internal::MediaAcquired { session_id, result });
                });
                None
            }
            CallEffect::CreateOffer => {
                let media = self.media.clone().unwrap_or_default();
                match self.manager.originate(&media).await {
                    Ok(offer) => Some(CallInput::OfferCreated(offer)),
                    Err(err) => Some(CallInput::NegotiationFailed {
                        reason: err.to_string(),
                    }),
                }
            }
            CallEffect::AnswerOffer { offer, initial } => {
                let media = if initial { self.media.clone() } else { None };
                match self.manager.apply_remote_offer(&offer, media.as_ref()).await {
                    Ok(answer) => Some(CallInput::AnswerCreated(answer)),
                    Err(err) => Some(CallInput::NegotiationFailed {
                        reason: err.to_string(),
                    }),
                }
            }
            CallEffect::ApplyAnswer(answer) => match self.manager.apply_answer(&answer).await {
                Ok(()) => Some(CallInput::AnswerApplied),
                Err(err) => Some(CallInput::NegotiationFailed {
                    reason: err.to_string(),
                }),
            },
            CallEffect::ApplyCandidates(candidates) => {
                for candidate in candidates {
                    if let Err(err) = self.manager.apply_candidate(&candidate).await {
                        warn!(error = %err, candidate = %candidate.candidate, "remote candidate rejected");
                    }
                }
                None
            }
            CallEffect::Send(msg) => {
                self.send(msg);
                None
            }
            CallEffect::StartAudio => {
                match AudioPipeline::start(self.mic.clone(), self.transport.clone(), &self.config.audio)
                    .await
                {
                    Ok(pipeline) => self.audio = Some(pipeline),
                    Err(err) => {
                        warn!(error = %err, "audio pipeline unavailable; call continues");
                        self.emit(CallEvent::Notice(CallNotice::TranscriptionUnavailable(
                            err.to_string(),
                        )));
                    }
                }
                None
            }
            CallEffect::StartQualityMonitor => {
                if let (Some(probe), Some(id)) = (self.manager.stats_probe(), session_id) {
                    self.monitor = Some(QualityMonitor::start(
                        probe,
                        self.config.quality.poll_interval(),
                        id,
                        self.quality_tx.clone(),
                    ));
                }
                None
            }
            CallEffect::ArmRingTimer(delay) => {
                self.spawn_timer(delay, Internal::RingTimeout { session_id });
                None
            }
            CallEffect::ScheduleReconnect { attempt, delay } => {
                self.spawn_timer(
                    delay,
                    Internal::ReconnectDue {
                        session_id,
                        attempt,
                    },
                );
                None
            }
            CallEffect::RestartIce => match self.manager.restart_ice().await {
                Ok(offer) => Some(CallInput::OfferCreated(offer)),
                Err(err) => Some(CallInput::NegotiationFailed {
                    reason: err.to_string(),
                }),
            },
            CallEffect::Notify(notice) => {
                self.emit(CallEvent::Notice(notice));
                None
            }
            CallEffect::Teardown => {
                self.teardown().await;
                Some(CallInput::TeardownComplete)
            }
        }
    }

    fn spawn_timer(&self, delay: Duration, fire: Internal) {
        let token = self.session_token.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(fire);
                }
            }
        });
    }

    /// Releases everything the call owns. Safe to run repeatedly.
    async fn teardown(&mut self) {
        std::mem::replace(&mut self.session_token, CancellationToken::new()).cancel();
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }
        if let Some(mut audio) = self.audio.take() {
            audio.stop().await;
        }
        self.manager.close().await;
        if let Some(media) = self.media.take() {
            self.devices.release(&media);
        }
        if !self.subtitles.is_empty() {
            self.subtitles.clear();
            self.emit(CallEvent::Subtitles(Vec::new()));
        }
        self.adaptive.reset();
        debug!(identity = %self.presence.identity(), "call resources released");
    }

    async fn shutdown(&mut self) {
        let _ = self.drive(CallInput::HangUp).await;
        self.teardown().await;
        info!(identity = %self.presence.identity(), "call client stopped");
    }
}
