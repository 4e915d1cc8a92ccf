use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{CallConfig, ReconnectConfig};
use crate::messages::{ClientMessage, IceCandidate, SessionDescription, SignalData};
use crate::peer::PeerConnectionState;
use crate::quality::recovery::{ReconnectDecision, ReconnectState};

pub mod state;
pub use state::{CallPhase, TransitionError};

/// Candidates held for senders that have not offered yet.
const MAX_EARLY_CANDIDATES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Idle,
    Caller,
    Callee,
}

/// User-facing notices raised by the call lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallNotice {
    IncomingCall { from: String },
    CallFailed { user: String },
    NoAnswer { user: String },
    RemoteHungUp,
    MediaUnavailable(String),
    NegotiationFailed(String),
    ConnectionLost { attempts: u32 },
    ConnectionRestored,
    SignalingLost,
    CameraSwitchFailed(String),
    TranscriptionUnavailable(String),
}

impl fmt::Display for CallNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallNotice::IncomingCall { from } => write!(f, "Incoming call from {from}"),
            CallNotice::CallFailed { user } => write!(f, "Could not reach {user}"),
            CallNotice::NoAnswer { user } => write!(f, "{user} did not answer"),
            CallNotice::RemoteHungUp => f.write_str("The other user has disconnected"),
            CallNotice::MediaUnavailable(reason) => write!(
                f,
                "Could not start call, check camera and microphone permissions ({reason})"
            ),
            CallNotice::NegotiationFailed(reason) => write!(f, "Call setup failed: {reason}"),
            CallNotice::ConnectionLost { attempts } => write!(
                f,
                "Connection lost after {attempts} reconnection attempts"
            ),
            CallNotice::ConnectionRestored => f.write_str("Connection restored"),
            CallNotice::SignalingLost => f.write_str("Lost connection to the signaling server"),
            CallNotice::CameraSwitchFailed(reason) => write!(f, "Camera switch failed: {reason}"),
            CallNotice::TranscriptionUnavailable(reason) => {
                write!(f, "Live subtitles unavailable: {reason}")
            }
        }
    }
}

/// The live call.
///
/// A session exists exactly while the phase is not `Idle`, so the remote
/// identity is always known.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub id: Uuid,
    pub local_identity: String,
    pub remote_identity: String,
    pub role: CallRole,
    phase: CallPhase,
    pending_candidates: VecDeque<IceCandidate>,
    pending_offer: Option<SessionDescription>,
    remote_ready: bool,
    audio_started: bool,
    monitor_started: bool,
    pub reconnect: ReconnectState,
    pub created_at: Instant,
}

impl CallSession {
    fn new(
        local_identity: &str,
        remote_identity: String,
        role: CallRole,
        phase: CallPhase,
        reconnect: &ReconnectConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            local_identity: local_identity.to_string(),
            remote_identity,
            role,
            phase,
            pending_candidates: VecDeque::new(),
            pending_offer: None,
            remote_ready: false,
            audio_started: false,
            monitor_started: false,
            reconnect: ReconnectState::new(reconnect),
            created_at: Instant::now(),
        }
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    pub fn pending_candidates(&self) -> impl Iterator<Item = &IceCandidate> {
        self.pending_candidates.iter()
    }

    /// Whether the description exchange has completed on the link.
    pub fn remote_ready(&self) -> bool {
        self.remote_ready
    }

    fn advance(&mut self, next: CallPhase) -> Result<(), TransitionError> {
        self.phase = self.phase.transition(next)?;
        debug!(session_id = %self.id, phase = %self.phase, "phase changed");
        Ok(())
    }

    fn outbound(&self, data: SignalData) -> ClientMessage {
        match self.role {
            CallRole::Callee => ClientMessage::AnswerCall {
                to: self.remote_identity.clone(),
                signal: data,
            },
            _ => ClientMessage::OutgoingCall {
                user_to_call: self.remote_identity.clone(),
                signal_data: data,
            },
        }
    }

    /// Marks the description exchange done and hands back the queued candidates.
    fn mark_remote_ready(&mut self) -> Vec<CallEffect> {
        if self.remote_ready {
            return Vec::new();
        }
        self.remote_ready = true;
        let drained: Vec<IceCandidate> = self.pending_candidates.drain(..).collect();
        if drained.is_empty() {
            Vec::new()
        } else {
            debug!(session_id = %self.id, count = drained.len(), "flushing pending candidates");
            vec![CallEffect::ApplyCandidates(drained)]
        }
    }
}

/// Everything the state machine reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum CallInput {
    PlaceCall { remote: String },
    Accept,
    Decline,
    HangUp,
    /// Offer, answer or candidate relayed from `from`.
    Signal { from: String, data: SignalData },
    CallFailed { user: String },
    PeerDisconnected,
    TransportLost,
    MediaReady,
    MediaFailed { reason: String },
    OfferCreated(SessionDescription),
    AnswerCreated(SessionDescription),
    AnswerApplied,
    NegotiationFailed { reason: String },
    LocalCandidate(IceCandidate),
    LinkState(PeerConnectionState),
    ReconnectDue { attempt: u32 },
    RingTimeout,
    TeardownComplete,
}

/// Work the controller performs on behalf of the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEffect {
    AcquireMedia,
    CreateOffer,
    /// `initial` offers attach the local tracks; renegotiations keep them.
    AnswerOffer {
        offer: SessionDescription,
        initial: bool,
    },
    ApplyAnswer(SessionDescription),
    /// Apply in order; the link already holds the remote description.
    ApplyCandidates(Vec<IceCandidate>),
    Send(ClientMessage),
    StartAudio,
    StartQualityMonitor,
    ArmRingTimer(Duration),
    ScheduleReconnect { attempt: u32, delay: Duration },
    RestartIce,
    Notify(CallNotice),
    /// Release tracks, close the link, stop audio and polling, clear buffers.
    Teardown,
}

enum FailurePlan {
    Retry(u32, Duration),
    Fatal(CallNotice),
    Ignore,
}

/// Call lifecycle as an explicit transition function.
///
/// Each input is validated against the current phase and yields the effects the
/// controller must run, in order. Inputs that make no sense for the phase are
/// either dropped (remote signals) or rejected with a [`TransitionError`]
/// (local commands); neither changes state.
#[derive(Debug)]
pub struct CallMachine {
    local_identity: String,
    ring_timeout: Duration,
    reconnect: ReconnectConfig,
    session: Option<CallSession>,
    early_candidates: VecDeque<(String, IceCandidate)>,
    /// Remote of the last ended call; its late candidates are not kept.
    stale_sender: Option<String>,
}

impl CallMachine {
    pub fn new(local_identity: impl Into<String>, config: &CallConfig) -> Self {
        Self {
            local_identity: local_identity.into(),
            ring_timeout: config.ring_timeout(),
            reconnect: config.reconnect.clone(),
            session: None,
            early_candidates: VecDeque::new(),
            stale_sender: None,
        }
    }

    pub fn local_identity(&self) -> &str {
        &self.local_identity
    }

    pub fn phase(&self) -> CallPhase {
        self.session
            .as_ref()
            .map(|s| s.phase)
            .unwrap_or(CallPhase::Idle)
    }

    pub fn role(&self) -> CallRole {
        self.session
            .as_ref()
            .map(|s| s.role)
            .unwrap_or(CallRole::Idle)
    }

    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn step(&mut self, input: CallInput) -> Result<Vec<CallEffect>, TransitionError> {
        match input {
            CallInput::PlaceCall { remote } => self.place_call(remote),
            CallInput::Accept => self.accept(),
            CallInput::Decline => match self.phase() {
                CallPhase::Receiving => self.end_session(None, false),
                phase => Err(TransitionError::NotAllowed {
                    action: "decline",
                    phase,
                }),
            },
            CallInput::HangUp => self.end_session(None, true),
            CallInput::Signal { from, data } => match data {
                SignalData::Offer { sdp } => self.on_offer(from, SessionDescription::offer(sdp)),
                SignalData::Answer { sdp } => {
                    self.on_answer(from, SessionDescription::answer(sdp))
                }
                SignalData::Candidate { candidate } => self.on_candidate(from, candidate),
            },
            CallInput::CallFailed { user } => match &self.session {
                Some(s) if s.phase == CallPhase::Calling && s.remote_identity == user => {
                    self.end_session(Some(CallNotice::CallFailed { user }), false)
                }
                _ => Ok(Vec::new()),
            },
            CallInput::PeerDisconnected => self.end_session(Some(CallNotice::RemoteHungUp), false),
            CallInput::TransportLost => {
                self.early_candidates.clear();
                self.end_session(Some(CallNotice::SignalingLost), false)
            }
            CallInput::MediaReady => self.on_media_ready(),
            CallInput::MediaFailed { reason } => {
                self.end_session(Some(CallNotice::MediaUnavailable(reason)), true)
            }
            CallInput::OfferCreated(offer) => {
                // Restart and renegotiation offers open a new exchange; remote
                // candidates wait for its answer.
                if let Some(session) = self.session.as_mut().filter(|s| s.phase.has_link()) {
                    session.remote_ready = false;
                }
                Ok(self.send_local(offer.into()))
            }
            CallInput::AnswerCreated(answer) => {
                let Some(session) = self.session.as_mut() else {
                    return Ok(Vec::new());
                };
                if !session.phase.has_link() {
                    return Ok(Vec::new());
                }
                let mut effects = vec![CallEffect::Send(session.outbound(answer.into()))];
                effects.extend(session.mark_remote_ready());
                Ok(effects)
            }
            CallInput::AnswerApplied => Ok(self
                .session
                .as_mut()
                .filter(|s| s.phase.has_link())
                .map(CallSession::mark_remote_ready)
                .unwrap_or_default()),
            CallInput::NegotiationFailed { reason } => {
                let recoverable = self
                    .session
                    .as_ref()
                    .map(|s| match s.phase {
                        CallPhase::Active => true,
                        CallPhase::Connecting => {
                            s.remote_ready || s.reconnect.attempt_count() > 0
                        }
                        _ => false,
                    })
                    .unwrap_or(false);
                if recoverable {
                    self.on_link_failure()
                } else {
                    self.end_session(Some(CallNotice::NegotiationFailed(reason)), true)
                }
            }
            CallInput::LocalCandidate(candidate) => Ok(self.send_local(candidate.into())),
            CallInput::LinkState(state) => match state {
                PeerConnectionState::Connected => self.on_connected(),
                PeerConnectionState::Failed => self.on_link_failure(),
                PeerConnectionState::Closed => self.end_session(None, true),
                _ => Ok(Vec::new()),
            },
            CallInput::ReconnectDue { attempt } => {
                let Some(session) = self.session.as_mut() else {
                    return Ok(Vec::new());
                };
                let live = matches!(session.phase, CallPhase::Active | CallPhase::Connecting);
                if !live || !session.reconnect.fire(attempt) {
                    return Ok(Vec::new());
                }
                if session.role == CallRole::Caller {
                    return Ok(vec![CallEffect::RestartIce]);
                }
                // Only the caller offers a restart, so both sides never offer at
                // once. The callee spends the wait as an attempt of its own budget.
                debug!(session_id = %session.id, attempt, "no restart offer yet");
                self.on_link_failure()
            }
            CallInput::RingTimeout => match &self.session {
                Some(s) if s.phase == CallPhase::Calling => {
                    let user = s.remote_identity.clone();
                    self.end_session(Some(CallNotice::NoAnswer { user }), true)
                }
                _ => Ok(Vec::new()),
            },
            CallInput::TeardownComplete => {
                if let Some(session) = &self.session {
                    if session.phase == CallPhase::Ending {
                        session.phase.transition(CallPhase::Idle)?;
                        info!(session_id = %session.id, "call ended");
                        let remote = session.remote_identity.clone();
                        self.early_candidates.retain(|(sender, _)| *sender != remote);
                        self.stale_sender = Some(remote);
                        self.session = None;
                    }
                }
                Ok(Vec::new())
            }
        }
    }

    fn place_call(&mut self, remote: String) -> Result<Vec<CallEffect>, TransitionError> {
        let phase = self.phase();
        if phase != CallPhase::Idle {
            return Err(TransitionError::NotAllowed {
                action: "place_call",
                phase,
            });
        }
        let remote = remote.trim().to_string();
        if remote.is_empty() {
            return Err(TransitionError::MissingData("remote identity"));
        }
        if remote == self.local_identity {
            return Err(TransitionError::NotAllowed {
                action: "call self",
                phase,
            });
        }
        let next = phase.transition(CallPhase::Calling)?;
        let session = CallSession::new(
            &self.local_identity,
            remote,
            CallRole::Caller,
            next,
            &self.reconnect,
        );
        info!(session_id = %session.id, remote = %session.remote_identity, "placing call");
        self.stale_sender = None;
        self.session = Some(session);
        Ok(vec![
            CallEffect::AcquireMedia,
            CallEffect::ArmRingTimer(self.ring_timeout),
        ])
    }

    fn accept(&mut self) -> Result<Vec<CallEffect>, TransitionError> {
        let phase = self.phase();
        let Some(session) = self.session.as_mut().filter(|s| s.phase == CallPhase::Receiving)
        else {
            return Err(TransitionError::NotAllowed {
                action: "accept",
                phase,
            });
        };
        session.advance(CallPhase::Connecting)?;
        Ok(vec![CallEffect::AcquireMedia])
    }

    fn on_offer(
        &mut self,
        from: String,
        offer: SessionDescription,
    ) -> Result<Vec<CallEffect>, TransitionError> {
        if let Some(session) = self.session.as_mut() {
            if session.remote_identity == from && session.phase.has_link() && session.remote_ready
            {
                debug!(session_id = %session.id, "renegotiation offer");
                session.remote_ready = false;
                return Ok(vec![CallEffect::AnswerOffer {
                    offer,
                    initial: false,
                }]);
            }
            debug!(from = %from, phase = %session.phase, "busy; dropping offer");
            return Ok(Vec::new());
        }

        let next = CallPhase::Idle.transition(CallPhase::Receiving)?;
        let mut session = CallSession::new(
            &self.local_identity,
            from.clone(),
            CallRole::Callee,
            next,
            &self.reconnect,
        );
        session.pending_offer = Some(offer);
        self.stale_sender = None;
        let early = std::mem::take(&mut self.early_candidates);
        for (sender, candidate) in early {
            if sender == from {
                session.pending_candidates.push_back(candidate);
            } else {
                self.early_candidates.push_back((sender, candidate));
            }
        }
        info!(
            session_id = %session.id,
            from = %from,
            queued = session.pending_candidates.len(),
            "incoming call"
        );
        self.session = Some(session);
        Ok(vec![CallEffect::Notify(CallNotice::IncomingCall { from })])
    }

    fn on_answer(
        &mut self,
        from: String,
        answer: SessionDescription,
    ) -> Result<Vec<CallEffect>, TransitionError> {
        match &self.session {
            Some(s) if s.remote_identity == from && s.phase.has_link() => {
                Ok(vec![CallEffect::ApplyAnswer(answer)])
            }
            _ => {
                debug!(from = %from, "dropping unexpected answer");
                Ok(Vec::new())
            }
        }
    }

    fn on_candidate(
        &mut self,
        from: String,
        candidate: IceCandidate,
    ) -> Result<Vec<CallEffect>, TransitionError> {
        let Some(session) = self.session.as_mut() else {
            if self.stale_sender.as_deref() == Some(from.as_str()) {
                debug!(from = %from, "dropping candidate for an ended call");
                return Ok(Vec::new());
            }
            if self.early_candidates.len() >= MAX_EARLY_CANDIDATES {
                self.early_candidates.pop_front();
            }
            self.early_candidates.push_back((from, candidate));
            return Ok(Vec::new());
        };
        if session.remote_identity != from || session.phase == CallPhase::Ending {
            debug!(from = %from, "dropping candidate for another session");
            return Ok(Vec::new());
        }
        if session.remote_ready && session.phase.has_link() {
            Ok(vec![CallEffect::ApplyCandidates(vec![candidate])])
        } else {
            session.pending_candidates.push_back(candidate);
            Ok(Vec::new())
        }
    }

    fn on_media_ready(&mut self) -> Result<Vec<CallEffect>, TransitionError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(Vec::new());
        };
        match (session.role, session.phase) {
            (CallRole::Caller, CallPhase::Calling) => Ok(vec![CallEffect::CreateOffer]),
            (CallRole::Callee, CallPhase::Connecting) => {
                let offer = session
                    .pending_offer
                    .take()
                    .ok_or(TransitionError::MissingData("stored offer"))?;
                Ok(vec![CallEffect::AnswerOffer {
                    offer,
                    initial: true,
                }])
            }
            _ => Ok(Vec::new()),
        }
    }

    fn send_local(&mut self, data: SignalData) -> Vec<CallEffect> {
        match &self.session {
            Some(s) if s.phase.has_link() => vec![CallEffect::Send(s.outbound(data))],
            _ => Vec::new(),
        }
    }

    fn on_connected(&mut self) -> Result<Vec<CallEffect>, TransitionError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(Vec::new());
        };
        let mut effects = Vec::new();
        match session.phase {
            CallPhase::Calling | CallPhase::Connecting => {
                session.advance(CallPhase::Active)?;
                info!(session_id = %session.id, remote = %session.remote_identity, "call active");
            }
            CallPhase::Active => {
                if session.reconnect.attempt_count() > 0 {
                    info!(
                        session_id = %session.id,
                        attempts = session.reconnect.attempt_count(),
                        "connection restored"
                    );
                    effects.push(CallEffect::Notify(CallNotice::ConnectionRestored));
                }
            }
            _ => return Ok(Vec::new()),
        }
        session.reconnect.reset();
        if !session.audio_started {
            session.audio_started = true;
            effects.push(CallEffect::StartAudio);
        }
        if !session.monitor_started {
            session.monitor_started = true;
            effects.push(CallEffect::StartQualityMonitor);
        }
        Ok(effects)
    }

    fn on_link_failure(&mut self) -> Result<Vec<CallEffect>, TransitionError> {
        let plan = match self.session.as_mut() {
            None => FailurePlan::Ignore,
            Some(session) => match session.phase {
                CallPhase::Active | CallPhase::Connecting => match session.reconnect.on_failure() {
                    ReconnectDecision::Retry { attempt, delay } => {
                        warn!(
                            session_id = %session.id,
                            attempt,
                            max = session.reconnect.max_attempts(),
                            delay_ms = delay.as_millis() as u64,
                            role = ?session.role,
                            "peer link failed; scheduling recovery"
                        );
                        FailurePlan::Retry(attempt, delay)
                    }
                    ReconnectDecision::AlreadyScheduled { .. } => FailurePlan::Ignore,
                    ReconnectDecision::Exhausted { attempts } => {
                        warn!(session_id = %session.id, attempts, "reconnection budget exhausted");
                        FailurePlan::Fatal(CallNotice::ConnectionLost { attempts })
                    }
                },
                CallPhase::Calling => FailurePlan::Fatal(CallNotice::NegotiationFailed(
                    "peer connection failed".into(),
                )),
                _ => FailurePlan::Ignore,
            },
        };
        match plan {
            FailurePlan::Retry(attempt, delay) => {
                Ok(vec![CallEffect::ScheduleReconnect { attempt, delay }])
            }
            FailurePlan::Fatal(notice) => self.end_session(Some(notice), true),
            FailurePlan::Ignore => Ok(Vec::new()),
        }
    }

    /// Moves the live session to `Ending` and asks for teardown. Repeat calls
    /// and calls without a session produce nothing.
    ///
    /// With `notify_remote`, a session that already involved the remote side
    /// tells the server the call is over before tearing down.
    fn end_session(
        &mut self,
        notice: Option<CallNotice>,
        notify_remote: bool,
    ) -> Result<Vec<CallEffect>, TransitionError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(Vec::new());
        };
        if session.phase == CallPhase::Ending {
            return Ok(Vec::new());
        }
        let mut effects = Vec::with_capacity(3);
        if notify_remote && session.phase.has_link() {
            effects.push(CallEffect::Send(ClientMessage::DisconnectCall));
        }
        session.advance(CallPhase::Ending)?;
        if let Some(notice) = notice {
            info!(session_id = %session.id, notice = %notice, "ending call");
            effects.push(CallEffect::Notify(notice));
        }
        effects.push(CallEffect::Teardown);
        Ok(effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(name: &str) -> CallMachine {
        CallMachine::new(name, &CallConfig::default())
    }

    fn candidate(n: u16) -> IceCandidate {
        IceCandidate::new(format!("candidate:{n} 1 udp 2130706431 10.0.0.{n} 5000 typ host"))
    }

    fn offer_from(from: &str) -> CallInput {
        CallInput::Signal {
            from: from.into(),
            data: SignalData::Offer { sdp: "v=0 offer".into() },
        }
    }

    fn candidate_from(from: &str, n: u16) -> CallInput {
        CallInput::Signal {
            from: from.into(),
            data: candidate(n).into(),
        }
    }

    /// Drives a callee through accept up to the point its answer exists.
    fn answered_callee() -> CallMachine {
        let mut bob = machine("bob");
        bob.step(offer_from("alice")).unwrap();
        bob.step(CallInput::Accept).unwrap();
        bob.step(CallInput::MediaReady).unwrap();
        bob.step(CallInput::AnswerCreated(SessionDescription::answer("v=0 answer")))
            .unwrap();
        bob
    }

    /// A caller whose first exchange completed and whose link is up.
    fn active_caller() -> CallMachine {
        let mut alice = machine("alice");
        alice
            .step(CallInput::PlaceCall {
                remote: "bob".into(),
            })
            .unwrap();
        alice.step(CallInput::MediaReady).unwrap();
        alice
            .step(CallInput::OfferCreated(SessionDescription::offer("v=0 offer")))
            .unwrap();
        alice
            .step(CallInput::Signal {
                from: "bob".into(),
                data: SignalData::Answer { sdp: "v=0 answer".into() },
            })
            .unwrap();
        alice.step(CallInput::AnswerApplied).unwrap();
        alice
            .step(CallInput::LinkState(PeerConnectionState::Connected))
            .unwrap();
        alice
    }

    #[test]
    fn caller_and_callee_reach_active_with_fresh_budget() {
        let mut alice = machine("alice");
        let effects = alice
            .step(CallInput::PlaceCall {
                remote: "bob".into(),
            })
            .unwrap();
        assert_eq!(alice.phase(), CallPhase::Calling);
        assert_eq!(effects[0], CallEffect::AcquireMedia);
        assert_eq!(alice.step(CallInput::MediaReady).unwrap(), vec![CallEffect::CreateOffer]);
        let sent = alice
            .step(CallInput::OfferCreated(SessionDescription::offer("v=0 offer")))
            .unwrap();
        assert_eq!(
            sent,
            vec![CallEffect::Send(ClientMessage::OutgoingCall {
                user_to_call: "bob".into(),
                signal_data: SignalData::Offer { sdp: "v=0 offer".into() },
            })]
        );

        let mut bob = machine("bob");
        bob.step(offer_from("alice")).unwrap();
        assert_eq!(bob.phase(), CallPhase::Receiving);
        bob.step(CallInput::Accept).unwrap();
        assert_eq!(bob.phase(), CallPhase::Connecting);
        let answer = bob.step(CallInput::MediaReady).unwrap();
        assert!(matches!(answer[0], CallEffect::AnswerOffer { initial: true, .. }));
        let reply = bob
            .step(CallInput::AnswerCreated(SessionDescription::answer("v=0 answer")))
            .unwrap();
        assert!(matches!(
            &reply[0],
            CallEffect::Send(ClientMessage::AnswerCall { to, .. }) if to == "alice"
        ));

        let applied = alice
            .step(CallInput::Signal {
                from: "bob".into(),
                data: SignalData::Answer { sdp: "v=0 answer".into() },
            })
            .unwrap();
        assert!(matches!(applied[0], CallEffect::ApplyAnswer(_)));
        alice.step(CallInput::AnswerApplied).unwrap();

        for side in [&mut alice, &mut bob] {
            let effects = side
                .step(CallInput::LinkState(PeerConnectionState::Connected))
                .unwrap();
            assert_eq!(
                effects,
                vec![CallEffect::StartAudio, CallEffect::StartQualityMonitor]
            );
            assert_eq!(side.phase(), CallPhase::Active);
            assert_eq!(side.session().unwrap().reconnect.attempt_count(), 0);
        }
    }

    #[test]
    fn candidates_queue_until_answer_then_flush_in_order() {
        let mut bob = machine("bob");
        bob.step(offer_from("alice")).unwrap();
        for n in 1..=3 {
            assert!(bob.step(candidate_from("alice", n)).unwrap().is_empty());
        }
        bob.step(CallInput::Accept).unwrap();
        assert!(bob.step(candidate_from("alice", 4)).unwrap().is_empty());
        bob.step(CallInput::MediaReady).unwrap();
        let effects = bob
            .step(CallInput::AnswerCreated(SessionDescription::answer("v=0")))
            .unwrap();
        assert_eq!(
            effects[1],
            CallEffect::ApplyCandidates(vec![candidate(1), candidate(2), candidate(3), candidate(4)])
        );
        assert_eq!(bob.session().unwrap().pending_candidates().count(), 0);
        assert_eq!(
            bob.step(candidate_from("alice", 5)).unwrap(),
            vec![CallEffect::ApplyCandidates(vec![candidate(5)])]
        );
    }

    #[test]
    fn candidates_before_offer_are_kept_for_that_sender() {
        let mut bob = machine("bob");
        bob.step(candidate_from("alice", 1)).unwrap();
        bob.step(candidate_from("mallory", 9)).unwrap();
        bob.step(candidate_from("alice", 2)).unwrap();
        bob.step(offer_from("alice")).unwrap();
        let queued: Vec<_> = bob.session().unwrap().pending_candidates().cloned().collect();
        assert_eq!(queued, vec![candidate(1), candidate(2)]);
    }

    #[test]
    fn second_offer_while_busy_is_dropped() {
        let mut bob = machine("bob");
        bob.step(offer_from("alice")).unwrap();
        let id = bob.session_id();
        assert!(bob.step(offer_from("carol")).unwrap().is_empty());
        assert_eq!(bob.session().unwrap().remote_identity, "alice");
        assert_eq!(bob.session_id(), id);
    }

    #[test]
    fn renegotiation_offer_from_current_peer_is_answered() {
        let mut bob = answered_callee();
        bob.step(CallInput::LinkState(PeerConnectionState::Connected))
            .unwrap();
        assert_eq!(
            bob.step(offer_from("alice")).unwrap(),
            vec![CallEffect::AnswerOffer {
                offer: SessionDescription::offer("v=0 offer"),
                initial: false
            }]
        );
    }

    #[test]
    fn fourth_failure_after_three_restarts_is_fatal() {
        let mut alice = active_caller();
        let mut delays = Vec::new();
        for attempt in 1..=3 {
            let effects = alice
                .step(CallInput::LinkState(PeerConnectionState::Failed))
                .unwrap();
            match effects.as_slice() {
                [CallEffect::ScheduleReconnect { attempt: a, delay }] => {
                    assert_eq!(*a, attempt);
                    delays.push(delay.as_secs());
                }
                other => panic!("unexpected {other:?}"),
            }
            assert_eq!(
                alice.step(CallInput::ReconnectDue { attempt }).unwrap(),
                vec![CallEffect::RestartIce]
            );
            assert_eq!(alice.phase(), CallPhase::Active);
        }
        assert_eq!(delays, vec![2, 5, 5]);
        let effects = alice
            .step(CallInput::LinkState(PeerConnectionState::Failed))
            .unwrap();
        assert_eq!(
            effects,
            vec![
                CallEffect::Send(ClientMessage::DisconnectCall),
                CallEffect::Notify(CallNotice::ConnectionLost { attempts: 3 }),
                CallEffect::Teardown
            ]
        );
        assert_eq!(alice.phase(), CallPhase::Ending);
        alice.step(CallInput::TeardownComplete).unwrap();
        assert_eq!(alice.phase(), CallPhase::Idle);
    }

    #[test]
    fn reconnect_success_resets_budget_without_restarting_audio() {
        let mut alice = active_caller();
        alice
            .step(CallInput::LinkState(PeerConnectionState::Failed))
            .unwrap();
        alice.step(CallInput::ReconnectDue { attempt: 1 }).unwrap();
        alice
            .step(CallInput::OfferCreated(SessionDescription::offer("v=0 restart")))
            .unwrap();
        alice
            .step(CallInput::Signal {
                from: "bob".into(),
                data: SignalData::Answer { sdp: "v=0 answer".into() },
            })
            .unwrap();
        alice.step(CallInput::AnswerApplied).unwrap();
        let effects = alice
            .step(CallInput::LinkState(PeerConnectionState::Connected))
            .unwrap();
        assert_eq!(effects, vec![CallEffect::Notify(CallNotice::ConnectionRestored)]);
        assert_eq!(alice.session().unwrap().reconnect.attempt_count(), 0);
    }

    #[test]
    fn candidates_wait_for_the_restart_answer() {
        let mut alice = active_caller();
        alice
            .step(CallInput::LinkState(PeerConnectionState::Failed))
            .unwrap();
        assert_eq!(
            alice.step(CallInput::ReconnectDue { attempt: 1 }).unwrap(),
            vec![CallEffect::RestartIce]
        );
        alice
            .step(CallInput::OfferCreated(SessionDescription::offer("v=0 restart")))
            .unwrap();
        assert!(!alice.session().unwrap().remote_ready());

        // Bob's candidate for the new exchange beats his answer.
        assert!(alice.step(candidate_from("bob", 7)).unwrap().is_empty());
        assert_eq!(alice.session().unwrap().pending_candidates().count(), 1);

        alice
            .step(CallInput::Signal {
                from: "bob".into(),
                data: SignalData::Answer { sdp: "v=0 answer".into() },
            })
            .unwrap();
        assert_eq!(
            alice.step(CallInput::AnswerApplied).unwrap(),
            vec![CallEffect::ApplyCandidates(vec![candidate(7)])]
        );
    }

    #[test]
    fn renegotiation_offer_holds_candidates_until_answered() {
        let mut bob = answered_callee();
        bob.step(CallInput::LinkState(PeerConnectionState::Connected))
            .unwrap();
        bob.step(offer_from("alice")).unwrap();
        assert!(bob.step(candidate_from("alice", 3)).unwrap().is_empty());
        let effects = bob
            .step(CallInput::AnswerCreated(SessionDescription::answer("v=0 again")))
            .unwrap();
        assert_eq!(effects[1], CallEffect::ApplyCandidates(vec![candidate(3)]));
    }

    #[test]
    fn callee_leaves_ice_restart_to_the_caller() {
        let mut bob = answered_callee();
        bob.step(CallInput::LinkState(PeerConnectionState::Connected))
            .unwrap();
        bob.step(CallInput::LinkState(PeerConnectionState::Failed))
            .unwrap();
        // The wait runs out without a restart offer: next wait, no offer of its own.
        assert!(matches!(
            bob.step(CallInput::ReconnectDue { attempt: 1 }).unwrap().as_slice(),
            [CallEffect::ScheduleReconnect { attempt: 2, .. }]
        ));

        let effects = bob.step(offer_from("alice")).unwrap();
        assert!(matches!(effects[0], CallEffect::AnswerOffer { initial: false, .. }));
        bob.step(CallInput::AnswerCreated(SessionDescription::answer("v=0 restart")))
            .unwrap();
        assert_eq!(
            bob.step(CallInput::LinkState(PeerConnectionState::Connected))
                .unwrap(),
            vec![CallEffect::Notify(CallNotice::ConnectionRestored)]
        );
        // The pending wait is stale once the link is back.
        assert!(bob.step(CallInput::ReconnectDue { attempt: 2 }).unwrap().is_empty());
    }

    #[test]
    fn callee_without_restart_offer_ends_after_budget() {
        let mut bob = answered_callee();
        bob.step(CallInput::LinkState(PeerConnectionState::Connected))
            .unwrap();
        bob.step(CallInput::LinkState(PeerConnectionState::Failed))
            .unwrap();
        bob.step(CallInput::ReconnectDue { attempt: 1 }).unwrap();
        bob.step(CallInput::ReconnectDue { attempt: 2 }).unwrap();
        let effects = bob.step(CallInput::ReconnectDue { attempt: 3 }).unwrap();
        assert!(effects.contains(&CallEffect::Notify(CallNotice::ConnectionLost { attempts: 3 })));
        assert!(!effects.contains(&CallEffect::RestartIce));
        assert_eq!(bob.phase(), CallPhase::Ending);
    }

    #[test]
    fn late_candidates_of_an_ended_call_are_not_adopted() {
        let mut bob = machine("bob");
        bob.step(offer_from("alice")).unwrap();
        bob.step(CallInput::Decline).unwrap();
        bob.step(CallInput::TeardownComplete).unwrap();
        bob.step(candidate_from("alice", 1)).unwrap();
        bob.step(candidate_from("alice", 2)).unwrap();

        bob.step(offer_from("alice")).unwrap();
        assert_eq!(bob.session().unwrap().pending_candidates().count(), 0);
        // Once the new call exists, its candidates queue as usual.
        bob.step(candidate_from("alice", 3)).unwrap();
        let queued: Vec<_> = bob.session().unwrap().pending_candidates().cloned().collect();
        assert_eq!(queued, vec![candidate(3)]);
    }

    #[test]
    fn every_phase_returns_to_idle() {
        let teardown_inputs = [
            CallInput::HangUp,
            CallInput::PeerDisconnected,
            CallInput::TransportLost,
            CallInput::MediaFailed {
                reason: "busy".into(),
            },
        ];
        for input in teardown_inputs {
            let mut machines = Vec::new();

            let mut calling = machine("alice");
            calling
                .step(CallInput::PlaceCall {
                    remote: "bob".into(),
                })
                .unwrap();
            machines.push(calling);

            let mut receiving = machine("bob");
            receiving.step(offer_from("alice")).unwrap();
            machines.push(receiving);

            let mut connecting = machine("bob");
            connecting.step(offer_from("alice")).unwrap();
            connecting.step(CallInput::Accept).unwrap();
            machines.push(connecting);

            let mut active = answered_callee();
            active
                .step(CallInput::LinkState(PeerConnectionState::Connected))
                .unwrap();
            machines.push(active);

            for mut m in machines {
                let from = m.phase();
                let effects = m.step(input.clone()).unwrap();
                assert!(effects.contains(&CallEffect::Teardown), "{input:?} from {from}");
                assert!(m.step(input.clone()).unwrap().is_empty(), "teardown requested twice");
                m.step(CallInput::TeardownComplete).unwrap();
                assert_eq!(m.phase(), CallPhase::Idle);
            }
        }
    }

    #[test]
    fn hang_up_notifies_remote_but_decline_stays_local() {
        let mut alice = machine("alice");
        alice
            .step(CallInput::PlaceCall {
                remote: "bob".into(),
            })
            .unwrap();
        assert_eq!(
            alice.step(CallInput::HangUp).unwrap(),
            vec![CallEffect::Send(ClientMessage::DisconnectCall), CallEffect::Teardown]
        );

        let mut bob = machine("bob");
        bob.step(offer_from("alice")).unwrap();
        assert_eq!(bob.step(CallInput::Decline).unwrap(), vec![CallEffect::Teardown]);
    }

    #[test]
    fn commands_rejected_in_wrong_phase() {
        let mut alice = machine("alice");
        assert!(alice.step(CallInput::Accept).is_err());
        assert!(alice.step(CallInput::Decline).is_err());
        assert!(alice
            .step(CallInput::PlaceCall {
                remote: "alice".into()
            })
            .is_err());
        alice
            .step(CallInput::PlaceCall {
                remote: "bob".into(),
            })
            .unwrap();
        assert!(alice
            .step(CallInput::PlaceCall {
                remote: "carol".into()
            })
            .is_err());
        assert_eq!(alice.phase(), CallPhase::Calling);
    }

    #[test]
    fn call_failed_and_ring_timeout_end_calling() {
        let mut alice = machine("alice");
        alice
            .step(CallInput::PlaceCall {
                remote: "bob".into(),
            })
            .unwrap();
        assert!(alice
            .step(CallInput::CallFailed {
                user: "carol".into()
            })
            .unwrap()
            .is_empty());
        let effects = alice
            .step(CallInput::CallFailed { user: "bob".into() })
            .unwrap();
        assert_eq!(
            effects[0],
            CallEffect::Notify(CallNotice::CallFailed { user: "bob".into() })
        );
        alice.step(CallInput::TeardownComplete).unwrap();

        alice
            .step(CallInput::PlaceCall {
                remote: "bob".into(),
            })
            .unwrap();
        let effects = alice.step(CallInput::RingTimeout).unwrap();
        assert!(effects.contains(&CallEffect::Notify(CallNotice::NoAnswer {
            user: "bob".into()
        })));
        assert_eq!(effects[0], CallEffect::Send(ClientMessage::DisconnectCall));
    }
}
