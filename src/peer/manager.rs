use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    IceConnectionState, LinkEvent, LinkEvents, PeerConnectionState, PeerError, PeerEvent,
    PeerLink, PeerLinkFactory, StatsProbe, TrackSwap,
};
use crate::config::IceServer;
use crate::media::{LocalMedia, VideoTrack};
use crate::messages::{IceCandidate, SessionDescription};

/// Owns the single peer link of the current call.
///
/// # Guarantees
/// * At most one link exists; each gets a fresh generation so events from a
///   closed link are discarded by [`PeerConnectionManager::accept_event`].
/// * Connection and ICE state events are forwarded once per actual transition.
/// * Candidates are refused with [`PeerError::SignalAppliedBeforeReady`] until a
///   remote description has been set.
pub struct PeerConnectionManager<F: PeerLinkFactory> {
    factory: F,
    ice_servers: Vec<IceServer>,
    events: mpsc::UnboundedSender<LinkEvent>,
    link: Option<Arc<F::Link>>,
    generation: u64,
    connection_state: Option<PeerConnectionState>,
    ice_state: Option<IceConnectionState>,
    remote_description_set: bool,
}

impl<F: PeerLinkFactory> PeerConnectionManager<F> {
    pub fn new(
        factory: F,
        ice_servers: Vec<IceServer>,
    ) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                factory,
                ice_servers,
                events: tx,
                link: None,
                generation: 0,
                connection_state: None,
                ice_state: None,
                remote_description_set: false,
            },
            rx,
        )
    }

    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    pub fn is_ready_for_candidates(&self) -> bool {
        self.link.is_some() && self.remote_description_set
    }

    pub fn connection_state(&self) -> Option<PeerConnectionState> {
        self.connection_state
    }

    async fn ensure_link(&mut self) -> Result<Arc<F::Link>, PeerError> {
        if let Some(link) = &self.link {
            return Ok(link.clone());
        }
        self.generation += 1;
        let events = LinkEvents::new(self.generation, self.events.clone());
        let link = Arc::new(self.factory.create(&self.ice_servers, events).await?);
        debug!(generation = self.generation, "peer link created");
        self.connection_state = Some(PeerConnectionState::New);
        self.ice_state = Some(IceConnectionState::New);
        self.remote_description_set = false;
        self.link = Some(link.clone());
        Ok(link)
    }

    fn current(&self) -> Result<Arc<F::Link>, PeerError> {
        self.link.clone().ok_or(PeerError::NoLink)
    }

    /// Creates the link if needed and returns the local offer.
    pub async fn originate(&mut self, media: &LocalMedia) -> Result<SessionDescription, PeerError> {
        let link = self.ensure_link().await?;
        link.create_offer(media).await
    }

    /// Applies a remote offer and returns the answer to send back.
    ///
    /// `media` is attached on the first offer of a call; renegotiation offers pass
    /// `None` and keep the tracks already on the link.
    pub async fn apply_remote_offer(
        &mut self,
        offer: &SessionDescription,
        media: Option<&LocalMedia>,
    ) -> Result<SessionDescription, PeerError> {
        let link = self.ensure_link().await?;
        let answer = link.accept_offer(offer, media).await?;
        self.remote_description_set = true;
        Ok(answer)
    }

    pub async fn apply_answer(&mut self, answer: &SessionDescription) -> Result<(), PeerError> {
        let link = self.current()?;
        link.set_answer(answer).await?;
        self.remote_description_set = true;
        Ok(())
    }

    pub async fn apply_candidate(&self, candidate: &IceCandidate) -> Result<(), PeerError> {
        if !self.is_ready_for_candidates() {
            return Err(PeerError::SignalAppliedBeforeReady);
        }
        self.current()?.add_candidate(candidate).await
    }

    /// Starts an ICE restart and returns its offer. Remote candidates are
    /// refused again until the matching answer is applied.
    pub async fn restart_ice(&mut self) -> Result<SessionDescription, PeerError> {
        let link = self.current()?;
        info!(generation = self.generation, "restarting ice");
        let offer = link.restart_ice().await?;
        self.remote_description_set = false;
        Ok(offer)
    }

    pub async fn replace_video_track(&mut self, track: &VideoTrack) -> Result<TrackSwap, PeerError> {
        let swap = self.current()?.replace_video_track(track).await?;
        if matches!(swap, TrackSwap::Renegotiate(_)) {
            self.remote_description_set = false;
        }
        Ok(swap)
    }

    /// Read-only handle for statistics polling.
    pub fn stats_probe(&self) -> Option<Arc<dyn StatsProbe>> {
        self.link
            .clone()
            .map(|link| link as Arc<dyn StatsProbe>)
    }

    /// Filters a raw link event.
    ///
    /// Returns `None` for events of a previous link and for state reports that
    /// repeat the state already recorded.
    pub fn accept_event(&mut self, event: LinkEvent) -> Option<PeerEvent> {
        if self.link.is_none() || event.generation != self.generation {
            debug!(generation = event.generation, "dropping event from stale link");
            return None;
        }
        match event.event {
            PeerEvent::ConnectionState(state) => {
                if self.connection_state == Some(state) {
                    return None;
                }
                debug!(from = ?self.connection_state, to = ?state, "connection state changed");
                self.connection_state = Some(state);
                Some(PeerEvent::ConnectionState(state))
            }
            PeerEvent::IceState(state) => {
                if self.ice_state == Some(state) {
                    return None;
                }
                self.ice_state = Some(state);
                Some(PeerEvent::IceState(state))
            }
            other => Some(other),
        }
    }

    /// Closes the link. Safe to call with no link or repeatedly.
    pub async fn close(&mut self) {
        if let Some(link) = self.link.take() {
            link.close().await;
            debug!(generation = self.generation, "peer link closed");
        } else if self.connection_state.is_some() {
            warn!("close requested with no live link");
        }
        self.connection_state = None;
        self.ice_state = None;
        self.remote_description_set = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackPeerFactory;

    fn events(generation: u64, state: PeerConnectionState) -> LinkEvent {
        LinkEvent {
            generation,
            event: PeerEvent::ConnectionState(state),
        }
    }

    #[tokio::test]
    async fn candidate_before_remote_description_is_refused() {
        let (mut manager, _rx) = PeerConnectionManager::new(LoopbackPeerFactory::new(), vec![]);
        let candidate = IceCandidate::new("candidate:1 1 udp 1 10.0.0.2 4000 typ host");
        assert_eq!(
            manager.apply_candidate(&candidate).await,
            Err(PeerError::SignalAppliedBeforeReady)
        );
        manager.originate(&LocalMedia::default()).await.unwrap();
        assert_eq!(
            manager.apply_candidate(&candidate).await,
            Err(PeerError::SignalAppliedBeforeReady)
        );
        manager
            .apply_answer(&SessionDescription::answer("v=0"))
            .await
            .unwrap();
        assert!(manager.apply_candidate(&candidate).await.is_ok());
    }

    #[tokio::test]
    async fn ice_restart_waits_for_its_answer() {
        let (mut manager, _rx) = PeerConnectionManager::new(LoopbackPeerFactory::new(), vec![]);
        let candidate = IceCandidate::new("candidate:2 1 udp 1 10.0.0.3 4000 typ host");
        manager.originate(&LocalMedia::default()).await.unwrap();
        manager
            .apply_answer(&SessionDescription::answer("v=0"))
            .await
            .unwrap();
        assert!(manager.is_ready_for_candidates());

        manager.restart_ice().await.unwrap();
        assert!(!manager.is_ready_for_candidates());
        assert_eq!(
            manager.apply_candidate(&candidate).await,
            Err(PeerError::SignalAppliedBeforeReady)
        );
        manager
            .apply_answer(&SessionDescription::answer("v=0 restart"))
            .await
            .unwrap();
        assert!(manager.apply_candidate(&candidate).await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_and_stale_states_are_filtered() {
        let (mut manager, _rx) = PeerConnectionManager::new(LoopbackPeerFactory::new(), vec![]);
        manager.originate(&LocalMedia::default()).await.unwrap();
        assert!(manager
            .accept_event(events(1, PeerConnectionState::Connecting))
            .is_some());
        assert!(manager
            .accept_event(events(1, PeerConnectionState::Connecting))
            .is_none());
        manager.close().await;
        manager.originate(&LocalMedia::default()).await.unwrap();
        assert!(manager
            .accept_event(events(1, PeerConnectionState::Failed))
            .is_none());
        assert_eq!(
            manager.accept_event(events(2, PeerConnectionState::Connecting)),
            Some(PeerEvent::ConnectionState(PeerConnectionState::Connecting))
        );
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (mut manager, _rx) = PeerConnectionManager::new(LoopbackPeerFactory::new(), vec![]);
        manager.close().await;
        manager.originate(&LocalMedia::default()).await.unwrap();
        manager.close().await;
        manager.close().await;
        assert!(!manager.has_link());
        assert!(manager.stats_probe().is_none());
    }
}
