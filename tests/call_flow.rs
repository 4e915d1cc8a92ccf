use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use livecall::loopback::{LoopbackMedia, LoopbackMicrophone, LoopbackPeerFactory, LoopbackSignalHub};
use livecall::messages::LiveSubtitle;
use livecall::{
    CallClient, CallConfig, CallEvent, CallHandle, CallNotice, CallPhase, ClientError, MediaError,
    VideoQualityTier,
};

const WAIT: Duration = Duration::from_secs(60);

struct Endpoint {
    client: CallClient,
    handle: CallHandle,
    events: mpsc::UnboundedReceiver<CallEvent>,
    peers: LoopbackPeerFactory,
    media: LoopbackMedia,
    mic: LoopbackMicrophone,
}

async fn endpoint(hub: &LoopbackSignalHub, name: &str) -> Endpoint {
    let (transport, inbound) = hub.connect();
    let peers = LoopbackPeerFactory::new();
    let media = LoopbackMedia::new();
    let mic = LoopbackMicrophone::new();
    let (client, events) = CallClient::start(
        CallConfig::default(),
        name,
        peers.clone(),
        Arc::new(media.clone()),
        Arc::new(mic.clone()),
        Arc::new(transport),
        inbound,
    )
    .await
    .expect("registration");
    let handle = client.handle();
    Endpoint {
        client,
        handle,
        events,
        peers,
        media,
        mic,
    }
}

impl Endpoint {
    async fn next_matching<T>(&mut self, mut pick: impl FnMut(&CallEvent) -> Option<T>) -> T {
        let events = &mut self.events;
        timeout(WAIT, async move {
            loop {
                let event = events.recv().await.expect("event stream ended");
                if let Some(found) = pick(&event) {
                    return found;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    async fn wait_phase(&mut self, want: CallPhase) {
        self.next_matching(|e| match e {
            CallEvent::Phase { phase, .. } if *phase == want => Some(()),
            _ => None,
        })
        .await
    }

    async fn wait_notice(&mut self, mut want: impl FnMut(&CallNotice) -> bool) -> CallNotice {
        self.next_matching(|e| match e {
            CallEvent::Notice(n) if want(n) => Some(n.clone()),
            _ => None,
        })
        .await
    }

    /// Every event that is already queued.
    fn drain(&mut self) -> Vec<CallEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Polls `check` until it holds; remote signals may still be in flight.
async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held")
}

async fn connected_pair(hub: &LoopbackSignalHub) -> (Endpoint, Endpoint) {
    let mut alice = endpoint(hub, "alice").await;
    let mut bob = endpoint(hub, "bob").await;
    alice.handle.place_call("bob").unwrap();
    bob.wait_notice(|n| matches!(n, CallNotice::IncomingCall { from } if from == "alice"))
        .await;
    bob.handle.accept().unwrap();
    alice.wait_phase(CallPhase::Active).await;
    bob.wait_phase(CallPhase::Active).await;
    (alice, bob)
}

#[tokio::test]
async fn caller_and_callee_reach_active() {
    let hub = LoopbackSignalHub::new();
    let (mut alice, bob) = connected_pair(&hub).await;

    assert_eq!(alice.peers.links_created(), 1);
    assert_eq!(bob.peers.links_created(), 1);
    let bob_link = bob.peers.last_link().unwrap();
    let alice_link = alice.peers.last_link().unwrap();
    // Each side applied the other's single candidate, queued or not.
    eventually(|| bob_link.applied_candidates().len() == 1).await;
    eventually(|| alice_link.applied_candidates().len() == 1).await;
    assert_eq!(alice_link.restarts(), 0);
    assert!(!alice
        .drain()
        .iter()
        .any(|e| matches!(e, CallEvent::Notice(CallNotice::ConnectionRestored))));

    let settings = hub.language_settings("alice").unwrap();
    assert_eq!(settings.target_language, "es");
    assert_eq!(settings.stt_source_languages, vec!["en-US", "he-IL"]);
}

#[tokio::test]
async fn hang_up_returns_both_sides_to_idle() {
    let hub = LoopbackSignalHub::new();
    let (mut alice, mut bob) = connected_pair(&hub).await;
    assert!(!alice.media.live_tracks().is_empty());

    alice.handle.hang_up().unwrap();
    alice.wait_phase(CallPhase::Idle).await;
    bob.wait_notice(|n| *n == CallNotice::RemoteHungUp).await;
    bob.wait_phase(CallPhase::Idle).await;

    for side in [&alice, &bob] {
        assert!(side.media.live_tracks().is_empty());
        assert!(side.peers.last_link().unwrap().is_closed());
        assert!(!side.mic.is_open());
    }

    // A fresh call works after teardown.
    alice.handle.place_call("bob").unwrap();
    bob.wait_notice(|n| matches!(n, CallNotice::IncomingCall { .. }))
        .await;
    bob.handle.accept().unwrap();
    alice.wait_phase(CallPhase::Active).await;
    assert_eq!(alice.peers.links_created(), 2);
}

#[tokio::test]
async fn decline_is_local_and_rejects_wrong_phase_commands() {
    let hub = LoopbackSignalHub::new();
    let mut alice = endpoint(&hub, "alice").await;
    let mut bob = endpoint(&hub, "bob").await;

    bob.handle.accept().unwrap();
    let rejected = bob
        .next_matching(|e| match e {
            CallEvent::Rejected { command, .. } => Some(*command),
            _ => None,
        })
        .await;
    assert_eq!(rejected, "accept");

    alice.handle.place_call("bob").unwrap();
    bob.wait_phase(CallPhase::Receiving).await;
    bob.handle.decline().unwrap();
    bob.wait_phase(CallPhase::Idle).await;
    assert_eq!(bob.peers.links_created(), 0);
    assert!(bob.media.live_tracks().is_empty());

    alice.wait_phase(CallPhase::Calling).await;
    assert!(alice.drain().iter().all(|e| !matches!(e, CallEvent::Notice(_))));
}

#[tokio::test]
async fn unknown_user_fails_the_call() {
    let hub = LoopbackSignalHub::new();
    let mut alice = endpoint(&hub, "alice").await;
    alice.handle.place_call("nobody").unwrap();
    let notice = alice
        .wait_notice(|n| matches!(n, CallNotice::CallFailed { .. }))
        .await;
    assert_eq!(notice, CallNotice::CallFailed { user: "nobody".into() });
    alice.wait_phase(CallPhase::Idle).await;
    assert!(alice.media.live_tracks().is_empty());
}

#[tokio::test]
async fn denied_media_ends_attempt_without_link() {
    let hub = LoopbackSignalHub::new();
    let mut alice = endpoint(&hub, "alice").await;
    let _bob = endpoint(&hub, "bob").await;
    alice.media.deny(Some(MediaError::PermissionDenied));
    alice.handle.place_call("bob").unwrap();
    alice
        .wait_notice(|n| matches!(n, CallNotice::MediaUnavailable(_)))
        .await;
    alice.wait_phase(CallPhase::Idle).await;
    assert_eq!(alice.peers.links_created(), 0);
}

#[tokio::test(start_paused = true)]
async fn link_failure_recovers_with_ice_restart() {
    let hub = LoopbackSignalHub::new();
    let (mut alice, _bob) = connected_pair(&hub).await;
    let started = tokio::time::Instant::now();

    alice.peers.last_link().unwrap().fail();
    alice
        .wait_notice(|n| *n == CallNotice::ConnectionRestored)
        .await;

    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(alice.peers.last_link().unwrap().restarts(), 1);
    assert_eq!(alice.peers.links_created(), 1);
    assert!(alice.drain().iter().all(|e| !matches!(
        e,
        CallEvent::Phase { phase: CallPhase::Ending, .. }
    )));
}

#[tokio::test(start_paused = true)]
async fn fourth_failure_ends_the_call() {
    let hub = LoopbackSignalHub::new();
    let (mut alice, mut bob) = connected_pair(&hub).await;
    let started = tokio::time::Instant::now();

    alice.peers.fail_restarts(true);
    alice.peers.last_link().unwrap().fail();
    let notice = alice
        .wait_notice(|n| matches!(n, CallNotice::ConnectionLost { .. }))
        .await;
    assert_eq!(notice, CallNotice::ConnectionLost { attempts: 3 });
    // 2 s + 5 s + 5 s of backoff.
    assert!(started.elapsed() >= Duration::from_secs(12));
    alice.wait_phase(CallPhase::Idle).await;
    assert!(alice.media.live_tracks().is_empty());

    bob.wait_notice(|n| *n == CallNotice::RemoteHungUp).await;
    bob.wait_phase(CallPhase::Idle).await;
}

#[tokio::test(start_paused = true)]
async fn both_links_failing_recover_with_a_single_restart() {
    let hub = LoopbackSignalHub::new();
    let (mut alice, mut bob) = connected_pair(&hub).await;
    let alice_link = alice.peers.last_link().unwrap();
    let bob_link = bob.peers.last_link().unwrap();

    alice_link.fail();
    bob_link.fail();
    alice
        .wait_notice(|n| *n == CallNotice::ConnectionRestored)
        .await;
    bob.wait_notice(|n| *n == CallNotice::ConnectionRestored)
        .await;

    // Only the caller offered, so no offer ever met a pending local offer.
    assert_eq!(alice_link.restarts(), 1);
    assert_eq!(bob_link.restarts(), 0);
    for side in [&mut alice, &mut bob] {
        assert!(side.drain().iter().all(|e| !matches!(
            e,
            CallEvent::Phase { phase: CallPhase::Ending, .. }
                | CallEvent::Notice(CallNotice::ConnectionLost { .. })
        )));
    }
}

#[tokio::test]
async fn renegotiated_track_swap_completes_the_exchange() {
    let hub = LoopbackSignalHub::new();
    let (mut alice, _bob) = connected_pair(&hub).await;
    let link = alice.peers.last_link().unwrap();
    eventually(|| link.applied_candidates().len() == 1).await;

    alice.peers.renegotiate_on_swap(true);
    alice.handle.set_video_quality(VideoQualityTier::Low).unwrap();
    alice
        .next_matching(|e| match e {
            CallEvent::TierChanged { manual: true, .. } => Some(()),
            _ => None,
        })
        .await;
    // Bob's candidate for the new exchange lands once his answer is applied.
    eventually(|| link.applied_candidates().len() == 2).await;
    assert!(alice.drain().iter().all(|e| !matches!(
        e,
        CallEvent::Phase { phase: CallPhase::Ending, .. } | CallEvent::Notice(_)
    )));
}

#[tokio::test(start_paused = true)]
async fn busy_callee_ignores_second_caller() {
    let hub = LoopbackSignalHub::new();
    let (alice, mut bob) = connected_pair(&hub).await;
    let mut carol = endpoint(&hub, "carol").await;

    carol.handle.place_call("bob").unwrap();
    let notice = carol
        .wait_notice(|n| matches!(n, CallNotice::NoAnswer { .. }))
        .await;
    assert_eq!(notice, CallNotice::NoAnswer { user: "bob".into() });
    carol.wait_phase(CallPhase::Idle).await;

    let bob_events = bob.drain();
    assert!(bob_events.iter().all(|e| !matches!(
        e,
        CallEvent::Notice(CallNotice::IncomingCall { .. }) | CallEvent::Phase { .. }
    )));
    alice.handle.hang_up().unwrap();
    bob.wait_notice(|n| *n == CallNotice::RemoteHungUp).await;
}

#[tokio::test]
async fn subtitles_merge_and_clear_on_teardown() {
    let hub = LoopbackSignalHub::new();
    let (mut alice, _bob) = connected_pair(&hub).await;

    let line = |text: &str, is_final: bool| LiveSubtitle {
        speaker_id: "bob".into(),
        text: text.into(),
        is_final,
    };
    hub.push_subtitle("alice", line("hel", false));
    hub.push_subtitle("alice", line("hello", false));
    hub.push_subtitle("alice", line("hello there", true));
    let entries = alice
        .next_matching(|e| match e {
            CallEvent::Subtitles(entries) if entries.iter().any(|s| s.is_final) => {
                Some(entries.clone())
            }
            _ => None,
        })
        .await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].text, "hello there");

    alice.handle.hang_up().unwrap();
    alice
        .next_matching(|e| match e {
            CallEvent::Subtitles(entries) if entries.is_empty() => Some(()),
            _ => None,
        })
        .await;
}

#[tokio::test]
async fn camera_switch_failure_keeps_current_track() {
    let hub = LoopbackSignalHub::new();
    let (mut alice, _bob) = connected_pair(&hub).await;
    let link = alice.peers.last_link().unwrap();
    let before = link.video_track().unwrap();

    alice.media.break_camera("cam-back");
    alice.handle.switch_camera("cam-back").unwrap();
    alice
        .wait_notice(|n| matches!(n, CallNotice::CameraSwitchFailed(_)))
        .await;
    assert_eq!(link.video_track().unwrap(), before);
    assert_eq!(alice.client.identity(), "alice");
}

#[tokio::test]
async fn manual_tier_replaces_video_in_place() {
    let hub = LoopbackSignalHub::new();
    let (mut alice, _bob) = connected_pair(&hub).await;
    let link = alice.peers.last_link().unwrap();
    let old = link.video_track().unwrap();

    alice.handle.set_video_quality(VideoQualityTier::Low).unwrap();
    alice
        .next_matching(|e| match e {
            CallEvent::TierChanged { tier, manual: true } => Some(*tier),
            _ => None,
        })
        .await;
    let current = link.video_track().unwrap();
    assert_eq!(current.profile, VideoQualityTier::Low.profile());
    assert!(alice.media.stopped_tracks().contains(&old.id));
    assert!(alice.media.live_tracks().contains(&current.id));
}

#[tokio::test]
async fn signaling_loss_ends_call_and_client() {
    let hub = LoopbackSignalHub::new();
    let (mut alice, mut bob) = connected_pair(&hub).await;

    hub.disconnect("alice");
    alice
        .wait_notice(|n| *n == CallNotice::SignalingLost)
        .await;
    bob.wait_notice(|n| *n == CallNotice::RemoteHungUp).await;

    let Endpoint { client, media, .. } = alice;
    let result = client.join().await;
    assert!(matches!(result, Err(ClientError::Signal(_))));
    assert!(media.live_tracks().is_empty());
}

#[tokio::test]
async fn duplicate_username_is_refused() {
    let hub = LoopbackSignalHub::new();
    let _alice = endpoint(&hub, "alice").await;
    let (transport, inbound) = hub.connect();
    let result = CallClient::start(
        CallConfig::default(),
        "alice",
        LoopbackPeerFactory::new(),
        Arc::new(LoopbackMedia::new()),
        Arc::new(LoopbackMicrophone::new()),
        Arc::new(transport),
        inbound,
    )
    .await;
    assert!(matches!(result, Err(ClientError::Registration(_))));
}
