use std::sync::Arc;
use std::time::Duration;

use livecall::loopback::{LoopbackMedia, LoopbackMicrophone, LoopbackPeerFactory, LoopbackSignalHub};
use livecall::messages::LiveSubtitle;
use livecall::{CallClient, CallConfig, CallEvent, CallNotice, CallPhase};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

async fn join(
    hub: &LoopbackSignalHub,
    name: &str,
    mic: &LoopbackMicrophone,
) -> Result<(CallClient, mpsc::UnboundedReceiver<CallEvent>), Box<dyn std::error::Error>> {
    let (transport, inbound) = hub.connect();
    let started = CallClient::start(
        CallConfig::default(),
        name,
        LoopbackPeerFactory::new(),
        Arc::new(LoopbackMedia::new()),
        Arc::new(mic.clone()),
        Arc::new(transport),
        inbound,
    )
    .await?;
    Ok(started)
}

async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<CallEvent>,
    who: &str,
    mut done: impl FnMut(&CallEvent) -> bool,
) {
    while let Some(event) = events.recv().await {
        println!("[{who}] {event:?}");
        if done(&event) {
            return;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("livecall=info")),
        )
        .init();

    // Swap the hub for CallClient::connect against a real server.
    let hub = LoopbackSignalHub::new();
    let alice_mic = LoopbackMicrophone::new();
    let (alice, mut alice_events) = join(&hub, "alice", &alice_mic).await?;
    let (bob, mut bob_events) = join(&hub, "bob", &LoopbackMicrophone::new()).await?;

    alice.handle().place_call("bob")?;
    wait_for(&mut bob_events, "bob", |e| {
        matches!(e, CallEvent::Notice(CallNotice::IncomingCall { .. }))
    })
    .await;
    bob.handle().accept()?;
    wait_for(&mut alice_events, "alice", |e| {
        matches!(e, CallEvent::Phase { phase: CallPhase::Active, .. })
    })
    .await;

    // One second of a quiet tone in capture-sized buffers.
    for n in 0..16 {
        let buffer: Vec<f32> = (0..1_000)
            .map(|i| ((n * 1_000 + i) as f32 * 0.05).sin() * 0.2)
            .collect();
        alice_mic.push(buffer);
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    let chunks = hub.audio_from("alice");
    println!(
        "server received {} audio chunks ({} bytes each)",
        chunks.len(),
        chunks.first().map(|c| c.chunk.len()).unwrap_or(0)
    );

    hub.push_subtitle(
        "bob",
        LiveSubtitle {
            speaker_id: "alice".into(),
            text: "hola".into(),
            is_final: true,
        },
    );
    wait_for(&mut bob_events, "bob", |e| matches!(e, CallEvent::Subtitles(_))).await;

    alice.handle().hang_up()?;
    wait_for(&mut bob_events, "bob", |e| {
        matches!(e, CallEvent::Phase { phase: CallPhase::Idle, .. })
    })
    .await;

    alice.close().await;
    bob.close().await;
    Ok(())
}
