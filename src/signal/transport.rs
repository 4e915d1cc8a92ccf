use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use super::{SignalError, SignalTransport};
use crate::messages::{ClientMessage, ServerMessage};

const OUTBOUND_QUEUE: usize = 256;
const INBOUND_QUEUE: usize = 256;

/// JSON-over-WebSocket signaling transport.
///
/// A writer task drains the outbound queue into the socket and a reader task
/// decodes server frames into the inbound channel. When the socket closes the
/// inbound channel ends and [`SignalTransport::is_connected`] turns false.
#[derive(Debug)]
pub struct WsSignalTransport {
    outbound: mpsc::Sender<ClientMessage>,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl WsSignalTransport {
    pub async fn connect(
        url: &str,
        timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<ServerMessage>), SignalError> {
        let (stream, _) = match time::timeout(timeout, connect_async(url)).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(SignalError::Connect(e.to_string())),
            Err(_) => return Err(SignalError::Connect("connect timeout".into())),
        };
        debug!(url, "signaling socket open");

        let (mut sink, mut source) = stream.split();
        let connected = Arc::new(AtomicBool::new(true));
        let (out_tx, mut out_rx) = mpsc::channel::<ClientMessage>(OUTBOUND_QUEUE);
        let (in_tx, in_rx) = mpsc::channel::<ServerMessage>(INBOUND_QUEUE);

        let writer_flag = connected.clone();
        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let frame = match encode_frame(&msg) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(event = msg.event_name(), error = %err, "dropping unencodable message");
                        continue;
                    }
                };
                if let Err(err) = sink.send(frame).await {
                    warn!(error = %err, "signaling write failed");
                    break;
                }
            }
            writer_flag.store(false, Ordering::SeqCst);
            let _ = sink.close().await;
        });

        let reader_flag = connected.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => {
                            if in_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(error = %err, "dropping undecodable signaling frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "signaling read failed");
                        break;
                    }
                }
            }
            reader_flag.store(false, Ordering::SeqCst);
            debug!("signaling socket closed");
        });

        Ok((
            Self {
                outbound: out_tx,
                connected,
                reader,
                writer,
            },
            in_rx,
        ))
    }
}

impl SignalTransport for WsSignalTransport {
    fn send(&self, msg: ClientMessage) -> Result<(), SignalError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SignalError::NotConnected);
        }
        self.outbound.try_send(msg).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SignalError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => {
                self.connected.store(false, Ordering::SeqCst);
                SignalError::NotConnected
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for WsSignalTransport {
    fn drop(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        self.reader.abort();
        self.writer.abort();
    }
}

/// Maps a client message onto a socket frame. Audio goes out binary.
pub fn encode_frame(msg: &ClientMessage) -> Result<Message, SignalError> {
    match msg {
        ClientMessage::AudioChunk(chunk) => Ok(Message::Binary(chunk.to_frame())),
        other => serde_json::to_string(other)
            .map(Message::Text)
            .map_err(|e| SignalError::Encode(e.to_string())),
    }
}

/// In-process transport that hands outbound messages to a channel.
///
/// Useful for driving a pipeline or client without a server; the connected flag
/// is flipped by the owner.
#[derive(Debug)]
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    connected: AtomicBool,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ClientMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: tx,
                connected: AtomicBool::new(true),
            },
            rx,
        )
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl SignalTransport for ChannelTransport {
    fn send(&self, msg: ClientMessage) -> Result<(), SignalError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SignalError::NotConnected);
        }
        self.outbound.send(msg).map_err(|_| SignalError::Closed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
