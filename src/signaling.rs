use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::config::Role;
use crate::error::{Error, Result};

/// One ICE candidate as carried over the signaling channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePayload {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

/// Every event that crosses the signaling channel, in either direction.
///
/// `from_socket_id` on offer/answer/candidate events is filled in by the
/// server on fan-out; clients leave it empty when sending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SignalingEvent {
    JoinLiveSession {
        session_id: String,
        batch_id: String,
        user_id: String,
        user_name: String,
        role: Role,
    },
    LeaveLiveSession {
        session_id: String,
        user_id: String,
    },
    ParticipantJoined {
        user_id: String,
        user_name: String,
        role: Role,
        socket_id: String,
    },
    ParticipantLeft {
        socket_id: String,
    },
    Offer {
        session_id: String,
        sdp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_socket_id: Option<String>,
        to_socket_id: String,
        // sender identity, so the responder can roster a participant it
        // never saw a join event for
        user_id: String,
        user_name: String,
        role: Role,
    },
    Answer {
        session_id: String,
        sdp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_socket_id: Option<String>,
        to_socket_id: String,
    },
    IceCandidate {
        session_id: String,
        candidate: CandidatePayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_socket_id: Option<String>,
        to_socket_id: String,
    },
    SessionChatMessage {
        session_id: String,
        message: String,
        user_id: String,
        user_name: String,
    },
    NewChatMessage {
        message: String,
        user_id: String,
        user_name: String,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    StartScreenShare {
        session_id: String,
        user_id: String,
    },
    StopScreenShare {
        session_id: String,
        user_id: String,
    },
    ScreenShareStarted {
        socket_id: String,
        user_id: String,
    },
    ScreenShareStopped {
        socket_id: String,
        user_id: String,
    },
    RaiseHand {
        session_id: String,
        user_id: String,
        user_name: String,
    },
    LowerHand {
        session_id: String,
        user_id: String,
        user_name: String,
    },
    HandRaised {
        user_id: String,
        user_name: String,
        socket_id: String,
    },
    HandLowered {
        user_id: String,
        user_name: String,
        socket_id: String,
    },
    MediaState {
        session_id: String,
        user_id: String,
        video: bool,
        audio: bool,
    },
    MediaStateChanged {
        socket_id: String,
        video: bool,
        audio: bool,
    },
}

/// Bidirectional, best-effort channel to the signaling server.
///
/// `send` is fire-and-forget: this layer makes no delivery guarantee.
/// Delivery order for events from a single source is FIFO.
#[async_trait]
pub trait SignalingTransport: Send {
    async fn send(&mut self, event: SignalingEvent) -> Result<()>;

    /// Next inbound event; `None` means the channel is gone.
    async fn receive(&mut self) -> Option<SignalingEvent>;

    /// Re-establish the channel after a drop.
    async fn reconnect(&mut self) -> Result<()>;

    /// Close the channel. Idempotent: a second call is a no-op.
    async fn disconnect(&mut self) -> Result<()>;
}

/// WebSocket-backed transport. Dials once, then pumps frames between the
/// socket and a pair of channels so callers never touch the stream halves.
pub struct WebSocketSignaling {
    url: String,
    tx: mpsc::Sender<SignalingEvent>,
    rx: mpsc::Receiver<SignalingEvent>,
    connected: bool,
}

impl WebSocketSignaling {
    pub async fn connect(url: &str) -> Result<Self> {
        let (tx, rx) = Self::dial(url).await?;
        Ok(Self {
            url: url.to_owned(),
            tx,
            rx,
            connected: true,
        })
    }

    async fn dial(
        url: &str,
    ) -> Result<(mpsc::Sender<SignalingEvent>, mpsc::Receiver<SignalingEvent>)> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (inbound_tx, inbound_rx) = mpsc::channel(100);
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<SignalingEvent>(100);

        tokio::spawn(async move {
            while let Some(event) = outgoing_rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if write.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("dropping unserializable signaling event: {}", e),
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("signaling socket error: {}", e);
                        break;
                    }
                };
                if !frame.is_text() {
                    continue;
                }
                let text = match frame.into_text() {
                    Ok(text) => text,
                    Err(_) => continue,
                };
                match serde_json::from_str::<SignalingEvent>(&text) {
                    Ok(event) => {
                        if inbound_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("ignoring unrecognized signaling frame: {}", e),
                }
            }
        });

        Ok((outgoing_tx, inbound_rx))
    }
}

#[async_trait]
impl SignalingTransport for WebSocketSignaling {
    async fn send(&mut self, event: SignalingEvent) -> Result<()> {
        if !self.connected {
            return Err(Error::Signaling("transport is disconnected".to_owned()));
        }
        self.tx
            .send(event)
            .await
            .map_err(|_| Error::Signaling("signaling channel closed".to_owned()))
    }

    async fn receive(&mut self) -> Option<SignalingEvent> {
        if !self.connected {
            return None;
        }
        self.rx.recv().await
    }

    async fn reconnect(&mut self) -> Result<()> {
        let (tx, rx) = Self::dial(&self.url).await?;
        self.tx = tx;
        self.rx = rx;
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        // dropping the outbound sender ends the write pump, which closes
        // the socket
        let (tx, _) = mpsc::channel(1);
        self.tx = tx;
        self.rx.close();
        Ok(())
    }
}
