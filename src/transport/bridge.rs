//! WhatsApp bridge transport.
//!
//! Talks to a companion process that owns the WhatsApp Web session over a
//! local WebSocket. The bridge pushes JSON frames tagged by `type`
//! (`message`, `status`, `qr`, `error`, `sent`) and accepts
//! `{"type":"send","to":..,"text":..}` commands.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use super::{EventStream, InboundMessage, Transport, TransportEvent, TransportStatus};
use crate::error::TransportError;

const TRANSPORT_NAME: &str = "whatsapp";

/// Only one-to-one chats carry this suffix.
const PERSONAL_SUFFIX: &str = "@s.whatsapp.net";

const EVENT_BUFFER: usize = 256;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Frames pushed by the bridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum BridgeFrame {
    Message {
        #[serde(default, alias = "jid", alias = "from")]
        sender: String,
        #[serde(default, alias = "text")]
        content: String,
        #[serde(default, alias = "fromMe")]
        from_me: bool,
        #[serde(default, alias = "pushName")]
        push_name: Option<String>,
        #[serde(default, alias = "avatarUrl")]
        avatar_url: Option<String>,
    },
    Status {
        status: String,
    },
    Qr {},
    Error {
        #[serde(default)]
        error: String,
    },
    Sent {
        #[serde(default)]
        to: String,
    },
}

#[derive(Debug, Serialize)]
struct SendCommand<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    to: &'a str,
    text: &'a str,
}

/// Map a bridge connection state onto a transport status.
fn status_from_bridge(raw: &str) -> Option<TransportStatus> {
    match raw.to_ascii_lowercase().as_str() {
        "open" | "connected" | "online" => Some(TransportStatus::Online),
        "connecting" | "starting" => Some(TransportStatus::Starting),
        "qr" | "pairing" => Some(TransportStatus::Pairing),
        "close" | "closed" | "disconnected" | "offline" => Some(TransportStatus::Offline),
        _ => None,
    }
}

/// Decode one frame. `Ok(None)` means the frame is valid but carries
/// nothing the desk acts on.
pub(crate) fn parse_frame(raw: &str) -> Result<Option<TransportEvent>, TransportError> {
    let frame: BridgeFrame =
        serde_json::from_str(raw).map_err(|e| TransportError::InvalidFrame(e.to_string()))?;

    let event = match frame {
        BridgeFrame::Message {
            sender,
            content,
            from_me,
            push_name,
            avatar_url,
        } => {
            if from_me || !sender.ends_with(PERSONAL_SUFFIX) {
                debug!(sender = %sender, from_me, "Skipping non-personal or own message");
                return Ok(None);
            }
            if content.trim().is_empty() {
                debug!(sender = %sender, "Skipping message without text");
                return Ok(None);
            }
            Some(TransportEvent::Inbound(InboundMessage {
                conversation_id: sender,
                text: content,
                sender_display_name: push_name.filter(|n| !n.trim().is_empty()),
                avatar_url,
            }))
        }
        BridgeFrame::Status { status } => match status_from_bridge(&status) {
            Some(s) => Some(TransportEvent::Status(s)),
            None => {
                debug!(status = %status, "Unknown bridge status");
                None
            }
        },
        BridgeFrame::Qr {} => {
            info!("Pairing code issued, scan it with the WhatsApp app");
            Some(TransportEvent::Status(TransportStatus::Pairing))
        }
        BridgeFrame::Error { error } => {
            error!(error = %error, "WhatsApp bridge error");
            None
        }
        BridgeFrame::Sent { to } => {
            debug!(to = %to, "Bridge confirmed send");
            None
        }
    };
    Ok(event)
}

/// WebSocket client for the WhatsApp bridge.
pub struct BridgeTransport {
    url: String,
    sink: Arc<Mutex<Option<WsSink>>>,
    status: Arc<watch::Sender<TransportStatus>>,
    started: AtomicBool,
}

impl BridgeTransport {
    pub fn new(url: impl Into<String>) -> Self {
        let (status, _) = watch::channel(TransportStatus::Starting);
        Self {
            url: url.into(),
            sink: Arc::new(Mutex::new(None)),
            status: Arc::new(status),
            started: AtomicBool::new(false),
        }
    }

    /// Update the shared status; reports a change on `events`.
    async fn set_status(
        status: &watch::Sender<TransportStatus>,
        events: &mpsc::Sender<TransportEvent>,
        next: TransportStatus,
    ) -> bool {
        let changed = status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            info!(status = %next, "WhatsApp status changed");
            return events.send(TransportEvent::Status(next)).await.is_ok();
        }
        !events.is_closed()
    }

    async fn connection_loop(
        url: String,
        sink: Arc<Mutex<Option<WsSink>>>,
        status: Arc<watch::Sender<TransportStatus>>,
        events: mpsc::Sender<TransportEvent>,
    ) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if !Self::set_status(&status, &events, TransportStatus::Starting).await {
                return;
            }
            info!(url = %url, "Connecting to WhatsApp bridge");

            match connect_async(url.as_str()).await {
                Ok((ws, _)) => {
                    info!("Connected to WhatsApp bridge");
                    backoff = INITIAL_BACKOFF;
                    let (write, mut read) = ws.split();
                    *sink.lock().await = Some(write);

                    while let Some(frame) = read.next().await {
                        match frame {
                            Ok(WsMessage::Text(text)) => match parse_frame(text.as_str()) {
                                Ok(Some(TransportEvent::Status(next))) => {
                                    if !Self::set_status(&status, &events, next).await {
                                        return;
                                    }
                                }
                                Ok(Some(event)) => {
                                    if events.send(event).await.is_err() {
                                        info!("Transport listener closed");
                                        return;
                                    }
                                }
                                Ok(None) => {}
                                Err(e) => warn!(error = %e, "Dropping bridge frame"),
                            },
                            Ok(WsMessage::Close(_)) => {
                                info!("WhatsApp bridge closed the connection");
                                break;
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!(error = %e, "WhatsApp bridge socket error");
                                break;
                            }
                        }
                    }

                    *sink.lock().await = None;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to connect to WhatsApp bridge");
                }
            }

            if !Self::set_status(&status, &events, TransportStatus::Offline).await {
                return;
            }

            debug!(delay_ms = backoff.as_millis() as u64, "Reconnecting to bridge");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    fn name(&self) -> &str {
        TRANSPORT_NAME
    }

    fn status(&self) -> TransportStatus {
        *self.status.borrow()
    }

    async fn send(&self, conversation_id: &str, text: &str) -> Result<(), TransportError> {
        let command = serde_json::to_string(&SendCommand {
            kind: "send",
            to: conversation_id,
            text,
        })
        .map_err(|e| TransportError::SendFailed {
            name: TRANSPORT_NAME.into(),
            reason: e.to_string(),
        })?;

        let mut sink = self.sink.lock().await;
        let Some(ws) = sink.as_mut() else {
            return Err(TransportError::NotConnected {
                name: TRANSPORT_NAME.into(),
            });
        };

        ws.send(WsMessage::Text(command.into()))
            .await
            .map_err(|e| TransportError::SendFailed {
                name: TRANSPORT_NAME.into(),
                reason: e.to_string(),
            })
    }

    async fn start(&self) -> Result<EventStream, TransportError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::Disconnected {
                name: TRANSPORT_NAME.into(),
                reason: "transport already started".into(),
            });
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(Self::connection_loop(
            self.url.clone(),
            Arc::clone(&self.sink),
            Arc::clone(&self.status),
            tx,
        ));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
