//! Integration tests for the operator API and the `/ws` event feed.
//!
//! Each test spins up an Axum server on a random port backed by an
//! in-memory store and a scripted transport, then exercises the real
//! REST / WS contract over the network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use wadesk::api::{self, AdminAuth};
use wadesk::config::DeskConfig;
use wadesk::desk::Desk;
use wadesk::error::TransportError;
use wadesk::store::LibSqlBackend;
use wadesk::transport::{EventStream, InboundMessage, Transport, TransportEvent, TransportStatus};
use wadesk::triage::RuleBook;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const TOKEN: &str = "test-token";
const CUSTOMER: &str = "5527999990000@s.whatsapp.net";

/// Transport whose inbound side is fed by the test and whose sends are recorded.
struct ScriptedTransport {
    status: Mutex<TransportStatus>,
    sent: Mutex<Vec<(String, String)>>,
    inbound: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    fn status(&self) -> TransportStatus {
        *self.status.lock().unwrap()
    }

    async fn send(&self, conversation_id: &str, text: &str) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn start(&self) -> Result<EventStream, TransportError> {
        let rx = self
            .inbound
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| TransportError::NotConnected {
                name: "scripted".into(),
            })?;
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

impl ScriptedTransport {
    fn sent_to(&self, conversation_id: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == conversation_id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

struct TestServer {
    port: u16,
    transport: Arc<ScriptedTransport>,
    inbound: mpsc::Sender<TransportEvent>,
    client: reqwest::Client,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(TOKEN)
            .send()
            .await
            .unwrap()
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(TOKEN)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn receive(&self, conversation_id: &str, text: &str) {
        self.inbound
            .send(TransportEvent::Inbound(InboundMessage::new(conversation_id, text)))
            .await
            .unwrap();
    }

    fn set_status(&self, status: TransportStatus) {
        *self.transport.status.lock().unwrap() = status;
    }

    /// Poll until `conversation_id` has received `count` messages.
    async fn wait_for_sends(&self, conversation_id: &str, count: usize) -> Vec<String> {
        loop {
            let sent = self.transport.sent_to(conversation_id);
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Poll until the ticket list has `count` entries.
    async fn wait_for_tickets(&self, count: usize) -> Vec<Value> {
        loop {
            let tickets: Vec<Value> = self.get("/api/tickets").await.json().await.unwrap();
            if tickets.len() >= count {
                return tickets;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Start a desk on a random port with no delivery spacing.
async fn start_server() -> TestServer {
    let env: HashMap<&str, &str> = HashMap::from([
        ("ADMIN_TOKEN", TOKEN),
        ("MIN_DELAY_MS", "0"),
        ("MAX_PER_MINUTE", "100"),
    ]);
    let mut config = DeskConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));

    let (inbound, rx) = mpsc::channel(16);
    let transport = Arc::new(ScriptedTransport {
        status: Mutex::new(TransportStatus::Online),
        sent: Mutex::new(Vec::new()),
        inbound: Mutex::new(Some(rx)),
    });
    let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let book = RuleBook::builtin().with_bot_name(&config.bot_name);
    let desk = Desk::new(&config, store, transport.clone(), book);

    desk.launch().await.unwrap();

    let app = api::router(desk.app_state(AdminAuth::new(config.admin_token.take())));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        port,
        transport,
        inbound,
        client: reqwest::Client::new(),
    }
}

/// Read text frames until one satisfies `pred`.
async fn next_frame_matching<S>(ws: &mut S, pred: impl Fn(&Value) -> bool) -> Value
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = ws.next().await.expect("stream ended").unwrap();
        if let Message::Text(text) = msg {
            let value: Value = serde_json::from_str(text.as_str()).unwrap();
            if pred(&value) {
                return value;
            }
        }
    }
}

// ── REST ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_is_public() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let resp = reqwest::get(server.url("/api/health")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(body["waStatus"], "online");
        assert_eq!(body["queue"], 0);

        let status: Value = reqwest::get(server.url("/api/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["message"], "Backend online");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn admin_routes_require_token() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let resp = reqwest::get(server.url("/api/tickets")).await.unwrap();
        assert_eq!(resp.status(), 401);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body, json!({"ok": false, "error": "unauthorized"}));

        let resp = server
            .client
            .get(server.url("/api/tickets"))
            .bearer_auth("wrong")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);

        let resp = server.get("/api/tickets").await;
        assert_eq!(resp.status(), 200);
        let tickets: Vec<Value> = resp.json().await.unwrap();
        assert!(tickets.is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn send_queues_and_delivers() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let resp = server
            .post(
                "/api/send",
                json!({"to": "5527999990000", "text": "Olá!", "author": "Ana"}),
            )
            .await;
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body, json!({"ok": true, "queued": true, "jid": CUSTOMER}));

        let sent = server.wait_for_sends(CUSTOMER, 1).await;
        assert_eq!(sent, vec!["Olá!"]);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn send_rejections_map_to_status_codes() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let resp = server.post("/api/send", json!({"to": "", "text": "x"})).await;
        assert_eq!(resp.status(), 400);

        let resp = server.post("/api/send", json!({"to": CUSTOMER, "text": "  "})).await;
        assert_eq!(resp.status(), 400);

        server.set_status(TransportStatus::Pairing);
        let resp = server.post("/api/send", json!({"to": CUSTOMER, "text": "x"})).await;
        assert_eq!(resp.status(), 503);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["ok"], false);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn inbound_message_creates_ticket_and_reply() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        server.receive(CUSTOMER, "1").await;

        let tickets = server.wait_for_tickets(1).await;
        assert_eq!(tickets[0]["id"], CUSTOMER);
        assert_eq!(tickets[0]["tenant"], "default");
        assert_eq!(tickets[0]["status"], "open");

        let replies = server.wait_for_sends(CUSTOMER, 1).await;
        assert!(replies[0].contains("Cursos"));

        let tag: Value = server
            .get(&format!("/api/tickets/{CUSTOMER}/tag"))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(tag["tag"], "cursos");
        assert_eq!(tag["tenant"], "default");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn reading_messages_clears_unread() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        server.receive(CUSTOMER, "oi").await;
        let tickets = server.wait_for_tickets(1).await;
        assert!(tickets[0]["unreadCount"].as_u64().unwrap() >= 1);

        let messages: Vec<Value> = server
            .get(&format!("/api/tickets/{CUSTOMER}/messages"))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(messages[0]["direction"], "in");
        assert_eq!(messages[0]["text"], "oi");

        let tickets: Vec<Value> = server.get("/api/tickets").await.json().await.unwrap();
        assert_eq!(tickets[0]["unreadCount"], 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn human_mode_round_trip() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let resp = server.get("/api/human-mode").await;
        assert_eq!(resp.status(), 400);

        let body: Value = server
            .post("/api/human-mode", json!({"jid": CUSTOMER, "enabled": true}))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(body["humanMode"], true);

        let body: Value = server
            .get(&format!("/api/human-mode?jid={CUSTOMER}"))
            .await
            .json()
            .await
            .unwrap();
        assert_eq!(body["humanMode"], true);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn closing_unknown_ticket_is_a_no_op() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let resp = server
            .post("/api/tickets/nobody@s.whatsapp.net/close", json!({}))
            .await;
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(body["closed"], false);

        let tickets: Vec<Value> = server.get("/api/tickets").await.json().await.unwrap();
        assert!(tickets.is_empty());
    })
    .await
    .expect("test timed out");
}

// ── WebSocket ───────────────────────────────────────────────────────────

#[tokio::test]
async fn ws_rejects_missing_token() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let url = format!("ws://127.0.0.1:{}/ws", server.port);
        assert!(connect_async(url.as_str()).await.is_err());

        let url = format!("ws://127.0.0.1:{}/ws?token=wrong", server.port);
        assert!(connect_async(url.as_str()).await.is_err());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_sync_then_live_events() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        server.receive(CUSTOMER, "oi").await;
        server.wait_for_tickets(1).await;

        let url = format!("ws://127.0.0.1:{}/ws?token={TOKEN}", server.port);
        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

        let sync = next_frame_matching(&mut ws, |_| true).await;
        assert_eq!(sync["type"], "sync");
        assert_eq!(sync["waStatus"], "online");
        assert_eq!(sync["tickets"].as_array().unwrap().len(), 1);

        let resp = server
            .post(&format!("/api/tickets/{CUSTOMER}/close"), json!({}))
            .await;
        assert_eq!(resp.status(), 200);

        let closed = next_frame_matching(&mut ws, |v| v["type"] == "ticket").await;
        assert_eq!(closed["conversationId"], CUSTOMER);
        assert_eq!(closed["change"]["kind"], "closed");

        server.receive(CUSTOMER, "ainda aí?").await;
        let message = next_frame_matching(&mut ws, |v| {
            v["type"] == "message" && v["message"]["direction"] == "in"
        })
        .await;
        assert_eq!(message["message"]["text"], "ainda aí?");
    })
    .await
    .expect("test timed out");
}
