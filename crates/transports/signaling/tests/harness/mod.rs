//! Test harness: a real signaling server on an ephemeral port plus a
//! minimal JSON-RPC WebSocket client.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use roomcast_core::{CapabilityNegotiator, LoopbackEngine, Session, SessionConfig};
use roomcast_signaling::{signaling_router, SharedState, SignalingEvent};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,roomcast_signaling=debug")
        .with_test_writer()
        .try_init();
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub session: Arc<Session>,
    pub engine: Arc<LoopbackEngine>,
    pub events: mpsc::Receiver<SignalingEvent>,
    task: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TestServer {
    pub async fn start() -> Self {
        init_tracing();
        let config = SessionConfig::default();
        let negotiator = CapabilityNegotiator::new(&config.router.media_codecs).unwrap();
        let engine = Arc::new(LoopbackEngine::new(&config, &negotiator));
        let session = Arc::new(Session::new(&config, negotiator, engine.clone()));

        let (event_tx, events) = mpsc::channel(256);
        let state = Arc::new(SharedState::new_with_events(
            Arc::clone(&session),
            64,
            Some(event_tx),
        ));
        let app = signaling_router(state, "/server");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            session,
            engine,
            events,
            task,
        }
    }

    pub async fn client(&self) -> Client {
        Client::connect(self.addr).await
    }

    /// Wait until the session has `count` participants
    pub async fn wait_for_participants(&self, count: usize) {
        tokio::time::timeout(FRAME_TIMEOUT, async {
            while self.session.stats().participants != count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("participant count never reached");
    }

    /// Next observer event matching `name`
    pub async fn event(&mut self, name: &str) -> SignalingEvent {
        tokio::time::timeout(FRAME_TIMEOUT, async {
            loop {
                let event = self.events.recv().await.expect("event channel closed");
                if event.name() == name {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }
}

pub struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u64,
    notifications: VecDeque<Value>,
    pub participant_id: String,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Self {
        let url = format!("ws://{}/server", addr);
        let (ws, _) = connect_async(url.as_str()).await.unwrap();
        let mut client = Self {
            ws,
            next_id: 1,
            notifications: VecDeque::new(),
            participant_id: String::new(),
        };

        let welcome = client.next_frame().await;
        assert_eq!(welcome["method"], "welcome", "first frame must be welcome");
        client.participant_id = welcome["params"]["participantId"]
            .as_str()
            .unwrap()
            .to_string();
        client
    }

    async fn next_frame(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(FRAME_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("socket closed")
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    /// Read frames until one answers `id`, queueing notifications seen on the way
    pub async fn response_to(&mut self, id: &Value) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame.get("id") == Some(id) {
                return frame;
            }
            self.notifications.push_back(frame);
        }
    }

    /// Send a request and return the full response envelope
    pub async fn request(&mut self, method: &str, params: Value) -> Value {
        let id = json!(self.next_id);
        self.next_id += 1;
        let req = json!({"jsonrpc": "2.0", "method": method, "params": params, "id": id});
        self.send_raw(&req.to_string()).await;
        self.response_to(&id).await
    }

    pub async fn call(&mut self, method: &str, params: Value) -> Value {
        let resp = self.request(method, params).await;
        assert!(resp.get("error").is_none(), "{} failed: {}", method, resp);
        resp["result"].clone()
    }

    pub async fn call_err(&mut self, method: &str, params: Value) -> Value {
        let resp = self.request(method, params).await;
        assert!(resp.get("result").is_none(), "{} unexpectedly succeeded: {}", method, resp);
        resp["error"].clone()
    }

    /// Next notification with the given method
    pub async fn notification(&mut self, method: &str) -> Value {
        if let Some(pos) = self.notifications.iter().position(|n| n["method"] == method) {
            if let Some(n) = self.notifications.remove(pos) {
                return n["params"].clone();
            }
        }
        loop {
            let frame = self.next_frame().await;
            if frame["method"] == method {
                return frame["params"].clone();
            }
            self.notifications.push_back(frame);
        }
    }

    /// Collect every frame that arrives within `window`
    pub async fn drain_for(&mut self, window: Duration) -> Vec<Value> {
        let mut out: Vec<Value> = self.notifications.drain(..).collect();
        while let Ok(Some(Ok(msg))) = tokio::time::timeout(window, self.ws.next()).await {
            if let Message::Text(text) = msg {
                out.push(serde_json::from_str(&text).unwrap());
            }
        }
        out
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    // =========================================================================
    // Negotiation helpers
    // =========================================================================

    pub async fn connected_transport(&mut self, direction: &str) -> String {
        let transport = self
            .call("createTransport", json!({"direction": direction}))
            .await;
        let transport_id = transport["transportId"].as_str().unwrap().to_string();
        self.call(
            "connectTransport",
            json!({"transportId": transport_id, "dtlsParameters": client_dtls()}),
        )
        .await;
        transport_id
    }

    /// Publish one stream of `kind` on a fresh publish transport
    pub async fn publish(&mut self, kind: &str) -> u64 {
        let transport_id = self.connected_transport("publish").await;
        let params = match kind {
            "audio" => opus_params(),
            _ => vp8_params(),
        };
        let result = self
            .call(
                "produce",
                json!({"transportId": transport_id, "kind": kind, "rtpParameters": params}),
            )
            .await;
        result["productionId"].as_u64().unwrap()
    }
}

pub fn client_dtls() -> Value {
    json!({
        "role": "client",
        "fingerprints": [{"algorithm": "sha-256", "value": vec!["AB"; 32].join(":")}]
    })
}

pub fn vp8_params() -> Value {
    json!({
        "mid": "0",
        "codecs": [{"mimeType": "video/VP8", "payloadType": 96, "clockRate": 90000}],
        "encodings": [{"ssrc": 1111}]
    })
}

pub fn opus_params() -> Value {
    json!({
        "mid": "1",
        "codecs": [{"mimeType": "audio/opus", "payloadType": 111, "clockRate": 48000, "channels": 2}],
        "encodings": [{"ssrc": 2222}]
    })
}
