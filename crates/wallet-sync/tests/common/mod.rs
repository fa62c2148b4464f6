//! Common helpers for integration tests.
//! Some helpers are only used by specific test binaries; allow dead_code to avoid per-binary warnings.
#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing_subscriber::EnvFilter;
use wallet_sync::{
    EndpointCandidate, EndpointPolicy, EventTemplate, Identity, IdentityError, RelayEvent,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("wallet_sync=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

/// 64-hex id from a small integer, for readable fixtures.
pub fn hex_id(n: u64) -> String {
    format!("{:064x}", n)
}

/// Reversible stand-in for a real signer: "ciphertext" is the hex plaintext prefixed with a
/// pair tag, so decrypting with the wrong identity fails like a real pairwise cipher would.
#[derive(Debug, Clone)]
pub struct TestIdentity {
    public_id: String,
}

impl TestIdentity {
    pub fn new(n: u64) -> Self {
        Self {
            public_id: format!("{:064x}", 0xabc0_0000u64 + n),
        }
    }

    /// Identity with an unusable public id.
    pub fn broken() -> Self {
        Self {
            public_id: String::new(),
        }
    }

    fn pair_tag(&self, peer: &str) -> String {
        let (a, b) = if self.public_id.as_str() <= peer {
            (self.public_id.as_str(), peer)
        } else {
            (peer, self.public_id.as_str())
        };
        format!("{}{}", &a[a.len().saturating_sub(8)..], &b[b.len().saturating_sub(8)..])
    }

    /// Event authored by this identity but encrypted to `peer`, as a stranger targeting the
    /// wallet owner would produce.
    pub fn event_to(&self, peer: &str, id: u64, created_at: u64, kind: u32, plaintext: &str) -> RelayEvent {
        RelayEvent {
            encrypted_content: format!("{}|{}", self.pair_tag(peer), hex::encode(plaintext)),
            ..self.event(id, created_at, kind, plaintext)
        }
    }

    /// Encrypt-to-self and wrap as a relay event with an explicit id.
    pub fn event(&self, id: u64, created_at: u64, kind: u32, plaintext: &str) -> RelayEvent {
        RelayEvent {
            id: hex_id(id),
            author_id: self.public_id.clone(),
            created_at,
            kind,
            tags: vec![],
            encrypted_content: format!("{}|{}", self.pair_tag(&self.public_id), hex::encode(plaintext)),
            sig: String::new(),
        }
    }
}

#[async_trait]
impl Identity for TestIdentity {
    fn public_id(&self) -> &str {
        &self.public_id
    }

    async fn sign(&self, template: EventTemplate) -> Result<RelayEvent, IdentityError> {
        let mut h = DefaultHasher::new();
        (template.kind, template.created_at, &template.content).hash(&mut h);
        Ok(RelayEvent {
            id: format!("{:064x}", h.finish()),
            author_id: self.public_id.clone(),
            created_at: template.created_at,
            kind: template.kind,
            tags: template.tags,
            encrypted_content: template.content,
            sig: "00".repeat(64),
        })
    }

    async fn encrypt(&self, peer_id: &str, plaintext: &str) -> Result<String, IdentityError> {
        Ok(format!("{}|{}", self.pair_tag(peer_id), hex::encode(plaintext)))
    }

    async fn decrypt(&self, peer_id: &str, ciphertext: &str) -> Result<String, IdentityError> {
        let (tag, body) = ciphertext
            .split_once('|')
            .ok_or_else(|| IdentityError::Decrypt("no tag".into()))?;
        if tag != self.pair_tag(peer_id) {
            return Err(IdentityError::Decrypt("wrong key".into()));
        }
        let bytes = hex::decode(body).map_err(|e| IdentityError::Decrypt(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| IdentityError::Decrypt(e.to_string()))
    }
}

pub fn snapshot_json(mint: &str, proofs: &[(&str, u64)], del: &[u64]) -> String {
    let proofs: Vec<Value> = proofs
        .iter()
        .map(|(secret, amount)| {
            json!({ "id": "009a1f293253e41e", "amount": amount, "secret": secret, "C": format!("02{}", secret) })
        })
        .collect();
    let del: Vec<String> = del.iter().map(|n| hex_id(*n)).collect();
    json!({ "mint": mint, "proofs": proofs, "del": del }).to_string()
}

/// How an in-process relay answers a `REQ`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayBehavior {
    /// NOTICE, one garbage EVENT, every stored event, then EOSE.
    Normal,
    /// Stored events but never EOSE.
    NoEose,
    /// Accept the socket and never answer.
    Silent,
    /// Refuse the subscription with CLOSED.
    Closed,
}

#[derive(Debug, Default)]
pub struct RelayLog {
    pub reqs: usize,
    pub closes: usize,
    pub disconnects: usize,
    pub published: Vec<RelayEvent>,
}

pub struct TestRelay {
    pub url: String,
    pub log: Arc<Mutex<RelayLog>>,
    events: Arc<Mutex<Vec<RelayEvent>>>,
}

impl TestRelay {
    pub fn disconnects(&self) -> usize {
        self.log.lock().unwrap().disconnects
    }

    pub fn closes(&self) -> usize {
        self.log.lock().unwrap().closes
    }

    pub fn published(&self) -> Vec<RelayEvent> {
        self.log.lock().unwrap().published.clone()
    }

    /// Wait (bounded) until the relay has seen `n` disconnects.
    pub async fn wait_disconnects(&self, n: usize) -> bool {
        for _ in 0..100 {
            if self.disconnects() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

/// Spawn an in-process websocket relay serving `events`. Published events with kind 1 are
/// rejected; everything else is stored and served to later queries.
pub async fn spawn_relay(events: Vec<RelayEvent>, behavior: RelayBehavior) -> TestRelay {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind relay");
    let url = format!("ws://{}", listener.local_addr().expect("addr"));
    let log = Arc::new(Mutex::new(RelayLog::default()));
    let events = Arc::new(Mutex::new(events));
    let (log_c, events_c) = (Arc::clone(&log), Arc::clone(&events));
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let (log, events) = (Arc::clone(&log_c), Arc::clone(&events_c));
            tokio::spawn(async move {
                serve_relay_conn(stream, behavior, log.clone(), events).await;
                log.lock().unwrap().disconnects += 1;
            });
        }
    });
    TestRelay { url, log, events }
}

async fn serve_relay_conn(
    stream: tokio::net::TcpStream,
    behavior: RelayBehavior,
    log: Arc<Mutex<RelayLog>>,
    events: Arc<Mutex<Vec<RelayEvent>>>,
) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };
    while let Some(Ok(msg)) = ws.next().await {
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(v) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        match v[0].as_str() {
            Some("REQ") => {
                log.lock().unwrap().reqs += 1;
                let sub = v[1].as_str().unwrap_or_default().to_string();
                let mut out = Vec::new();
                match behavior {
                    RelayBehavior::Silent => continue,
                    RelayBehavior::Closed => {
                        out.push(json!(["CLOSED", sub, "restricted: auth required"]));
                    }
                    RelayBehavior::Normal | RelayBehavior::NoEose => {
                        out.push(json!(["NOTICE", "welcome"]));
                        out.push(json!(["EVENT", sub, { "id": "zz" }]));
                        let stored = events.lock().unwrap().clone();
                        out.extend(stored.iter().map(|e| json!(["EVENT", sub, e.to_json()])));
                        if behavior == RelayBehavior::Normal {
                            out.push(json!(["EOSE", sub]));
                        }
                    }
                }
                for m in out {
                    if ws.send(Message::Text(m.to_string())).await.is_err() {
                        return;
                    }
                }
            }
            Some("CLOSE") => log.lock().unwrap().closes += 1,
            Some("EVENT") => {
                let Ok(ev) = serde_json::from_value::<RelayEvent>(v[1].clone()) else {
                    continue;
                };
                let accepted = ev.kind != 1;
                let message = if accepted { "" } else { "blocked: kind" };
                let reply = json!(["OK", ev.id, accepted, message]);
                if accepted {
                    log.lock().unwrap().published.push(ev.clone());
                    events.lock().unwrap().push(ev);
                }
                if ws.send(Message::Text(reply.to_string())).await.is_err() {
                    return;
                }
            }
            _ => {}
        }
    }
}

/// Serve an axum router on a loopback port; returns `http://127.0.0.1:<port>`.
pub async fn spawn_http(router: axum::Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind http");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{}", addr)
}

pub fn loopback_policy() -> EndpointPolicy {
    EndpointPolicy {
        allow_loopback_http: true,
    }
}

pub fn loopback_endpoint(base: &str) -> EndpointCandidate {
    EndpointCandidate::parse_with(base, loopback_policy()).expect("loopback endpoint")
}
