//! Relay query gateway.
//!
//! Opens one short-lived websocket per relay, issues a single `REQ`, collects `EVENT`s until
//! `EOSE` (or the shared deadline), then sends `CLOSE` and closes the socket. A relay that is
//! unreachable, errors out or stays silent contributes nothing; only a malformed filter fails
//! the call. Results are deduplicated by event id across relays.

use crate::config::RelayConfig;
use crate::event::{decode_event, dedup_by_id, Filter, FilterError, RelayEvent};
use anyhow::{Context, Result};
use futures_util::future::join_all;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid filter: {0}")]
    InvalidFilter(#[from] FilterError),
}

/// Relay-to-client message (NIP-01 subset).
#[derive(Debug, Clone, PartialEq)]
enum RelayMessage {
    Event { sub: String, event: Value },
    Eose { sub: String },
    Closed { sub: String, message: String },
    Ok { event_id: String, accepted: bool, message: String },
    Notice(String),
}

fn parse_relay_message(text: &str) -> Option<RelayMessage> {
    let v: Value = serde_json::from_str(text).ok()?;
    let arr = v.as_array()?;
    let str_at = |i: usize| arr.get(i).and_then(Value::as_str).map(str::to_string);
    match arr.first()?.as_str()? {
        "EVENT" => Some(RelayMessage::Event {
            sub: str_at(1)?,
            event: arr.get(2)?.clone(),
        }),
        "EOSE" => Some(RelayMessage::Eose { sub: str_at(1)? }),
        "CLOSED" => Some(RelayMessage::Closed {
            sub: str_at(1)?,
            message: str_at(2).unwrap_or_default(),
        }),
        "OK" => Some(RelayMessage::Ok {
            event_id: str_at(1)?,
            accepted: arr.get(2)?.as_bool()?,
            message: str_at(3).unwrap_or_default(),
        }),
        "NOTICE" => Some(RelayMessage::Notice(str_at(1).unwrap_or_default())),
        _ => None,
    }
}

fn subscription_id() -> String {
    format!("ws-{:016x}", rand::thread_rng().gen::<u64>())
}

/// Trimmed, non-empty, deduplicated relay URLs in input order.
fn unique_relays(relays: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    relays
        .iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty() && seen.insert(r.clone()))
        .collect()
}

/// How one relay answered a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishAck {
    Accepted,
    Rejected(String),
    /// Unreachable, errored, or no `OK` before the deadline.
    NoResponse,
}

/// Per-relay outcome of a publish round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub acks: Vec<(String, PublishAck)>,
}

impl PublishReport {
    pub fn accepted(&self) -> usize {
        self.acks
            .iter()
            .filter(|(_, a)| *a == PublishAck::Accepted)
            .count()
    }

    pub fn any_accepted(&self) -> bool {
        self.accepted() > 0
    }
}

/// Ephemeral-connection relay client.
#[derive(Debug, Clone)]
pub struct RelayGateway {
    close_grace: Duration,
}

impl Default for RelayGateway {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

impl RelayGateway {
    pub fn new(close_grace: Duration) -> Self {
        Self { close_grace }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.close_grace)
    }

    /// Query all relays concurrently and return the union of matching events, deduplicated by
    /// id and sorted by `(created_at, id)`. Returns once every relay has finished or `max_wait`
    /// has elapsed, whichever comes first.
    pub async fn query(
        &self,
        relays: &[String],
        filter: &Filter,
        max_wait: Duration,
    ) -> Result<Vec<RelayEvent>, RelayError> {
        filter.validate()?;
        let relays = unique_relays(relays);
        let deadline = Instant::now() + max_wait;
        let per_relay = join_all(
            relays
                .iter()
                .map(|url| self.query_one(url, filter, deadline)),
        )
        .await;

        let received: usize = per_relay.iter().map(Vec::len).sum();
        let mut out: Vec<RelayEvent> = dedup_by_id(per_relay.iter().flatten())
            .into_iter()
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        tracing::info!(
            relays = relays.len(),
            received,
            unique = out.len(),
            "relay query complete"
        );
        Ok(out)
    }

    async fn query_one(&self, url: &str, filter: &Filter, deadline: Instant) -> Vec<RelayEvent> {
        let mut ws = match connect(url, deadline).await {
            Some(ws) => ws,
            None => return Vec::new(),
        };
        let sub_id = subscription_id();
        let mut events = Vec::new();
        match timeout_at(deadline, read_until_eose(&mut ws, &sub_id, filter, &mut events)).await {
            Ok(Ok(())) => {
                tracing::debug!(relay = %url, count = events.len(), "relay finished");
            }
            Ok(Err(e)) => {
                tracing::warn!(relay = %url, reason = %e, count = events.len(), "relay query failed");
            }
            Err(_) => {
                tracing::debug!(relay = %url, count = events.len(), "relay did not finish before deadline");
            }
        }
        self.release(&mut ws, Some(&sub_id), url, deadline).await;
        events
    }

    /// Publish a signed event to all relays concurrently.
    pub async fn publish(
        &self,
        relays: &[String],
        event: &RelayEvent,
        max_wait: Duration,
    ) -> PublishReport {
        let relays = unique_relays(relays);
        let deadline = Instant::now() + max_wait;
        let acks = join_all(
            relays
                .iter()
                .map(|url| self.publish_one(url, event, deadline)),
        )
        .await;
        let report = PublishReport {
            acks: relays.into_iter().zip(acks).collect(),
        };
        tracing::info!(
            event = %event.id,
            kind = event.kind,
            accepted = report.accepted(),
            relays = report.acks.len(),
            "event published"
        );
        report
    }

    async fn publish_one(&self, url: &str, event: &RelayEvent, deadline: Instant) -> PublishAck {
        let mut ws = match connect(url, deadline).await {
            Some(ws) => ws,
            None => return PublishAck::NoResponse,
        };
        let ack = match timeout_at(deadline, send_and_await_ok(&mut ws, event)).await {
            Ok(Ok(ack)) => ack,
            Ok(Err(e)) => {
                tracing::warn!(relay = %url, reason = %e, "publish failed");
                PublishAck::NoResponse
            }
            Err(_) => {
                tracing::debug!(relay = %url, "no OK before deadline");
                PublishAck::NoResponse
            }
        };
        self.release(&mut ws, None, url, deadline).await;
        ack
    }

    /// Send CLOSE for the subscription (if any) and close the websocket, bounded by the grace
    /// period and the call's deadline. The socket is dropped by the caller either way.
    async fn release(&self, ws: &mut Socket, sub_id: Option<&str>, url: &str, deadline: Instant) {
        let grace = close_budget(self.close_grace, deadline);
        let close = async {
            if let Some(sub) = sub_id {
                let _ = ws
                    .send(Message::Text(json!(["CLOSE", sub]).to_string()))
                    .await;
            }
            let _ = ws.close(None).await;
        };
        if timeout(grace, close).await.is_err() {
            tracing::debug!(relay = %url, "close handshake timed out, dropping socket");
        }
    }
}

/// Close handshake budget: the grace period, cut short by whatever is left before `deadline`.
fn close_budget(grace: Duration, deadline: Instant) -> Duration {
    grace.min(deadline.saturating_duration_since(Instant::now()))
}

async fn connect(url: &str, deadline: Instant) -> Option<Socket> {
    match timeout_at(deadline, connect_async(url)).await {
        Ok(Ok((ws, _))) => Some(ws),
        Ok(Err(e)) => {
            tracing::warn!(relay = %url, reason = %e, "relay connect failed");
            None
        }
        Err(_) => {
            tracing::warn!(relay = %url, "relay connect timed out");
            None
        }
    }
}

async fn read_until_eose(
    ws: &mut Socket,
    sub_id: &str,
    filter: &Filter,
    out: &mut Vec<RelayEvent>,
) -> Result<()> {
    let req = json!(["REQ", sub_id, filter.to_json()]);
    ws.send(Message::Text(req.to_string()))
        .await
        .context("send REQ")?;

    while let Some(msg) = ws.next().await {
        let text = match msg.context("ws read")? {
            Message::Text(t) => t,
            Message::Close(_) => return Ok(()),
            _ => continue,
        };
        match parse_relay_message(&text) {
            Some(RelayMessage::Event { sub, event }) if sub == sub_id => match decode_event(&event) {
                Ok(ev) if filter.matches(&ev) => out.push(ev),
                Ok(ev) => tracing::debug!(event = %ev.id, "event outside filter dropped"),
                Err(e) => tracing::debug!(reason = %e, "undecodable event dropped"),
            },
            Some(RelayMessage::Eose { sub }) if sub == sub_id => return Ok(()),
            Some(RelayMessage::Closed { sub, message }) if sub == sub_id => {
                anyhow::bail!("subscription closed by relay: {}", message);
            }
            Some(RelayMessage::Notice(notice)) => tracing::debug!(%notice, "relay notice"),
            _ => continue,
        }
    }
    Ok(())
}

async fn send_and_await_ok(ws: &mut Socket, event: &RelayEvent) -> Result<PublishAck> {
    let msg = json!(["EVENT", event.to_json()]);
    ws.send(Message::Text(msg.to_string()))
        .await
        .context("send EVENT")?;

    while let Some(msg) = ws.next().await {
        let text = match msg.context("ws read")? {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };
        if let Some(RelayMessage::Ok {
            event_id,
            accepted,
            message,
        }) = parse_relay_message(&text)
        {
            if event_id != event.id {
                continue;
            }
            return Ok(if accepted {
                PublishAck::Accepted
            } else {
                PublishAck::Rejected(message)
            });
        }
    }
    anyhow::bail!("connection closed before OK")
}
