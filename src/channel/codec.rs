// Socket.IO v5 / Engine.IO v4 text framing
//
// Only the packets a websocket-only client needs:
//   0{...}  engine open          2  ping        3  pong
//   1       engine close         6  noop
//   40      namespace connect    41 namespace disconnect
//   42[...] event                44{...} connect error

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::error::TransportError;

const DEFAULT_PING_INTERVAL_MS: u64 = 25_000;
const DEFAULT_PING_TIMEOUT_MS: u64 = 20_000;

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open { ping_interval: Duration, ping_timeout: Duration },
    Close,
    Ping,
    Pong,
    Noop,
    Connect,
    Disconnect,
    Event { name: String, payload: Option<Value> },
    ConnectError(String),
}

impl Packet {
    /// Silence allowed before the server is presumed gone.
    pub fn liveness_window(ping_interval: Duration, ping_timeout: Duration) -> Duration {
        ping_interval + ping_timeout
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenPayload {
    ping_interval: Option<u64>,
    ping_timeout: Option<u64>,
}

fn protocol(msg: impl Into<String>) -> TransportError {
    TransportError::Protocol(msg.into())
}

pub fn decode(text: &str) -> Result<Packet, TransportError> {
    let mut chars = text.chars();
    let engine = chars.next().ok_or_else(|| protocol("empty frame"))?;
    let rest = chars.as_str();

    match engine {
        '0' => {
            let open: OpenPayload = serde_json::from_str(rest)
                .map_err(|err| protocol(format!("bad open packet: {err}")))?;
            Ok(Packet::Open {
                ping_interval: Duration::from_millis(
                    open.ping_interval.unwrap_or(DEFAULT_PING_INTERVAL_MS),
                ),
                ping_timeout: Duration::from_millis(
                    open.ping_timeout.unwrap_or(DEFAULT_PING_TIMEOUT_MS),
                ),
            })
        }
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '6' => Ok(Packet::Noop),
        '4' => decode_message(rest),
        other => Err(protocol(format!("unsupported engine packet '{other}'"))),
    }
}

fn decode_message(body: &str) -> Result<Packet, TransportError> {
    let mut chars = body.chars();
    let kind = chars.next().ok_or_else(|| protocol("empty message packet"))?;
    let rest = strip_namespace(chars.as_str());

    match kind {
        '0' => Ok(Packet::Connect),
        '1' => Ok(Packet::Disconnect),
        '2' => decode_event(rest),
        '4' => {
            let message = serde_json::from_str::<Value>(rest)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| rest.to_string());
            Ok(Packet::ConnectError(message))
        }
        other => Err(protocol(format!("unsupported socket packet '{other}'"))),
    }
}

/// Drops a leading `/namespace,` if present.
fn strip_namespace(rest: &str) -> &str {
    if rest.starts_with('/') {
        match rest.find(',') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        }
    } else {
        rest
    }
}

fn decode_event(rest: &str) -> Result<Packet, TransportError> {
    // Optional ack id precedes the array.
    let body = rest.trim_start_matches(|c: char| c.is_ascii_digit());
    let items: Vec<Value> =
        serde_json::from_str(body).map_err(|err| protocol(format!("bad event packet: {err}")))?;
    let mut items = items.into_iter();
    let name = match items.next() {
        Some(Value::String(name)) => name,
        _ => return Err(protocol("event packet without a name")),
    };
    Ok(Packet::Event {
        name,
        payload: items.next(),
    })
}

pub fn encode(packet: &Packet) -> String {
    match packet {
        Packet::Open { ping_interval, ping_timeout } => format!(
            "0{}",
            serde_json::json!({
                "pingInterval": ping_interval.as_millis() as u64,
                "pingTimeout": ping_timeout.as_millis() as u64,
            })
        ),
        Packet::Close => "1".into(),
        Packet::Ping => "2".into(),
        Packet::Pong => "3".into(),
        Packet::Noop => "6".into(),
        Packet::Connect => "40".into(),
        Packet::Disconnect => "41".into(),
        Packet::Event { name, payload } => {
            let mut items = vec![Value::String(name.clone())];
            items.extend(payload.clone());
            format!("42{}", Value::Array(items))
        }
        Packet::ConnectError(message) => {
            format!("44{}", serde_json::json!({ "message": message }))
        }
    }
}
