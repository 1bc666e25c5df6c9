// Socket.IO websocket connector
//
// One `open` call performs the engine and namespace handshake, optionally asks
// the backend for its current diagnosis, and hands the socket to a reader task
// that lives until the server goes quiet, closes, or the window is cancelled.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::codec::{decode, encode, Packet};
use super::{Connector, Inbound};
use crate::error::TransportError;
use crate::models::{AnalysisUpdate, ClassificationEvent};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "socket";

use crate::{log_debug, log_info, log_warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const WINDOW_BUFFER: usize = 64;

const EVENT_ANALYSIS_UPDATE: &str = "analysis_update";
const EVENT_CONNECTION_RESPONSE: &str = "connection_response";
const EVENT_ERROR: &str = "error";
const EVENT_REQUEST_ANALYSIS: &str = "request_analysis";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Maps the backend's HTTP base URL to its Socket.IO websocket endpoint.
pub fn socket_url(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        format!("ws://{base}")
    };
    format!("{base}/socket.io/?EIO=4&transport=websocket")
}

pub struct WebSocketConnector {
    url: String,
    resync: bool,
}

impl WebSocketConnector {
    pub fn new(base_url: &str, resync: bool) -> Self {
        Self {
            url: socket_url(base_url),
            resync,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<Inbound>, TransportError> {
        log_debug!("connecting to {}", self.url);

        let (stream, _) = timeout(HANDSHAKE_TIMEOUT, connect_async(self.url.as_str()))
            .await
            .map_err(|_| TransportError::Connect("websocket connect timed out".into()))?
            .map_err(|err| TransportError::Connect(err.to_string()))?;

        let (mut write, mut read) = stream.split();

        let liveness = timeout(
            HANDSHAKE_TIMEOUT,
            handshake(&mut write, &mut read, self.resync),
        )
        .await
        .map_err(|_| TransportError::Connect("socket.io handshake timed out".into()))??;

        log_info!("socket.io session open (liveness window {:?})", liveness);

        let (tx, rx) = mpsc::channel(WINDOW_BUFFER);
        tokio::spawn(read_loop(write, read, liveness, tx, cancel));
        Ok(rx)
    }
}

async fn send_packet(write: &mut WsWrite, packet: &Packet) -> Result<(), TransportError> {
    write
        .send(Message::Text(encode(packet).into()))
        .await
        .map_err(|err| TransportError::Closed(err.to_string()))
}

/// Next decodable Socket.IO packet, skipping websocket control frames.
async fn next_packet(read: &mut WsRead) -> Result<Packet, TransportError> {
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => return decode(text.as_str()),
            Some(Ok(Message::Close(_))) | None => {
                return Err(TransportError::Closed("closed during handshake".into()))
            }
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(TransportError::Connect(err.to_string())),
        }
    }
}

/// Engine open, namespace connect, optional resync request. Returns the
/// liveness window announced by the server.
async fn handshake(
    write: &mut WsWrite,
    read: &mut WsRead,
    resync: bool,
) -> Result<Duration, TransportError> {
    let liveness = match next_packet(read).await? {
        Packet::Open {
            ping_interval,
            ping_timeout,
        } => Packet::liveness_window(ping_interval, ping_timeout),
        other => {
            return Err(TransportError::Protocol(format!(
                "expected open packet, got {other:?}"
            )))
        }
    };

    send_packet(write, &Packet::Connect).await?;

    loop {
        match next_packet(read).await? {
            Packet::Connect => break,
            Packet::ConnectError(message) => return Err(TransportError::Connect(message)),
            Packet::Ping => send_packet(write, &Packet::Pong).await?,
            _ => continue,
        }
    }

    if resync {
        send_packet(
            write,
            &Packet::Event {
                name: EVENT_REQUEST_ANALYSIS.into(),
                payload: None,
            },
        )
        .await?;
    }

    Ok(liveness)
}

async fn read_loop(
    mut write: WsWrite,
    mut read: WsRead,
    liveness: Duration,
    tx: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) {
    let mut deadline = Instant::now() + liveness;

    let closed = loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = send_packet(&mut write, &Packet::Disconnect).await;
                let _ = write.close().await;
                log_debug!("window cancelled, socket closed");
                return;
            }
            _ = sleep_until(deadline) => {
                break TransportError::Closed(format!("no ping within {liveness:?}"));
            }
            message = read.next() => message,
        };

        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) => break TransportError::Closed("closed by server".into()),
            Some(Ok(_)) => continue,
            Some(Err(err)) => break TransportError::Closed(err.to_string()),
            None => break TransportError::Closed("stream ended".into()),
        };

        deadline = Instant::now() + liveness;

        let packet = match decode(text.as_str()) {
            Ok(packet) => packet,
            Err(err) => {
                log_warn!("skipping frame: {}", err);
                continue;
            }
        };

        match packet {
            Packet::Ping => {
                if let Err(err) = send_packet(&mut write, &Packet::Pong).await {
                    break err;
                }
            }
            Packet::Event { name, payload } => {
                if let Some(event) = handle_event(&name, payload) {
                    if tx.send(Inbound::Update(event)).await.is_err() {
                        return;
                    }
                }
            }
            Packet::Disconnect | Packet::Close => {
                break TransportError::Closed("server ended the session".into())
            }
            _ => {}
        }
    };

    log_info!("window closed: {}", closed);
    let _ = tx.send(Inbound::Closed(closed)).await;
}

fn handle_event(name: &str, payload: Option<Value>) -> Option<ClassificationEvent> {
    match name {
        EVENT_ANALYSIS_UPDATE => {
            let parsed = AnalysisUpdate::from_value(payload.unwrap_or(Value::Null))
                .and_then(ClassificationEvent::try_from);
            match parsed {
                Ok(event) => {
                    if let Some(hints) = &event.hints {
                        log_debug!("server hints: {:?}", hints);
                    }
                    Some(event)
                }
                Err(err) => {
                    log_warn!("dropping analysis_update: {}", err);
                    None
                }
            }
        }
        EVENT_CONNECTION_RESPONSE => {
            log_info!("backend says: {}", payload_message(payload.as_ref()));
            None
        }
        EVENT_ERROR => {
            log_warn!("backend error: {}", payload_message(payload.as_ref()));
            None
        }
        other => {
            log_debug!("ignoring event '{}'", other);
            None
        }
    }
}

fn payload_message(payload: Option<&Value>) -> String {
    payload
        .and_then(|p| p.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| payload.map(Value::to_string).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventOrigin;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn test_socket_url() {
        assert_eq!(
            socket_url("http://localhost:8080/"),
            "ws://localhost:8080/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            socket_url("https://posture.example.org"),
            "wss://posture.example.org/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            socket_url("10.0.0.5:8080"),
            "ws://10.0.0.5:8080/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn test_handle_event_filters() {
        let event = handle_event(
            EVENT_ANALYSIS_UPDATE,
            Some(json!({
                "diagnosis_sit": "good",
                "diagnosis_spine": "normal",
                "probability_sit": [0.7, 0.3],
                "probability_spine": [0.6, 0.3, 0.1],
                "timestamp": "2024-11-02T10:15:30+07:00",
                "saran": "Nice."
            })),
        )
        .unwrap();
        assert_eq!(event.origin, EventOrigin::Live);
        assert_eq!(event.advisory_text.as_deref(), Some("Nice."));

        assert!(handle_event(EVENT_ANALYSIS_UPDATE, Some(json!({"diagnosis_sit": "good"}))).is_none());
        assert!(handle_event(EVENT_ANALYSIS_UPDATE, None).is_none());
        assert!(handle_event(EVENT_ERROR, Some(json!({"message": "camera lost"}))).is_none());
        assert!(handle_event("something_else", None).is_none());
    }

    #[tokio::test]
    async fn test_open_handshake_and_delivery() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(Message::text(
                r#"0{"sid":"s1","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#,
            ))
            .await
            .unwrap();

            let connect = ws.next().await.unwrap().unwrap();
            assert_eq!(connect.to_text().unwrap(), "40");
            ws.send(Message::text(r#"40{"sid":"n1"}"#)).await.unwrap();

            let resync = ws.next().await.unwrap().unwrap();
            assert_eq!(resync.to_text().unwrap(), r#"42["request_analysis"]"#);

            ws.send(Message::text(
                r#"42["connection_response",{"message":"Connected to server"}]"#,
            ))
            .await
            .unwrap();
            ws.send(Message::text(
                r#"42["analysis_update",{"diagnosis_sit":"bad","diagnosis_spine":"lordosis","probability_sit":[0.2,0.8],"probability_spine":[0.1,0.85,0.05],"timestamp":"2024-11-02T10:15:31+07:00","saran":"Sit up."}]"#,
            ))
            .await
            .unwrap();
            ws.send(Message::text("41")).await.unwrap();
        });

        let connector = WebSocketConnector::new(&format!("http://{addr}"), true);
        let mut window = connector.open(CancellationToken::new()).await.unwrap();

        match window.recv().await {
            Some(Inbound::Update(event)) => {
                assert_eq!(event.sit_label, "bad");
                assert_eq!(event.spine_label, "lordosis");
                assert_eq!(event.sit_confidence, Some(0.8));
            }
            other => panic!("expected update, got {other:?}"),
        }
        assert!(matches!(window.recv().await, Some(Inbound::Closed(TransportError::Closed(_)))));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_open_surfaces_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(Message::text(r#"0{"sid":"s1","pingInterval":25000,"pingTimeout":20000}"#))
                .await
                .unwrap();
            let _ = ws.next().await;
            ws.send(Message::text(r#"44{"message":"namespace refused"}"#))
                .await
                .unwrap();
        });

        let connector = WebSocketConnector::new(&format!("http://{addr}"), false);
        let err = connector.open(CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, TransportError::Connect("namespace refused".into()));
    }

    #[tokio::test]
    async fn test_open_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = WebSocketConnector::new(&format!("http://{addr}"), true);
        assert!(matches!(
            connector.open(CancellationToken::new()).await,
            Err(TransportError::Connect(_))
        ));
    }
}
