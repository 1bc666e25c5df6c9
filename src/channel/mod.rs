// Push transport to the inference backend
//
// `EventChannel` owns one background loop at a time. The loop opens delivery
// windows through a `Connector`, forwards classification events, and retries
// with a fixed delay when a window drops. Nothing is buffered across windows.

mod codec;
mod loop_worker;
mod websocket;

pub use codec::{decode, encode, Packet};
pub use websocket::{socket_url, WebSocketConnector};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::info;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::models::ClassificationEvent;
use crate::settings::ChannelSettings;

use loop_worker::channel_loop;

const NOTICE_BUFFER: usize = 256;

/// What the channel reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelNotice {
    Connected,
    /// The window dropped or an attempt failed; `attempt` is the retry about to run.
    Disconnected {
        reason: String,
        attempt: u32,
        budget: u32,
    },
    Event(ClassificationEvent),
    /// Retry budget exhausted. The loop has stopped.
    ConnectionFailed { reason: String },
}

/// Items delivered by one open window.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Update(ClassificationEvent),
    Closed(TransportError),
}

/// Opens delivery windows. A window ends when its receiver yields
/// `Inbound::Closed` or is dropped by the sender side.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<Inbound>, TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl From<&ChannelSettings> for RetryPolicy {
    fn from(settings: &ChannelSettings) -> Self {
        Self::new(settings.reconnect_attempts, settings.reconnect_delay())
    }
}

pub struct EventChannel {
    connector: Arc<dyn Connector>,
    policy: RetryPolicy,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl EventChannel {
    pub fn new(connector: Arc<dyn Connector>, policy: RetryPolicy) -> Self {
        Self {
            connector,
            policy,
            handle: None,
            cancel_token: None,
        }
    }

    /// True while the background loop is alive (connected or retrying).
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Starts a fresh loop and returns its notice stream.
    ///
    /// A loop that gave up after `ConnectionFailed` is replaced; a live one is
    /// an error.
    pub fn connect(&mut self) -> Result<mpsc::Receiver<ChannelNotice>, TransportError> {
        if self.is_active() {
            return Err(TransportError::Connect("channel already active".into()));
        }
        self.handle = None;
        self.cancel_token = None;

        let cancel_token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(NOTICE_BUFFER);

        let handle = tokio::spawn(channel_loop(
            self.connector.clone(),
            self.policy,
            tx,
            cancel_token.clone(),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(rx)
    }

    /// Stops the loop and waits for it. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    log::error!("channel loop task failed to join: {err}");
                }
            }
            info!("event channel disconnected");
        }
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
    }
}
