use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::Utc;
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
    time,
};

use super::snapshot::SessionSnapshot;
use super::state::{EventOutcome, SessionState};
use crate::channel::{ChannelNotice, Connector, EventChannel, RetryPolicy, WebSocketConnector};
use crate::error::{LifecycleError, SessionResult};
use crate::gateway::{HistoryPoller, HttpGateway, LifecycleGateway};
use crate::models::{HistoricalSession, SessionReport};
use crate::settings::Settings;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "controller";

use crate::{log_debug, log_info, log_warn};

/// Async owner of the session.
///
/// Every mutation goes through `state`. `lifecycle` queues start and stop so
/// at most one gateway call is outstanding. Channel notices are tagged with
/// the generation they were opened under and dropped once it is superseded.
#[derive(Clone)]
pub struct SessionController {
    state: Arc<Mutex<SessionState>>,
    lifecycle: Arc<Mutex<()>>,
    gateway: Arc<dyn LifecycleGateway>,
    channel: Arc<Mutex<EventChannel>>,
    pump: Arc<Mutex<Option<JoinHandle<()>>>>,
    ticker: Arc<Mutex<Option<JoinHandle<()>>>>,
    snapshot_tx: Arc<watch::Sender<SessionSnapshot>>,
    tick_interval: Duration,
    heartbeat_every_ticks: u32,
}

impl SessionController {
    pub fn new(
        gateway: Arc<dyn LifecycleGateway>,
        connector: Arc<dyn Connector>,
        settings: &Settings,
    ) -> Self {
        let state = SessionState::new(&settings.labels);
        let (snapshot_tx, _) = watch::channel(state.snapshot(Utc::now()));

        Self {
            state: Arc::new(Mutex::new(state)),
            lifecycle: Arc::new(Mutex::new(())),
            gateway,
            channel: Arc::new(Mutex::new(EventChannel::new(
                connector,
                RetryPolicy::from(&settings.channel),
            ))),
            pump: Arc::new(Mutex::new(None)),
            ticker: Arc::new(Mutex::new(None)),
            snapshot_tx: Arc::new(snapshot_tx),
            tick_interval: settings.tick_interval(),
            heartbeat_every_ticks: if settings.debug { 1 } else { 10 },
        }
    }

    /// Wires the HTTP gateway and websocket connector for `settings.backend_url`.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let gateway = HttpGateway::new(&settings.backend_url, &settings.gateway)?;
        let connector =
            WebSocketConnector::new(&settings.backend_url, settings.channel.resync_on_connect);
        log_info!(
            "backend {} (events via {})",
            settings.backend_url,
            connector.url()
        );
        Ok(Self::new(Arc::new(gateway), Arc::new(connector), settings))
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().await.snapshot(Utc::now())
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub async fn start_session(&self) -> SessionResult<SessionSnapshot> {
        let _lifecycle = self.lifecycle.lock().await;

        let generation = {
            let mut state = self.state.lock().await;
            let generation = state.begin_start()?;
            publish(&self.snapshot_tx, &state);
            generation
        };

        // The previous session's transport must be gone before the new one opens.
        self.release_transport().await;

        let outcome = self.gateway.start_feed().await;

        let mut state = self.state.lock().await;
        match outcome {
            Ok(ack) => {
                state.complete_start(generation, Utc::now(), &ack)?;

                match self.channel.lock().await.connect() {
                    Ok(notices) => self.spawn_pump(generation, notices).await,
                    Err(err) => log_warn!("event channel not opened: {}", err),
                }
                self.spawn_ticker(generation).await;

                publish(&self.snapshot_tx, &state);
                Ok(state.snapshot(Utc::now()))
            }
            Err(err) => {
                log_warn!("start_feed failed: {}", err);
                state.fail_start(generation, &err)?;
                publish(&self.snapshot_tx, &state);
                Err(err.into())
            }
        }
    }

    pub async fn stop_session(&self) -> SessionResult<SessionReport> {
        let _lifecycle = self.lifecycle.lock().await;

        let generation = {
            let mut state = self.state.lock().await;
            let generation = state.begin_stop()?;
            publish(&self.snapshot_tx, &state);
            generation
        };
        // A stop retried from Errored finds the ticker already gone.
        self.spawn_ticker(generation).await;

        let outcome = self.gateway.stop_feed().await;

        let result = {
            let mut state = self.state.lock().await;
            let result = match outcome {
                Ok(summary) => state.complete_stop(generation, Utc::now(), &summary),
                Err(err @ LifecycleError::InvalidResponse(_)) => {
                    log_warn!("stop_feed reply unusable: {}", err);
                    state.fault_stop(generation, &err)?;
                    Err(err.into())
                }
                Err(err) => {
                    log_warn!("stop_feed failed, session continues: {}", err);
                    state.fail_stop(generation, &err)?;
                    Err(err.into())
                }
            };
            publish(&self.snapshot_tx, &state);
            result
        };

        if let Ok(report) = &result {
            log_info!(
                "session {} stopped after {} ({:?} statistics)",
                report.id,
                report.elapsed_formatted,
                report.statistics_source
            );
            self.release_transport().await;
        }
        result
    }

    /// Resets to Idle without waiting for an outstanding start or stop; its
    /// completion will arrive stale and be discarded.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock().await;
            state.teardown();
            publish(&self.snapshot_tx, &state);
        }
        self.release_transport().await;
        log_info!("controller torn down");
    }

    pub async fn history(&self) -> SessionResult<Vec<HistoricalSession>> {
        Ok(self.gateway.fetch_history().await?)
    }

    pub fn history_poller(&self, every: Duration) -> HistoryPoller {
        HistoryPoller::spawn(self.gateway.clone(), every)
    }

    /// Applies one channel notice opened under `generation`.
    pub async fn handle_notice(&self, generation: u64, notice: ChannelNotice) {
        apply_notice(&self.state, &self.snapshot_tx, generation, notice).await;
    }

    async fn spawn_pump(&self, generation: u64, mut notices: mpsc::Receiver<ChannelNotice>) {
        let mut pump_guard = self.pump.lock().await;
        if let Some(handle) = pump_guard.take() {
            handle.abort();
        }

        let state = self.state.clone();
        let snapshot_tx = self.snapshot_tx.clone();

        let handle = tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                apply_notice(&state, &snapshot_tx, generation, notice).await;
            }
            log_debug!("notice pump for generation {} finished", generation);
        });

        *pump_guard = Some(handle);
    }

    async fn spawn_ticker(&self, generation: u64) {
        let mut ticker_guard = self.ticker.lock().await;
        if let Some(handle) = ticker_guard.take() {
            handle.abort();
        }

        let state = self.state.clone();
        let snapshot_tx = self.snapshot_tx.clone();
        let tick_interval = self.tick_interval;
        let heartbeat_every = self.heartbeat_every_ticks.max(1);

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            // First tick completes immediately.
            interval.tick().await;
            let mut ticks: u32 = 0;
            loop {
                interval.tick().await;

                let snapshot = {
                    let guard = state.lock().await;
                    if guard.generation() != generation || !guard.is_running() {
                        break;
                    }
                    let snapshot = guard.snapshot(Utc::now());
                    snapshot_tx.send_replace(snapshot.clone());
                    snapshot
                };

                ticks = ticks.wrapping_add(1);
                if ticks % heartbeat_every == 0 {
                    log_debug!("heartbeat: {}", snapshot.status_line());
                }
            }
        });

        *ticker_guard = Some(handle);
    }

    async fn cancel_ticker(&self) {
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
    }

    async fn release_transport(&self) {
        self.cancel_ticker().await;
        self.channel.lock().await.disconnect().await;
        if let Some(handle) = self.pump.lock().await.take() {
            handle.abort();
        }
    }
}

fn publish(snapshot_tx: &watch::Sender<SessionSnapshot>, state: &SessionState) {
    snapshot_tx.send_replace(state.snapshot(Utc::now()));
}

async fn apply_notice(
    state: &Mutex<SessionState>,
    snapshot_tx: &watch::Sender<SessionSnapshot>,
    generation: u64,
    notice: ChannelNotice,
) {
    let mut state = state.lock().await;
    if state.generation() != generation {
        log_debug!(
            "dropping notice from generation {} (current {})",
            generation,
            state.generation()
        );
        return;
    }

    let changed = match notice {
        ChannelNotice::Connected => state.channel_connected(),
        ChannelNotice::Disconnected {
            reason,
            attempt,
            budget,
        } => state.channel_disconnected(reason, attempt, budget),
        ChannelNotice::Event(event) => match state.apply_event(&event) {
            Ok(EventOutcome::Folded | EventOutcome::Refreshed) => true,
            Ok(EventOutcome::Duplicate | EventOutcome::Ignored) => false,
            Err(err) => {
                log_warn!("rejected event at {}: {}", event.timestamp, err);
                false
            }
        },
        ChannelNotice::ConnectionFailed { reason } => state.channel_failed(reason),
    };

    if changed {
        publish(snapshot_tx, &state);
    }
}
