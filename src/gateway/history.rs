use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::LifecycleGateway;
use crate::models::HistoricalSession;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "history";

use crate::{log_debug, log_warn};

/// Periodically refreshes the backend's session history. A failed poll keeps
/// the last good list.
pub struct HistoryPoller {
    latest: watch::Receiver<Vec<HistoricalSession>>,
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl HistoryPoller {
    pub fn spawn(gateway: Arc<dyn LifecycleGateway>, every: Duration) -> Self {
        let (tx, rx) = watch::channel(Vec::new());
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let fetched = tokio::select! {
                    _ = token.cancelled() => break,
                    fetched = gateway.fetch_history() => fetched,
                };

                match fetched {
                    Ok(sessions) => {
                        log_debug!("{} historical sessions", sessions.len());
                        tx.send_replace(sessions);
                    }
                    Err(err) => log_warn!("history poll failed: {}", err),
                }
            }
        });

        Self {
            latest: rx,
            cancel_token,
            handle: Some(handle),
        }
    }

    pub fn latest(&self) -> Vec<HistoricalSession> {
        self.latest.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<HistoricalSession>> {
        self.latest.clone()
    }

    pub async fn stop(mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for HistoryPoller {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
