use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::{ChannelNotice, Connector, Inbound, RetryPolicy};

// Set to false to silence reconnect chatter
const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "channel";

use crate::{log_debug, log_error, log_info, log_warn};

enum WindowEnd {
    Cancelled,
    Dropped(String),
}

/// Connect/retry loop. `failures` counts consecutive failed opens and resets
/// on every successful connect, so each dropped window gets a full budget.
pub(super) async fn channel_loop(
    connector: Arc<dyn Connector>,
    policy: RetryPolicy,
    tx: mpsc::Sender<ChannelNotice>,
    cancel_token: CancellationToken,
) {
    let mut failures: u32 = 0;

    loop {
        let window_token = cancel_token.child_token();
        let opened = tokio::select! {
            _ = cancel_token.cancelled() => break,
            opened = connector.open(window_token.clone()) => opened,
        };

        let reason = match opened {
            Ok(window) => {
                failures = 0;
                log_info!("connected, new delivery window");
                if !forward(&tx, &cancel_token, ChannelNotice::Connected).await {
                    break;
                }
                let end = pump_window(window, &tx, &cancel_token).await;
                window_token.cancel();
                match end {
                    WindowEnd::Cancelled => break,
                    WindowEnd::Dropped(reason) => reason,
                }
            }
            Err(err) => {
                failures += 1;
                err.to_string()
            }
        };

        if failures >= policy.max_attempts {
            log_error!(
                "giving up after {} failed attempts: {}",
                failures,
                reason
            );
            forward(&tx, &cancel_token, ChannelNotice::ConnectionFailed { reason }).await;
            break;
        }

        let attempt = failures + 1;
        log_warn!(
            "disconnected ({}); attempt {}/{} in {}ms",
            reason,
            attempt,
            policy.max_attempts,
            policy.delay.as_millis()
        );
        let notice = ChannelNotice::Disconnected {
            reason,
            attempt,
            budget: policy.max_attempts,
        };
        if !forward(&tx, &cancel_token, notice).await {
            break;
        }

        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = sleep(policy.delay) => {}
        }
    }

    log_debug!("channel loop exited");
}

async fn pump_window(
    mut window: mpsc::Receiver<Inbound>,
    tx: &mpsc::Sender<ChannelNotice>,
    cancel_token: &CancellationToken,
) -> WindowEnd {
    loop {
        let item = tokio::select! {
            _ = cancel_token.cancelled() => return WindowEnd::Cancelled,
            item = window.recv() => item,
        };

        match item {
            Some(Inbound::Update(event)) => {
                if !forward(tx, cancel_token, ChannelNotice::Event(event)).await {
                    return WindowEnd::Cancelled;
                }
            }
            Some(Inbound::Closed(err)) => return WindowEnd::Dropped(err.to_string()),
            None => return WindowEnd::Dropped("transport dropped".into()),
        }
    }
}

/// False when the consumer is gone or the loop is being cancelled.
async fn forward(
    tx: &mpsc::Sender<ChannelNotice>,
    cancel_token: &CancellationToken,
    notice: ChannelNotice,
) -> bool {
    tokio::select! {
        _ = cancel_token.cancelled() => false,
        sent = tx.send(notice) => sent.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::EventChannel;
    use super::*;
    use crate::error::TransportError;
    use crate::models::{ClassificationEvent, EventOrigin};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    enum Step {
        Fail,
        /// Deliver items then drop the window.
        Window(Vec<Inbound>),
        /// Deliver items and keep the window open.
        Hold(Vec<Inbound>),
    }

    struct ScriptedConnector {
        steps: Mutex<VecDeque<Step>>,
        held: Mutex<Vec<mpsc::Sender<Inbound>>>,
        opens: AtomicUsize,
    }

    impl ScriptedConnector {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                held: Mutex::new(Vec::new()),
                opens: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn open(
            &self,
            _cancel: CancellationToken,
        ) -> Result<mpsc::Receiver<Inbound>, TransportError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Fail);
            let (items, hold) = match step {
                Step::Fail => return Err(TransportError::Connect("refused".into())),
                Step::Window(items) => (items, false),
                Step::Hold(items) => (items, true),
            };
            let (tx, rx) = mpsc::channel(16);
            for item in items {
                tx.send(item).await.unwrap();
            }
            if hold {
                self.held.lock().unwrap().push(tx);
            }
            Ok(rx)
        }
    }

    fn event(secs: i64) -> ClassificationEvent {
        ClassificationEvent {
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            sit_label: "good".into(),
            spine_label: "normal".into(),
            advisory_text: None,
            sit_confidence: Some(0.8),
            spine_confidence: Some(0.9),
            origin: EventOrigin::Live,
            hints: None,
        }
    }

    async fn drain(mut rx: mpsc::Receiver<ChannelNotice>) -> Vec<ChannelNotice> {
        let mut notices = Vec::new();
        while let Some(notice) = rx.recv().await {
            notices.push(notice);
        }
        notices
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_after_drop() {
        let connector = ScriptedConnector::new(vec![Step::Window(vec![
            Inbound::Update(event(1)),
            Inbound::Closed(TransportError::Closed("server restart".into())),
        ])]);
        let mut channel = EventChannel::new(
            connector.clone(),
            RetryPolicy::new(3, Duration::from_secs(2)),
        );

        let notices = drain(channel.connect().unwrap()).await;

        assert_eq!(notices[0], ChannelNotice::Connected);
        assert_eq!(notices[1], ChannelNotice::Event(event(1)));
        let attempts: Vec<u32> = notices
            .iter()
            .filter_map(|n| match n {
                ChannelNotice::Disconnected { attempt, budget: 3, .. } => Some(*attempt),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        assert!(matches!(
            notices.last(),
            Some(ChannelNotice::ConnectionFailed { reason }) if reason.contains("refused")
        ));
        // One window plus three failed reconnects.
        assert_eq!(connector.opens.load(Ordering::SeqCst), 4);

        channel.disconnect().await;
        assert!(!channel.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_reconnect_restores_budget() {
        let connector = ScriptedConnector::new(vec![
            Step::Fail,
            Step::Window(vec![]),
            Step::Fail,
            Step::Hold(vec![Inbound::Update(event(2))]),
        ]);
        let mut channel = EventChannel::new(
            connector.clone(),
            RetryPolicy::new(2, Duration::from_millis(500)),
        );
        let mut rx = channel.connect().unwrap();

        let mut seen = Vec::new();
        while let Some(notice) = rx.recv().await {
            let done = matches!(notice, ChannelNotice::Event(_));
            seen.push(notice);
            if done {
                break;
            }
        }

        assert!(matches!(seen[0], ChannelNotice::Disconnected { attempt: 2, .. }));
        assert_eq!(seen[1], ChannelNotice::Connected);
        assert!(matches!(&seen[2], ChannelNotice::Disconnected { reason, attempt: 1, .. } if reason == "transport dropped"));
        assert!(matches!(seen[3], ChannelNotice::Disconnected { attempt: 2, .. }));
        assert_eq!(seen[4], ChannelNotice::Connected);
        assert!(channel.is_active());

        channel.disconnect().await;
        assert!(!channel.is_active());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_interrupts_backoff() {
        let connector = ScriptedConnector::new(vec![]);
        let mut channel = EventChannel::new(
            connector.clone(),
            RetryPolicy::new(10, Duration::from_secs(3600)),
        );
        let mut rx = channel.connect().unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(ChannelNotice::Disconnected { attempt: 2, .. })
        ));

        channel.disconnect().await;
        channel.disconnect().await;
        assert!(rx.recv().await.is_none());
        assert_eq!(connector.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected_until_loop_ends() {
        let connector = ScriptedConnector::new(vec![Step::Hold(vec![])]);
        let mut channel =
            EventChannel::new(connector, RetryPolicy::new(1, Duration::from_millis(10)));
        let _rx = channel.connect().unwrap();
        assert!(channel.connect().is_err());

        channel.disconnect().await;
        assert!(channel.connect().is_ok());
        channel.disconnect().await;
    }
}
