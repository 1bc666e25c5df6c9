use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{LifecycleGateway, StartAck, StartAckWire, StopSummary};
use crate::error::LifecycleError;
use crate::models::HistoricalSession;
use crate::settings::GatewaySettings;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "gateway";

use crate::{log_debug, log_warn};

const START_PATH: &str = "/start_feed";
const STOP_PATH: &str = "/stop_feed";
const HISTORY_PATH: &str = "/get_streaming_history";

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error.or(b.message))
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.chars().take(200).collect())
        })
}

fn network_error(err: reqwest::Error) -> LifecycleError {
    LifecycleError::Network {
        message: err.to_string(),
        connect: err.is_connect(),
    }
}

pub struct HttpGateway {
    client: Client,
    base_url: String,
    max_attempts: u32,
    retry_delay: Duration,
}

impl HttpGateway {
    pub fn new(base_url: &str, settings: &GatewaySettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            max_attempts: settings.max_attempts.max(1),
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
    ) -> Result<T, LifecycleError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .request(method, &url)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        let body = response.text().await.map_err(network_error)?;

        if !status.is_success() {
            return Err(LifecycleError::Rejected {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        serde_json::from_str(&body)
            .map_err(|err| LifecycleError::InvalidResponse(format!("{path}: {err}")))
    }

    /// Fixed-delay retry. `should_retry` decides per error kind.
    async fn with_retry<T, F, Fut>(
        &self,
        operation: &str,
        should_retry: fn(&LifecycleError) -> bool,
        mut call: F,
    ) -> Result<T, LifecycleError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LifecycleError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && should_retry(&err) => {
                    log_warn!(
                        "{} attempt {}/{} failed: {}",
                        operation,
                        attempt,
                        self.max_attempts,
                        err
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl LifecycleGateway for HttpGateway {
    async fn start_feed(&self) -> Result<StartAck, LifecycleError> {
        // A POST that may have reached the backend is not repeated.
        let wire: StartAckWire = self
            .with_retry("start_feed", LifecycleError::never_sent, || {
                self.request(Method::POST, START_PATH)
            })
            .await?;
        log_debug!("start_feed acknowledged: {:?}", wire);
        Ok(wire.into())
    }

    async fn stop_feed(&self) -> Result<StopSummary, LifecycleError> {
        let summary: StopSummary = self
            .with_retry("stop_feed", LifecycleError::never_sent, || {
                self.request(Method::POST, STOP_PATH)
            })
            .await?;
        log_debug!("stop_feed acknowledged: {:?}", summary);
        Ok(summary)
    }

    async fn fetch_history(&self) -> Result<Vec<HistoricalSession>, LifecycleError> {
        self.with_retry("fetch_history", LifecycleError::is_retryable, || {
            self.request(Method::GET, HISTORY_PATH)
        })
        .await
    }
}
