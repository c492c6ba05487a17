//! Delivery to the central system — spec.md §4.1/§6.
//!
//! Retry ladder and non-retryable-status handling mirror `mqk-broker-alpaca`'s
//! order-submission client: a fixed backoff ladder capped at its last rung,
//! with 4xx client errors (bad payload, bad auth) treated as terminal rather
//! than retried forever against an endpoint that will never accept them.

use anyhow::{anyhow, Result};
use pep_config::Secret;
use pep_ingress::IngressEventRequest;
use reqwest::StatusCode;
use std::time::Duration;

/// Backoff rungs spec.md §4.1 specifies for delivery retries: 10s, 30s,
/// 1min, 2min, 5min, then holds at 5min for any further attempt.
const RETRY_LADDER_SECS: &[u64] = &[10, 30, 60, 120, 300];

fn backoff_for_attempt(attempt: usize) -> Duration {
    let idx = attempt.min(RETRY_LADDER_SECS.len() - 1);
    Duration::from_secs(RETRY_LADDER_SECS[idx])
}

fn is_retryable(status: StatusCode) -> bool {
    !(status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED)
}

pub struct CentralClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Secret,
}

impl CentralClient {
    pub fn new(base_url: String, api_key: Secret, timeout: Duration, insecure: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(|e| anyhow!("build http client: {e}"))?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    /// `POST /api/v1/pep/events`. A 2xx response is success; a non-retryable
    /// 4xx is a terminal [`DeliveryError::Rejected`]; anything else
    /// (connection failure, 5xx, timeout) is [`DeliveryError::Transient`]
    /// and the caller should retry.
    async fn send_once(&self, event: &IngressEventRequest) -> Result<(), DeliveryError> {
        let url = format!("{}/api/v1/pep/events", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(&url)
            .bearer_auth(self.api_key.expose())
            .json(event)
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        let status = res.status();
        if status.is_success() {
            return Ok(());
        }

        let body = res.text().await.unwrap_or_default();
        if is_retryable(status) {
            Err(DeliveryError::Transient(format!("{status}: {body}")))
        } else {
            Err(DeliveryError::Rejected(format!("{status}: {body}")))
        }
    }

    /// Retry `send_once` against the backoff ladder until it succeeds, is
    /// rejected as terminal, or `shutdown` fires. Returns `Ok(true)` on
    /// delivery, `Ok(false)` if a shutdown interrupted the wait, and `Err`
    /// only on a terminal rejection — a caller that gets `Err` should treat
    /// the record the way it treats a parse failure (skip it, log it, move
    /// the watermark on) rather than retry indefinitely.
    pub async fn send_with_retry(
        &self,
        event: &IngressEventRequest,
        shutdown: &tokio::sync::Notify,
    ) -> Result<bool, DeliveryError> {
        let mut attempt = 0usize;
        loop {
            match self.send_once(event).await {
                Ok(()) => return Ok(true),
                Err(DeliveryError::Rejected(msg)) => {
                    tracing::error!(error = %msg, "central rejected event delivery, not retrying");
                    return Err(DeliveryError::Rejected(msg));
                }
                Err(DeliveryError::Transient(msg)) => {
                    let wait = backoff_for_attempt(attempt);
                    tracing::warn!(error = %msg, attempt, wait_secs = wait.as_secs(), "delivery failed, retrying");
                    attempt += 1;
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = shutdown.notified() => return Ok(false),
                    }
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("transient delivery failure: {0}")]
    Transient(String),
    #[error("central rejected event: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_ladder_climbs_then_holds() {
        assert_eq!(backoff_for_attempt(0), Duration::from_secs(10));
        assert_eq!(backoff_for_attempt(1), Duration::from_secs(30));
        assert_eq!(backoff_for_attempt(4), Duration::from_secs(300));
        assert_eq!(backoff_for_attempt(99), Duration::from_secs(300));
    }

    #[test]
    fn bad_request_and_unauthorized_are_not_retryable() {
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED));
        assert!(is_retryable(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
    }
}
