//! HTTP fan-out delivery to a single operator-configured endpoint.
//!
//! Retry policy is deliberately simple: fixed delay, uniform treatment of
//! every status `>= 400`. Sinks are opaque operator receivers; branching on
//! status code would encode assumptions this bridge cannot verify.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use crate::types::ForwardedEnvelope;

const USER_AGENT: &str = concat!("discord-bridge/", env!("CARGO_PKG_VERSION"));

#[derive(Debug)]
pub enum ForwardError {
    Transport(reqwest::Error),
    Timeout,
}

impl std::fmt::Display for ForwardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForwardError::Transport(e) => write!(f, "transport error: {e}"),
            ForwardError::Timeout => write!(f, "request timed out"),
        }
    }
}

impl std::error::Error for ForwardError {}

/// Delivers envelopes to a single HTTP sink with bounded retries.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: Client,
    timeout: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl HttpForwarder {
    pub fn new(timeout_secs: u64, retry_attempts: u32, retry_delay_secs: u64) -> Self {
        Self {
            client: Client::new(),
            timeout: Duration::from_secs(timeout_secs),
            retry_attempts: retry_attempts.max(1),
            retry_delay: Duration::from_secs(retry_delay_secs),
        }
    }

    /// POST the envelope for `(event_type, data)` to `endpoint`, retrying up
    /// to `retry_attempts` times. Returns `true` iff any attempt received a
    /// status `< 400`.
    pub async fn forward(&self, endpoint: &str, event_type: &str, data: serde_json::Value) -> bool {
        let envelope = ForwardedEnvelope::new(event_type, data);

        for attempt in 1..=self.retry_attempts {
            match self.attempt(endpoint, &envelope).await {
                Ok(status) if status < 400 => {
                    debug!(endpoint, attempt, status, "forward succeeded");
                    return true;
                }
                Ok(status) => {
                    warn!(endpoint, attempt, status, "forward received failure status");
                }
                Err(e) => {
                    warn!(endpoint, attempt, error = %e, "forward attempt failed");
                }
            }

            if attempt < self.retry_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        false
    }

    async fn attempt(&self, endpoint: &str, envelope: &ForwardedEnvelope) -> Result<u16, ForwardError> {
        let send = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/json")
            .header("User-Agent", USER_AGENT)
            .json(envelope)
            .send();

        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| ForwardError::Timeout)?
            .map_err(ForwardError::Transport)?;

        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::Router;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    async fn spawn_server(
        statuses: Vec<u16>,
    ) -> (SocketAddr, Arc<AtomicU32>) {
        let counter = Arc::new(AtomicU32::new(0));
        let statuses = Arc::new(statuses);
        let counter_clone = counter.clone();

        let app = Router::new().route(
            "/hook",
            post(move || {
                let counter = counter_clone.clone();
                let statuses = statuses.clone();
                async move {
                    let idx = counter.fetch_add(1, Ordering::SeqCst) as usize;
                    let status = statuses.get(idx).copied().unwrap_or(500);
                    axum::http::StatusCode::from_u16(status).unwrap()
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (addr, counter)
    }

    #[tokio::test]
    async fn short_circuits_on_first_success() {
        let (addr, counter) = spawn_server(vec![204]).await;
        let forwarder = HttpForwarder::new(5, 3, 1);
        let url = format!("http://{addr}/hook");

        let ok = forwarder
            .forward(&url, "MESSAGE_CREATE", serde_json::json!({"id": "1"}))
            .await;

        assert!(ok);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let (addr, counter) = spawn_server(vec![500, 500, 204]).await;
        let forwarder = HttpForwarder::new(5, 3, 0);
        let url = format!("http://{addr}/hook");

        let ok = forwarder
            .forward(&url, "MESSAGE_CREATE", serde_json::json!({}))
            .await;

        assert!(ok);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_retries_and_reports_failure() {
        let (addr, counter) = spawn_server(vec![500, 500, 500]).await;
        let forwarder = HttpForwarder::new(5, 3, 0);
        let url = format!("http://{addr}/hook");

        let ok = forwarder
            .forward(&url, "MESSAGE_CREATE", serde_json::json!({}))
            .await;

        assert!(!ok);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn treats_4xx_same_as_5xx() {
        let (addr, counter) = spawn_server(vec![404, 404]).await;
        let forwarder = HttpForwarder::new(5, 2, 0);
        let url = format!("http://{addr}/hook");

        let ok = forwarder
            .forward(&url, "MESSAGE_CREATE", serde_json::json!({}))
            .await;

        assert!(!ok);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
