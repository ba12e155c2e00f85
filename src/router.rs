//! Event routing: look up configured routes for a dispatch event and fan the
//! event out to every matched endpoint concurrently through the HTTP
//! Forwarder, aggregating delivery statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::config::BridgeConfig;
use crate::forwarder::HttpForwarder;

/// Snapshot of router statistics. Counters are monotonic between resets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub events_received: u64,
    pub events_forwarded: u64,
    pub events_failed: u64,
    pub routes_processed: u64,
}

#[derive(Default)]
struct Counters {
    events_received: AtomicU64,
    events_forwarded: AtomicU64,
    events_failed: AtomicU64,
    routes_processed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> RouterStats {
        RouterStats {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_forwarded: self.events_forwarded.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            routes_processed: self.routes_processed.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.events_received.store(0, Ordering::Relaxed);
        self.events_forwarded.store(0, Ordering::Relaxed);
        self.events_failed.store(0, Ordering::Relaxed);
        self.routes_processed.store(0, Ordering::Relaxed);
    }
}

/// Routes dispatch events to their configured HTTP sinks.
///
/// Cheap to clone: the forwarder, route table, and counters are all held
/// behind `Arc`, so a clone shares state with its origin (useful for handing
/// a copy to the gateway session as its dispatch callback).
#[derive(Clone)]
pub struct EventRouter {
    config: Arc<BridgeConfig>,
    forwarder: Arc<HttpForwarder>,
    counters: Arc<Counters>,
}

impl EventRouter {
    pub fn new(config: Arc<BridgeConfig>) -> Self {
        let forwarder = HttpForwarder::new(
            config.http.timeout,
            config.http.retry_attempts,
            config.http.retry_delay,
        );
        Self {
            config,
            forwarder: Arc::new(forwarder),
            counters: Arc::new(Counters::default()),
        }
    }

    /// No-op placeholder matching the Supervisor's bottom-up start sequence;
    /// the forwarder owns no background resources of its own to start.
    pub fn start(&self) {
        debug!("event router started");
    }

    /// No-op placeholder matching the Supervisor's top-down stop sequence.
    /// In-flight forwards are awaited by their own `handle_event` call, not
    /// by this method — there is no separate worker pool to drain.
    pub fn stop(&self) {
        debug!("event router stopped");
    }

    /// Route a single dispatch event to every enabled, matching endpoint.
    pub async fn handle_event(&self, event_type: &str, data: serde_json::Value) {
        self.counters.events_received.fetch_add(1, Ordering::Relaxed);

        let pairs: Vec<(String, String)> = self
            .config
            .routes_for_event(event_type)
            .into_iter()
            .flat_map(|route| {
                route
                    .endpoints
                    .iter()
                    .map(move |endpoint| (route.event_name.clone(), endpoint.clone()))
            })
            .collect();

        if pairs.is_empty() {
            return;
        }

        let tasks: Vec<_> = pairs
            .into_iter()
            .map(|(_event_name, endpoint)| {
                let forwarder = Arc::clone(&self.forwarder);
                let event_type = event_type.to_string();
                let data = data.clone();
                tokio::spawn(async move { forwarder.forward(&endpoint, &event_type, data).await })
            })
            .collect();

        let mut succeeded = 0u64;
        let mut failed = 0u64;
        for task in tasks {
            match task.await {
                Ok(true) => succeeded += 1,
                Ok(false) => failed += 1,
                Err(_) => failed += 1,
            }
        }

        self.counters
            .events_forwarded
            .fetch_add(succeeded, Ordering::Relaxed);
        self.counters.events_failed.fetch_add(failed, Ordering::Relaxed);
        self.counters.routes_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> RouterStats {
        self.counters.snapshot()
    }

    pub fn reset_stats(&self) {
        self.counters.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiscordConfig, EventRoute, HttpConfig, LoggingConfig};
    use axum::routing::post;
    use axum::Router as AxumRouter;

    fn config_with_routes(routes: Vec<EventRoute>) -> BridgeConfig {
        BridgeConfig {
            discord: DiscordConfig {
                token: "0123456789abcdef".to_string(),
                intents: 513,
            },
            http: HttpConfig {
                timeout: 5,
                retry_attempts: 1,
                retry_delay: 0,
            },
            logging: LoggingConfig::default(),
            routes,
        }
    }

    async fn spawn_always_ok() -> std::net::SocketAddr {
        let app = AxumRouter::new().route("/hook", post(|| async { axum::http::StatusCode::NO_CONTENT }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        addr
    }

    #[tokio::test]
    async fn handle_event_with_no_matching_route_is_a_noop() {
        let config = Arc::new(config_with_routes(vec![]));
        let router = EventRouter::new(config);
        router.handle_event("MESSAGE_CREATE", serde_json::json!({})).await;
        let stats = router.stats();
        assert_eq!(stats.events_received, 1);
        assert_eq!(stats.routes_processed, 0);
    }

    #[tokio::test]
    async fn handle_event_fans_out_and_aggregates_stats() {
        let addr = spawn_always_ok().await;
        let url = format!("http://{addr}/hook");
        let config = Arc::new(config_with_routes(vec![EventRoute {
            event_name: "MESSAGE_CREATE".to_string(),
            endpoints: vec![url.clone(), url],
            enabled: true,
        }]));
        let router = EventRouter::new(config);

        router
            .handle_event("MESSAGE_CREATE", serde_json::json!({"id": "1"}))
            .await;

        let stats = router.stats();
        assert_eq!(stats.events_received, 1);
        assert_eq!(stats.events_forwarded, 2);
        assert_eq!(stats.events_failed, 0);
        assert_eq!(stats.routes_processed, 1);
    }

    #[tokio::test]
    async fn disabled_routes_are_invisible() {
        let addr = spawn_always_ok().await;
        let url = format!("http://{addr}/hook");
        let config = Arc::new(config_with_routes(vec![EventRoute {
            event_name: "MESSAGE_CREATE".to_string(),
            endpoints: vec![url],
            enabled: false,
        }]));
        let router = EventRouter::new(config);

        router.handle_event("MESSAGE_CREATE", serde_json::json!({})).await;

        let stats = router.stats();
        assert_eq!(stats.routes_processed, 0);
    }

    #[tokio::test]
    async fn reset_stats_zeroes_all_counters() {
        let config = Arc::new(config_with_routes(vec![]));
        let router = EventRouter::new(config);
        router.handle_event("X", serde_json::json!({})).await;
        router.reset_stats();
        assert_eq!(router.stats(), RouterStats::default());
    }
}
