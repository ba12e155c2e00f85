//! Wires the Gateway Session's dispatch callback to the Event Router and
//! owns both components' lifecycles.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::config::BridgeConfig;
use crate::gateway::{DispatchCallback, GatewayConfig, GatewaySession};
use crate::router::{EventRouter, RouterStats};

/// Owns the whole core: the Router and the Gateway Session. Starts bottom-up
/// (Router, then Session) and stops top-down (Session, then Router).
pub struct Supervisor {
    router: EventRouter,
    session: Arc<GatewaySession>,
    driver: Option<JoinHandle<()>>,
}

impl Supervisor {
    pub fn new(config: Arc<BridgeConfig>) -> Self {
        Self::build(config, None)
    }

    /// Same as [`Supervisor::new`] but connects to `url_override` instead of
    /// the real gateway — used by tests so they never touch the network.
    #[cfg(test)]
    pub(crate) fn new_with_url_override(config: Arc<BridgeConfig>, url_override: String) -> Self {
        Self::build(config, Some(url_override))
    }

    fn build(config: Arc<BridgeConfig>, url_override: Option<String>) -> Self {
        let router = EventRouter::new(Arc::clone(&config));
        let router_for_dispatch = router.clone();

        let gateway_config = GatewayConfig {
            token: config.discord.token.clone(),
            intents: config.discord.intents,
            url_override,
        };

        let dispatch: DispatchCallback = Arc::new(move |event_type: String, data: serde_json::Value| {
            let router = router_for_dispatch.clone();
            Box::pin(async move {
                router.handle_event(&event_type, data).await;
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });

        let session = GatewaySession::new(gateway_config, dispatch);

        Self {
            router,
            session,
            driver: None,
        }
    }

    /// Start the Router, then enter the Session's connect loop in a spawned
    /// task so `start()` itself returns once both are running.
    pub fn start(&mut self) {
        self.router.start();
        info!("supervisor starting gateway session");
        self.driver = Some(tokio::spawn(Arc::clone(&self.session).run()));
    }

    /// Stop the Session, await the connect-loop task to finish (bounded by
    /// the caller via a timeout if desired), stop the Router, and return the
    /// final statistics.
    pub async fn stop(&mut self) -> RouterStats {
        self.session.stop();

        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }

        self.router.stop();
        let stats = self.router.stats();
        info!(
            events_received = stats.events_received,
            events_forwarded = stats.events_forwarded,
            events_failed = stats.events_failed,
            routes_processed = stats.routes_processed,
            "final statistics"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiscordConfig, HttpConfig, LoggingConfig};

    fn config() -> Arc<BridgeConfig> {
        Arc::new(BridgeConfig {
            discord: DiscordConfig {
                token: "0123456789abcdef".to_string(),
                intents: 513,
            },
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
            routes: vec![],
        })
    }

    #[tokio::test]
    async fn start_then_immediate_stop_returns_zeroed_stats() {
        // Bind then drop a listener to get a port guaranteed to refuse the
        // connection immediately, so the gateway session's connect attempt
        // fails fast instead of touching the real network.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut supervisor =
            Supervisor::new_with_url_override(config(), format!("ws://{addr}"));
        supervisor.start();
        let stats = supervisor.stop().await;
        assert_eq!(stats.events_received, 0);
        assert_eq!(stats.routes_processed, 0);
    }
}
