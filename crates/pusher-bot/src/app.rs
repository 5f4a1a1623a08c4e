//! Main application orchestration.
//!
//! Coordinates all components:
//! - Price service WebSocket subscription feeding the shared feed cache
//! - Subscription health monitoring
//! - One scheduler task per configured chain
//! - Optional metrics endpoint

use crate::config::{AdapterKind, AppConfig, ChainConfig};
use crate::error::{AppError, AppResult};
use pusher_core::{ChainId, DynChainAdapter, FeedId};
use pusher_detector::DecisionEngine;
use pusher_executor::{ChainScheduler, SimulatedChainAdapter};
use pusher_feed::{FeedCache, FeedCacheHandle, FeedHealthMonitor, FeedIngestor, HealthTransition};
use pusher_telemetry::Metrics;
use pusher_ws::{ConnectionManager, ConnectionState, RpcPriceFeed};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How often subscription health is evaluated.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// How long shutdown waits for each background task.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffered price updates between the WebSocket client and the ingestor.
const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// Which configured chains to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainSelection {
    All,
    Kind(AdapterKind),
    One(String),
}

impl ChainSelection {
    fn matches(&self, chain: &ChainConfig) -> bool {
        match self {
            ChainSelection::All => true,
            ChainSelection::Kind(kind) => chain.adapter_kind().is_ok_and(|k| k == *kind),
            ChainSelection::One(id) => chain.chain_id == *id,
        }
    }
}

/// Main application.
pub struct Application {
    config: AppConfig,
    cache: FeedCacheHandle,
    health: Arc<FeedHealthMonitor>,
    shutdown: CancellationToken,
    metrics_port: Option<u16>,
}

impl Application {
    /// Create a new application from a validated configuration.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        let health = Arc::new(FeedHealthMonitor::new(config.price_service.stale_grace_period()));
        let metrics_port = config
            .telemetry
            .enable_metrics
            .then_some(config.telemetry.metrics_port);

        Ok(Self {
            config,
            cache: FeedCache::new_shared(),
            health,
            shutdown: CancellationToken::new(),
            metrics_port,
        })
    }

    /// Serve `/metrics` on `port` (overrides the config file).
    #[must_use]
    pub fn with_metrics_port(mut self, port: Option<u16>) -> Self {
        if port.is_some() {
            self.metrics_port = port;
        }
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cache(&self) -> FeedCacheHandle {
        Arc::clone(&self.cache)
    }

    /// Subscription health shared with the monitor task.
    pub fn health(&self) -> Arc<FeedHealthMonitor> {
        Arc::clone(&self.health)
    }

    /// Cancelling this token stops the application.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Construct the adapter for one chain.
    pub fn build_adapter(chain: &ChainConfig) -> AppResult<DynChainAdapter> {
        match chain.adapter_kind()? {
            AdapterKind::Simulated => Ok(Arc::new(SimulatedChainAdapter::new(
                ChainId::new(chain.chain_id.clone()),
                Duration::from_millis(chain.simulated.confirmation_latency_ms),
                chain.simulated.initial_balance,
                chain.simulated.fee_per_update,
            ))),
        }
    }

    /// Build a scheduler for every selected chain using `adapter_for`.
    pub fn build_schedulers<F>(
        &self,
        selection: &ChainSelection,
        mut adapter_for: F,
    ) -> AppResult<Vec<ChainScheduler>>
    where
        F: FnMut(&ChainConfig) -> AppResult<DynChainAdapter>,
    {
        let engine = DecisionEngine::new(self.config.decision.clone());
        let mut schedulers = Vec::new();
        for chain in self.config.chains.iter().filter(|c| selection.matches(c)) {
            let adapter = adapter_for(chain)?;
            if adapter.chain_id().as_str() != chain.chain_id {
                return Err(AppError::Config(format!(
                    "adapter for chain {} reports chain id {}",
                    chain.chain_id,
                    adapter.chain_id()
                )));
            }
            schedulers.push(ChainScheduler::new(
                adapter,
                chain.target(),
                chain.retry.clone(),
                chain.scheduler_config(),
                self.config.feeds_for(chain)?,
                self.cache(),
                engine.clone(),
            ));
        }

        if schedulers.is_empty() {
            return Err(AppError::Config(format!("no configured chain matches {selection:?}")));
        }
        Ok(schedulers)
    }

    /// Run the selected chains with their configured adapters until Ctrl-C.
    pub async fn run(self, selection: ChainSelection) -> AppResult<()> {
        let schedulers = self.build_schedulers(&selection, Self::build_adapter)?;
        self.run_with(schedulers).await
    }

    /// Run `schedulers` together with the price subscription until shutdown.
    pub async fn run_with(self, schedulers: Vec<ChainScheduler>) -> AppResult<()> {
        info!(
            chains = ?schedulers.iter().map(|s| s.chain_id().to_string()).collect::<Vec<_>>(),
            feeds = self.config.feeds.len(),
            "Starting price pusher"
        );

        let metrics_handle = self.metrics_port.map(|port| {
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = pusher_telemetry::run_metrics_server(port, shutdown).await {
                    error!(error = %e, "Metrics server failed");
                }
            })
        });

        // Subscription -> ingestor -> cache.
        let (update_tx, update_rx) = mpsc::channel::<RpcPriceFeed>(UPDATE_CHANNEL_CAPACITY);
        let connection = Arc::new(ConnectionManager::with_shutdown_token(
            self.config.price_service.connection_config(&self.config.feeds),
            update_tx,
            self.shutdown.child_token(),
        ));
        let ws_handle = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move {
                match connection.run().await {
                    Ok(()) => info!("Price service client stopped"),
                    Err(e) => error!(error = %e, "Price service client terminated"),
                }
            })
        };

        let aliases: HashMap<FeedId, String> = self
            .config
            .feeds
            .iter()
            .map(|f| (f.feed_id, f.alias.clone()))
            .collect();
        let ingestor = FeedIngestor::new(self.cache(), Arc::clone(&self.health), aliases);
        let ingest_handle = tokio::spawn(ingestor.run(update_rx, self.shutdown.clone()));

        let health_handle = tokio::spawn(monitor_health(
            Arc::clone(&self.health),
            Arc::clone(&connection),
            self.shutdown.clone(),
        ));

        let chain_handles: Vec<(String, JoinHandle<()>)> = schedulers
            .into_iter()
            .map(|s| {
                let chain = s.chain_id().to_string();
                (chain, tokio::spawn(s.run(self.shutdown.clone())))
            })
            .collect();

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Shutdown signal received"),
                    Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
                }
            }
            () = self.shutdown.cancelled() => info!("Shutdown requested"),
        }
        self.shutdown.cancel();

        for (chain, handle) in chain_handles {
            join_with_timeout(&chain, handle).await;
        }
        join_with_timeout("price-service", ws_handle).await;
        join_with_timeout("ingestor", ingest_handle).await;
        join_with_timeout("health", health_handle).await;
        if let Some(handle) = metrics_handle {
            join_with_timeout("metrics", handle).await;
        }

        if let Err(e) = self.health.ensure_fresh() {
            warn!(error = %e, "Stopped while the feed cache was stale");
        }
        info!("Price pusher stopped");
        Ok(())
    }
}

/// Export subscription health and connection state until shutdown.
async fn monitor_health(
    health: Arc<FeedHealthMonitor>,
    connection: Arc<ConnectionManager>,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
    let mut last_state = ConnectionState::Disconnected;
    Metrics::feed_cache_stale(false);
    Metrics::price_service_connected(false);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = interval.tick() => {
                match health.evaluate() {
                    HealthTransition::BecameStale { .. } => Metrics::feed_cache_stale(true),
                    HealthTransition::Recovered => Metrics::feed_cache_stale(false),
                    HealthTransition::Unchanged => {}
                }

                let state = connection.state();
                if state != last_state {
                    Metrics::price_service_connected(state == ConnectionState::Connected);
                    if last_state == ConnectionState::Connected {
                        Metrics::price_service_reconnect("disconnected");
                    }
                    last_state = state;
                }
            }
        }
    }
    Metrics::price_service_connected(false);
}

async fn join_with_timeout(name: &str, handle: JoinHandle<()>) {
    match tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(task = name, error = %e, "Task panicked"),
        Err(_) => warn!(task = name, "Task did not stop in time"),
    }
}
