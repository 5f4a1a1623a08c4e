//! Application configuration.

use crate::error::{AppError, AppResult};
use pusher_core::{ChainId, ChainTarget, FeedId, PriceFeedConfig};
use pusher_detector::DecisionPolicy;
use pusher_executor::{RetryPolicy, SchedulerConfig};
use pusher_ws::ConnectionConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Default config location when neither `--config` nor `PUSHER_CONFIG` is set.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

// ============================================================================
// Price service
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceServiceConfig {
    /// WebSocket endpoint of the price service.
    pub endpoint: String,
    /// Flag the feed cache stale after this much silence.
    #[serde(default = "default_stale_grace_period_sec")]
    pub stale_grace_period_sec: u64,
    /// Maximum reconnection attempts (0 = infinite).
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
}

fn default_stale_grace_period_sec() -> u64 {
    60
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

impl Default for PriceServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://hermes.pyth.network/ws".to_string(),
            stale_grace_period_sec: default_stale_grace_period_sec(),
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

impl PriceServiceConfig {
    pub fn stale_grace_period(&self) -> Duration {
        Duration::from_secs(self.stale_grace_period_sec)
    }

    /// Connection settings subscribing to `feeds`.
    pub fn connection_config(&self, feeds: &[PriceFeedConfig]) -> ConnectionConfig {
        ConnectionConfig {
            url: self.endpoint.clone(),
            feed_ids: feeds.iter().map(|f| f.feed_id.to_string()).collect(),
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_base_delay_ms: self.reconnect_base_delay_ms,
            reconnect_max_delay_ms: self.reconnect_max_delay_ms,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            heartbeat_timeout_ms: self.heartbeat_timeout_ms,
            ..ConnectionConfig::default()
        }
    }
}

// ============================================================================
// Chains
// ============================================================================

/// Chain adapter implementations available to the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    /// In-memory chain for dry runs.
    Simulated,
}

impl AdapterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Simulated => "simulated",
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdapterKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simulated" => Ok(AdapterKind::Simulated),
            other => Err(AppError::Config(format!("unknown adapter kind: {other}"))),
        }
    }
}

/// Settings for `adapter = "simulated"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedChainConfig {
    /// Time from submission to confirmation.
    #[serde(default = "default_confirmation_latency_ms")]
    pub confirmation_latency_ms: u64,
    #[serde(default = "default_initial_balance")]
    pub initial_balance: Decimal,
    /// Native-unit cost of publishing one feed at fee multiplier 1.
    #[serde(default = "default_fee_per_update")]
    pub fee_per_update: Decimal,
}

fn default_confirmation_latency_ms() -> u64 {
    2_000
}

fn default_initial_balance() -> Decimal {
    Decimal::new(10, 0)
}

fn default_fee_per_update() -> Decimal {
    Decimal::new(1, 3)
}

impl Default for SimulatedChainConfig {
    fn default() -> Self {
        Self {
            confirmation_latency_ms: default_confirmation_latency_ms(),
            initial_balance: default_initial_balance(),
            fee_per_update: default_fee_per_update(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: String,
    /// Adapter implementation, see [`AdapterKind`].
    pub adapter: String,
    /// Feed aliases or ids pushed to this chain. Empty = every configured feed.
    #[serde(default)]
    pub feeds: Vec<String>,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: u32,
    #[serde(default = "default_confirmation_timeout_sec")]
    pub confirmation_timeout_sec: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Tick interval ceiling while the chain is unreachable.
    #[serde(default = "default_max_tick_backoff_ms")]
    pub max_tick_backoff_ms: u64,
    /// Timeout for on-chain reads (distinct from the confirmation timeout).
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Wallet balance polling; omit to disable.
    #[serde(default)]
    pub balance_poll_interval_sec: Option<u64>,
    #[serde(flatten)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub simulated: SimulatedChainConfig,
}

fn default_max_batch_size() -> u32 {
    10
}

fn default_confirmation_timeout_sec() -> u32 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_tick_interval_ms() -> u64 {
    1_000
}

fn default_max_tick_backoff_ms() -> u64 {
    30_000
}

fn default_read_timeout_ms() -> u64 {
    5_000
}

impl ChainConfig {
    pub fn adapter_kind(&self) -> AppResult<AdapterKind> {
        self.adapter.parse()
    }

    pub fn target(&self) -> ChainTarget {
        ChainTarget {
            chain_id: ChainId::new(self.chain_id.clone()),
            max_batch_size: self.max_batch_size,
            confirmation_timeout_sec: self.confirmation_timeout_sec,
            max_retries: self.max_retries,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            max_tick_backoff: Duration::from_millis(self.max_tick_backoff_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            balance_poll_interval: self.balance_poll_interval_sec.map(Duration::from_secs),
        }
    }
}

// ============================================================================
// Telemetry
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Serve `/metrics` over HTTP.
    #[serde(default)]
    pub enable_metrics: bool,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Used when neither `RUST_LOG` nor `--log-level` is given.
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            metrics_port: default_metrics_port(),
            log_level: None,
        }
    }
}

// ============================================================================
// AppConfig
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub price_service: PriceServiceConfig,
    #[serde(default)]
    pub decision: DecisionPolicy,
    #[serde(default)]
    pub feeds: Vec<PriceFeedConfig>,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Reject every configuration the daemon cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        if self.feeds.is_empty() {
            return Err(AppError::Config("no feeds configured".to_string()));
        }

        let mut feed_ids = HashSet::new();
        let mut aliases = HashSet::new();
        for feed in &self.feeds {
            feed.validate()?;
            if !feed_ids.insert(feed.feed_id) {
                return Err(AppError::Config(format!("duplicate feed id {}", feed.feed_id)));
            }
            if !aliases.insert(feed.alias.as_str()) {
                return Err(AppError::Config(format!("duplicate feed alias {}", feed.alias)));
            }
        }

        self.decision.validate()?;

        if self.chains.is_empty() {
            return Err(AppError::Config("no chains configured".to_string()));
        }
        let mut chain_ids = HashSet::new();
        for chain in &self.chains {
            if !chain_ids.insert(chain.chain_id.as_str()) {
                return Err(AppError::Config(format!("duplicate chain id {}", chain.chain_id)));
            }
            chain.adapter_kind()?;
            chain.target().validate()?;
            chain
                .retry
                .validate()
                .map_err(|e| AppError::Config(format!("chain {}: {e}", chain.chain_id)))?;
            chain
                .scheduler_config()
                .validate()
                .map_err(|e| AppError::Config(format!("chain {}: {e}", chain.chain_id)))?;
            self.feeds_for(chain)?;
        }
        Ok(())
    }

    /// Resolve a chain's feed list against the configured feeds.
    pub fn feeds_for(&self, chain: &ChainConfig) -> AppResult<Vec<PriceFeedConfig>> {
        if chain.feeds.is_empty() {
            return Ok(self.feeds.clone());
        }

        chain
            .feeds
            .iter()
            .map(|name| {
                let by_id = FeedId::from_hex(name).ok();
                self.feeds
                    .iter()
                    .find(|f| f.alias == *name || Some(f.feed_id) == by_id)
                    .cloned()
                    .ok_or_else(|| {
                        AppError::Config(format!(
                            "chain {} references unknown feed {name}",
                            chain.chain_id
                        ))
                    })
            })
            .collect()
    }

    pub fn chain(&self, chain_id: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pusher_detector::{CheckOrder, ConfidenceMode};
    use rust_decimal_macros::dec;

    const BTC: &str = "e62df6c8b4a85fe1a67db44dc12de5db330f7ac66b72dc658afedf0f4a415b43";
    const ETH: &str = "ff61491a931112ddf1bd8147cd1b641375f79f5825126d665480874634fd0ace";

    fn sample() -> String {
        format!(
            r#"
[price_service]
endpoint = "ws://127.0.0.1:9000/ws"
stale_grace_period_sec = 30

[decision]
confidence_mode = "suppress"
starvation_override_sec = 3600
check_order = "deviation_first"

[[feeds]]
id = "0x{BTC}"
alias = "BTC/USD"
time_difference_sec = 60
price_deviation_bps = 50
confidence_ratio_bps = 200

[[feeds]]
id = "{ETH}"
alias = "ETH/USD"
time_difference_sec = 60
price_deviation_bps = 100
confidence_ratio_bps = 200

[[chains]]
chain_id = "sim-a"
adapter = "simulated"
feeds = ["BTC/USD"]
max_batch_size = 5
base_delay_ms = 250
fee_bump_multiplier = 1.2
balance_poll_interval_sec = 60

[chains.simulated]
confirmation_latency_ms = 500

[[chains]]
chain_id = "sim-b"
adapter = "simulated"
"#
        )
    }

    fn parse(toml: &str) -> AppConfig {
        AppConfig::from_toml(toml).unwrap()
    }

    #[test]
    fn test_parse_full_config() {
        let config = parse(&sample());
        config.validate().unwrap();

        assert_eq!(config.feeds.len(), 2);
        assert_eq!(config.decision.confidence_mode, ConfidenceMode::Suppress);
        assert_eq!(config.decision.starvation_override_sec, Some(3600));
        assert_eq!(config.decision.check_order, CheckOrder::DeviationFirst);
        assert_eq!(config.price_service.stale_grace_period(), Duration::from_secs(30));

        let a = config.chain("sim-a").unwrap();
        assert_eq!(a.adapter_kind().unwrap(), AdapterKind::Simulated);
        assert_eq!(a.retry.base_delay_ms, 250);
        assert_eq!(a.retry.fee_bump_multiplier, dec!(1.2));
        assert_eq!(a.retry.max_delay_ms, 30_000);
        assert_eq!(a.simulated.confirmation_latency_ms, 500);
        assert_eq!(
            a.scheduler_config().balance_poll_interval,
            Some(Duration::from_secs(60))
        );
        assert_eq!(config.feeds_for(a).unwrap().len(), 1);
    }

    #[test]
    fn test_shipped_default_config_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../", "config/default.toml");
        let config = AppConfig::from_file(path).unwrap();
        config.validate().unwrap();
        assert_eq!(config.chains[0].adapter_kind().unwrap(), AdapterKind::Simulated);
        assert_eq!(config.chains[0].retry.fee_bump_cap, dec!(5));
    }

    #[test]
    fn test_chain_defaults() {
        let config = parse(&sample());
        let b = config.chain("sim-b").unwrap();
        assert_eq!(b.max_batch_size, 10);
        assert_eq!(b.confirmation_timeout_sec, 30);
        assert_eq!(b.max_retries, 3);
        assert_eq!(b.target().max_attempts(), 4);
        assert_eq!(b.scheduler_config().tick_interval, Duration::from_secs(1));
        assert_eq!(b.scheduler_config().balance_poll_interval, None);
        assert_eq!(config.feeds_for(b).unwrap().len(), 2);
    }

    #[test]
    fn test_connection_config_uses_feed_ids() {
        let config = parse(&sample());
        let conn = config.price_service.connection_config(&config.feeds);
        assert_eq!(conn.url, "ws://127.0.0.1:9000/ws");
        assert_eq!(conn.feed_ids, vec![BTC.to_string(), ETH.to_string()]);
    }

    // ========================================================================
    // Validation Tests
    // ========================================================================

    fn assert_invalid(toml: &str) {
        let result = AppConfig::from_toml(toml).and_then(|c| c.validate());
        assert!(matches!(result, Err(AppError::Config(_) | AppError::Core(_) | AppError::Detector(_))), "{result:?}");
    }

    #[test]
    fn test_rejects_no_feeds() {
        assert_invalid(
            r#"
[[chains]]
chain_id = "sim"
adapter = "simulated"
"#,
        );
    }

    #[test]
    fn test_rejects_duplicate_feed() {
        let toml = sample().replace(ETH, BTC);
        assert_invalid(&toml);
    }

    #[test]
    fn test_rejects_malformed_feed_id() {
        let toml = sample().replace(ETH, "abcd");
        assert!(AppConfig::from_toml(&toml).is_err());
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        assert_invalid(&sample().replace("max_batch_size = 5", "max_batch_size = 0"));
    }

    #[test]
    fn test_rejects_zero_tick_interval() {
        assert_invalid(&format!("{}tick_interval_ms = 0\n", sample()));
    }

    #[test]
    fn test_rejects_unknown_feed_reference() {
        assert_invalid(&sample().replace(r#"feeds = ["BTC/USD"]"#, r#"feeds = ["DOGE/USD"]"#));
    }

    #[test]
    fn test_rejects_duplicate_chain() {
        assert_invalid(&sample().replace(r#"chain_id = "sim-b""#, r#"chain_id = "sim-a""#));
    }

    #[test]
    fn test_rejects_backoff_base_above_cap() {
        assert_invalid(&sample().replace("base_delay_ms = 250", "base_delay_ms = 250\nmax_delay_ms = 100"));
    }

    #[test]
    fn test_rejects_unknown_adapter() {
        assert_invalid(&format!(
            "{}\n[[chains]]\nchain_id = \"x\"\nadapter = \"carrier-pigeon\"\n",
            sample()
        ));
    }

    #[test]
    fn test_rejects_zero_starvation_override() {
        assert_invalid(&sample().replace("starvation_override_sec = 3600", "starvation_override_sec = 0"));
    }
}
