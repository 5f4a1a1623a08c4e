//! End-to-end pipeline tests.
//!
//! Price service -> feed cache -> chain schedulers, with scripted chain
//! adapters standing in for real chains.

mod integration;
use integration::common::mock_price_service::MockPriceService;
use integration::common::{price_update, BTC, ETH};

use pusher_bot::{AppConfig, Application, ChainSelection};
use pusher_core::{ChainError, DynChainAdapter, FeedId, PriceInfo};
use pusher_executor::MockChainAdapter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn config(endpoint: &str, chains: &[&str]) -> AppConfig {
    let mut toml = format!(
        r#"
[price_service]
endpoint = "{endpoint}"
reconnect_base_delay_ms = 50

[[feeds]]
id = "{BTC}"
alias = "BTC/USD"
time_difference_sec = 60
price_deviation_bps = 50
confidence_ratio_bps = 200

[[feeds]]
id = "{ETH}"
alias = "ETH/USD"
time_difference_sec = 60
price_deviation_bps = 50
confidence_ratio_bps = 200
"#
    );
    for chain in chains {
        toml.push_str(&format!(
            r#"
[[chains]]
chain_id = "{chain}"
adapter = "simulated"
tick_interval_ms = 50
max_tick_backoff_ms = 200
status_poll_interval_ms = 20
base_delay_ms = 20
max_delay_ms = 100
"#
        ));
    }
    AppConfig::from_toml(&toml).unwrap()
}

fn mocks(chains: &[&str]) -> HashMap<String, Arc<MockChainAdapter>> {
    chains
        .iter()
        .map(|c| (c.to_string(), Arc::new(MockChainAdapter::new(*c))))
        .collect()
}

async fn wait_for_price(mock: &MockChainAdapter, feed: &FeedId, publish_time: i64) -> bool {
    timeout(Duration::from_secs(5), async {
        loop {
            if mock.on_chain(feed).is_some_and(|p| p.publish_time >= publish_time) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok()
}

/// Off-chain updates end up on chain.
#[tokio::test]
async fn test_pushes_subscribed_prices_to_chain() {
    pusher_ws::init_crypto();
    let server = MockPriceService::start(vec![
        price_update(BTC, 6_500_000_000_000, 1_000_000_000, -8, 1_700_000_000),
        price_update(ETH, 350_000_000_000, 200_000_000, -8, 1_700_000_000),
    ])
    .await;

    let chains = ["mock-a"];
    let mocks = mocks(&chains);
    let app = Application::new(config(&server.url(), &chains)).unwrap();
    let shutdown = app.shutdown_token();
    let schedulers = app
        .build_schedulers(&ChainSelection::All, |chain| {
            Ok(Arc::clone(&mocks[&chain.chain_id]) as DynChainAdapter)
        })
        .unwrap();
    let handle = tokio::spawn(app.run_with(schedulers));

    let mock = &mocks["mock-a"];
    let btc = FeedId::from_hex(BTC).unwrap();
    let eth = FeedId::from_hex(ETH).unwrap();
    assert!(wait_for_price(mock, &btc, 1_700_000_000).await);
    assert!(wait_for_price(mock, &eth, 1_700_000_000).await);

    // Nothing was on chain, so the first submission carries no guard.
    let submissions = mock.submissions();
    let first = &submissions[0];
    assert!(!first.is_empty());
    assert!(first.min_publish_times.values().all(|t| *t == 0));

    // Once fresh, nothing more is pushed.
    let settled = mock.submission_count();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(mock.submission_count(), settled);

    shutdown.cancel();
    let result = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert!(result.is_ok());
    server.shutdown().await;
}

/// A chain that cannot be reached does not hold back the others.
#[tokio::test]
async fn test_unreachable_chain_is_isolated() {
    pusher_ws::init_crypto();
    let server = MockPriceService::start(vec![price_update(
        BTC,
        6_500_000_000_000,
        1_000_000_000,
        -8,
        1_700_000_000,
    )])
    .await;

    let chains = ["healthy", "down"];
    let mocks = mocks(&chains);
    mocks["down"].set_refresh_default(Err(ChainError::Unreachable("connection refused".into())));

    let app = Application::new(config(&server.url(), &chains)).unwrap();
    let shutdown = app.shutdown_token();
    let schedulers = app
        .build_schedulers(&ChainSelection::All, |chain| {
            Ok(Arc::clone(&mocks[&chain.chain_id]) as DynChainAdapter)
        })
        .unwrap();
    let handle = tokio::spawn(app.run_with(schedulers));

    let btc = FeedId::from_hex(BTC).unwrap();
    assert!(wait_for_price(&mocks["healthy"], &btc, 1_700_000_000).await);
    assert!(mocks["down"].refresh_calls() > 0);
    assert_eq!(mocks["down"].submission_count(), 0);

    shutdown.cancel();
    assert!(timeout(Duration::from_secs(5), handle).await.unwrap().unwrap().is_ok());
    server.shutdown().await;
}

/// An on-chain value newer than anything the subscription delivered is left alone.
#[tokio::test]
async fn test_newer_on_chain_value_is_not_overwritten() {
    pusher_ws::init_crypto();
    let server = MockPriceService::start(vec![price_update(
        BTC,
        6_500_000_000_000,
        1_000_000_000,
        -8,
        1_700_000_000,
    )])
    .await;

    let chains = ["mock-a"];
    let mocks = mocks(&chains);
    let btc = FeedId::from_hex(BTC).unwrap();
    mocks["mock-a"].set_on_chain(btc, PriceInfo::new(6_600_000_000_000, 1_000_000_000, -8, 1_700_000_100));

    let app = Application::new(config(&server.url(), &chains)).unwrap();
    let shutdown = app.shutdown_token();
    let cache = app.cache();
    let schedulers = app
        .build_schedulers(&ChainSelection::One("mock-a".to_string()), |chain| {
            Ok(Arc::clone(&mocks[&chain.chain_id]) as DynChainAdapter)
        })
        .unwrap();
    let handle = tokio::spawn(app.run_with(schedulers));

    let cached = timeout(Duration::from_secs(5), async {
        while cache.get(&btc).is_none() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(cached.is_ok());
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(mocks["mock-a"].submission_count(), 0);
    assert_eq!(mocks["mock-a"].on_chain(&btc).unwrap().publish_time, 1_700_000_100);

    shutdown.cancel();
    assert!(timeout(Duration::from_secs(5), handle).await.unwrap().unwrap().is_ok());
    server.shutdown().await;
}
