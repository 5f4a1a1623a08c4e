//! Shared fixtures for integration tests.

pub mod mock_price_service;

pub const BTC: &str = "e62df6c8b4a85fe1a67db44dc12de5db330f7ac66b72dc658afedf0f4a415b43";
pub const ETH: &str = "ff61491a931112ddf1bd8147cd1b641375f79f5825126d665480874634fd0ace";

/// A `price_update` frame as the price service sends it.
pub fn price_update(id: &str, price: i64, conf: u64, expo: i32, publish_time: i64) -> String {
    serde_json::json!({
        "type": "price_update",
        "price_feed": {
            "id": id,
            "price": {
                "price": price.to_string(),
                "conf": conf.to_string(),
                "expo": expo,
                "publish_time": publish_time
            },
            "ema_price": {
                "price": price.to_string(),
                "conf": conf.to_string(),
                "expo": expo,
                "publish_time": publish_time
            }
        }
    })
    .to_string()
}
