//! Price pusher daemon.
//!
//! Composition root that wires together:
//! - Price service subscription and the shared feed cache
//! - One scheduler per configured chain
//! - Metrics and logging

pub mod app;
pub mod config;
pub mod error;

pub use app::{Application, ChainSelection};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
