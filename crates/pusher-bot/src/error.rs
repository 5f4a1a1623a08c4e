//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid or unreadable configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] pusher_core::CoreError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] pusher_ws::WsError),

    #[error("Feed error: {0}")]
    Feed(#[from] pusher_feed::FeedError),

    #[error("Detector error: {0}")]
    Detector(#[from] pusher_detector::DetectorError),

    #[error("Executor error: {0}")]
    Executor(#[from] pusher_executor::ExecutorError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] pusher_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
