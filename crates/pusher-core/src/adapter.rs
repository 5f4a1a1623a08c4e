//! Chain adapter capability interface.
//!
//! Every target chain has its own transaction and signing model (EVM nonces,
//! recent blockhashes, sequence numbers). The scheduler and pusher are written
//! once against [`ChainAdapter`]; one implementation exists per chain family.
//!
//! Methods return [`BoxFuture`] so the trait stays dyn-compatible and adapters
//! can be held as [`DynChainAdapter`].

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::chain::ChainId;
use crate::feed::FeedId;
use crate::price::PriceInfo;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Shared handle to a chain adapter.
pub type DynChainAdapter = Arc<dyn ChainAdapter>;

/// Read-side failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("Chain unreachable: {0}")]
    Unreachable(String),

    #[error("RPC error: {0}")]
    Rpc(String),
}

/// Classification of a write-side failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmitErrorKind {
    /// Timeout, rate limit, nonce race, dropped transaction. Retried with backoff.
    Transient,
    /// Invalid payload, insufficient funds, rejected by chain logic. Never retried.
    Permanent,
    /// The chain already holds an equal or newer price for every feed in the batch.
    Superseded,
}

impl SubmitErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitErrorKind::Transient => "transient",
            SubmitErrorKind::Permanent => "permanent",
            SubmitErrorKind::Superseded => "superseded",
        }
    }
}

impl fmt::Display for SubmitErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write-side failure reported by an adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} submit error: {message}")]
pub struct SubmitError {
    pub kind: SubmitErrorKind,
    pub message: String,
}

impl SubmitError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: SubmitErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: SubmitErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn superseded(message: impl Into<String>) -> Self {
        Self {
            kind: SubmitErrorKind::Superseded,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind == SubmitErrorKind::Transient
    }
}

/// Opaque reference to a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxHandle {
    /// Chain-native transaction id (hash, signature, digest).
    pub id: String,
}

impl TxHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Status of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Confirmed,
    /// Landed and failed, or dropped. The error carries the retry classification.
    Failed(SubmitError),
}

/// One batched price update.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Feeds in this batch, in submission order.
    pub feed_ids: Vec<FeedId>,
    /// Off-chain values to publish.
    pub prices: HashMap<FeedId, PriceInfo>,
    /// Per feed, `on_chain.publish_time + 1` as seen when the batch was
    /// planned, or 0 when nothing was on chain (no guard). A chain holding a
    /// publish time at or above this value has been updated by someone else.
    pub min_publish_times: HashMap<FeedId, i64>,
    /// Zero-based attempt number within the current cycle.
    pub attempt: u32,
    /// Fee multiplier for replacing a stuck transaction (1 on the first attempt).
    pub fee_multiplier: Decimal,
}

impl SubmitRequest {
    pub fn len(&self) -> usize {
        self.feed_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feed_ids.is_empty()
    }
}

/// Capability interface implemented once per target chain.
pub trait ChainAdapter: Send + Sync {
    /// Chain this adapter talks to.
    fn chain_id(&self) -> &ChainId;

    /// Read the current on-chain values for `feed_ids`.
    ///
    /// Feeds that could not be read, or were never published, are omitted.
    /// Returns `Err` only when the chain could not be reached at all.
    fn refresh<'a>(
        &'a self,
        feed_ids: &'a [FeedId],
    ) -> BoxFuture<'a, Result<HashMap<FeedId, PriceInfo>, ChainError>>;

    /// Build, sign and broadcast one batched update.
    fn submit(&self, request: SubmitRequest) -> BoxFuture<'_, Result<TxHandle, SubmitError>>;

    /// Poll the status of a previously submitted transaction.
    fn status<'a>(&'a self, tx: &'a TxHandle) -> BoxFuture<'a, Result<TxStatus, ChainError>>;

    /// Payer wallet balance in the chain's native unit, if the adapter tracks it.
    fn balance(&self) -> BoxFuture<'_, Result<Option<Decimal>, ChainError>> {
        Box::pin(async { Ok(None) })
    }
}
