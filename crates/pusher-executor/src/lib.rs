//! Per-chain push execution.
//!
//! # Key Components
//!
//! - [`ChainScheduler`]: tick loop for one chain (refresh, decide, batch, submit)
//! - [`ChainPusher`]: per-feed state and the single in-flight slot
//! - [`SubmissionCycle`]: submit, confirm and retry state machine for one batch
//! - [`RetryPolicy`]: exponential backoff and fee escalation
//! - [`SimulatedChainAdapter`]: in-memory chain for dry runs
//! - [`MockChainAdapter`]: scripted adapter for tests
//!
//! # Cycle Outcomes
//!
//! 1. Confirmed -> on-chain state updated for every feed in the batch
//! 2. Superseded -> nothing to do, the next refresh sees the newer value
//! 3. Failed(Permanent) -> logged at error, no retry
//! 4. Failed(Exhausted) -> `max_retries + 1` submissions made, logged at error
//! 5. Cancelled -> shutdown interrupted the cycle

pub mod batch;
pub mod cycle;
pub mod error;
pub mod mock;
pub mod pusher;
pub mod retry;
pub mod scheduler;
pub mod simulated;

pub use batch::{plan_batch, BatchItem, InflightSlot, PushBatch};
pub use cycle::{CycleOutcome, CycleState, FailureKind, SubmissionCycle};
pub use error::{ExecutorError, ExecutorResult};
pub use mock::MockChainAdapter;
pub use pusher::{ChainPusher, FeedState, PusherState, TickPlan};
pub use retry::RetryPolicy;
pub use scheduler::{ChainScheduler, SchedulerConfig, TickReport};
pub use simulated::SimulatedChainAdapter;
