//! karbos-queue — C7 DualQueue: immediate/delayed lanes and worker liveness.

pub mod error;
pub mod queue;
pub mod queue_inmemory;
pub mod queue_redis;

pub use error::QueueError;
pub use queue::{DelayedStats, DualQueue};
pub use queue_inmemory::InMemoryDualQueue;
pub use queue_redis::RedisDualQueue;
