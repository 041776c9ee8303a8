//! karbos-worker — C8 Promoter + C10 WorkerPool: drains the delayed lane, dispatches
//! the immediate lane to a container runtime, and persists outcomes.

pub mod config;
pub mod pool;
pub mod promoter;

pub use config::{PromoterConfig, WorkerPoolConfig};
pub use pool::WorkerPool;
pub use promoter::Promoter;
