//! Shared domain types for karbos.
//!
//! Every capability crate (`karbos-carbon`, `karbos-scheduler`, `karbos-store`,
//! `karbos-queue`, `karbos-executor`) depends on this crate for the data model instead
//! of depending on each other, so a test double for any one capability never needs to
//! pull in another capability's implementation.

mod carbon;
mod decision;
mod job;
mod queue;

pub use carbon::IntensitySample;
pub use decision::{AlternativeWindow, DecisionKind, SchedulingDecision};
pub use job::{ExecutionRecord, JobStatus, WorkItem};
pub use queue::QueueEntry;
