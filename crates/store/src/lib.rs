//! karbos-store — C6 JobStore: durable job lifecycle and execution history.

pub mod error;
pub mod store;
pub mod store_inmemory;
pub mod store_sqlx;

pub use error::StoreError;
pub use store::JobStore;
pub use store_inmemory::InMemoryJobStore;
pub use store_sqlx::{DbPool, SqlxJobStore};
