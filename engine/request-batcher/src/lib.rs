//! # Request Batcher
//!
//! Coalesces many small outbound requests into periodic, concurrency-bounded
//! batches and routes each result back to whoever queued it.

pub mod batcher;
pub mod config;
pub mod error;
pub mod periodic;
pub mod summary;

pub use batcher::{BatchTicket, Callback, Dispatch, RequestBatcher};
pub use config::{BatcherConfig, SchedulerConfig, SummaryConfig};
pub use error::{BatchError, Result};
pub use periodic::PeriodicTask;
pub use summary::{SummaryClient, SummaryDispatcher, SummaryRequest};
