//! Client-side engine: one-shot calls, cyclic queries and subscriptions.

pub mod client;
pub mod conditional;
mod cycle;
pub mod periodic;

pub use client::TreeClient;
pub use conditional::ConditionalCycleQuery;
pub use cycle::{CycleQuery, QueryOptions};
pub use periodic::PeriodicCycleQuery;
