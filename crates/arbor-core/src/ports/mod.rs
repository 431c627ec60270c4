//! Abstraction seams consumed by the engine: the transport solver, the
//! injected configuration source and the callback subscriber interfaces.

pub mod config;
pub mod solver;
pub mod subscriber;

pub use config::{ConfigProvider, StaticConfig};
pub use solver::RequestSolver;
pub use subscriber::{AsyncSubscriber, Subscriber, SubscriberError};
