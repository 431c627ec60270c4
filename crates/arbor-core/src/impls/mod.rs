//! Bundled [`RequestSolver`](crate::ports::RequestSolver) implementations.

pub mod loopback;

pub use loopback::LoopbackSolver;
