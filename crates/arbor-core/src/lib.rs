//! arbor-core
//!
//! Client-side communication layer for a distributed data-collection tree.
//!
//! # Module layout
//! - **domain**: value-exchange data model (addresses, values, users, coded
//!   errors, request/response)
//! - **wire**: MessagePack codec and the multipart envelope protocol
//! - **ports**: abstraction seams (RequestSolver, ConfigProvider, Subscriber)
//! - **app**: the engine (TreeClient, PeriodicCycleQuery, ConditionalCycleQuery)
//! - **impls**: bundled solver implementations (LoopbackSolver for
//!   router-less use)

pub mod app;
pub mod clock;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod wire;

pub use app::{ConditionalCycleQuery, CycleQuery, PeriodicCycleQuery, QueryOptions, TreeClient};
pub use domain::{
    Address, RequestParams, RequestType, TreeUser, Value, ValueRequest, ValueResponse,
};
pub use error::CommunicationError;
