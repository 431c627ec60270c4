use async_trait::async_trait;

use crate::domain::{ValueRequest, ValueResponse};
use crate::error::CommunicationError;

/// Transport boundary.
///
/// Implementations own the sockets and the framing; this crate only consumes
/// the contract. One call exchanges a non-empty ordered batch of requests
/// for the same-order, same-cardinality batch of responses.
///
/// - `timeout` is an absolute epoch deadline for the whole batch; `None`
///   leaves the choice to the implementation.
/// - With `no_wait` the call returns `Ok(None)` without waiting for a reply.
/// - `Timeout` means no reply arrived before the deadline; `Runtime` covers
///   every other transport or protocol failure.
#[async_trait]
pub trait RequestSolver: Send + Sync {
    async fn send(
        &self,
        requests: Vec<ValueRequest>,
        timeout: Option<f64>,
        no_wait: bool,
    ) -> Result<Option<Vec<ValueResponse>>, CommunicationError>;
}
