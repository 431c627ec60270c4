//! In-process solver: answers its own requests without a router.
//!
//! Every batch still goes through the real wire path: requests are encoded,
//! wrapped in an envelope, validated and checked for freshness, then decoded
//! again before the answer is produced. Useful for demos and for testing
//! engine behavior without a live connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use ulid::Ulid;

use crate::clock::now_ts;
use crate::domain::{SERVER_CACHE_TAG, Value, ValueRequest, ValueResponse};
use crate::error::CommunicationError;
use crate::ports::RequestSolver;
use crate::wire::{Envelope, TimeoutPolicy};

/// Produces the answer for one decoded request.
pub type Responder = dyn Fn(&ValueRequest) -> ValueResponse + Send + Sync;

pub struct LoopbackSolver {
    responder: Arc<Responder>,
    policy: TimeoutPolicy,
    sent: AtomicU64,
}

impl LoopbackSolver {
    /// Solver answering every request with its own `request_data` payload,
    /// tagged as served from the subscription cache so conditional queries
    /// accept it.
    pub fn new() -> Self {
        Self::with_responder(|request: &ValueRequest| {
            let payload = rmpv::Value::Map(
                request
                    .request_data
                    .iter()
                    .map(|(k, v)| (rmpv::Value::from(k.as_str()), v.clone()))
                    .collect(),
            );
            ValueResponse::ok(
                request.address.clone(),
                Value::new(payload, now_ts()).with_tag(SERVER_CACHE_TAG, true),
            )
        })
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&ValueRequest) -> ValueResponse + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            policy: TimeoutPolicy::new(30.0),
            sent: AtomicU64::new(0),
        }
    }

    /// Number of envelopes handled so far.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    fn wrap(
        &self,
        requests: &[ValueRequest],
        deadline: f64,
        now: f64,
    ) -> Result<Envelope, CommunicationError> {
        let mut data = Vec::with_capacity(requests.len());
        for request in requests {
            data.push(
                request
                    .to_bytes()
                    .map_err(|err| CommunicationError::runtime(err.to_string()))?,
            );
        }
        let id = Ulid::new().to_string();
        Envelope::for_message(now, id.as_bytes(), deadline, false, data, Vec::new())
            .map_err(|err| CommunicationError::runtime(err.to_string()))
    }
}

impl Default for LoopbackSolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestSolver for LoopbackSolver {
    async fn send(
        &self,
        requests: Vec<ValueRequest>,
        timeout: Option<f64>,
        no_wait: bool,
    ) -> Result<Option<Vec<ValueResponse>>, CommunicationError> {
        if requests.is_empty() {
            return Err(CommunicationError::runtime("nothing to send"));
        }
        let now = now_ts();
        let deadline = timeout.unwrap_or(now + self.policy.default_timeout);

        let envelope = self.wrap(&requests, deadline, now)?;
        envelope
            .validate()
            .map_err(|err| CommunicationError::runtime(err.to_string()))?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        if no_wait {
            return Ok(None);
        }
        // the answering side refuses envelopes that are already outdated
        self.policy.remaining(&envelope, now, true)?;

        let mut responses = Vec::with_capacity(envelope.data().len());
        for frame in envelope.data() {
            let request = ValueRequest::from_bytes(frame)
                .map_err(|err| CommunicationError::runtime(err.to_string()))?;
            responses.push((self.responder)(&request));
        }
        Ok(Some(responses))
    }
}
