//! Change-driven cyclic query: the server holds each request open and
//! answers only when the value changes, no sooner than the agreed interval.
//!
//! Requires server-side subscription support. Every delivered value must
//! carry the subscription-cache tag; an address that answers without it
//! does not support this query kind and the query stops with an error.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clock::now_ts;
use crate::domain::coded::CODE_SUBSCRIPTION_WAIT_EXPIRED;
use crate::domain::{Severity, ValueRequest, ValueResponse};
use crate::error::CommunicationError;
use crate::ports::config::{ConfigProvider, keys, resolve};
use crate::ports::{AsyncSubscriber, RequestSolver, Subscriber};

use super::cycle::{
    ActiveGuard, CycleQuery, ExtraData, QueryCore, QueryOptions, QueryShared, outgoing_batch,
};

const COMPONENT: &str = "ConditionalCycleQuery";
const DEFAULT_NAME: &str = "Default conditional query";

/// Waits on the server for value changes instead of polling.
///
/// Between cycles the query carries continuation parameters forward: the
/// timestamp of the last known change, the earliest moment the server may
/// answer again, and whatever renewal data the server attached to a
/// subscription keep-alive. `request_timeout` here is the longest a single
/// cycle may stay open; exceeding it counts as a missed message.
pub struct ConditionalCycleQuery {
    core: QueryCore,
    timeout: f64,
}

struct PollState {
    solver: Arc<dyn RequestSolver>,
    templates: Vec<ValueRequest>,
    extras: ExtraData,
    timeout: f64,
    delay: f64,
    max_missed_msg: i64,
    shared: Arc<QueryShared>,
    name: String,
}

enum Inspection {
    Deliver,
    Renew,
    Fatal(CommunicationError),
}

impl ConditionalCycleQuery {
    /// `request_timeout` is a duration in seconds; unset falls back to
    /// configuration. Request templates are marked as cyclic.
    pub fn new(
        solver: Arc<dyn RequestSolver>,
        mut requests: Vec<ValueRequest>,
        request_timeout: Option<f64>,
        opts: QueryOptions,
        cfg: &dyn ConfigProvider,
    ) -> Result<Self, CommunicationError> {
        let timeout = request_timeout
            .unwrap_or_else(|| resolve(cfg, COMPONENT, keys::DEFAULT_REQUEST_TIMEOUT, 30.0));
        for request in &mut requests {
            request.cycle_query = true;
        }
        let core = QueryCore::new(COMPONENT, DEFAULT_NAME, solver, requests, opts, cfg)?;
        Ok(Self { core, timeout })
    }

    pub fn request_timeout(&self) -> f64 {
        self.timeout
    }
}

/// Repack the answered batch into the next request batch: remember when the
/// value last changed, ask the server not to answer again before one
/// interval has passed, and carry the server's renewal data from failed
/// responses forward verbatim.
fn fold_continuation(
    templates: &mut [ValueRequest],
    extras: &mut ExtraData,
    result: &[ValueResponse],
    delay: f64,
) {
    if result.is_empty() {
        return;
    }
    let mut time_stamp = None;
    for (i, response) in result.iter().enumerate() {
        if i >= templates.len() {
            break;
        }
        extras[i].clear();
        if let Some(value) = &response.value {
            let no_send_before = value.ts + delay;
            templates[i]
                .request_data
                .insert("time_of_known_change".to_owned(), rmpv::Value::from(value.ts));
            templates[i]
                .request_data
                .insert("no_send_before".to_owned(), rmpv::Value::from(no_send_before));
            time_stamp = Some(no_send_before);
        }
        if !response.status {
            if let Some(error) = &response.error {
                extras[i] = error.extra.clone();
            }
        }
    }
    if let Some(ts) = time_stamp {
        for template in templates.iter_mut() {
            template.time_of_data = ts;
        }
    }
}

fn inspect(result: &[ValueResponse], name: &str) -> Inspection {
    for response in result {
        if !response.status {
            if let Some(error) = &response.error {
                if error.code == CODE_SUBSCRIPTION_WAIT_EXPIRED {
                    // the value did not change in time; the server only
                    // wants confirmation that we are still listening
                    tracing::debug!(
                        query = name,
                        address = %response.address,
                        "subscription expired, renewing"
                    );
                    return Inspection::Renew;
                }
                if error.severity == Severity::Temporary {
                    tracing::warn!(
                        query = name,
                        address = %response.address,
                        error = %error,
                        "subscription returned a temporary error, resubscribing"
                    );
                    return Inspection::Renew;
                }
            }
            let detail = response
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "no error details".to_owned());
            return Inspection::Fatal(CommunicationError::runtime(format!(
                "received a response carrying an error: {detail}"
            )));
        }
        match &response.value {
            Some(value) if !value.is_server_cached() => {
                return Inspection::Fatal(CommunicationError::runtime(format!(
                    "address {} does not support conditional cyclic queries",
                    response.address
                )));
            }
            None => {
                return Inspection::Fatal(CommunicationError::runtime(format!(
                    "address {} did not return any value",
                    response.address
                )));
            }
            _ => {}
        }
    }
    Inspection::Deliver
}

async fn poll_loop(mut state: PollState) {
    let _guard = ActiveGuard::new(Arc::clone(&state.shared));
    let mut missed: i64 = 0;
    loop {
        let cycle_start = now_ts();
        let deadline = cycle_start + state.timeout;
        let mut batch = outgoing_batch(&state.templates, &state.extras);
        for request in &mut batch {
            request.request_timeout = deadline;
        }

        match state.solver.send(batch, Some(deadline), false).await {
            Ok(Some(result)) => {
                missed = 0;
                // keep the batch visible for the terminal replay even if
                // inspection rejects it
                state.shared.store(result.clone(), None);
                fold_continuation(&mut state.templates, &mut state.extras, &result, state.delay);
                match inspect(&result, &state.name) {
                    Inspection::Deliver => state.shared.publish(result, None),
                    Inspection::Renew => {
                        tokio::task::yield_now().await;
                        continue;
                    }
                    Inspection::Fatal(err) => {
                        tracing::error!(query = %state.name, error = %err, "stopping the query");
                        state.shared.fail(err);
                        return;
                    }
                }
            }
            Ok(None) => {
                state.shared.fail(CommunicationError::runtime(
                    "solver returned no responses; a conditional query can not run in no-wait mode",
                ));
                return;
            }
            Err(err) if err.is_timeout() => {
                missed += 1;
                tracing::warn!(
                    query = %state.name,
                    missed,
                    "no answer within the request timeout, the router is not responding"
                );
                state.shared.store(Vec::new(), None);
            }
            Err(err) => {
                tracing::error!(query = %state.name, error = %err, "cycle failed, stopping the query");
                state.shared.fail(err);
                return;
            }
        }

        if state.max_missed_msg >= 0 && missed > state.max_missed_msg {
            tracing::error!(
                query = %state.name,
                missed,
                limit = state.max_missed_msg,
                "too many missed messages in a row, stopping the query"
            );
            state.shared.fail(CommunicationError::runtime(
                "too many missed messages in a row",
            ));
            return;
        }
        tokio::task::yield_now().await;
    }
}

#[async_trait]
impl CycleQuery for ConditionalCycleQuery {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn is_running(&self) -> bool {
        self.core.is_running()
    }

    fn start(&mut self) {
        if self.core.is_running() {
            tracing::warn!(query = %self.core.name(), "cycle query is already running");
            return;
        }
        let templates = self.core.requests.clone();
        let extras = vec![Default::default(); templates.len()];
        let state = PollState {
            solver: Arc::clone(&self.core.solver),
            templates,
            extras,
            timeout: self.timeout,
            delay: self.core.delay,
            max_missed_msg: self.core.max_missed_msg,
            shared: Arc::clone(&self.core.shared),
            name: self.core.name().to_owned(),
        };
        self.core.start_with(poll_loop(state));
    }

    fn stop(&mut self) {
        self.core.stop();
    }

    async fn stop_and_wait(&mut self) {
        self.core.stop_and_wait().await;
    }

    async fn get_response(&self) -> Result<Vec<ValueResponse>, CommunicationError> {
        self.core.get_response().await
    }

    fn add_callback(&self, subscriber: Arc<dyn Subscriber>) {
        self.core.add_callback(subscriber);
    }

    fn add_async_callback(&self, subscriber: Arc<dyn AsyncSubscriber>) {
        self.core.add_async_callback(subscriber);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::domain::{Address, ResponseError, SERVER_CACHE_TAG, Value};
    use crate::ports::StaticConfig;

    enum Step {
        Respond(Vec<ValueResponse>),
        Timeout,
    }

    /// Scripted transport that also records every outgoing batch.
    struct ScriptedSolver {
        script: Mutex<VecDeque<Step>>,
        sent: Mutex<Vec<Vec<ValueRequest>>>,
    }

    impl ScriptedSolver {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(steps.into()),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<Vec<ValueRequest>> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RequestSolver for ScriptedSolver {
        async fn send(
            &self,
            requests: Vec<ValueRequest>,
            _timeout: Option<f64>,
            _no_wait: bool,
        ) -> Result<Option<Vec<ValueResponse>>, CommunicationError> {
            self.sent.lock().unwrap().push(requests);
            match self.script.lock().unwrap().pop_front() {
                Some(Step::Respond(batch)) => Ok(Some(batch)),
                Some(Step::Timeout) => Err(CommunicationError::timeout_default()),
                None => Err(CommunicationError::timeout_default()),
            }
        }
    }

    fn address() -> Address {
        Address::parse("plant.valve.state").unwrap()
    }

    fn requests() -> Vec<ValueRequest> {
        vec![ValueRequest::parse("plant.valve.state", Default::default(), &StaticConfig).unwrap()]
    }

    fn cached_batch(payload: i64, ts: f64) -> Vec<ValueResponse> {
        vec![ValueResponse::ok(
            address(),
            Value::new(payload, ts).with_tag(SERVER_CACHE_TAG, true),
        )]
    }

    fn keep_alive_batch() -> Vec<ValueResponse> {
        let error = ResponseError::new(
            CODE_SUBSCRIPTION_WAIT_EXPIRED,
            "",
            "router",
            Severity::Normal,
        )
        .with_extra("subscription_token", 7);
        vec![ValueResponse::failed(address(), error)]
    }

    fn query(
        solver: Arc<ScriptedSolver>,
        opts: QueryOptions,
    ) -> ConditionalCycleQuery {
        ConditionalCycleQuery::new(solver, requests(), None, opts, &StaticConfig).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_renews_without_waking_waiters() {
        let solver = ScriptedSolver::new(vec![
            Step::Respond(keep_alive_batch()),
            Step::Respond(cached_batch(1, 100.0)),
        ]);
        let mut q = query(Arc::clone(&solver), QueryOptions::default());
        q.start();

        // the keep-alive cycle is silent; the waiter sees the real value
        assert_eq!(q.get_response().await.unwrap(), cached_batch(1, 100.0));
        q.stop_and_wait().await;

        // the renewal data from the keep-alive error rode along
        let sent = solver.sent();
        assert!(sent[1][0].request_data.contains_key("subscription_token"));
    }

    #[tokio::test(start_paused = true)]
    async fn continuation_carries_change_time_forward() {
        let solver = ScriptedSolver::new(vec![
            Step::Respond(cached_batch(1, 100.0)),
            Step::Respond(cached_batch(2, 200.0)),
        ]);
        let mut q = query(
            Arc::clone(&solver),
            QueryOptions {
                delay: Some(2.0),
                ..Default::default()
            },
        );
        q.start();

        assert_eq!(q.get_response().await.unwrap(), cached_batch(1, 100.0));
        assert_eq!(q.get_response().await.unwrap(), cached_batch(2, 200.0));
        q.stop_and_wait().await;

        let sent = solver.sent();
        let second = &sent[1][0];
        assert_eq!(
            second.request_data.get("time_of_known_change"),
            Some(&rmpv::Value::from(100.0))
        );
        assert_eq!(
            second.request_data.get("no_send_before"),
            Some(&rmpv::Value::from(102.0))
        );
        assert_eq!(second.time_of_data, 102.0);
        assert!(second.cycle_query);
    }

    #[tokio::test(start_paused = true)]
    async fn uncached_value_is_terminal() {
        let plain = vec![ValueResponse::ok(address(), Value::new(1, 50.0))];
        let solver = ScriptedSolver::new(vec![Step::Respond(plain)]);
        let mut q = query(solver, QueryOptions::default());
        q.start();

        let err = q.get_response().await.unwrap_err();
        assert!(err.to_string().contains("does not support"));
        q.stop_and_wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn missing_value_is_terminal() {
        let empty = vec![ValueResponse {
            address: address(),
            value: None,
            status: true,
            error: None,
        }];
        let solver = ScriptedSolver::new(vec![Step::Respond(empty)]);
        let mut q = query(solver, QueryOptions::default());
        q.start();

        let err = q.get_response().await.unwrap_err();
        assert!(err.to_string().contains("did not return any value"));
        q.stop_and_wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn temporary_error_resubscribes() {
        let temporary = vec![ValueResponse::failed(
            address(),
            ResponseError::new(2001, "busy", "router", Severity::Temporary),
        )];
        let solver = ScriptedSolver::new(vec![
            Step::Respond(temporary),
            Step::Respond(cached_batch(5, 10.0)),
        ]);
        let mut q = query(solver, QueryOptions::default());
        q.start();

        assert_eq!(q.get_response().await.unwrap(), cached_batch(5, 10.0));
        q.stop_and_wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_reaches_waiters() {
        let fatal = vec![ValueResponse::failed(
            address(),
            ResponseError::new(1001, "no such address", "router", Severity::Critical),
        )];
        let solver = ScriptedSolver::new(vec![Step::Respond(fatal)]);
        let mut q = query(solver, QueryOptions::default());
        q.start();

        let err = q.get_response().await.unwrap_err();
        assert!(err.to_string().contains("carrying an error"));
        q.stop_and_wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn missed_cycles_over_the_limit_are_terminal() {
        let solver = ScriptedSolver::new(vec![Step::Timeout, Step::Timeout]);
        let mut q = query(
            solver,
            QueryOptions {
                max_missed_msg: Some(0),
                ..Default::default()
            },
        );
        q.start();

        let err = q.get_response().await.unwrap_err();
        assert_eq!(
            err,
            CommunicationError::runtime("too many missed messages in a row")
        );
        q.stop_and_wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn outgoing_requests_are_marked_cyclic_with_absolute_deadlines() {
        let solver = ScriptedSolver::new(vec![Step::Respond(cached_batch(1, 1.0))]);
        let before = now_ts();
        let mut q = query(Arc::clone(&solver), QueryOptions::default());
        q.start();
        let _ = q.get_response().await;
        q.stop_and_wait().await;

        let sent = solver.sent();
        let first = &sent[0][0];
        assert!(first.cycle_query);
        // deadline stamped one timeout span ahead of the cycle start
        assert!(first.request_timeout >= before + q.request_timeout());
    }
}
