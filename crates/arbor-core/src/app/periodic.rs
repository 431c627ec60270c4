//! Fixed-interval cyclic query: re-sends the request batch every `delay`
//! seconds and delivers whatever comes back.

use std::sync::Arc;

use async_trait::async_trait;

use crate::clock::{now_ts, span};
use crate::domain::{ValueRequest, ValueResponse};
use crate::error::CommunicationError;
use crate::ports::config::{ConfigProvider, keys, resolve};
use crate::ports::{AsyncSubscriber, RequestSolver, Subscriber};

use super::cycle::{
    ActiveGuard, CycleQuery, ExtraData, QueryCore, QueryOptions, QueryShared, outgoing_batch,
};

const COMPONENT: &str = "PeriodicCycleQuery";
const DEFAULT_NAME: &str = "Default periodic query";

/// Polls a fixed request batch on a fixed period.
///
/// The first request goes out one full period after start. Each cycle
/// restamps `time_of_data` to the cycle start and sets the
/// request deadline one period ahead. A timed-out cycle counts as missed;
/// once more than `max_missed_msg` cycles in a row are missed the query
/// records a terminal error and stops (a negative limit disables the check).
pub struct PeriodicCycleQuery {
    core: QueryCore,

    /// Deliver an empty batch for a missed cycle instead of skipping the
    /// delivery silently. Off by default.
    pub log_missed_msg: bool,
}

struct PollState {
    solver: Arc<dyn RequestSolver>,
    requests: Vec<ValueRequest>,
    delay: f64,
    max_missed_msg: i64,
    log_missed_msg: bool,
    shared: Arc<QueryShared>,
    name: String,
}

impl PeriodicCycleQuery {
    pub fn new(
        solver: Arc<dyn RequestSolver>,
        requests: Vec<ValueRequest>,
        opts: QueryOptions,
        cfg: &dyn ConfigProvider,
    ) -> Result<Self, CommunicationError> {
        let mut core = QueryCore::new(COMPONENT, DEFAULT_NAME, solver, requests, opts, cfg)?;
        let min_delay = resolve(cfg, COMPONENT, keys::MIN_DELAY, 0.5);
        if core.delay < min_delay {
            tracing::warn!(
                query = %core.name(),
                delay = core.delay,
                min_delay,
                "cycle delay below the permitted minimum, clamping"
            );
            core.delay = min_delay;
        }
        Ok(Self {
            core,
            log_missed_msg: false,
        })
    }

    pub fn delay(&self) -> f64 {
        self.core.delay
    }
}

async fn poll_loop(state: PollState) {
    let _guard = ActiveGuard::new(Arc::clone(&state.shared));
    let mut missed: i64 = 0;
    let mut cycle_start = now_ts();
    loop {
        // one full period between sends, the first one included
        let wait = cycle_start + state.delay - now_ts();
        if wait > 0.0 {
            tokio::time::sleep(span(wait)).await;
        }
        cycle_start = now_ts();
        let deadline = cycle_start + state.delay;
        let mut batch = outgoing_batch(&state.requests, &ExtraData::new());
        for request in &mut batch {
            request.time_of_data = cycle_start;
            request.request_timeout = deadline;
        }

        match state.solver.send(batch, Some(deadline), false).await {
            Ok(Some(responses)) => {
                missed = 0;
                state.shared.publish(responses, None);
            }
            Ok(None) => {
                state.shared.fail(CommunicationError::runtime(
                    "solver returned no responses; a periodic query can not run in no-wait mode",
                ));
                return;
            }
            Err(err) if err.is_timeout() => {
                missed += 1;
                tracing::warn!(query = %state.name, missed, "cycle timed out");
                if state.log_missed_msg {
                    state.shared.publish(Vec::new(), None);
                } else {
                    state.shared.store(Vec::new(), None);
                }
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
    }
}

#[async_trait]
impl CycleQuery for PeriodicCycleQuery {
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
        let state = PollState {
            solver: Arc::clone(&self.core.solver),
            requests: self.core.requests.clone(),
            delay: self.core.delay,
            max_missed_msg: self.core.max_missed_msg,
            log_missed_msg: self.log_missed_msg,
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
    use crate::domain::{Address, Value};
    use crate::ports::StaticConfig;

    enum Step {
        Respond(Vec<ValueResponse>),
        Timeout,
        Fail(&'static str),
    }

    struct ScriptedSolver {
        script: Mutex<VecDeque<Step>>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedSolver {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(steps.into()),
                calls: std::sync::atomic::AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RequestSolver for ScriptedSolver {
        async fn send(
            &self,
            _requests: Vec<ValueRequest>,
            _timeout: Option<f64>,
            _no_wait: bool,
        ) -> Result<Option<Vec<ValueResponse>>, CommunicationError> {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            match self.script.lock().unwrap().pop_front() {
                Some(Step::Respond(batch)) => Ok(Some(batch)),
                Some(Step::Timeout) => Err(CommunicationError::timeout_default()),
                Some(Step::Fail(message)) => Err(CommunicationError::runtime(message)),
                None => Err(CommunicationError::timeout_default()),
            }
        }
    }

    fn batch_of(payload: i64) -> Vec<ValueResponse> {
        vec![ValueResponse::ok(
            Address::parse("plant.sensor").unwrap(),
            Value::new(payload, 1.0),
        )]
    }

    fn requests() -> Vec<ValueRequest> {
        vec![ValueRequest::parse("plant.sensor", Default::default(), &StaticConfig).unwrap()]
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_consecutive_batches() {
        let solver = ScriptedSolver::new(vec![
            Step::Respond(batch_of(1)),
            Step::Respond(batch_of(2)),
            Step::Fail("done"),
        ]);
        let mut query =
            PeriodicCycleQuery::new(solver, requests(), QueryOptions::default(), &StaticConfig)
                .unwrap();
        query.start();

        assert_eq!(query.get_response().await.unwrap(), batch_of(1));
        assert_eq!(query.get_response().await.unwrap(), batch_of(2));
        query.stop_and_wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn too_many_missed_cycles_is_terminal() {
        let solver = ScriptedSolver::new(vec![Step::Timeout, Step::Timeout, Step::Timeout]);
        let mut query = PeriodicCycleQuery::new(
            solver,
            requests(),
            QueryOptions {
                max_missed_msg: Some(1),
                ..Default::default()
            },
            &StaticConfig,
        )
        .unwrap();
        query.log_missed_msg = true;
        query.start();

        // with missed logging on, a missed cycle delivers an empty batch
        assert_eq!(query.get_response().await.unwrap(), Vec::new());
        let err = query.get_response().await.unwrap_err();
        assert_eq!(
            err,
            CommunicationError::runtime("too many missed messages in a row")
        );
        query.stop_and_wait().await;
        assert!(!query.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn first_request_waits_one_full_period() {
        let solver = ScriptedSolver::new(vec![Step::Respond(batch_of(1))]);
        let mut query = PeriodicCycleQuery::new(
            solver.clone(),
            requests(),
            QueryOptions::default(),
            &StaticConfig,
        )
        .unwrap();
        query.start();

        // the clock has not advanced yet, so nothing went out
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(solver.calls(), 0);

        assert_eq!(query.get_response().await.unwrap(), batch_of(1));
        assert_eq!(solver.calls(), 1);
        query.stop_and_wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn silent_misses_end_in_a_terminal_error() {
        let solver = ScriptedSolver::new(vec![Step::Timeout, Step::Timeout]);
        let mut query = PeriodicCycleQuery::new(
            solver,
            requests(),
            QueryOptions {
                max_missed_msg: Some(1),
                ..Default::default()
            },
            &StaticConfig,
        )
        .unwrap();
        // log_missed_msg stays off: missed cycles wake nobody
        query.start();

        let err = query.get_response().await.unwrap_err();
        assert_eq!(
            err,
            CommunicationError::runtime("too many missed messages in a row")
        );
        query.stop_and_wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn negative_limit_disables_the_missed_check() {
        let solver = ScriptedSolver::new(vec![
            Step::Timeout,
            Step::Timeout,
            Step::Timeout,
            Step::Respond(batch_of(9)),
        ]);
        let mut query = PeriodicCycleQuery::new(
            solver,
            requests(),
            QueryOptions {
                max_missed_msg: Some(-1),
                ..Default::default()
            },
            &StaticConfig,
        )
        .unwrap();
        query.start();

        // quiet through three missed cycles, then the late answer arrives
        assert_eq!(query.get_response().await.unwrap(), batch_of(9));
        query.stop_and_wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_solver_error_is_terminal() {
        let solver = ScriptedSolver::new(vec![Step::Fail("link lost")]);
        let mut query =
            PeriodicCycleQuery::new(solver, requests(), QueryOptions::default(), &StaticConfig)
                .unwrap();
        query.start();

        let err = query.get_response().await.unwrap_err();
        assert_eq!(err, CommunicationError::runtime("link lost"));
        query.stop_and_wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn callbacks_observe_delivered_batches() {
        let solver = ScriptedSolver::new(vec![Step::Respond(batch_of(7)), Step::Fail("end")]);
        let mut query =
            PeriodicCycleQuery::new(solver, requests(), QueryOptions::default(), &StaticConfig)
                .unwrap();
        let seen: Arc<Mutex<Vec<Vec<ValueResponse>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        query.add_callback(Arc::new(move |batch: &[ValueResponse]| {
            sink.lock().unwrap().push(batch.to_vec());
        }));
        query.start();

        assert!(query.get_response().await.is_ok());
        assert!(query.get_response().await.is_err());
        // let the dispatcher replay the final batch before tearing down
        tokio::task::yield_now().await;
        query.stop_and_wait().await;

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|batch| *batch == batch_of(7)));
    }

    #[tokio::test]
    async fn waiting_before_start_fails() {
        let solver = ScriptedSolver::new(Vec::new());
        let query =
            PeriodicCycleQuery::new(solver, requests(), QueryOptions::default(), &StaticConfig)
                .unwrap();
        assert!(query.get_response().await.is_err());
    }

    #[tokio::test]
    async fn delay_is_clamped_to_the_configured_minimum() {
        let solver = ScriptedSolver::new(Vec::new());
        let query = PeriodicCycleQuery::new(
            solver,
            requests(),
            QueryOptions {
                delay: Some(0.1),
                ..Default::default()
            },
            &StaticConfig,
        )
        .unwrap();
        assert_eq!(query.delay(), 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_is_a_no_op() {
        let solver = ScriptedSolver::new(vec![Step::Respond(batch_of(1)), Step::Fail("end")]);
        let mut query =
            PeriodicCycleQuery::new(solver, requests(), QueryOptions::default(), &StaticConfig)
                .unwrap();
        query.start();
        query.start();
        assert_eq!(query.get_response().await.unwrap(), batch_of(1));
        query.stop_and_wait().await;
    }
}
