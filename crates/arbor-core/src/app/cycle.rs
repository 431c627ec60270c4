//! Shared plumbing of the cyclic-query engine.
//!
//! A cyclic query owns exactly two background tasks: the poll loop (the only
//! writer of the shared snapshot) and the callback dispatcher. Waiters in
//! `get_response` and the dispatcher only read the snapshot after being
//! woken by the generation signal, so no further synchronization is needed:
//! the snapshot is always written before the generation is bumped.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::{ValueRequest, ValueResponse};
use crate::error::CommunicationError;
use crate::ports::config::{ConfigProvider, keys, resolve};
use crate::ports::{AsyncSubscriber, RequestSolver, Subscriber};

/// Per-request continuation parameters merged into the next outgoing batch.
pub(crate) type ExtraData = Vec<BTreeMap<String, rmpv::Value>>;

fn stopped_error() -> CommunicationError {
    CommunicationError::runtime(
        "cycle query was stopped; before waiting for a reply you have to start it first",
    )
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Snapshot {
    pub last_response: Vec<ValueResponse>,
    pub last_error: Option<CommunicationError>,
}

/// State shared between the poll task, the dispatcher and any waiters.
pub(crate) struct QueryShared {
    state: Mutex<Snapshot>,
    signal: watch::Sender<u64>,
    active: AtomicBool,
}

impl QueryShared {
    pub fn new() -> Arc<Self> {
        let (signal, _) = watch::channel(0u64);
        Arc::new(Self {
            state: Mutex::new(Snapshot::default()),
            signal,
            active: AtomicBool::new(false),
        })
    }

    /// Update the snapshot without waking anyone (a silently skipped cycle).
    pub fn store(&self, batch: Vec<ValueResponse>, error: Option<CommunicationError>) {
        let mut state = self.state.lock().unwrap();
        state.last_response = batch;
        state.last_error = error;
    }

    /// Update the snapshot, then wake every waiter.
    pub fn publish(&self, batch: Vec<ValueResponse>, error: Option<CommunicationError>) {
        self.store(batch, error);
        self.bump();
    }

    /// Record a terminal error, keeping the last delivered batch, then wake
    /// every waiter.
    pub fn fail(&self, error: CommunicationError) {
        self.state.lock().unwrap().last_error = Some(error);
        self.bump();
    }

    /// Wake every waiter without touching the snapshot.
    pub fn bump(&self) {
        self.signal.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.signal.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.lock().unwrap().clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }
}

/// Marks the query inactive (and releases waiters) when the poll loop ends,
/// whether it returned or was cancelled mid-await.
pub(crate) struct ActiveGuard {
    shared: Arc<QueryShared>,
}

impl ActiveGuard {
    pub fn new(shared: Arc<QueryShared>) -> Self {
        shared.set_active(true);
        Self { shared }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.shared.set_active(false);
        self.shared.bump();
    }
}

/// Read side of a query: suspends until the next delivered batch.
#[derive(Clone)]
pub(crate) struct ResponseWaiter {
    shared: Arc<QueryShared>,
}

impl ResponseWaiter {
    pub async fn next_batch(&self) -> Result<Vec<ValueResponse>, CommunicationError> {
        // Subscribe before the liveness check: a wake between the check and
        // the await would otherwise be lost.
        let mut rx = self.shared.subscribe();
        if !self.shared.is_active() {
            return Err(stopped_error());
        }
        if rx.changed().await.is_err() {
            return Err(stopped_error());
        }
        let snapshot = self.shared.snapshot();
        match snapshot.last_error {
            Some(err) => Err(err),
            None => Ok(snapshot.last_response),
        }
    }

    pub fn last_batch(&self) -> Vec<ValueResponse> {
        self.shared.snapshot().last_response
    }
}

/// Registered callbacks, invoked in registration order (async list first).
#[derive(Default)]
pub(crate) struct CallbackRegistry {
    sync_subs: Mutex<Vec<Arc<dyn Subscriber>>>,
    async_subs: Mutex<Vec<Arc<dyn AsyncSubscriber>>>,
}

impl CallbackRegistry {
    pub fn add_sync(&self, subscriber: Arc<dyn Subscriber>) {
        self.sync_subs.lock().unwrap().push(subscriber);
    }

    pub fn add_async(&self, subscriber: Arc<dyn AsyncSubscriber>) {
        self.async_subs.lock().unwrap().push(subscriber);
    }

    /// A failing subscriber is logged and skipped; it never aborts the
    /// dispatch loop or the other subscribers.
    pub async fn dispatch(&self, batch: &[ValueResponse], query_name: &str) {
        let async_subs: Vec<_> = self.async_subs.lock().unwrap().clone();
        for subscriber in async_subs {
            if let Err(err) = subscriber.on_batch(batch).await {
                tracing::error!(query = query_name, error = %err, "async callback failed");
            }
        }
        let sync_subs: Vec<_> = self.sync_subs.lock().unwrap().clone();
        for subscriber in sync_subs {
            if let Err(err) = subscriber.on_batch(batch) {
                tracing::error!(query = query_name, error = %err, "callback failed");
            }
        }
    }
}

/// Dispatcher task body: forwards every delivered batch to the registered
/// callbacks, replaying the final batch once when the query ends with one.
pub(crate) async fn callback_loop(
    waiter: ResponseWaiter,
    callbacks: Arc<CallbackRegistry>,
    query_name: String,
) {
    loop {
        match waiter.next_batch().await {
            Ok(batch) => callbacks.dispatch(&batch, &query_name).await,
            Err(_) => {
                let last = waiter.last_batch();
                if !last.is_empty() {
                    callbacks.dispatch(&last, &query_name).await;
                }
                return;
            }
        }
    }
}

/// Options common to both query variants.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Minimum interval between responses, seconds. Non-positive or unset
    /// falls back to configuration.
    pub delay: Option<f64>,

    /// Name used to tell queries apart in logs.
    pub query_name: Option<String>,

    /// Consecutive timeouts tolerated before the query aborts; `-1`
    /// disables the check. Unset falls back to configuration.
    pub max_missed_msg: Option<i64>,

    /// Runtime to spawn the background tasks on. Unset discovers the
    /// ambient runtime; construction fails without one.
    pub handle: Option<Handle>,
}

/// State and lifecycle shared by the periodic and conditional variants.
pub(crate) struct QueryCore {
    name: String,
    pub(crate) solver: Arc<dyn RequestSolver>,
    pub(crate) requests: Vec<ValueRequest>,
    pub(crate) delay: f64,
    pub(crate) max_missed_msg: i64,
    pub(crate) shared: Arc<QueryShared>,
    callbacks: Arc<CallbackRegistry>,
    handle: Handle,
    poll_task: Option<JoinHandle<()>>,
    callback_task: Option<JoinHandle<()>>,
}

impl QueryCore {
    pub fn new(
        component: &str,
        default_name: &str,
        solver: Arc<dyn RequestSolver>,
        requests: Vec<ValueRequest>,
        opts: QueryOptions,
        cfg: &dyn ConfigProvider,
    ) -> Result<Self, CommunicationError> {
        let handle = match opts.handle {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| {
                CommunicationError::runtime("can not get a current async runtime")
            })?,
        };
        let delay = match opts.delay {
            Some(delay) if delay > 0.0 => delay,
            _ => resolve(cfg, component, keys::DELAY, 5.0),
        };
        let max_missed_msg = opts
            .max_missed_msg
            .unwrap_or_else(|| resolve(cfg, component, keys::MAX_MISSED_MSG, 3.0) as i64);
        Ok(Self {
            name: opts.query_name.unwrap_or_else(|| default_name.to_owned()),
            solver,
            requests,
            delay,
            max_missed_msg,
            shared: QueryShared::new(),
            callbacks: Arc::new(CallbackRegistry::default()),
            handle,
            poll_task: None,
            callback_task: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.poll_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn waiter(&self) -> ResponseWaiter {
        ResponseWaiter {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Launch the poll loop and the callback dispatcher. The caller has
    /// already checked that the query is not running.
    pub fn start_with<F>(&mut self, poll_loop: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shared.set_active(true);
        self.poll_task = Some(self.handle.spawn(poll_loop));
        self.callback_task = Some(self.handle.spawn(callback_loop(
            self.waiter(),
            Arc::clone(&self.callbacks),
            self.name.clone(),
        )));
    }

    pub fn stop(&mut self) {
        if let Some(task) = &self.poll_task {
            if !task.is_finished() {
                task.abort();
            }
        }
        self.shared.set_active(false);
        // Release blocked waiters; they observe the last snapshot.
        self.shared.bump();
        if let Some(task) = &self.callback_task {
            if !task.is_finished() {
                task.abort();
            }
        }
    }

    pub async fn stop_and_wait(&mut self) {
        self.stop();
        for task in [self.poll_task.take(), self.callback_task.take()].into_iter().flatten() {
            if let Err(err) = task.await {
                // Cancellation is the expected outcome of stop().
                if !err.is_cancelled() {
                    tracing::warn!(query = %self.name, error = %err, "background task ended abnormally");
                }
            }
        }
    }

    pub async fn get_response(&self) -> Result<Vec<ValueResponse>, CommunicationError> {
        if !self.is_running() && !self.shared.is_active() {
            return Err(stopped_error());
        }
        self.waiter().next_batch().await
    }

    pub fn add_callback(&self, subscriber: Arc<dyn Subscriber>) {
        self.callbacks.add_sync(subscriber);
    }

    pub fn add_async_callback(&self, subscriber: Arc<dyn AsyncSubscriber>) {
        self.callbacks.add_async(subscriber);
    }
}

impl Drop for QueryCore {
    fn drop(&mut self) {
        if self.is_running() {
            tracing::warn!(
                query = %self.name,
                "cycle query dropped while running; call stop_and_wait() before shutdown"
            );
            self.stop();
        }
    }
}

/// Deep-copy the request templates and merge the carried-forward
/// continuation parameters into each copy. The templates themselves never
/// leave the poll task.
pub(crate) fn outgoing_batch(requests: &[ValueRequest], extra: &ExtraData) -> Vec<ValueRequest> {
    requests
        .iter()
        .enumerate()
        .map(|(i, request)| {
            let mut copy = request.clone();
            if let Some(data) = extra.get(i) {
                copy.request_data
                    .extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            copy
        })
        .collect()
}

/// Common contract of the cyclic query variants.
#[async_trait]
pub trait CycleQuery: Send {
    fn name(&self) -> &str;

    fn is_running(&self) -> bool;

    /// No-op with a warning when the query is already running.
    fn start(&mut self);

    /// Cancel the background tasks and release blocked waiters.
    fn stop(&mut self);

    /// `stop()`, then wait until both background tasks have unwound.
    async fn stop_and_wait(&mut self);

    /// Suspend until the next delivered batch. Fails immediately with a
    /// Runtime error when the query is not running; fails with the recorded
    /// error when the poll loop terminated on one.
    async fn get_response(&self) -> Result<Vec<ValueResponse>, CommunicationError>;

    fn add_callback(&self, subscriber: Arc<dyn Subscriber>);

    fn add_async_callback(&self, subscriber: Arc<dyn AsyncSubscriber>);
}
