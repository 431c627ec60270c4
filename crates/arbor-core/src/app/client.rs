//! High-level client facade: one-shot value calls and subscription helpers
//! built on top of a [`RequestSolver`].

use std::sync::Arc;

use crate::domain::{
    Address, Identity, RequestParams, RequestType, TreeUser, ValueRequest, ValueResponse,
};
use crate::error::CommunicationError;
use crate::ports::config::ConfigProvider;
use crate::ports::{AsyncSubscriber, RequestSolver, Subscriber};

use super::conditional::ConditionalCycleQuery;
use super::cycle::{CycleQuery, QueryOptions};
use super::periodic::PeriodicCycleQuery;

const DEFAULT_SUBSCRIPTION_NAME: &str = "Default_subscription";
const DEFAULT_CYCLE_REQUEST_NAME: &str = "Default_cycle_request";

/// Reserved address answered by the router itself.
const ALIVE_ADDRESS: &str = "server.is_alive";

/// Client-side entry point to the data-collection tree.
///
/// Owns the identity attached to outgoing requests and the configuration
/// profile used to fill request defaults. All traffic goes through the
/// injected solver; the client itself holds no connection state, so it is
/// cheap to clone.
#[derive(Clone)]
pub struct TreeClient {
    solver: Arc<dyn RequestSolver>,
    user: TreeUser,
    cfg: Arc<dyn ConfigProvider>,
}

impl TreeClient {
    pub fn new(
        solver: Arc<dyn RequestSolver>,
        user: TreeUser,
        cfg: Arc<dyn ConfigProvider>,
    ) -> Self {
        Self { solver, user, cfg }
    }

    pub fn user(&self) -> &TreeUser {
        &self.user
    }

    /// Read the value behind `address`. Waits for the answer.
    pub async fn get(
        &self,
        address: &str,
        params: RequestParams,
    ) -> Result<ValueResponse, CommunicationError> {
        let request = self.build_request(address, params, RequestType::Get)?;
        self.send_single(request, false)
            .await?
            .ok_or_else(|| CommunicationError::runtime("solver returned no responses"))
    }

    /// Write a value. With `no_wait` the call returns right after sending
    /// and yields no response.
    pub async fn put(
        &self,
        address: &str,
        params: RequestParams,
        no_wait: bool,
    ) -> Result<Option<ValueResponse>, CommunicationError> {
        let request = self.build_request(address, params, RequestType::Put)?;
        self.send_single(request, no_wait).await
    }

    /// Trigger the action behind `address`.
    pub async fn execute(
        &self,
        address: &str,
        params: RequestParams,
        no_wait: bool,
    ) -> Result<Option<ValueResponse>, CommunicationError> {
        let request = self.build_request(address, params, RequestType::Execute)?;
        self.send_single(request, no_wait).await
    }

    fn build_request(
        &self,
        address: &str,
        mut params: RequestParams,
        request_type: RequestType,
    ) -> Result<ValueRequest, CommunicationError> {
        params.request_type = request_type;
        if params.user.is_none() {
            params.user = Some(self.user.clone());
        }
        let address = Address::parse(address)
            .map_err(|err| CommunicationError::runtime(err.to_string()))?;
        Ok(ValueRequest::new(address, params, self.cfg.as_ref()))
    }

    /// Send one request. `None` comes back when `no_wait` was set.
    pub async fn send_single(
        &self,
        request: ValueRequest,
        no_wait: bool,
    ) -> Result<Option<ValueResponse>, CommunicationError> {
        let responses = self.send_multi(vec![request], no_wait).await?;
        if no_wait {
            return Ok(None);
        }
        let mut responses = responses
            .ok_or_else(|| CommunicationError::runtime("solver returned no responses"))?;
        if responses.is_empty() {
            return Err(CommunicationError::runtime(
                "solver returned an empty response batch",
            ));
        }
        Ok(Some(responses.remove(0)))
    }

    /// Send a batch of requests in one exchange. The transport deadline is
    /// the earliest deadline found in the batch; anonymous requests get this
    /// client's identity.
    pub async fn send_multi(
        &self,
        mut requests: Vec<ValueRequest>,
        no_wait: bool,
    ) -> Result<Option<Vec<ValueResponse>>, CommunicationError> {
        let mut shortest: Option<f64> = None;
        for request in &mut requests {
            if request.request_timeout > 0.0
                && shortest.is_none_or(|s| request.request_timeout < s)
            {
                shortest = Some(request.request_timeout);
            }
            if request.user.id().is_empty() && request.user.name.is_empty() {
                request.user = self.user.clone();
            }
        }
        if shortest.is_none() {
            tracing::error!(
                "unable to take a timeout value from the request batch, the requests are incomplete"
            );
        }
        self.solver.send(requests, shortest, no_wait).await
    }

    /// Ping the router with a read of its reserved service address.
    /// `request_timeout` is a duration in seconds; unset falls back to the
    /// configured request default.
    pub async fn server_is_alive(&self, request_timeout: Option<f64>) -> bool {
        let params = RequestParams {
            request_timeout: request_timeout.map(|d| crate::clock::now_ts() + d),
            ..Default::default()
        };
        match self.get(ALIVE_ADDRESS, params).await {
            Ok(response) => response.status,
            Err(err) => {
                tracing::debug!(error = %err, "alive check failed");
                false
            }
        }
    }

    /// Build a change-driven subscription for `address`. The query is
    /// returned stopped; call `start()` on it.
    ///
    /// `time_of_data_tolerance` tells the server how stale an answer may be;
    /// unset it defaults to the delivery interval, so the server refreshes
    /// at least as often as it may answer.
    pub fn subscribe(
        &self,
        address: &str,
        time_of_data_tolerance: Option<f64>,
        mut opts: QueryOptions,
    ) -> Result<ConditionalCycleQuery, CommunicationError> {
        let tolerance = time_of_data_tolerance.or(opts.delay);
        let request = ValueRequest::parse(
            address,
            RequestParams {
                time_of_data_tolerance: tolerance,
                user: Some(self.user.clone()),
                ..Default::default()
            },
            self.cfg.as_ref(),
        )
        .map_err(|err| CommunicationError::runtime(err.to_string()))?;
        opts.query_name
            .get_or_insert_with(|| DEFAULT_SUBSCRIPTION_NAME.to_owned());
        ConditionalCycleQuery::new(
            Arc::clone(&self.solver),
            vec![request],
            None,
            opts,
            self.cfg.as_ref(),
        )
    }

    /// [`TreeClient::subscribe`], with the given callbacks registered and
    /// the query already started.
    pub fn subscribe_with_callback(
        &self,
        address: &str,
        time_of_data_tolerance: Option<f64>,
        opts: QueryOptions,
        callback: Option<Arc<dyn Subscriber>>,
        async_callback: Option<Arc<dyn AsyncSubscriber>>,
    ) -> Result<ConditionalCycleQuery, CommunicationError> {
        let mut query = self.subscribe(address, time_of_data_tolerance, opts)?;
        if let Some(callback) = callback {
            query.add_callback(callback);
        }
        if let Some(callback) = async_callback {
            query.add_async_callback(callback);
        }
        query.start();
        Ok(query)
    }

    /// Run a started subscription until it fails, feeding the callbacks,
    /// then tear it down. Returns once the subscription has fully stopped.
    pub async fn run_subscription_callbacks(
        &self,
        address: &str,
        time_of_data_tolerance: Option<f64>,
        opts: QueryOptions,
        callback: Option<Arc<dyn Subscriber>>,
        async_callback: Option<Arc<dyn AsyncSubscriber>>,
    ) -> Result<(), CommunicationError> {
        let mut query = self.subscribe_with_callback(
            address,
            time_of_data_tolerance,
            opts,
            callback,
            async_callback,
        )?;
        loop {
            match query.get_response().await {
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(
                        query = query.name(),
                        error = %err,
                        "subscription updater stopped"
                    );
                    break;
                }
            }
        }
        query.stop_and_wait().await;
        Ok(())
    }

    /// Build a fixed-interval query for `address`. The query is returned
    /// stopped; call `start()` on it.
    pub fn periodic_query(
        &self,
        address: &str,
        time_of_data_tolerance: Option<f64>,
        log_missed_msg: bool,
        mut opts: QueryOptions,
    ) -> Result<PeriodicCycleQuery, CommunicationError> {
        let tolerance = time_of_data_tolerance.or(opts.delay);
        let request = ValueRequest::parse(
            address,
            RequestParams {
                time_of_data_tolerance: tolerance,
                user: Some(self.user.clone()),
                ..Default::default()
            },
            self.cfg.as_ref(),
        )
        .map_err(|err| CommunicationError::runtime(err.to_string()))?;
        opts.query_name
            .get_or_insert_with(|| DEFAULT_CYCLE_REQUEST_NAME.to_owned());
        let mut query = PeriodicCycleQuery::new(
            Arc::clone(&self.solver),
            vec![request],
            opts,
            self.cfg.as_ref(),
        )?;
        query.log_missed_msg = log_missed_msg;
        Ok(query)
    }
}
