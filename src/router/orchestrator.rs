//! Request Orchestrator
//!
//! Single entry point for a logical request. Composes, outermost first:
//!
//! 1. Session-mismatch retry, with one remote-region attempt when remote
//!    reads are preferred
//! 2. Gone/RetryWith retry in the target region, racing a bounded
//!    cross-region fallback for reads stuck in a long backoff
//! 3. One attempt: resolve, select, send through the pooled transport.
//!    Strong and bounded-staleness reads go to a read quorum.
//! 4. Client-side session check, barriers, session-token merge
//!
//! Attempts of one request never overlap except for that fallback race.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::collaborators::{AddressResolver, CpuMonitor, RequestCodec};
use super::diagnostics::RequestDiagnostics;
use super::model::{ConsistencyLevel, OperationType, StoreRequest, StoreResponse};
use super::quorum::{evaluate, quorum_progress, read_quorum, QuorumResult};
use crate::barrier::{BarrierCoordinator, BarrierTarget};
use crate::config::{ConfigResult, RouterConfig};
use crate::errors::{RouterError, RouterErrorKind, RouterResult};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry, Timer};
use crate::replica::{ReplicaEndpoint, ReplicaSelector};
use crate::retry::{
    execute_with_retry, execute_with_retry_and_fallback, GoneAndRetryWithPolicy,
    GoneOnlyRetryPolicy, RoutingDirectives, SessionMismatchRetryPolicy,
};
use crate::session::SessionContainer;
use crate::transport::{Connector, TransportClient};

/// Services the orchestrator consumes.
#[derive(Clone)]
pub struct Collaborators {
    pub connector: Arc<dyn Connector>,
    pub resolver: Arc<dyn AddressResolver>,
    pub codec: Arc<dyn RequestCodec>,
    pub cpu: Arc<dyn CpuMonitor>,
}

/// Routes requests to replicas.
pub struct RequestOrchestrator {
    config: RouterConfig,
    transport: TransportClient,
    resolver: Arc<dyn AddressResolver>,
    codec: Arc<dyn RequestCodec>,
    cpu: Arc<dyn CpuMonitor>,
    selector: ReplicaSelector,
    sessions: SessionContainer,
    barrier: BarrierCoordinator,
    metrics: Arc<MetricsRegistry>,
}

impl RequestOrchestrator {
    /// Validate `config` and wire the components together.
    pub fn new(config: RouterConfig, collaborators: Collaborators) -> ConfigResult<Self> {
        config.validate()?;
        let metrics = Arc::new(MetricsRegistry::new());
        Ok(Self {
            transport: TransportClient::new(
                collaborators.connector,
                config.pool.clone(),
                Arc::clone(&metrics),
            ),
            resolver: collaborators.resolver,
            codec: collaborators.codec,
            cpu: collaborators.cpu,
            selector: ReplicaSelector::new(config.rng_seed, config.replica.health_grace_period()),
            sessions: SessionContainer::new(),
            barrier: BarrierCoordinator::new(config.barrier.clone(), Arc::clone(&metrics)),
            metrics,
            config,
        })
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn sessions(&self) -> &SessionContainer {
        &self.sessions
    }

    pub fn transport(&self) -> &TransportClient {
        &self.transport
    }

    /// Execute one logical request.
    ///
    /// Session reads without an explicit token use the cached token of
    /// their partition. Cancelling `cancel` unwinds every wait and attempt.
    pub async fn execute(
        &self,
        mut request: StoreRequest,
        cancel: &CancellationToken,
    ) -> RouterResult<StoreResponse> {
        let timer = Timer::new();
        let consistency = request.consistency.unwrap_or(self.config.default_consistency);
        if consistency == ConsistencyLevel::Session
            && request.operation.is_read_only()
            && request.session_token.is_none()
        {
            request.session_token = self
                .sessions
                .resolve(&request.partition.collection, &request.partition.range_id);
        }

        let diagnostics = Arc::new(RequestDiagnostics::new(Arc::clone(&self.cpu)));
        let result = self
            .execute_with_session_retry(&request, consistency, &diagnostics, cancel)
            .await;

        let activity_id = request.activity_id.to_string();
        let partition = request.partition.to_string();
        match &result {
            Ok(response) => {
                self.metrics.increment_requests_executed();
                log_event_with_fields(
                    Event::RequestComplete,
                    &[
                        ("activity_id", activity_id.as_str()),
                        ("partition", partition.as_str()),
                        ("status", response.status_code.to_string().as_str()),
                        ("elapsed_ms", timer.elapsed_ms().as_str()),
                    ],
                );
            }
            Err(error) => {
                self.metrics.increment_requests_failed();
                log_event_with_fields(
                    Event::RequestFailed,
                    &[
                        ("activity_id", activity_id.as_str()),
                        ("partition", partition.as_str()),
                        ("error", error.to_string().as_str()),
                        ("elapsed_ms", timer.elapsed_ms().as_str()),
                    ],
                );
            }
        }
        result
    }

    async fn execute_with_session_retry(
        &self,
        request: &StoreRequest,
        consistency: ConsistencyLevel,
        diagnostics: &Arc<RequestDiagnostics>,
        cancel: &CancellationToken,
    ) -> RouterResult<StoreResponse> {
        let mut policy = SessionMismatchRetryPolicy::new(&self.config.session_retry);
        let local = execute_with_retry(&mut policy, cancel, move |retry| async move {
            if retry.is_some() {
                self.metrics.increment_session_mismatch_retries();
            }
            self.execute_in_region(request, None, consistency, diagnostics, cancel)
                .await
        })
        .await;

        let error = match local {
            Err(error) if error.kind() == RouterErrorKind::ReadSessionNotAvailable => error,
            other => return other,
        };
        let remote = self.config.preferred_regions.get(1);
        match remote {
            Some(remote)
                if self.config.session_retry.remote_region_preferred
                    && request.operation.is_read_only() =>
            {
                self.metrics.increment_session_mismatch_retries();
                log_event_with_fields(
                    Event::SessionMismatchRetry,
                    &[("region", remote.as_str()), ("attempt", "remote")],
                );
                self.execute_in_region(request, Some(remote), consistency, diagnostics, cancel)
                    .await
            }
            _ => Err(error),
        }
    }

    /// Gone/RetryWith retry against one region. `None` is the local region.
    async fn execute_in_region(
        &self,
        request: &StoreRequest,
        region: Option<&str>,
        consistency: ConsistencyLevel,
        diagnostics: &Arc<RequestDiagnostics>,
        cancel: &CancellationToken,
    ) -> RouterResult<StoreResponse> {
        let mut policy =
            GoneAndRetryWithPolicy::new(&self.config.retry, self.config.default_consistency)
                .with_diagnostics(Arc::clone(diagnostics));

        let fallback_region = match region {
            None if request.operation.is_read_only() => {
                self.config.preferred_regions.get(1).map(String::as_str)
            }
            _ => None,
        };
        let fallback = fallback_region.map(move |remote| {
            move || async move {
                self.metrics.increment_region_fallbacks();
                let mut policy = GoneOnlyRetryPolicy::new(&self.config.retry);
                execute_with_retry(&mut policy, cancel, move |directives| {
                    self.attempt(request, Some(remote), consistency, directives, diagnostics, cancel)
                })
                .await
            }
        });

        execute_with_retry_and_fallback(
            &mut policy,
            cancel,
            self.config.retry.region_reroute_min_backoff(),
            move |directives| {
                self.attempt(request, region, consistency, directives, diagnostics, cancel)
            },
            fallback,
        )
        .await
    }

    /// One attempt: resolve, pick replicas, send, then post-process.
    async fn attempt(
        &self,
        request: &StoreRequest,
        region: Option<&str>,
        consistency: ConsistencyLevel,
        directives: Option<RoutingDirectives>,
        diagnostics: &Arc<RequestDiagnostics>,
        cancel: &CancellationToken,
    ) -> RouterResult<StoreResponse> {
        let force_refresh = match &directives {
            Some(directives) => {
                self.metrics.increment_retries();
                directives.force_address_refresh
                    || directives.force_name_refresh
                    || directives.force_partition_map_refresh
                    || directives.clear_routing_identity
            }
            None => false,
        };

        let region = region.or_else(|| self.config.local_region());
        let replicas = self
            .resolver
            .resolve_addresses(&request.partition, region, force_refresh)
            .await?;
        if replicas.is_empty() {
            return Err(RouterError::gone(format!(
                "no replicas resolved for {}",
                request.partition
            )));
        }

        let response = if request.operation.is_write() {
            let primary = primary_of(&replicas).ok_or_else(|| {
                RouterError::gone(format!("no primary replica for {}", request.partition))
            })?;
            let response = self.send_to(&primary, request, diagnostics, cancel).await?;
            self.await_global_commit(request, consistency, &primary, &response, diagnostics, cancel)
                .await?;
            response
        } else if request.operation != OperationType::Barrier && consistency.requires_read_barrier()
        {
            self.quorum_read(&replicas, request, consistency, diagnostics, cancel)
                .await?
        } else {
            let response = self.read_from(&replicas, request, diagnostics, cancel).await?;
            self.check_session(request, consistency, &response)?;
            response
        };

        if let Some(token) = &response.session_token {
            self.sessions
                .apply(&request.partition.collection, &request.partition.range_id, token)?;
        }
        Ok(response)
    }

    /// Try replicas best-first until one answers.
    async fn read_from(
        &self,
        replicas: &[Arc<ReplicaEndpoint>],
        request: &StoreRequest,
        diagnostics: &Arc<RequestDiagnostics>,
        cancel: &CancellationToken,
    ) -> RouterResult<StoreResponse> {
        let failed = diagnostics.failed_replicas();
        let ordered =
            self.selector
                .select(replicas, failed.as_ref(), self.config.replica.validation_enabled);

        let mut last_error = None;
        for endpoint in ordered {
            match self.send_to(&endpoint, request, diagnostics, cancel).await {
                Ok(response) => return Ok(response),
                Err(error) if error.marks_replica_unhealthy() => last_error = Some(error),
                Err(error) => return Err(error),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            RouterError::gone(format!("no replica answered for {}", request.partition))
        }))
    }

    /// Send to replicas best-first until `wanted` have answered.
    ///
    /// Replicas that fail in a way that marks them unhealthy are skipped.
    /// May return fewer answers than wanted.
    async fn read_many(
        &self,
        replicas: &[Arc<ReplicaEndpoint>],
        request: &StoreRequest,
        wanted: usize,
        diagnostics: &Arc<RequestDiagnostics>,
        cancel: &CancellationToken,
    ) -> RouterResult<Vec<StoreResponse>> {
        let failed = diagnostics.failed_replicas();
        let ordered =
            self.selector
                .select(replicas, failed.as_ref(), self.config.replica.validation_enabled);

        let mut answers = Vec::with_capacity(wanted);
        for endpoint in ordered {
            if answers.len() >= wanted {
                break;
            }
            match self.send_to(&endpoint, request, diagnostics, cancel).await {
                Ok(response) => answers.push(response),
                Err(error) if error.marks_replica_unhealthy() => {}
                Err(error) => return Err(error),
            }
        }
        Ok(answers)
    }

    /// Read from a majority of replicas and return the newest answer once
    /// a quorum holds it.
    ///
    /// A lagging quorum waits on a read barrier. Too few answers is `Gone`,
    /// so the attempt is retried with refreshed addresses.
    async fn quorum_read(
        &self,
        replicas: &[Arc<ReplicaEndpoint>],
        request: &StoreRequest,
        consistency: ConsistencyLevel,
        diagnostics: &Arc<RequestDiagnostics>,
        cancel: &CancellationToken,
    ) -> RouterResult<StoreResponse> {
        let quorum = read_quorum(replicas.len());
        let strong = consistency == ConsistencyLevel::Strong;
        let mut answers = self
            .read_many(replicas, request, quorum, diagnostics, cancel)
            .await?;

        match evaluate(&answers, quorum, strong) {
            QuorumResult::Met { selected, .. } => Ok(answers.swap_remove(selected)),
            QuorumResult::Selected { selected, lsn } => {
                self.await_read_quorum(request, replicas, quorum, lsn, strong, diagnostics, cancel)
                    .await?;
                Ok(answers.swap_remove(selected))
            }
            QuorumResult::NotSelected { answered } => {
                log_event_with_fields(
                    Event::ReadQuorumNotSelected,
                    &[
                        ("partition", request.partition.to_string().as_str()),
                        ("answered", answered.to_string().as_str()),
                        ("quorum", quorum.to_string().as_str()),
                    ],
                );
                Err(RouterError::gone(format!(
                    "read quorum not selected for {}: {} of {} replicas answered",
                    request.partition, answered, quorum
                )))
            }
        }
    }

    async fn send_to(
        &self,
        endpoint: &Arc<ReplicaEndpoint>,
        request: &StoreRequest,
        diagnostics: &RequestDiagnostics,
        cancel: &CancellationToken,
    ) -> RouterResult<StoreResponse> {
        let region = endpoint.region().unwrap_or("default");
        diagnostics.record_contact(region);

        let payload = self.codec.serialize(request)?;
        let bytes = match self.transport.request(endpoint.uri(), payload, cancel).await {
            Ok(bytes) => bytes,
            Err(error) => {
                let error = RouterError::from_transport(error, request.operation.is_read_only());
                if error.marks_replica_unhealthy() {
                    self.mark_failed(endpoint, diagnostics, &error);
                }
                return Err(error);
            }
        };

        let response = self.codec.deserialize(&bytes)?;
        if let Some(error) = RouterError::from_status(
            response.status_code,
            response.sub_status_code,
            &response.body_text(),
        ) {
            if error.kind() == RouterErrorKind::Gone {
                self.mark_failed(endpoint, diagnostics, &error);
            }
            return Err(error);
        }

        endpoint.set_connected();
        diagnostics.record_success(region);
        Ok(response)
    }

    fn mark_failed(
        &self,
        endpoint: &ReplicaEndpoint,
        diagnostics: &RequestDiagnostics,
        error: &RouterError,
    ) {
        endpoint.set_unhealthy();
        if diagnostics.record_failure(endpoint.uri()) {
            self.metrics.increment_replicas_marked_unhealthy();
            log_event_with_fields(
                Event::ReplicaMarkedUnhealthy,
                &[("endpoint", endpoint.uri()), ("error", error.to_string().as_str())],
            );
        }
    }

    /// A session read must observe at least the token it carried.
    fn check_session(
        &self,
        request: &StoreRequest,
        consistency: ConsistencyLevel,
        response: &StoreResponse,
    ) -> RouterResult<()> {
        if consistency != ConsistencyLevel::Session || !request.operation.is_read_only() {
            return Ok(());
        }
        match (&request.session_token, &response.session_token) {
            (Some(required), Some(observed)) if !required.is_valid(observed) => {
                Err(RouterError::read_session_not_available(format!(
                    "replica token {} does not satisfy {}",
                    observed, required
                )))
            }
            _ => Ok(()),
        }
    }

    /// Strong writes wait until the primary reports them globally committed.
    async fn await_global_commit(
        &self,
        request: &StoreRequest,
        consistency: ConsistencyLevel,
        primary: &Arc<ReplicaEndpoint>,
        response: &StoreResponse,
        diagnostics: &Arc<RequestDiagnostics>,
        cancel: &CancellationToken,
    ) -> RouterResult<()> {
        if consistency != ConsistencyLevel::Strong
            || response.global_committed_lsn >= response.lsn
        {
            return Ok(());
        }

        let target = BarrierTarget::global_committed(response.lsn);
        let partition = &request.partition;
        let outcome = self
            .barrier
            .wait(target, cancel, move |_| {
                let endpoint = Arc::clone(primary);
                let probe = StoreRequest::barrier(partition.clone(), target.lsn);
                async move { self.send_to(&endpoint, &probe, diagnostics, cancel).await }
            })
            .await?;
        outcome.into_result()
    }

    /// Probe the whole replica set until a quorum reaches `lsn`.
    ///
    /// Strong reads also wait for `lsn` to be globally committed.
    #[allow(clippy::too_many_arguments)]
    async fn await_read_quorum(
        &self,
        request: &StoreRequest,
        replicas: &[Arc<ReplicaEndpoint>],
        quorum: usize,
        lsn: i64,
        strong: bool,
        diagnostics: &Arc<RequestDiagnostics>,
        cancel: &CancellationToken,
    ) -> RouterResult<()> {
        let target = if strong {
            BarrierTarget::global_committed(lsn)
        } else {
            BarrierTarget::lsn(lsn)
        };
        let partition = &request.partition;
        let outcome = self
            .barrier
            .wait(target, cancel, move |_| async move {
                let probe = StoreRequest::barrier(partition.clone(), lsn);
                let answers = self
                    .read_many(replicas, &probe, replicas.len(), diagnostics, cancel)
                    .await?;
                quorum_progress(&answers, quorum, strong).ok_or_else(|| {
                    RouterError::gone(format!(
                        "barrier probe for {} reached {} of {} replicas",
                        partition,
                        answers.len(),
                        quorum
                    ))
                })
            })
            .await?;
        outcome.into_result()
    }
}

fn primary_of(replicas: &[Arc<ReplicaEndpoint>]) -> Option<Arc<ReplicaEndpoint>> {
    replicas.iter().find(|r| r.is_primary()).cloned()
}
