//! Router & executor: candidate assembly, model mapping, the attempt loop
//! with retry/cooldown handling, and streamed response accounting.

use std::sync::Arc;

use bytes::Bytes;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use maxx_adapter::{
    Adapter, AdapterRegistry, CanonicalRequest, Disposition, HttpClient, Payload, PreparedRequest,
    ResponseTranslator, UpstreamBody, UpstreamFailure, parse_retry_after, translate_nonstream,
};
use maxx_common::{ClientType, ProviderConfig, ProviderType, RequestStatus, TokenMetrics};
use maxx_pricing::{PriceRecord, Pricing};
use maxx_storage::entities::{api_tokens, projects, routes};
use maxx_storage::store::{AttemptPatch, NewAttempt, NewProxyRequest, RequestPatch};
use maxx_storage::{SnapshotCache, Store, StoreSnapshot};

use crate::events::EventHub;
use crate::mapping::{MappingContext, resolve_mapped_model};
use crate::retry::RetryPolicy;

/// Failures of one (provider, client type, reason) before a derived
/// cooldown kicks in.
const FAILURE_PROMOTION_THRESHOLD: i64 = 5;
const DERIVED_COOLDOWN: std::time::Duration = std::time::Duration::from_secs(5 * 60);
/// Cap on stored request/response info blobs.
const MAX_INFO_BYTES: usize = 256 * 1024;

#[derive(Debug)]
pub struct ServeOutcome {
    pub status: u16,
    pub content_type: &'static str,
    pub body: ServeBody,
}

#[derive(Debug)]
pub enum ServeBody {
    /// Fully materialized response body.
    Complete(Bytes),
    /// Chunks flow through the channel handed to `serve`.
    Streaming,
}

#[derive(Clone)]
pub struct ProxyEngine {
    store: Store,
    cache: Arc<SnapshotCache>,
    registry: AdapterRegistry,
    http: HttpClient,
    events: EventHub,
    instance_id: String,
}

struct Candidate {
    route: routes::Model,
    provider_id: i64,
    provider_type: ProviderType,
    config: ProviderConfig,
    adapter: Arc<dyn Adapter>,
    policy: RetryPolicy,
    mapped_model: Option<String>,
}

impl ProxyEngine {
    pub fn new(
        store: Store,
        cache: Arc<SnapshotCache>,
        registry: AdapterRegistry,
        http: HttpClient,
        events: EventHub,
        instance_id: String,
    ) -> Self {
        Self {
            store,
            cache,
            registry,
            http,
            events,
            instance_id,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Model ids this deployment can serve, for `GET /v1/models`:
    /// mapping targets plus priced models.
    pub fn known_models(&self) -> Vec<String> {
        let snapshot = self.cache.current();
        let mut models: Vec<String> = snapshot
            .mappings
            .iter()
            .map(|mapping| mapping.target.clone())
            .chain(snapshot.prices.iter().map(|price| price.model_id.clone()))
            .collect();
        models.sort();
        models.dedup();
        models
    }

    /// The data-plane entry point. Tries candidate routes strictly in
    /// position order as of entry; streams the first success back
    /// through `client_tx`.
    pub async fn serve(
        &self,
        mut req: CanonicalRequest,
        project: Option<&projects::Model>,
        api_token: Option<&api_tokens::Model>,
        client_tx: mpsc::Sender<Bytes>,
    ) -> ServeOutcome {
        let snapshot = self.cache.current();
        let scope_project_id = project
            .map(|project| project.id)
            .or(api_token.and_then(|token| token.project_id))
            .unwrap_or(0);

        if let Some(session_id) = req.session_id.clone()
            && let Err(err) = self.store.ensure_session(&session_id).await
        {
            warn!(error = %err, "session record failed");
        }

        let request_row_id = match self
            .store
            .create_proxy_request(NewProxyRequest {
                instance_id: self.instance_id.clone(),
                request_id: uuid::Uuid::new_v4().to_string(),
                session_id: req.session_id.clone(),
                client_type: req.client_type,
                request_model: Some(req.request_model().to_string()),
                is_stream: req.stream,
                project_id: (scope_project_id != 0).then_some(scope_project_id),
                api_token_id: api_token.map(|token| token.id),
                request_info: bounded_info(&req),
            })
            .await
        {
            Ok(id) => id,
            Err(err) => {
                error!(error = %err, "request admission failed");
                return self.error_outcome(500, "internal error");
            }
        };

        let candidates = self
            .assemble_candidates(
                &snapshot,
                scope_project_id,
                req.client_type,
                api_token,
                req.request_model(),
            )
            .await;
        if candidates.is_empty() {
            self.finish_request(
                request_row_id,
                RequestPatch {
                    status: Some(RequestStatus::Failed),
                    status_code: Some(503),
                    error: Some("no upstream available".into()),
                    end_time: Some(OffsetDateTime::now_utc()),
                    ..Default::default()
                },
            )
            .await;
            return self.error_outcome(503, "no upstream available");
        }

        let request_model = req.request_model().to_string();
        for candidate in candidates {
            if client_tx.is_closed() && req.stream {
                self.finish_request(
                    request_row_id,
                    RequestPatch {
                        status: Some(RequestStatus::Cancelled),
                        end_time: Some(OffsetDateTime::now_utc()),
                        ..Default::default()
                    },
                )
                .await;
                return self.error_outcome(499, "client closed request");
            }

            let effective_model = candidate
                .mapped_model
                .clone()
                .unwrap_or_else(|| request_model.clone());
            req.set_model(&effective_model);

            match self
                .run_candidate(
                    &snapshot,
                    &mut req,
                    &candidate,
                    &request_model,
                    api_token.map(|token| token.id),
                    request_row_id,
                    &client_tx,
                )
                .await
            {
                CandidateOutcome::Served(outcome) => return outcome,
                CandidateOutcome::Cancelled => {
                    self.finish_request(
                        request_row_id,
                        RequestPatch {
                            status: Some(RequestStatus::Cancelled),
                            end_time: Some(OffsetDateTime::now_utc()),
                            ..Default::default()
                        },
                    )
                    .await;
                    return self.error_outcome(499, "client closed request");
                }
                CandidateOutcome::NextRoute { reason } => {
                    debug!(
                        route_id = candidate.route.id,
                        provider_id = candidate.provider_id,
                        reason,
                        "falling through to next route"
                    );
                }
            }
        }

        self.finish_request(
            request_row_id,
            RequestPatch {
                status: Some(RequestStatus::Failed),
                status_code: Some(503),
                error: Some("no upstream available".into()),
                end_time: Some(OffsetDateTime::now_utc()),
                ..Default::default()
            },
        )
        .await;
        self.error_outcome(503, "no upstream available")
    }

    /// Ordered eligible routes: enabled, provider live, no active
    /// cooldown, adapter accepts the client type. Position order is
    /// frozen at assembly; concurrent re-sorts do not interrupt us.
    async fn assemble_candidates(
        &self,
        snapshot: &StoreSnapshot,
        project_id: i64,
        client_type: ClientType,
        api_token: Option<&api_tokens::Model>,
        request_model: &str,
    ) -> Vec<Candidate> {
        let now = OffsetDateTime::now_utc();
        let cooldowns: Vec<(i64, String)> = match self.store.active_cooldowns(now).await {
            Ok(rows) => rows
                .into_iter()
                .map(|row| (row.provider_id, row.client_type))
                .collect(),
            Err(err) => {
                warn!(error = %err, "cooldown read failed, assuming none");
                Vec::new()
            }
        };

        let mut candidates = Vec::new();
        for route in snapshot.routes_for(project_id, client_type) {
            if !route.is_enabled {
                continue;
            }
            let Some(provider) = snapshot.providers_by_id.get(&route.provider_id) else {
                continue;
            };
            if provider.deleted_at.is_some() {
                continue;
            }
            if cooldowns
                .iter()
                .any(|(provider_id, ct)| {
                    *provider_id == provider.id && ct == client_type.as_str()
                })
            {
                debug!(provider_id = provider.id, "provider on cooldown, skipped");
                continue;
            }
            let Some(provider_type) = ProviderType::parse(&provider.provider_type) else {
                continue;
            };
            if !supported_client(&provider.supported_client_types, client_type) {
                continue;
            }
            let Ok(config) = serde_json::from_value::<ProviderConfig>(provider.config.clone())
            else {
                warn!(provider_id = provider.id, "undecodable provider config");
                continue;
            };
            let Some(adapter) = self.registry.get(provider_type) else {
                continue;
            };
            if !adapter.accepts(&config, client_type) {
                continue;
            }

            let policy = route
                .retry_config_id
                .and_then(|id| snapshot.retry_configs_by_id.get(&id))
                .map(RetryPolicy::from_entity)
                .unwrap_or_default();

            // Mapping scopes most-specific-first: route > api_token >
            // project > provider > global.
            let mapping_ctx = MappingContext {
                route_id: Some(route.id),
                api_token_id: api_token.map(|token| token.id),
                project_id: (project_id != 0).then_some(project_id),
                provider_id: Some(provider.id),
                client_type: Some(client_type),
                provider_type: Some(provider_type.as_str()),
            };
            let mapped_model =
                resolve_mapped_model(&snapshot.mappings, &mapping_ctx, request_model);

            candidates.push(Candidate {
                route: route.clone(),
                provider_id: provider.id,
                provider_type,
                config,
                adapter,
                policy,
                mapped_model,
            });
        }
        candidates
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_candidate(
        &self,
        snapshot: &StoreSnapshot,
        req: &mut CanonicalRequest,
        candidate: &Candidate,
        request_model: &str,
        api_token_id: Option<i64>,
        request_row_id: i64,
        client_tx: &mpsc::Sender<Bytes>,
    ) -> CandidateOutcome {
        let mapped = candidate.mapped_model.clone();

        let attempt_id = match self
            .store
            .create_attempt(NewAttempt {
                proxy_request_id: request_row_id,
                instance_id: self.instance_id.clone(),
                client_type: req.client_type,
                request_model: Some(request_model.to_string()),
                mapped_model: mapped.clone(),
                project_id: (candidate.route.project_id != 0)
                    .then_some(candidate.route.project_id),
                route_id: candidate.route.id,
                provider_id: candidate.provider_id,
                api_token_id,
            })
            .await
        {
            Ok(id) => id,
            Err(err) => {
                error!(error = %err, "attempt admission failed");
                return CandidateOutcome::NextRoute {
                    reason: "store_error",
                };
            }
        };

        let mut try_index: u32 = 0;
        loop {
            if client_tx.is_closed() && req.stream {
                self.fail_attempt(attempt_id, RequestStatus::Cancelled, None, "client gone")
                    .await;
                return CandidateOutcome::Cancelled;
            }

            let prepared = match candidate.adapter.prepare_upstream_request(&candidate.config, req)
            {
                Ok(prepared) => prepared,
                Err(err) => {
                    self.fail_attempt(attempt_id, RequestStatus::Failed, None, &err.to_string())
                        .await;
                    return CandidateOutcome::NextRoute {
                        reason: "prepare_failed",
                    };
                }
            };

            match self.http.execute(prepared.http.clone()).await {
                Err(err) => {
                    let failure = UpstreamFailure::Transport {
                        message: err.to_string(),
                    };
                    match self
                        .handle_failure(candidate, req, attempt_id, &failure, &mut try_index, None)
                        .await
                    {
                        FailureStep::RetrySame => continue,
                        FailureStep::GiveUp { reason } => {
                            return CandidateOutcome::NextRoute { reason };
                        }
                    }
                }
                Ok(response) if !(200..300).contains(&response.status) => {
                    let retry_after = response
                        .header("retry-after")
                        .and_then(parse_retry_after);
                    let snippet = match response.body {
                        UpstreamBody::Bytes(bytes) => {
                            String::from_utf8_lossy(&bytes[..bytes.len().min(1_024)]).to_string()
                        }
                        UpstreamBody::Stream(_) => String::new(),
                    };
                    let failure = UpstreamFailure::Http {
                        status: response.status,
                        retry_after,
                        body_snippet: snippet,
                    };
                    match self
                        .handle_failure(
                            candidate,
                            req,
                            attempt_id,
                            &failure,
                            &mut try_index,
                            Some(response.status as i32),
                        )
                        .await
                    {
                        FailureStep::RetrySame => continue,
                        FailureStep::GiveUp { reason } => {
                            return CandidateOutcome::NextRoute { reason };
                        }
                    }
                }
                Ok(response) => {
                    return self
                        .complete_success(
                            snapshot,
                            req,
                            candidate,
                            request_row_id,
                            attempt_id,
                            prepared,
                            response,
                            client_tx,
                        )
                        .await;
                }
            }
        }
    }

    async fn handle_failure(
        &self,
        candidate: &Candidate,
        req: &CanonicalRequest,
        attempt_id: i64,
        failure: &UpstreamFailure,
        try_index: &mut u32,
        status_code: Option<i32>,
    ) -> FailureStep {
        match candidate.adapter.classify_error(failure) {
            Disposition::Retryable { reason } => {
                if *try_index < candidate.policy.max_retries {
                    let delay = candidate.policy.delay(*try_index);
                    debug!(
                        attempt_id,
                        reason,
                        delay_ms = delay.as_millis() as u64,
                        "retryable failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    *try_index += 1;
                    FailureStep::RetrySame
                } else {
                    self.fail_attempt(attempt_id, RequestStatus::Failed, status_code, reason)
                        .await;
                    self.note_failure(candidate, req.client_type, reason).await;
                    FailureStep::GiveUp { reason }
                }
            }
            Disposition::Cooldown { reason, duration } => {
                let until = OffsetDateTime::now_utc() + duration;
                if let Err(err) = self
                    .store
                    .upsert_cooldown(candidate.provider_id, req.client_type, until, reason)
                    .await
                {
                    warn!(error = %err, "cooldown write failed");
                }
                info!(
                    provider_id = candidate.provider_id,
                    client_type = %req.client_type,
                    reason,
                    cooldown_secs = duration.as_secs(),
                    "provider placed on cooldown"
                );
                self.note_failure(candidate, req.client_type, reason).await;
                self.fail_attempt(attempt_id, RequestStatus::Failed, status_code, reason)
                    .await;
                FailureStep::GiveUp { reason }
            }
            Disposition::Fatal { reason } => {
                self.note_failure(candidate, req.client_type, reason).await;
                self.fail_attempt(attempt_id, RequestStatus::Failed, status_code, reason)
                    .await;
                FailureStep::GiveUp { reason }
            }
        }
    }

    /// Failure accounting; a count crossing the threshold promotes to a
    /// derived cooldown.
    async fn note_failure(&self, candidate: &Candidate, client_type: ClientType, reason: &str) {
        match self
            .store
            .increment_failure(candidate.provider_id, client_type, reason)
            .await
        {
            Ok(count) if count >= FAILURE_PROMOTION_THRESHOLD => {
                let until = OffsetDateTime::now_utc() + DERIVED_COOLDOWN;
                if let Err(err) = self
                    .store
                    .upsert_cooldown(candidate.provider_id, client_type, until, "failure_threshold")
                    .await
                {
                    warn!(error = %err, "derived cooldown write failed");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "failure count write failed"),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn complete_success(
        &self,
        snapshot: &StoreSnapshot,
        req: &CanonicalRequest,
        candidate: &Candidate,
        request_row_id: i64,
        attempt_id: i64,
        prepared: PreparedRequest,
        response: maxx_adapter::UpstreamResponse,
        client_tx: &mpsc::Sender<Bytes>,
    ) -> CandidateOutcome {
        let created = OffsetDateTime::now_utc().unix_timestamp();
        let pricing = pricing_from_snapshot(snapshot);
        let multiplier = candidate.route.cost_multiplier;
        let content_type = stream_content_type(req.client_type);
        // count_tokens never streams and never prices.
        let is_count_tokens = matches!(req.payload, Payload::ClaudeCountTokens(_));

        match response.body {
            UpstreamBody::Bytes(bytes) => {
                if is_count_tokens {
                    self.settle(
                        request_row_id,
                        attempt_id,
                        candidate,
                        RequestStatus::Completed,
                        200,
                        TokenMetrics::default(),
                        None,
                        0,
                        0,
                        None,
                    )
                    .await;
                    return CandidateOutcome::Served(ServeOutcome {
                        status: 200,
                        content_type: "application/json",
                        body: ServeBody::Complete(bytes),
                    });
                }
                let out = match translate_nonstream(
                    prepared.upstream_dialect,
                    req.client_type,
                    &req.model,
                    created,
                    &bytes,
                ) {
                    Ok(out) => out,
                    Err(err) => {
                        self.fail_attempt(
                            attempt_id,
                            RequestStatus::Failed,
                            None,
                            &err.to_string(),
                        )
                        .await;
                        return CandidateOutcome::NextRoute {
                            reason: "translate_failed",
                        };
                    }
                };
                let price_model = out
                    .response_model
                    .clone()
                    .unwrap_or_else(|| req.model.clone());
                let quote = pricing.quote(&price_model, &out.metrics, multiplier);
                self.settle(
                    request_row_id,
                    attempt_id,
                    candidate,
                    RequestStatus::Completed,
                    200,
                    out.metrics,
                    out.response_model.clone(),
                    quote.cost,
                    quote.price_id,
                    None,
                )
                .await;
                CandidateOutcome::Served(ServeOutcome {
                    status: 200,
                    content_type: "application/json",
                    body: ServeBody::Complete(out.body),
                })
            }
            UpstreamBody::Stream(upstream_rx) => {
                if is_count_tokens {
                    self.fail_attempt(attempt_id, RequestStatus::Failed, None, "unexpected stream")
                        .await;
                    return CandidateOutcome::NextRoute {
                        reason: "unexpected_stream",
                    };
                }
                let translator = match ResponseTranslator::new(
                    prepared.upstream_dialect,
                    req.client_type,
                    &req.model,
                    created,
                ) {
                    Ok(translator) => translator,
                    Err(err) => {
                        self.fail_attempt(
                            attempt_id,
                            RequestStatus::Failed,
                            None,
                            &err.to_string(),
                        )
                        .await;
                        return CandidateOutcome::NextRoute {
                            reason: "translator_unavailable",
                        };
                    }
                };
                let pump = StreamPump {
                    engine: self.clone(),
                    pricing,
                    multiplier,
                    request_row_id,
                    attempt_id,
                    route_id: candidate.route.id,
                    provider_id: candidate.provider_id,
                    client_type: req.client_type,
                    mapped_model: req.model.clone(),
                    client_tx: client_tx.clone(),
                };
                tokio::spawn(pump.run(upstream_rx, translator));
                CandidateOutcome::Served(ServeOutcome {
                    status: 200,
                    content_type,
                    body: ServeBody::Streaming,
                })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn settle(
        &self,
        request_row_id: i64,
        attempt_id: i64,
        candidate: &Candidate,
        status: RequestStatus,
        status_code: i32,
        metrics: TokenMetrics,
        response_model: Option<String>,
        cost: i64,
        price_id: i64,
        ttft_ms: Option<i64>,
    ) {
        let now = OffsetDateTime::now_utc();
        if let Err(err) = self
            .store
            .update_attempt(
                attempt_id,
                AttemptPatch {
                    status: Some(status),
                    status_code: Some(status_code),
                    response_model: response_model.clone(),
                    end_time: Some(now),
                    ttft_ms,
                    metrics: Some(metrics),
                    cost: Some(cost),
                    price_id: Some(price_id),
                    ..Default::default()
                },
            )
            .await
        {
            error!(error = %err, attempt_id, "attempt settle failed");
        }

        // Invariant: request.cost == Σ attempts(request).cost.
        let total_cost = self
            .store
            .sum_attempt_costs(request_row_id)
            .await
            .unwrap_or(cost);
        self.finish_request(
            request_row_id,
            RequestPatch {
                status: Some(status),
                status_code: Some(status_code),
                response_model,
                end_time: Some(now),
                ttft_ms,
                route_id: Some(candidate.route.id),
                provider_id: Some(candidate.provider_id),
                final_attempt_id: Some(attempt_id),
                metrics: Some(metrics),
                cost: Some(total_cost),
                ..Default::default()
            },
        )
        .await;
    }

    async fn finish_request(&self, request_row_id: i64, patch: RequestPatch) {
        if let Err(err) = self.store.update_proxy_request(request_row_id, patch).await {
            error!(error = %err, request_row_id, "request settle failed");
        }
    }

    async fn fail_attempt(
        &self,
        attempt_id: i64,
        status: RequestStatus,
        status_code: Option<i32>,
        reason: &str,
    ) {
        if let Err(err) = self
            .store
            .update_attempt(
                attempt_id,
                AttemptPatch {
                    status: Some(status),
                    status_code,
                    error: Some(reason.to_string()),
                    end_time: Some(OffsetDateTime::now_utc()),
                    ..Default::default()
                },
            )
            .await
        {
            error!(error = %err, attempt_id, "attempt failure write failed");
        }
    }

    fn error_outcome(&self, status: u16, message: &str) -> ServeOutcome {
        ServeOutcome {
            status,
            content_type: "application/json",
            body: ServeBody::Complete(Bytes::from(
                serde_json::json!({"error": message}).to_string(),
            )),
        }
    }
}

enum CandidateOutcome {
    Served(ServeOutcome),
    Cancelled,
    NextRoute { reason: &'static str },
}

enum FailureStep {
    RetrySame,
    GiveUp { reason: &'static str },
}

/// Owns the upstream→client copy loop for one streaming attempt.
struct StreamPump {
    engine: ProxyEngine,
    pricing: Pricing,
    multiplier: i64,
    request_row_id: i64,
    attempt_id: i64,
    route_id: i64,
    provider_id: i64,
    client_type: ClientType,
    mapped_model: String,
    client_tx: mpsc::Sender<Bytes>,
}

impl StreamPump {
    async fn run(
        self,
        mut upstream_rx: mpsc::Receiver<Result<Bytes, maxx_adapter::AdapterError>>,
        mut translator: ResponseTranslator,
    ) {
        let started = OffsetDateTime::now_utc();
        let mut first_byte: Option<OffsetDateTime> = None;
        let mut terminal = RequestStatus::Completed;
        let mut error: Option<String> = None;

        while let Some(item) = upstream_rx.recv().await {
            match item {
                Ok(chunk) => {
                    if first_byte.is_none() {
                        let now = OffsetDateTime::now_utc();
                        first_byte = Some(now);
                        self.stamp_ttft((now - started).whole_milliseconds() as i64).await;
                    }
                    for out in translator.push(&chunk) {
                        if self.client_tx.send(out).await.is_err() {
                            // Client disconnect aborts upstream I/O;
                            // dropping the receiver stops the reader task.
                            terminal = RequestStatus::Cancelled;
                            error = Some("client closed request".into());
                            drop(upstream_rx);
                            self.finalize(&translator, terminal, first_byte, started, error)
                                .await;
                            return;
                        }
                    }
                }
                Err(err) => {
                    // Bytes were already committed to the client; the
                    // request fails here, no further candidate exists.
                    warn!(
                        attempt_id = self.attempt_id,
                        error = %err,
                        "upstream broke mid-stream"
                    );
                    terminal = RequestStatus::Failed;
                    error = Some(err.to_string());
                    let _ = self
                        .client_tx
                        .send(mid_stream_error_frame(self.client_type))
                        .await;
                    break;
                }
            }
        }

        if terminal == RequestStatus::Completed {
            for out in translator.finish() {
                if self.client_tx.send(out).await.is_err() {
                    terminal = RequestStatus::Cancelled;
                    error = Some("client closed request".into());
                    break;
                }
            }
        }

        self.finalize(&translator, terminal, first_byte, started, error)
            .await;
    }

    async fn stamp_ttft(&self, ttft_ms: i64) {
        let _ = self
            .engine
            .store
            .update_attempt(
                self.attempt_id,
                AttemptPatch {
                    ttft_ms: Some(ttft_ms),
                    ..Default::default()
                },
            )
            .await;
        let _ = self
            .engine
            .store
            .update_proxy_request(
                self.request_row_id,
                RequestPatch {
                    ttft_ms: Some(ttft_ms),
                    ..Default::default()
                },
            )
            .await;
    }

    async fn finalize(
        &self,
        translator: &ResponseTranslator,
        status: RequestStatus,
        first_byte: Option<OffsetDateTime>,
        started: OffsetDateTime,
        error: Option<String>,
    ) {
        let now = OffsetDateTime::now_utc();
        let metrics = translator.metrics();
        let response_model = translator.response_model();
        let price_model = response_model
            .clone()
            .unwrap_or_else(|| self.mapped_model.clone());
        let quote = self.pricing.quote(&price_model, &metrics, self.multiplier);

        if let Err(err) = self
            .engine
            .store
            .update_attempt(
                self.attempt_id,
                AttemptPatch {
                    status: Some(status),
                    status_code: Some(200),
                    error: error.clone(),
                    response_model: response_model.clone(),
                    end_time: Some(now),
                    ttft_ms: first_byte.map(|at| (at - started).whole_milliseconds() as i64),
                    metrics: Some(metrics),
                    cost: Some(quote.cost),
                    price_id: Some(quote.price_id),
                },
            )
            .await
        {
            error!(error = %err, attempt_id = self.attempt_id, "stream attempt settle failed");
        }

        let total_cost = self
            .engine
            .store
            .sum_attempt_costs(self.request_row_id)
            .await
            .unwrap_or(quote.cost);
        if let Err(err) = self
            .engine
            .store
            .update_proxy_request(
                self.request_row_id,
                RequestPatch {
                    status: Some(status),
                    status_code: Some(200),
                    error,
                    response_model,
                    end_time: Some(now),
                    route_id: Some(self.route_id),
                    provider_id: Some(self.provider_id),
                    final_attempt_id: Some(self.attempt_id),
                    metrics: Some(metrics),
                    cost: Some(total_cost),
                    ..Default::default()
                },
            )
            .await
        {
            error!(error = %err, "stream request settle failed");
        }
    }
}

fn supported_client(supported: &serde_json::Value, client_type: ClientType) -> bool {
    supported
        .as_array()
        .map(|types| {
            types
                .iter()
                .filter_map(|value| value.as_str())
                .any(|value| value == client_type.as_str())
        })
        .unwrap_or(false)
}

fn stream_content_type(client_type: ClientType) -> &'static str {
    match client_type {
        ClientType::Claude | ClientType::OpenAI | ClientType::Codex => "text/event-stream",
        ClientType::Gemini => "application/json",
    }
}

/// Dialect-appropriate terminal error event once bytes are committed.
fn mid_stream_error_frame(client_type: ClientType) -> Bytes {
    match client_type {
        ClientType::Claude => Bytes::from(
            "event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"api_error\",\"message\":\"upstream interrupted\"}}\n\n",
        ),
        ClientType::OpenAI | ClientType::Codex => Bytes::from(
            "data: {\"error\":{\"message\":\"upstream interrupted\",\"type\":\"api_error\"}}\n\n",
        ),
        ClientType::Gemini => Bytes::from("]"),
    }
}

pub(crate) fn pricing_from_snapshot(snapshot: &StoreSnapshot) -> Pricing {
    let records = snapshot
        .prices
        .iter()
        .map(|price| PriceRecord {
            price_id: price.id,
            model_id: price.model_id.clone(),
            input_price_micro: price.input_price_micro,
            output_price_micro: price.output_price_micro,
            cache_read_price_micro: price.cache_read_price_micro,
            cache_5m_write_price_micro: price.cache_5m_write_price_micro,
            cache_1h_write_price_micro: price.cache_1h_write_price_micro,
            has_1m_context: price.has_1m_context,
            premium_threshold: price.premium_threshold,
            input_premium_num: price.input_premium_num,
            input_premium_denom: price.input_premium_denom,
            output_premium_num: price.output_premium_num,
            output_premium_denom: price.output_premium_denom,
        })
        .collect();
    Pricing::new(records)
}

fn bounded_info(req: &CanonicalRequest) -> Option<serde_json::Value> {
    let value = match &req.payload {
        Payload::ClaudeMessages(body) => serde_json::to_value(body).ok()?,
        Payload::ClaudeCountTokens(body) => serde_json::to_value(body).ok()?,
        Payload::OpenAIChat(body) => serde_json::to_value(body).ok()?,
        Payload::Codex(body) => serde_json::to_value(body).ok()?,
        Payload::GeminiGenerate(body) => serde_json::to_value(body).ok()?,
    };
    let encoded = value.to_string();
    if encoded.len() > MAX_INFO_BYTES {
        return Some(serde_json::json!({
            "truncated": true,
            "bytes": encoded.len(),
            "model": req.model,
        }));
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_client_reads_json_array() {
        let supported = serde_json::json!(["claude", "gemini"]);
        assert!(supported_client(&supported, ClientType::Claude));
        assert!(!supported_client(&supported, ClientType::Codex));
        assert!(!supported_client(&serde_json::json!({}), ClientType::Claude));
    }

    #[test]
    fn gemini_streams_are_chunked_json() {
        assert_eq!(stream_content_type(ClientType::Gemini), "application/json");
        assert_eq!(stream_content_type(ClientType::Claude), "text/event-stream");
    }
}
