// ABOUTME: Generation pipeline coordinating admission, search, relay and settlement
// ABOUTME: Rejections happen before the stream opens; later failures are in-band events
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

//! # Generation Pipeline
//!
//! | Stage | Failure | Outcome |
//! |---|---|---|
//! | auth | missing or invalid identity | 401 before the stream |
//! | rate limit | window exceeded | 429 with `Retry-After` |
//! | validation | malformed or oversized input | 400 with the field |
//! | ownership | chat owned by someone else | 404 |
//! | budget | plan, quota or ceiling | 403 with reason and plan id |
//! | search | provider error or no results | proceed unaugmented |
//! | relay | backend error | `error` event |
//! | ledger | persistence error | logged, `error` event instead of `done` |
//!
//! [`GenerationPipeline::start`] runs every rejecting stage on the request task
//! and then spawns one generation task that owns the event sender. The ledger is
//! reachable only from that task's `Completed` branch, or from
//! [`GenerationPipeline::save_partial`] for an aborted generation, and each takes
//! its input by value, so a generation is settled at most once.

pub mod events;
pub mod registry;
pub mod request;

pub use events::StreamEvent;
pub use registry::{GenerationRegistry, PartialGeneration};
pub use request::{GenerateRequest, IncomingMessage, ValidatedRequest};

use crate::budget::{Admission, Reservation};
use crate::constants::limits::EVENT_CHANNEL_CAPACITY;
use crate::database::ActivityEvent;
use crate::errors::{AppError, AppResult};
use crate::ledger::{estimate_messages, LedgerReport, Settlement};
use crate::llm::{ChatRequest, LlmProvider};
use crate::logging::AppLogger;
use crate::models::{ActionKind, IdentityId};
use crate::rate_limiting::{RateLimitClass, RateLimitKey};
use crate::relay::{EventSink, RelayOutcome};
use crate::resources::ServerResources;
use crate::search::{render_context, SearchResult};
use http::HeaderMap;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

/// A started generation
#[derive(Debug)]
pub struct GenerationHandle {
    /// Id for abort, save-partial and status polling
    pub generation_id: String,
    /// Events to stream to the client
    pub events: mpsc::Receiver<StreamEvent>,
}

/// Coordinates one generation request end to end
#[derive(Clone)]
pub struct GenerationPipeline {
    resources: Arc<ServerResources>,
}

impl GenerationPipeline {
    /// Pipeline over the process-scoped resources
    #[must_use]
    pub const fn new(resources: Arc<ServerResources>) -> Self {
        Self { resources }
    }

    /// Resolve the caller, throttling clients that keep failing
    ///
    /// # Errors
    ///
    /// Returns `RateLimitExceeded` when the client exhausted its failed-auth
    /// allowance, or the resolver's auth error
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        client_key: &str,
    ) -> AppResult<IdentityId> {
        let limits = &self.resources.config.rate_limits;
        let guard_key = RateLimitKey::anonymous(client_key, RateLimitClass::AuthFailure);
        let guard_spec = limits.spec(RateLimitClass::AuthFailure);

        self.resources
            .rate_limiter
            .peek(&guard_key, &guard_spec)
            .await
            .into_result(RateLimitClass::AuthFailure)
            .inspect_err(|e| AppLogger::log_rejection(None, "auth_guard", &e.message))?;

        match self.resources.identity.resolve(headers).await {
            Ok(caller) => {
                if let Some(plan) = &caller.plan {
                    self.resources
                        .budget
                        .sync_plan(&caller.identity, plan)
                        .await?;
                }
                Ok(caller.identity)
            }
            Err(e) => {
                self.resources.rate_limiter.check(&guard_key, &guard_spec).await;
                AppLogger::log_rejection(None, "auth", &e.message);
                Err(e)
            }
        }
    }

    /// Admit a generate request and start streaming
    ///
    /// # Errors
    ///
    /// Returns the rejection of the first failing admission stage
    pub async fn start(
        &self,
        headers: &HeaderMap,
        client_key: &str,
        body: &[u8],
    ) -> AppResult<GenerationHandle> {
        let resources = &self.resources;
        let identity = self.authenticate(headers, client_key).await?;
        let reject = |stage: &'static str| {
            let identity = identity.as_str().to_owned();
            move |e: &AppError| AppLogger::log_rejection(Some(&identity), stage, &e.message)
        };

        let limits = &resources.config.rate_limits;
        resources
            .rate_limiter
            .check(
                &RateLimitKey::identity(&identity, RateLimitClass::Chat),
                &limits.spec(RateLimitClass::Chat),
            )
            .await
            .into_result(RateLimitClass::Chat)
            .inspect_err(reject("rate_limit"))?;

        let request = GenerateRequest::parse(body)
            .and_then(|request| request.validate(&resources.catalog))
            .inspect_err(reject("validation"))?;

        let provider = resources
            .providers
            .get(&request.model.provider)
            .ok_or_else(|| {
                AppError::unavailable(format!(
                    "Model '{}' is not available right now",
                    request.model.alias
                ))
            })
            .inspect_err(reject("provider"))?;

        let first_exchange = self
            .check_ownership(&identity, &request.chat_id)
            .await
            .inspect_err(reject("ownership"))?;

        let output_estimate = resources.config.budget.output_token_estimate;
        let input_tokens = estimate_messages(resources.ledger.estimator(), &request.prompt);
        let estimated_cost = request
            .model
            .pricing
            .cost_micros(input_tokens, output_estimate);
        let reservation = resources
            .budget
            .authorize(
                &identity,
                ActionKind::Chat,
                Some(request.model.tier),
                estimated_cost,
            )
            .await
            .and_then(Admission::into_reservation)
            .inspect_err(reject("budget"))?;

        AppLogger::log_admission(
            identity.as_str(),
            &request.chat_id,
            &request.model.alias,
            estimated_cost,
        );

        let generation_id = Uuid::new_v4().to_string();
        let cancel = resources.generations.register(
            &generation_id,
            &identity,
            &request.chat_id,
            &resources.shutdown,
        );
        resources.jobs.start(generation_id.clone(), identity.clone());

        let (sender, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let span = info_span!(
            "generation",
            generation_id = %generation_id,
            identity = %identity,
            chat_id = %request.chat_id,
            model = %request.model.alias
        );
        let task = GenerationTask {
            resources: Arc::clone(resources),
            generation_id: generation_id.clone(),
            identity,
            request,
            provider,
            reservation,
            first_exchange,
            estimated_tokens: input_tokens + output_estimate,
        };
        tokio::spawn(task.run(sender, cancel).instrument(span));

        Ok(GenerationHandle {
            generation_id,
            events,
        })
    }

    /// Persist the stashed content of an aborted generation
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` when nothing is stashed for the caller, or a
    /// database error when the content could not be persisted
    pub async fn save_partial(
        &self,
        identity: &IdentityId,
        generation_id: &str,
    ) -> AppResult<LedgerReport> {
        let partial = self
            .resources
            .generations
            .take_partial(generation_id, identity)?;
        let chat_id = partial.chat_id.clone();

        let report = self
            .resources
            .ledger
            .settle(Settlement {
                identity: partial.owner,
                chat_id: partial.chat_id,
                default_model: partial.default_model,
                model: partial.model,
                action: ActionKind::Partial,
                user_content: partial.user_content,
                content: partial.content,
                sources: partial.sources,
                input_tokens: partial.input_tokens,
                estimated_tokens: partial.estimated_tokens,
                first_exchange: partial.first_exchange,
                reservation: None,
            })
            .await;

        record_activity(
            &self.resources,
            ActivityEvent::new(identity.clone(), "partial_saved")
                .with_chat(chat_id)
                .with_generation(generation_id)
                .with_detail(json!({ "costMicros": report.cost_micros })),
        );

        if report.message_id.is_none() {
            return Err(AppError::database("The partial response could not be saved"));
        }
        Ok(report)
    }

    /// Whether this request opens the chat; errors when someone else owns it
    async fn check_ownership(&self, identity: &IdentityId, chat_id: &str) -> AppResult<bool> {
        match self.resources.chats.get_chat(chat_id).await? {
            None => Ok(true),
            Some(chat) if &chat.owner != identity => Err(AppError::not_found("Chat")),
            Some(chat) => Ok(self.resources.chats.count_messages(&chat.id).await? == 0),
        }
    }
}

struct GenerationTask {
    resources: Arc<ServerResources>,
    generation_id: String,
    identity: IdentityId,
    request: ValidatedRequest,
    provider: Arc<dyn LlmProvider>,
    reservation: Reservation,
    first_exchange: bool,
    estimated_tokens: i64,
}

impl GenerationTask {
    async fn run(self, sender: mpsc::Sender<StreamEvent>, cancel: CancellationToken) {
        let Self {
            resources,
            generation_id,
            identity,
            request,
            provider,
            reservation,
            first_exchange,
            estimated_tokens,
        } = self;

        let mut prompt = request.prompt;
        let sources = if request.web_search {
            search_context(&resources, &identity, &request.user_content).await
        } else {
            Vec::new()
        };
        if !sources.is_empty() {
            prompt.insert(0, render_context(&sources));
            sender
                .emit(StreamEvent::SearchResults {
                    results: sources.clone(),
                })
                .await;
        }

        let input_tokens = estimate_messages(resources.ledger.estimator(), &prompt);
        let chat_request = ChatRequest::new(prompt, request.model.provider_model.clone());
        let report = resources
            .relay
            .run(provider.as_ref(), &chat_request, &sender, &cancel)
            .await;
        resources.generations.finish(&generation_id);
        debug!(state = ?report.state, fragments = report.fragments, "Relay finished");

        let activity = ActivityEvent::new(identity.clone(), "")
            .with_chat(request.chat_id.clone())
            .with_generation(generation_id.clone());

        match report.outcome {
            RelayOutcome::Completed { content } => {
                let settled = resources
                    .ledger
                    .settle(Settlement {
                        identity: identity.clone(),
                        chat_id: request.chat_id.clone(),
                        default_model: request.model.alias.clone(),
                        model: request.model.clone(),
                        action: ActionKind::Chat,
                        user_content: request.user_content,
                        content,
                        sources,
                        input_tokens,
                        estimated_tokens,
                        first_exchange,
                        reservation: Some(reservation),
                    })
                    .await;

                if let Some(title) = settled.title.clone() {
                    sender.emit(StreamEvent::Title { title }).await;
                }
                if let Some(message_id) = settled.message_id.clone() {
                    sender
                        .emit(StreamEvent::Done {
                            message_id: message_id.clone(),
                        })
                        .await;
                    settle_job(
                        &resources,
                        &generation_id,
                        Ok(json!({
                            "messageId": message_id,
                            "title": settled.title,
                            "costMicros": settled.cost_micros,
                        })),
                    );
                } else {
                    sender
                        .emit(StreamEvent::error(
                            "The response could not be saved. Please try again.",
                        ))
                        .await;
                    settle_job(
                        &resources,
                        &generation_id,
                        Err("persistence failed".to_owned()),
                    );
                }
                let ledger_failures: Vec<String> =
                    settled.failures.iter().map(ToString::to_string).collect();
                record_activity(
                    &resources,
                    ActivityEvent {
                        kind: "generation_completed".to_owned(),
                        detail: json!({
                            "model": request.model.alias,
                            "costMicros": settled.cost_micros,
                            "ledgerFailures": ledger_failures,
                        }),
                        ..activity
                    },
                );
            }
            RelayOutcome::Failed { error, partial } => {
                drop(reservation);
                info!(partial_chars = partial.len(), "Generation failed, nothing settled");
                settle_job(&resources, &generation_id, Err(error.message.clone()));
                record_activity(
                    &resources,
                    ActivityEvent {
                        kind: "generation_failed".to_owned(),
                        detail: json!({ "model": request.model.alias, "error": error.message }),
                        ..activity
                    },
                );
            }
            RelayOutcome::Aborted { cause, partial } => {
                drop(reservation);
                let stashed = !partial.is_empty();
                if stashed {
                    resources.generations.stash_partial(
                        &generation_id,
                        PartialGeneration {
                            owner: identity.clone(),
                            chat_id: request.chat_id.clone(),
                            default_model: request.model.alias.clone(),
                            model: request.model.clone(),
                            user_content: request.user_content,
                            content: partial,
                            sources,
                            input_tokens,
                            estimated_tokens,
                            first_exchange,
                        },
                    );
                }
                info!(cause = cause.as_str(), stashed, "Generation aborted, nothing settled");
                settle_job(
                    &resources,
                    &generation_id,
                    Err(format!("aborted: {}", cause.as_str())),
                );
                record_activity(
                    &resources,
                    ActivityEvent {
                        kind: "generation_aborted".to_owned(),
                        detail: json!({
                            "model": request.model.alias,
                            "cause": cause.as_str(),
                            "partialStashed": stashed,
                        }),
                        ..activity
                    },
                );
            }
        }

        let chats = Arc::clone(&resources.chats);
        let chat_id = request.chat_id;
        resources
            .background
            .spawn("touch_chat", async move { chats.touch_chat(&chat_id).await });
    }
}

/// Search step: rate limited and quota gated on its own, never fatal
async fn search_context(
    resources: &ServerResources,
    identity: &IdentityId,
    query: &str,
) -> Vec<SearchResult> {
    if !resources.search.is_enabled() {
        debug!("Search requested but no provider is configured");
        return Vec::new();
    }

    let limits = &resources.config.rate_limits;
    let decision = resources
        .rate_limiter
        .check(
            &RateLimitKey::identity(identity, RateLimitClass::Search),
            &limits.spec(RateLimitClass::Search),
        )
        .await;
    if !decision.allowed {
        info!("Search rate limited, proceeding without augmentation");
        return Vec::new();
    }

    let cost_micros = resources.config.search.cost_micros;
    let reservation = match resources
        .budget
        .authorize(identity, ActionKind::Search, None, cost_micros)
        .await
        .and_then(Admission::into_reservation)
    {
        Ok(reservation) => reservation,
        Err(e) => {
            info!(reason = %e.message, "Search not admitted, proceeding without augmentation");
            return Vec::new();
        }
    };

    let results = resources.search.augment(query).await;
    if results.is_empty() {
        // Dropping the reservation releases the search quota
        return results;
    }

    let provider = resources.search.provider_name().unwrap_or("search");
    resources
        .ledger
        .record_search(reservation, provider, cost_micros)
        .await;
    results
}

fn settle_job(
    resources: &ServerResources,
    generation_id: &str,
    outcome: Result<serde_json::Value, String>,
) {
    let settled = match outcome {
        Ok(result) => resources.jobs.complete(generation_id, result),
        Err(reason) => resources.jobs.fail(generation_id, reason),
    };
    if let Err(e) = settled {
        debug!(generation_id, error = %e, "Job status not updated");
    }
}

fn record_activity(resources: &ServerResources, event: ActivityEvent) {
    let activity = Arc::clone(&resources.activity);
    resources.background.spawn("activity_log", async move {
        activity.record_activity(&event).await
    });
}
