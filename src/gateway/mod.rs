//! The LLM gateway: purpose-routed, schema-enforcing, budget-aware.
//!
//! Each purpose (codegen / repair / critic) owns a deterministic,
//! ordered provider chain. For a given configuration the same failure
//! always selects the same next provider, so retries across a job are
//! reproducible and thrash fingerprints stay stable.
//!
//! Enforcement rules:
//!
//! - Budget is debited **before** any provider is contacted; an
//!   overdraft fails fast with [`GatewayError::BudgetExhausted`].
//! - Transient failures (429/5xx/connect/timeout) retry on the same
//!   provider with bounded exponential backoff + jitter, then advance.
//! - Auth failures (401/403) and schema nonconformance advance the
//!   chain immediately and are never retried. Silent acceptance of a
//!   nonconforming response is impossible: every body passes through
//!   [`contract::parse_response`] + [`contract::validate_response`].
//! - Cancellation interrupts both in-flight calls and backoff sleeps.

pub mod budget;
pub mod contract;
pub mod critic;
pub mod provider;
pub mod retry;

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::events::redact;

pub use budget::{BudgetAccount, BudgetError, BudgetLedger};
pub use contract::{
    BudgetHint, ChangedFile, ContractViolation, GenerateRequest, GenerateResponse,
    PolicyDeclaration, Purpose, ResponseLimits,
};
pub use critic::{CriticVerdict, DEFAULT_THRESHOLD, DEFAULT_WEIGHTS};
pub use provider::{HttpProvider, Provider, ProviderConfig, ProviderError};
pub use retry::RetryPolicy;

/// Error taxonomy the orchestrator maps into its failure classes.
#[derive(Debug, Error, Diagnostic)]
pub enum GatewayError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    BudgetExhausted(#[from] BudgetError),

    /// Every provider in the lane returned nonconforming output.
    #[error("no provider produced a schema-conforming response: {reason}")]
    #[diagnostic(
        code(modforge::gateway::schema_invalid),
        help("Schema nonconformance is not retried; inspect the prompt and response schema.")
    )]
    SchemaInvalid { reason: String },

    /// Authentication failed and no later provider recovered.
    #[error("provider authentication failed across the fallback chain")]
    #[diagnostic(code(modforge::gateway::provider_auth))]
    ProviderAuth,

    /// The whole chain was exhausted on transient failures.
    #[error("providers exhausted on transient failures: {message}")]
    #[diagnostic(code(modforge::gateway::provider_transient))]
    ProviderTransient { message: String },

    /// The whole chain failed fatally.
    #[error("provider failure: {message}")]
    #[diagnostic(code(modforge::gateway::provider_fatal))]
    ProviderFatal { message: String },

    #[error("gateway call cancelled")]
    #[diagnostic(code(modforge::gateway::cancelled))]
    Cancelled,
}

/// What a single provider pass concluded, for aggregate precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaneFailure {
    None,
    Fatal,
    Transient,
    Schema,
    Auth,
}

impl LaneFailure {
    fn upgrade(&mut self, other: LaneFailure) {
        if (other as u8) > (*self as u8) {
            *self = other;
        }
    }
}

/// Gateway configuration and state. Construct via [`GatewayBuilder`].
pub struct LlmGateway {
    lanes: FxHashMap<Purpose, Vec<Arc<dyn Provider>>>,
    ledger: Arc<BudgetLedger>,
    retry: RetryPolicy,
    org: String,
    critic_threshold: Option<f32>,
}

/// Builder for [`LlmGateway`].
pub struct GatewayBuilder {
    lanes: FxHashMap<Purpose, Vec<Arc<dyn Provider>>>,
    ledger: Arc<BudgetLedger>,
    retry: RetryPolicy,
    org: String,
    critic_threshold: Option<f32>,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self {
            lanes: FxHashMap::default(),
            ledger: Arc::new(BudgetLedger::unlimited()),
            retry: RetryPolicy::default(),
            org: "default".to_string(),
            critic_threshold: None,
        }
    }
}

impl GatewayBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider to a purpose lane. Order of calls is the
    /// fallback order.
    #[must_use]
    pub fn provider(mut self, purpose: Purpose, provider: Arc<dyn Provider>) -> Self {
        self.lanes.entry(purpose).or_default().push(provider);
        self
    }

    #[must_use]
    pub fn ledger(mut self, ledger: Arc<BudgetLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn org(mut self, org: impl Into<String>) -> Self {
        self.org = org.into();
        self
    }

    /// Enable the scaffold confidence gate with the given threshold.
    #[must_use]
    pub fn critic_gate(mut self, threshold: f32) -> Self {
        self.critic_threshold = Some(threshold);
        self
    }

    #[must_use]
    pub fn build(self) -> LlmGateway {
        LlmGateway {
            lanes: self.lanes,
            ledger: self.ledger,
            retry: self.retry,
            org: self.org,
            critic_threshold: self.critic_threshold,
        }
    }
}

impl LlmGateway {
    #[must_use]
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Whether the scaffold confidence gate is enabled, and at what
    /// threshold.
    #[must_use]
    pub fn critic_threshold(&self) -> Option<f32> {
        self.critic_threshold
    }

    /// Generate a structured response through the request's purpose
    /// lane, with full contract enforcement.
    #[instrument(skip(self, request, cancel), fields(purpose = %request.purpose, job = %request.job_id), err)]
    pub async fn generate(
        &self,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerateResponse, GatewayError> {
        let limits = ResponseLimits::default();
        self.generate_with_limits(request, &limits, cancel).await
    }

    /// [`generate`](Self::generate) with explicit response limits taken
    /// from the job's policy profile.
    pub async fn generate_with_limits(
        &self,
        request: &GenerateRequest,
        limits: &ResponseLimits,
        cancel: &CancellationToken,
    ) -> Result<GenerateResponse, GatewayError> {
        let module = request.module_id.clone();
        let limits = *limits;
        self.invoke_lane(request.purpose, request, cancel, move |body| {
            let response = contract::parse_response(body).map_err(|e| e.to_string())?;
            contract::validate_response(&response, &module, &limits).map_err(|e| e.to_string())?;
            Ok(response)
        })
        .await
    }

    /// Score a scaffold plan through the critic lane.
    pub async fn review_plan(
        &self,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<CriticVerdict, GatewayError> {
        self.invoke_lane(Purpose::Critic, request, cancel, |body| {
            serde_json::from_str::<CriticVerdict>(body).map_err(|e| e.to_string())
        })
        .await
    }

    /// Walk one purpose lane: per provider, budget debit, bounded
    /// transient retry, parse/validate; advance on auth, schema, or
    /// exhausted retries. The aggregate error follows the precedence
    /// Auth > Schema > Transient > Fatal.
    async fn invoke_lane<T>(
        &self,
        purpose: Purpose,
        request: &GenerateRequest,
        cancel: &CancellationToken,
        parse: impl Fn(&str) -> Result<T, String>,
    ) -> Result<T, GatewayError> {
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        let providers = self.lanes.get(&purpose).filter(|lane| !lane.is_empty());
        let Some(providers) = providers else {
            return Err(GatewayError::ProviderFatal {
                message: format!("no providers configured for purpose {purpose}"),
            });
        };

        let mut worst = LaneFailure::None;
        let mut last_message = String::new();

        'providers: for provider in providers {
            for attempt in 0..self.retry.max_attempts {
                self.ledger
                    .try_debit(provider.name(), &self.org, &request.budget)?;

                match provider.invoke(request, cancel).await {
                    Ok(body) => match parse(&body) {
                        Ok(value) => return Ok(value),
                        Err(reason) => {
                            warn!(
                                provider = provider.name(),
                                reason = %redact(&reason),
                                "schema-nonconforming response; advancing fallback chain",
                            );
                            worst.upgrade(LaneFailure::Schema);
                            last_message = reason;
                            continue 'providers;
                        }
                    },
                    Err(ProviderError::Cancelled) => return Err(GatewayError::Cancelled),
                    Err(ProviderError::Auth { status }) => {
                        warn!(
                            provider = provider.name(),
                            status, "provider auth failure; advancing fallback chain",
                        );
                        worst.upgrade(LaneFailure::Auth);
                        continue 'providers;
                    }
                    Err(err @ ProviderError::Transient { .. }) => {
                        worst.upgrade(LaneFailure::Transient);
                        last_message = err.to_string();
                        if attempt + 1 < self.retry.max_attempts {
                            let delay = self.retry.delay_for(attempt);
                            debug!(
                                provider = provider.name(),
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "transient provider failure; backing off",
                            );
                            if !retry::sleep_cancellable(delay, cancel).await {
                                return Err(GatewayError::Cancelled);
                            }
                        } else {
                            warn!(
                                provider = provider.name(),
                                "transient retries exhausted; advancing fallback chain",
                            );
                            continue 'providers;
                        }
                    }
                    Err(err @ ProviderError::Fatal { .. }) => {
                        warn!(
                            provider = provider.name(),
                            error = %redact(&err.to_string()),
                            "fatal provider failure; advancing fallback chain",
                        );
                        worst.upgrade(LaneFailure::Fatal);
                        last_message = err.to_string();
                        continue 'providers;
                    }
                }
            }
        }

        Err(match worst {
            LaneFailure::Auth => GatewayError::ProviderAuth,
            LaneFailure::Schema => GatewayError::SchemaInvalid {
                reason: redact(&last_message),
            },
            LaneFailure::Transient => GatewayError::ProviderTransient {
                message: redact(&last_message),
            },
            LaneFailure::Fatal | LaneFailure::None => GatewayError::ProviderFatal {
                message: redact(&last_message),
            },
        })
    }
}
