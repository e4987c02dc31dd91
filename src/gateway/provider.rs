//! Provider abstraction and the HTTP implementation.
//!
//! A [`Provider`] turns a framed [`GenerateRequest`] into a raw response
//! body; classification of transport failures happens here so the
//! gateway's routing logic only ever sees the typed taxonomy.

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::contract::GenerateRequest;

/// Typed transport-level failures.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// 429, 5xx, connection reset, timeout. Recoverable via backoff.
    #[error("transient provider failure (status {status:?}): {message}")]
    Transient { status: Option<u16>, message: String },

    /// 401/403. Never retried against the same provider.
    #[error("provider authentication failed (status {status})")]
    Auth { status: u16 },

    /// Any other non-success outcome.
    #[error("provider failure (status {status:?}): {message}")]
    Fatal { status: Option<u16>, message: String },

    /// The caller's cancellation token fired mid-call.
    #[error("provider call cancelled")]
    Cancelled,
}

impl ProviderError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }
}

/// A purpose-lane member: one configured model endpoint.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier used in the budget ledger and logs.
    fn name(&self) -> &str;

    /// Execute the request, returning the raw response body.
    async fn invoke(
        &self,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<String, ProviderError>;
}

/// Static configuration for one HTTP provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

/// Classify an HTTP status into the provider taxonomy. Success statuses
/// must not be passed here.
#[must_use]
pub fn classify_status(status: u16, message: String) -> ProviderError {
    match status {
        401 | 403 => ProviderError::Auth { status },
        429 => ProviderError::Transient {
            status: Some(status),
            message,
        },
        s if s >= 500 => ProviderError::Transient {
            status: Some(status),
            message,
        },
        _ => ProviderError::Fatal {
            status: Some(status),
            message,
        },
    }
}

/// JSON-over-HTTP provider client.
pub struct HttpProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn invoke(
        &self,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.config.model,
            "purpose": request.purpose.as_str(),
            "schema": request.schema_id,
            "prompt": request.prompt,
            "max_tokens": request.budget.tokens,
            "correlation_id": request.correlation_id,
        });

        let mut call = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            call = call.bearer_auth(key);
        }

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = call.send() => result,
        };

        let response = match response {
            Ok(response) => response,
            Err(err) if err.is_timeout() || err.is_connect() => {
                return Err(ProviderError::Transient {
                    status: None,
                    message: err.to_string(),
                });
            }
            Err(err) => {
                return Err(ProviderError::Fatal {
                    status: None,
                    message: err.to_string(),
                });
            }
        };

        let status = response.status();
        if status.is_success() {
            tokio::select! {
                () = cancel.cancelled() => Err(ProviderError::Cancelled),
                text = response.text() => text.map_err(|err| ProviderError::Transient {
                    status: None,
                    message: err.to_string(),
                }),
            }
        } else {
            // The body may quote secrets; keep only the status line.
            Err(classify_status(
                status.as_u16(),
                format!("provider {} returned {status}", self.config.name),
            ))
        }
    }
}
