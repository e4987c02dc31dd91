//! Gateway behaviour over a real HTTP provider (httpmock) and the
//! enforcement rules the orchestrator depends on.

use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use tokio_util::sync::CancellationToken;

use modforge::gateway::{
    BudgetAccount, BudgetHint, BudgetLedger, GatewayError, GenerateRequest, HttpProvider,
    LlmGateway, Provider, ProviderConfig, ProviderError, Purpose, RetryPolicy,
};
use modforge::types::{CorrelationId, JobId};

fn request() -> GenerateRequest {
    GenerateRequest {
        purpose: Purpose::Codegen,
        prompt: "build an adapter".into(),
        schema_id: "generator@1".into(),
        budget: BudgetHint::default(),
        module_id: "weather/openweather".parse().unwrap(),
        job_id: JobId::new(),
        correlation_id: CorrelationId::new(),
    }
}

fn http_provider(server: &MockServer, name: &str) -> HttpProvider {
    HttpProvider::new(ProviderConfig {
        name: name.into(),
        endpoint: server.url("/v1/generate"),
        model: "codegen-test".into(),
        api_key: Some("test-key".into()),
        timeout_secs: 5,
    })
    .unwrap()
}

fn good_body() -> serde_json::Value {
    serde_json::json!({
        "stage": "implement",
        "module": "weather/openweather",
        "changed_files": [
            {"path": "modules/weather/openweather/adapter.py", "content": "x = 1\n"}
        ],
        "deleted_files": [],
        "assumptions": ["api key available"],
        "rationale": "minimal adapter",
        "policy": {"capabilities": ["pagination"], "credentials": []},
    })
}

#[tokio::test]
async fn http_provider_returns_body_on_success() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/generate");
        then.status(200).json_body(good_body());
    });

    let provider = http_provider(&server, "primary");
    let body = provider
        .invoke(&request(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(body.contains("weather/openweather"));
    mock.assert();
}

#[tokio::test]
async fn http_provider_classifies_429_as_transient() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/generate");
        then.status(429);
    });

    let provider = http_provider(&server, "primary");
    let err = provider
        .invoke(&request(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Transient { status: Some(429), .. }));
}

#[tokio::test]
async fn http_provider_classifies_401_as_auth() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/generate");
        then.status(401);
    });

    let provider = http_provider(&server, "primary");
    let err = provider
        .invoke(&request(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Auth { status: 401 }));
}

#[tokio::test]
async fn gateway_parses_conforming_http_response() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/generate");
        then.status(200).json_body(good_body());
    });

    let gateway = LlmGateway::builder()
        .provider(Purpose::Codegen, Arc::new(http_provider(&server, "primary")))
        .build();
    let response = gateway
        .generate(&request(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response.stage, "implement");
    assert_eq!(response.changed_files.len(), 1);
}

#[tokio::test]
async fn gateway_rejects_unparseable_http_body_as_schema_invalid() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/generate");
        // Truncated mid-document, as a dropped stream would produce.
        then.status(200).body(r#"{"stage": "implement", "module": "wea"#);
    });

    let gateway = LlmGateway::builder()
        .provider(Purpose::Codegen, Arc::new(http_provider(&server, "primary")))
        .retry(RetryPolicy::new(
            Duration::from_millis(5),
            Duration::from_millis(20),
            5,
        ))
        .build();
    let err = gateway
        .generate(&request(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::SchemaInvalid { .. }));
    // Never retried: schema nonconformance advances the chain instead.
    mock.assert_hits(1);
}

#[tokio::test]
async fn budget_is_debited_per_call() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/generate");
        then.status(200).json_body(good_body());
    });

    let ledger = Arc::new(BudgetLedger::unlimited());
    ledger.set_account(
        "primary",
        "acme",
        BudgetAccount {
            tokens: BudgetHint::default().tokens * 2,
            cost_microcents: BudgetHint::default().cost_microcents * 2,
            wall_ms: BudgetHint::default().wall_ms * 2,
        },
    );
    let gateway = LlmGateway::builder()
        .provider(Purpose::Codegen, Arc::new(http_provider(&server, "primary")))
        .ledger(Arc::clone(&ledger))
        .org("acme")
        .build();

    let cancel = CancellationToken::new();
    gateway.generate(&request(), &cancel).await.unwrap();
    gateway.generate(&request(), &cancel).await.unwrap();
    // Third call overdraws: fail fast, no HTTP traffic.
    let err = gateway.generate(&request(), &cancel).await.unwrap_err();
    assert!(matches!(err, GatewayError::BudgetExhausted(_)));
    mock.assert_hits(2);
}
