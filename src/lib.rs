//! # Modforge: Staged LLM Build Orchestration
//!
//! Modforge turns a natural-language intent for a data-integration
//! module into a validated, installable artifact bundle. A build job
//! walks scaffold → implement → validate → repair under a policy
//! profile, calling an LLM through a schema-and-budget-enforcing
//! gateway, executing the candidate inside a resource-capped sandbox,
//! and finishing with a content-addressed, attested bundle a separate
//! installer can verify by recomputation.
//!
//! ## Core Concepts
//!
//! - **Bundles**: deterministic path→content maps whose digest is the
//!   supply-chain identity ([`artifact`])
//! - **Policy**: one declarative source of truth for imports, call
//!   patterns, and resource caps ([`policy`])
//! - **Findings**: the structured failure currency every checker
//!   speaks ([`report`])
//! - **Gateway**: purpose-routed provider chains with deterministic
//!   fallback ([`gateway`])
//! - **Sandbox**: hermetic execution of generated code ([`sandbox`])
//! - **Orchestrator**: the stage machine and bounded repair loop
//!   ([`orchestrator`])
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use modforge::artifact::{ArtifactStore, AttestationStore};
//! use modforge::gateway::{LlmGateway, Purpose, HttpProvider, ProviderConfig};
//! use modforge::orchestrator::{BuildRequest, BuildService};
//! use modforge::sandbox::ProcessSandbox;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = HttpProvider::new(ProviderConfig {
//!     name: "primary".into(),
//!     endpoint: "https://llm.internal/v1/generate".into(),
//!     model: "codegen-large".into(),
//!     api_key: std::env::var("MODFORGE_API_KEY").ok(),
//!     timeout_secs: 60,
//! })?;
//! let gateway = Arc::new(
//!     LlmGateway::builder()
//!         .provider(Purpose::Codegen, Arc::new(provider))
//!         .build(),
//! );
//!
//! let service = BuildService::builder()
//!     .gateway(gateway)
//!     .sandbox(Arc::new(ProcessSandbox::default()))
//!     .artifacts(ArtifactStore::open("./data")?)
//!     .attestations(AttestationStore::open("./data")?)
//!     .build();
//!
//! let job_id = service.submit(BuildRequest {
//!     module_id: "weather/openweather".into(),
//!     intent: "build an OpenWeather adapter".into(),
//!     policy_profile: "default".into(),
//!     idempotency_key: "demo-1".into(),
//!     max_repair_attempts: None,
//! })?;
//! let status = service.wait(job_id).await;
//! println!("{status:?}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`types`] - Module identities, capabilities, job ids, terminal states
//! - [`policy`] - Security policy constants and policy profiles
//! - [`report`] - Findings, validation reports, failure fingerprints
//! - [`manifest`] - The module manifest schema
//! - [`artifact`] - Bundles, per-attempt stores, attestations
//! - [`analyzer`] - Static analysis of generated sources
//! - [`gateway`] - The LLM gateway and its provider chains
//! - [`sandbox`] - Sandboxed dynamic validation
//! - [`orchestrator`] - Intake, stage machine, repair loop, attestation
//! - [`events`] - Observability events with secret redaction

pub mod analyzer;
pub mod artifact;
pub mod events;
pub mod gateway;
pub mod manifest;
pub mod orchestrator;
pub mod policy;
pub mod report;
pub mod sandbox;
pub mod telemetry;
pub mod types;
