//! The build orchestrator: intake, the stage state machine, the
//! bounded self-repair loop, and attestation.
//!
//! ```text
//! INIT → SCAFFOLD → IMPLEMENT → VALIDATE → (PASS → ATTEST → DONE)
//!                        ▲           │
//!                        └─ REPAIR ──┘ (bounded, fingerprint-guarded)
//! ```
//!
//! Every dependency — gateway, sandbox, stores, profiles, event bus —
//! is passed in explicitly at construction; there is no process-global
//! state. Each submitted job runs as one tokio task; stages within a
//! job are strictly sequential, and attempt N's artifacts are fully
//! persisted before attempt N+1 begins.

pub mod classify;
pub mod prompts;
pub mod registry;
pub mod template;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::FutureExt;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::artifact::attestation::{Attestation, AttestationError, AttestationStore};
use crate::artifact::bundle::{ArtifactBundle, BundleError, FileEntry};
use crate::artifact::store::{ArtifactStore, StoreError};
use crate::events::{BuildEvent, BuildEventKind, EventEmitter, redact};
use crate::gateway::{
    BudgetHint, GenerateRequest, GenerateResponse, LlmGateway, Purpose, ResponseLimits,
};
use crate::manifest::Manifest;
use crate::policy::{PolicyProfile, ProfileStore};
use crate::report::{FailureFingerprint, FindingKind, ValidationReport};
use crate::sandbox::{SandboxError, SandboxRunner};
use crate::analyzer::StaticAnalyzer;
use crate::types::{AttemptId, BuildStatus, CorrelationId, FailureReason, JobId, ModuleId};

use classify::{FailureClass, GatewayOutcome};

/// Stages of the build state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Init,
    Scaffold,
    Implement,
    Validate,
    Repair,
    Attest,
    Done,
}

impl std::fmt::Display for BuildStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BuildStage::Init => "init",
            BuildStage::Scaffold => "scaffold",
            BuildStage::Implement => "implement",
            BuildStage::Validate => "validate",
            BuildStage::Repair => "repair",
            BuildStage::Attest => "attest",
            BuildStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// One build request as submitted by the front-end.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Target module identity, `category/platform`.
    pub module_id: String,
    pub intent: String,
    pub policy_profile: String,
    pub idempotency_key: String,
    pub max_repair_attempts: Option<u32>,
}

/// Typed intake rejections.
#[derive(Debug, Error, Diagnostic)]
pub enum IntakeError {
    #[error("invalid module id: {0}")]
    #[diagnostic(code(modforge::intake::invalid_module_id))]
    InvalidModuleId(#[from] crate::types::ModuleIdError),

    #[error("unknown policy profile {name:?}")]
    #[diagnostic(code(modforge::intake::policy_profile_unknown))]
    PolicyProfileUnknown { name: String },

    #[error("intake queue is full ({capacity} jobs)")]
    #[diagnostic(
        code(modforge::intake::queue_full),
        help("Resubmit after an in-flight job terminates; the queue never buffers.")
    )]
    QueueFull { capacity: usize },

    #[error("quota exceeded for this request")]
    #[diagnostic(code(modforge::intake::quota_exceeded))]
    QuotaExceeded,
}

/// Infrastructure failures inside a job task. Converted into a typed
/// terminal state at the task boundary — they never escape as panics.
#[derive(Debug, Error, Diagnostic)]
pub enum OrchestratorError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Attestation(#[from] AttestationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Bundle(#[from] BundleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Sandbox(#[from] SandboxError),
}

/// Observable state of a job.
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub job_id: JobId,
    pub stage: String,
    pub attempt: u32,
    pub terminal: Option<BuildStatus>,
}

struct JobEntry {
    stage: BuildStage,
    attempt: u32,
    terminal: Option<BuildStatus>,
    cancel: CancellationToken,
    done_tx: watch::Sender<Option<BuildStatus>>,
}

/// Optional upstream quota hook; intake rejects when it returns false.
pub type QuotaCheck = dyn Fn(&BuildRequest) -> bool + Send + Sync;

struct ServiceInner {
    gateway: Arc<LlmGateway>,
    sandbox: Arc<dyn SandboxRunner>,
    artifacts: ArtifactStore,
    attestations: AttestationStore,
    profiles: ProfileStore,
    emitter: Arc<dyn EventEmitter>,
    quota: Option<Box<QuotaCheck>>,
    jobs: Mutex<FxHashMap<JobId, JobEntry>>,
    idempotency: Mutex<FxHashMap<String, JobId>>,
    capacity: usize,
    active: AtomicUsize,
}

impl ServiceInner {
    fn emit(&self, job_id: JobId, correlation: CorrelationId, kind: BuildEventKind) {
        if let Err(err) = self
            .emitter
            .emit(BuildEvent::new(job_id, correlation, kind))
        {
            warn!(error = %err, "dropping build event");
        }
    }

    fn update_job(&self, job_id: JobId, stage: BuildStage, attempt: u32) {
        if let Some(entry) = self.jobs.lock().expect("jobs lock").get_mut(&job_id) {
            entry.stage = stage;
            entry.attempt = attempt;
        }
    }

    fn finish_job(&self, job_id: JobId, status: BuildStatus) {
        let mut jobs = self.jobs.lock().expect("jobs lock");
        if let Some(entry) = jobs.get_mut(&job_id) {
            entry.stage = BuildStage::Done;
            entry.terminal = Some(status.clone());
            entry.done_tx.send_replace(Some(status));
        }
    }
}

/// The Builder's public face: intake, status observation, cancellation.
#[derive(Clone)]
pub struct BuildService {
    inner: Arc<ServiceInner>,
}

/// Builder wiring explicit dependencies into a [`BuildService`].
pub struct BuildServiceBuilder {
    gateway: Option<Arc<LlmGateway>>,
    sandbox: Option<Arc<dyn SandboxRunner>>,
    artifacts: Option<ArtifactStore>,
    attestations: Option<AttestationStore>,
    profiles: ProfileStore,
    emitter: Option<Arc<dyn EventEmitter>>,
    quota: Option<Box<QuotaCheck>>,
    capacity: usize,
}

impl Default for BuildServiceBuilder {
    fn default() -> Self {
        Self {
            gateway: None,
            sandbox: None,
            artifacts: None,
            attestations: None,
            profiles: ProfileStore::with_default(),
            emitter: None,
            quota: None,
            capacity: 32,
        }
    }
}

impl BuildServiceBuilder {
    #[must_use]
    pub fn gateway(mut self, gateway: Arc<LlmGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    #[must_use]
    pub fn sandbox(mut self, sandbox: Arc<dyn SandboxRunner>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    #[must_use]
    pub fn artifacts(mut self, store: ArtifactStore) -> Self {
        self.artifacts = Some(store);
        self
    }

    #[must_use]
    pub fn attestations(mut self, store: AttestationStore) -> Self {
        self.attestations = Some(store);
        self
    }

    #[must_use]
    pub fn profiles(mut self, profiles: ProfileStore) -> Self {
        self.profiles = profiles;
        self
    }

    #[must_use]
    pub fn emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    #[must_use]
    pub fn quota(mut self, quota: Box<QuotaCheck>) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Bound on concurrently running jobs; intake rejects past it.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Finish wiring. Panics if a required dependency is missing —
    /// this is process-start configuration, not request handling.
    #[must_use]
    pub fn build(self) -> BuildService {
        BuildService {
            inner: Arc::new(ServiceInner {
                gateway: self.gateway.expect("gateway is required"),
                sandbox: self.sandbox.expect("sandbox runner is required"),
                artifacts: self.artifacts.expect("artifact store is required"),
                attestations: self.attestations.expect("attestation store is required"),
                profiles: self.profiles,
                emitter: self
                    .emitter
                    .unwrap_or_else(|| Arc::new(crate::events::emitter::NullEmitter)),
                quota: self.quota,
                jobs: Mutex::new(FxHashMap::default()),
                idempotency: Mutex::new(FxHashMap::default()),
                capacity: self.capacity,
                active: AtomicUsize::new(0),
            }),
        }
    }
}

impl BuildService {
    #[must_use]
    pub fn builder() -> BuildServiceBuilder {
        BuildServiceBuilder::default()
    }

    /// Submit a build request. Returns immediately with the job id;
    /// two requests with the same idempotency key share one job.
    #[instrument(skip(self, request), fields(module = %request.module_id), err)]
    pub fn submit(&self, request: BuildRequest) -> Result<JobId, IntakeError> {
        let module: ModuleId = request.module_id.parse()?;
        let profile = self
            .inner
            .profiles
            .get(&request.policy_profile)
            .map_err(|_| IntakeError::PolicyProfileUnknown {
                name: request.policy_profile.clone(),
            })?;

        if let Some(quota) = &self.inner.quota {
            if !quota(&request) {
                return Err(IntakeError::QuotaExceeded);
            }
        }

        // Idempotency and admission decided atomically: the second
        // submit with an equal key observes the first job.
        let (job_id, cancel) = {
            let mut idempotency = self.inner.idempotency.lock().expect("idempotency lock");
            if let Some(existing) = idempotency.get(&request.idempotency_key) {
                return Ok(*existing);
            }

            // Bounded intake: reject, never buffer.
            let active = self.inner.active.load(Ordering::SeqCst);
            if active >= self.inner.capacity {
                return Err(IntakeError::QueueFull {
                    capacity: self.inner.capacity,
                });
            }
            self.inner.active.fetch_add(1, Ordering::SeqCst);

            let job_id = JobId::new();
            let cancel = CancellationToken::new();
            let (done_tx, _done_rx) = watch::channel(None);
            self.inner.jobs.lock().expect("jobs lock").insert(
                job_id,
                JobEntry {
                    stage: BuildStage::Init,
                    attempt: 0,
                    terminal: None,
                    cancel: cancel.clone(),
                    done_tx,
                },
            );
            idempotency.insert(request.idempotency_key.clone(), job_id);
            (job_id, cancel)
        };

        let max_attempts = request
            .max_repair_attempts
            .unwrap_or(profile.max_repair_attempts)
            .max(1);
        let ctx = JobContext {
            job_id,
            module,
            intent: request.intent,
            profile,
            correlation: CorrelationId::new(),
            cancel,
            max_attempts,
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            drive_job(inner, ctx).await;
        });

        Ok(job_id)
    }

    /// Current stage, attempt count, and terminal outcome if present.
    #[must_use]
    pub fn status(&self, job_id: JobId) -> Option<JobStatus> {
        self.inner
            .jobs
            .lock()
            .expect("jobs lock")
            .get(&job_id)
            .map(|entry| JobStatus {
                job_id,
                stage: entry.stage.to_string(),
                attempt: entry.attempt,
                terminal: entry.terminal.clone(),
            })
    }

    /// Fire the job's cancellation token. Returns false for unknown
    /// jobs.
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.inner.jobs.lock().expect("jobs lock").get(&job_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Wait for the job's terminal state.
    pub async fn wait(&self, job_id: JobId) -> Option<BuildStatus> {
        let mut rx = {
            let jobs = self.inner.jobs.lock().expect("jobs lock");
            let entry = jobs.get(&job_id)?;
            if let Some(status) = &entry.terminal {
                return Some(status.clone());
            }
            entry.done_tx.subscribe()
        };
        match rx.wait_for(|status| status.is_some()).await {
            Ok(status) => status.clone(),
            Err(_) => self.status(job_id).and_then(|s| s.terminal),
        }
    }
}

struct JobContext {
    job_id: JobId,
    module: ModuleId,
    intent: String,
    profile: Arc<PolicyProfile>,
    correlation: CorrelationId,
    cancel: CancellationToken,
    max_attempts: u32,
}

/// Outermost job boundary: deadline, cancellation, and the only broad
/// catch in the system — every exit becomes a typed terminal state.
async fn drive_job(inner: Arc<ServiceInner>, ctx: JobContext) {
    let job_id = ctx.job_id;
    let correlation = ctx.correlation;
    let deadline = std::time::Duration::from_secs(ctx.profile.job_deadline_seconds);
    let cancel = ctx.cancel.clone();

    let outcome = {
        let staged = run_stages(&inner, &ctx);
        tokio::select! {
            () = cancel.cancelled() => None,
            result = tokio::time::timeout(deadline, std::panic::AssertUnwindSafe(staged).catch_unwind()) => Some(result),
        }
    };

    let status = match outcome {
        // External cancel: partial artifacts stay on disk for audit.
        None => BuildStatus::Aborted,
        // Deadline: the in-flight stage future is dropped, which kills
        // any sandbox child and tears down its workspace.
        Some(Err(_elapsed)) => {
            cancel.cancel();
            BuildStatus::Aborted
        }
        Some(Ok(Err(_panic))) => {
            inner.emit(
                job_id,
                correlation,
                BuildEventKind::Diagnostic {
                    scope: "orchestrator".into(),
                    message: "job task panicked; aborting".into(),
                },
            );
            BuildStatus::Aborted
        }
        Some(Ok(Ok(Err(infra)))) => {
            inner.emit(
                job_id,
                correlation,
                BuildEventKind::Diagnostic {
                    scope: "orchestrator".into(),
                    message: redact(&format!("infrastructure failure: {infra}")),
                },
            );
            BuildStatus::Aborted
        }
        Some(Ok(Ok(Ok(status)))) => status,
    };

    inner.emit(
        job_id,
        correlation,
        BuildEventKind::Terminal {
            status: redact(&status.to_string()),
        },
    );
    info!(job = %job_id, status = %status, "job terminal");
    inner.finish_job(job_id, status);
    inner.active.fetch_sub(1, Ordering::SeqCst);
}

/// The stage loop proper.
async fn run_stages(
    inner: &ServiceInner,
    ctx: &JobContext,
) -> Result<BuildStatus, OrchestratorError> {
    let job_id = ctx.job_id;
    let correlation = ctx.correlation;
    let module = &ctx.module;
    let profile = &ctx.profile;
    let limits = ResponseLimits {
        max_changed_files: profile.max_changed_files,
        max_bytes_per_file: profile.max_bytes_per_file,
    };

    // ---- SCAFFOLD -----------------------------------------------------
    inner.update_job(job_id, BuildStage::Scaffold, 0);
    inner.emit(
        job_id,
        correlation,
        BuildEventKind::StageStarted {
            stage: "scaffold".into(),
            attempt: 0,
        },
    );

    let scaffold = match scaffold_plan(inner, ctx, &limits).await {
        Ok(plan) => plan,
        Err(outcome) => return Ok(outcome),
    };
    let mut assumptions = scaffold.assumptions.clone();
    assumptions.truncate(8);

    let mut current = template::starter_bundle(module, scaffold.policy.capabilities.clone())?;
    current = apply_response(&current, &scaffold)?;
    let scaffold_attempt = AttemptId::new();
    inner.artifacts.write_attempt(
        job_id,
        scaffold_attempt,
        Some(module),
        Some("scaffold"),
        &current,
    )?;
    inner.emit(
        job_id,
        correlation,
        BuildEventKind::StageEnded {
            stage: "scaffold".into(),
            attempt: 0,
            outcome: "planned".into(),
        },
    );

    // ---- IMPLEMENT / VALIDATE / REPAIR loop ---------------------------
    let mut previous_fingerprint: Option<FailureFingerprint> = None;
    let mut resource_retried = false;
    let mut repair_context: Option<String> = None;

    for attempt_no in 1..=ctx.max_attempts {
        let attempt_id = AttemptId::new();
        inner.update_job(job_id, BuildStage::Implement, attempt_no);
        inner.emit(
            job_id,
            correlation,
            BuildEventKind::AttemptStarted {
                attempt_id,
                attempt: attempt_no,
            },
        );
        inner.emit(
            job_id,
            correlation,
            BuildEventKind::StageStarted {
                stage: "implement".into(),
                attempt: attempt_no,
            },
        );

        let (purpose, prompt) = match &repair_context {
            None => (
                Purpose::Codegen,
                prompts::implement_prompt(&ctx.intent, module, &assumptions),
            ),
            Some(repair) => (Purpose::Repair, repair.clone()),
        };
        let request = GenerateRequest {
            purpose,
            prompt,
            schema_id: prompts::SCHEMA_GENERATOR.to_string(),
            budget: BudgetHint::default(),
            module_id: module.clone(),
            job_id,
            correlation_id: correlation,
        };

        let (candidate, attempt_report): (ArtifactBundle, Option<ValidationReport>) = match inner
            .gateway
            .generate_with_limits(&request, &limits, &ctx.cancel)
            .await
        {
            Ok(response) => {
                let candidate = apply_response(&current, &response)?;
                if candidate.len() > profile.max_files {
                    let mut report = ValidationReport::new();
                    report.push(crate::report::Finding::new(
                        FindingKind::SchemaMismatch,
                        format!(
                            "bundle would grow to {} files, profile allows {}",
                            candidate.len(),
                            profile.max_files
                        ),
                    ));
                    (candidate, Some(report))
                } else {
                    (candidate, None)
                }
            }
            Err(error) => match classify::classify_gateway_error(&error) {
                GatewayOutcome::Cancelled => return Ok(BuildStatus::Aborted),
                GatewayOutcome::Terminal(reason) => {
                    return Ok(BuildStatus::Failed { reason, note: None });
                }
                // The attempt keeps the prior bundle state; the failure
                // is recorded as findings against it.
                GatewayOutcome::AttemptFailed(report) => (current.clone(), Some(report)),
            },
        };

        // Every attempt persists exactly one immutable artifact set
        // before validation begins, whatever the gateway produced.
        inner.artifacts.write_attempt(
            job_id,
            attempt_id,
            Some(module),
            Some("implement"),
            &candidate,
        )?;

        // ---- VALIDATE -------------------------------------------------
        inner.update_job(job_id, BuildStage::Validate, attempt_no);
        inner.emit(
            job_id,
            correlation,
            BuildEventKind::StageStarted {
                stage: "validate".into(),
                attempt: attempt_no,
            },
        );

        let merged = match attempt_report {
            Some(report) => report,
            None => {
                let static_report = StaticAnalyzer::new(profile).analyze(&candidate);
                if static_report.has_terminal() {
                    // Terminal static findings short-circuit; the
                    // sandbox is never invoked for this attempt.
                    static_report
                } else {
                    let runtime = match inner
                        .sandbox
                        .run(&candidate, profile, &profile.network, &ctx.cancel)
                        .await
                    {
                        Ok(report) => report,
                        Err(SandboxError::Cancelled) => return Ok(BuildStatus::Aborted),
                        Err(err) => return Err(err.into()),
                    };
                    ValidationReport::merged(static_report, runtime)
                }
            }
        };

        let report_ref = inner.artifacts.write_report(attempt_id, &merged)?;
        let validated = merged.is_validated();
        inner.emit(
            job_id,
            correlation,
            BuildEventKind::StageEnded {
                stage: "validate".into(),
                attempt: attempt_no,
                outcome: if validated { "pass" } else { "fail" }.to_string(),
            },
        );
        inner.emit(
            job_id,
            correlation,
            BuildEventKind::AttemptEnded {
                attempt_id,
                attempt: attempt_no,
                validated,
            },
        );

        if validated {
            // ---- ATTEST -----------------------------------------------
            inner.update_job(job_id, BuildStage::Attest, attempt_no);
            let version = manifest_of(&candidate)
                .map(|m| m.version)
                .unwrap_or_else(|| "0.1.0".to_string());
            let bundle_digest = candidate.digest();
            let attestation = Attestation::new(
                job_id,
                module.clone(),
                version,
                bundle_digest.clone(),
                report_ref,
            );
            inner.attestations.append(&attestation)?;
            return Ok(BuildStatus::Validated { bundle_digest });
        }

        // ---- classify and maybe REPAIR --------------------------------
        let fingerprint = FailureFingerprint::compute(&merged);
        let class = classify::classify_report(
            &merged,
            previous_fingerprint.as_ref(),
            &fingerprint,
            resource_retried,
        );
        match class {
            FailureClass::Terminal(reason) => {
                let note = prompts::lead_finding(&merged).map(|f| redact(&f.message));
                return Ok(BuildStatus::Failed { reason, note });
            }
            FailureClass::NonProgressing => {
                return Ok(BuildStatus::Failed {
                    reason: FailureReason::ThrashDetected,
                    note: None,
                });
            }
            FailureClass::Retryable { lead } => {
                if !merged.blocking_of(FindingKind::ResourceExhausted).is_empty() {
                    resource_retried = true;
                }
                previous_fingerprint = Some(fingerprint);
                current = candidate;
                inner.update_job(job_id, BuildStage::Repair, attempt_no);
                inner.emit(
                    job_id,
                    correlation,
                    BuildEventKind::StageStarted {
                        stage: "repair".into(),
                        attempt: attempt_no,
                    },
                );
                repair_context = Some(prompts::repair_prompt(&ctx.intent, module, &merged));
                inner.emit(
                    job_id,
                    correlation,
                    BuildEventKind::StageEnded {
                        stage: "repair".into(),
                        attempt: attempt_no,
                        outcome: format!("reprompted:{lead}"),
                    },
                );
            }
        }
    }

    Ok(BuildStatus::Failed {
        reason: FailureReason::RepairAttemptsExhausted,
        note: None,
    })
}

/// SCAFFOLD: ask for a plan, optionally gate it through the critic.
/// Returns the plan, or the job's terminal status on gateway failure.
async fn scaffold_plan(
    inner: &ServiceInner,
    ctx: &JobContext,
    limits: &ResponseLimits,
) -> Result<GenerateResponse, BuildStatus> {
    let mut critique: Option<String> = None;

    for _round in 0..ctx.max_attempts.max(1) {
        let request = GenerateRequest {
            purpose: Purpose::Codegen,
            prompt: prompts::scaffold_prompt(&ctx.intent, &ctx.module, critique.as_deref()),
            schema_id: prompts::SCHEMA_SCAFFOLD.to_string(),
            budget: BudgetHint::default(),
            module_id: ctx.module.clone(),
            job_id: ctx.job_id,
            correlation_id: ctx.correlation,
        };
        let plan = match inner
            .gateway
            .generate_with_limits(&request, limits, &ctx.cancel)
            .await
        {
            Ok(plan) => plan,
            Err(error) => match classify::classify_gateway_error(&error) {
                GatewayOutcome::Cancelled => return Err(BuildStatus::Aborted),
                GatewayOutcome::Terminal(reason) => {
                    return Err(BuildStatus::Failed { reason, note: None });
                }
                GatewayOutcome::AttemptFailed(report) => {
                    let note = prompts::lead_finding(&report).map(|f| redact(&f.message));
                    return Err(BuildStatus::Failed {
                        reason: FailureReason::RepairAttemptsExhausted,
                        note,
                    });
                }
            },
        };

        let Some(threshold) = inner.gateway.critic_threshold() else {
            return Ok(plan);
        };

        let critic_request = GenerateRequest {
            purpose: Purpose::Critic,
            prompt: prompts::critic_prompt(
                &ctx.module,
                &serde_json::to_string(&plan).unwrap_or_default(),
            ),
            schema_id: prompts::SCHEMA_CRITIC.to_string(),
            budget: BudgetHint::default(),
            module_id: ctx.module.clone(),
            job_id: ctx.job_id,
            correlation_id: ctx.correlation,
        };
        match inner.gateway.review_plan(&critic_request, &ctx.cancel).await {
            Ok(verdict) if verdict.passes(threshold) => return Ok(plan),
            Ok(verdict) => {
                warn!(
                    job = %ctx.job_id,
                    score = verdict.weighted_score(&crate::gateway::DEFAULT_WEIGHTS),
                    "scaffold plan rejected by critic; re-requesting",
                );
                critique = Some(verdict.critique);
            }
            Err(crate::gateway::GatewayError::Cancelled) => return Err(BuildStatus::Aborted),
            // The gate is advisory; a broken critic lane never blocks
            // the build.
            Err(_) => return Ok(plan),
        }
    }

    Err(BuildStatus::Failed {
        reason: FailureReason::RepairAttemptsExhausted,
        note: Some("scaffold plan never cleared the confidence gate".to_string()),
    })
}

/// Merge a generator response onto a bundle.
fn apply_response(
    base: &ArtifactBundle,
    response: &GenerateResponse,
) -> Result<ArtifactBundle, BundleError> {
    let changed = response
        .changed_files
        .iter()
        .map(|f| FileEntry::new(f.path.clone(), f.content.clone().into_bytes()))
        .collect::<Result<Vec<_>, _>>()?;
    base.with_changes(changed, &response.deleted_files)
}

fn manifest_of(bundle: &ArtifactBundle) -> Option<Manifest> {
    bundle
        .iter()
        .find(|e| e.path().ends_with("/manifest.json"))
        .and_then(|e| Manifest::from_json(e.bytes()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_are_lowercase() {
        assert_eq!(BuildStage::Scaffold.to_string(), "scaffold");
        assert_eq!(BuildStage::Attest.to_string(), "attest");
    }

    #[test]
    fn apply_response_merges_and_deletes() {
        let module: ModuleId = "weather/openweather".parse().unwrap();
        let base = template::starter_bundle(&module, vec![]).unwrap();
        let response = GenerateResponse {
            stage: "implement".into(),
            module: module.to_string(),
            changed_files: vec![crate::gateway::ChangedFile {
                path: "modules/weather/openweather/adapter.py".into(),
                content: "x = 2\n".into(),
            }],
            deleted_files: vec!["modules/weather/openweather/test_adapter.py".into()],
            assumptions: vec![],
            rationale: String::new(),
            policy: Default::default(),
            validation_report: None,
        };
        let next = apply_response(&base, &response).unwrap();
        assert_eq!(next.len(), 2);
        assert_eq!(
            next.get("modules/weather/openweather/adapter.py")
                .unwrap()
                .bytes(),
            b"x = 2\n"
        );
    }
}
