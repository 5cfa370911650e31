//! Plan executor.
//!
//! Actions start as soon as every action they depend on has succeeded, up
//! to `parallelism` at a time, lowest ready index first. Spawned tasks only
//! call the provider; this task owns the snapshot and saves it after every
//! completed action, so state writes never interleave.

use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{ApplyConfig, ConfigHasher};
use crate::error::{PipeformError, PlanError, ProviderError, ReconcileError, Result};
use crate::model::{
    ConcreteAttributes, Outputs, ResolveContext, ResourceId, first_pending, resolve, to_payload,
};
use crate::provider::{Attempted, Payload, Provider, ProviderResult, RetryPolicy, SecretStore};
use crate::state::{RecordedResource, ResourceStatus, StateSnapshot, StateStore};
use crate::template::TemplateLibrary;

use super::plan::{Action, Plan, PlannedAction};

/// Cooperative cancellation flag, checked before each action starts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. In-flight actions still complete.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Apply tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Maximum actions in flight.
    pub parallelism: usize,
    /// Stop starting actions after the first failure.
    pub halt_on_error: bool,
    /// Retry policy for transient errors.
    pub retry: RetryPolicy,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self::from(&ApplyConfig::default())
    }
}

impl From<&ApplyConfig> for ApplyOptions {
    fn from(config: &ApplyConfig) -> Self {
        Self {
            parallelism: config.parallelism,
            halt_on_error: config.halt_on_error,
            retry: config.retry,
        }
    }
}

/// Final outcome of one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The provider call succeeded and state was saved.
    Succeeded {
        /// Provider attempts made.
        attempts: u32,
    },
    /// The action failed.
    Failed {
        /// Failure description.
        error: String,
        /// Provider attempts made.
        attempts: u32,
    },
    /// Not started because an action it depends on did not succeed.
    Skipped {
        /// Resource whose action did not succeed.
        dependency: ResourceId,
    },
    /// Not started because the run halted after a failure.
    Halted,
    /// Not started because the run was cancelled.
    Cancelled,
}

impl Outcome {
    const fn blocks_dependents(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Skipped { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded { .. } => write!(f, "succeeded"),
            Self::Failed { error, .. } => write!(f, "failed: {error}"),
            Self::Skipped { dependency } => write!(f, "skipped ({dependency} did not succeed)"),
            Self::Halted => write!(f, "halted"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome of one plan step.
#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    /// Step index in the plan.
    pub index: usize,
    /// Planned action.
    pub action: Action,
    /// Target resource.
    pub resource: ResourceId,
    /// What happened.
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Outcomes of every actionable step, in plan order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Per-step outcomes.
    pub actions: Vec<ActionReport>,
}

impl RunReport {
    fn matching(&self, pred: fn(&Outcome) -> bool) -> impl Iterator<Item = &ActionReport> {
        self.actions.iter().filter(move |a| pred(&a.outcome))
    }

    /// Steps that succeeded.
    pub fn succeeded(&self) -> impl Iterator<Item = &ActionReport> {
        self.matching(|o| matches!(o, Outcome::Succeeded { .. }))
    }

    /// Steps that failed.
    pub fn failed(&self) -> impl Iterator<Item = &ActionReport> {
        self.matching(|o| matches!(o, Outcome::Failed { .. }))
    }

    /// Steps skipped because a dependency did not succeed.
    pub fn skipped(&self) -> impl Iterator<Item = &ActionReport> {
        self.matching(|o| matches!(o, Outcome::Skipped { .. }))
    }

    /// Steps not started after a halt.
    pub fn halted(&self) -> impl Iterator<Item = &ActionReport> {
        self.matching(|o| matches!(o, Outcome::Halted))
    }

    /// Steps not started after cancellation.
    pub fn cancelled(&self) -> impl Iterator<Item = &ActionReport> {
        self.matching(|o| matches!(o, Outcome::Cancelled))
    }

    /// Returns true if every step succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.actions
            .iter()
            .all(|a| matches!(a.outcome, Outcome::Succeeded { .. }))
    }

    /// Outcome of the step at `index`.
    #[must_use]
    pub fn outcome(&self, index: usize) -> Option<&Outcome> {
        self.actions
            .iter()
            .find(|a| a.index == index)
            .map(|a| &a.outcome)
    }

    /// One-line failure summary for history, `None` on success.
    #[must_use]
    pub fn error_summary(&self) -> Option<String> {
        if self.is_success() {
            return None;
        }
        let failed: Vec<String> = self.failed().map(|a| a.resource.to_string()).collect();
        Some(format!(
            "{} failed [{}], {} skipped, {} halted, {} cancelled",
            failed.len(),
            failed.join(", "),
            self.skipped().count(),
            self.halted().count(),
            self.cancelled().count()
        ))
    }
}

/// Provider call prepared by the coordinator.
#[derive(Debug)]
struct Job {
    index: usize,
    action: Action,
    resource: ResourceId,
    provider_id: Option<String>,
    payload: Payload,
}

/// What gets recorded in state if the call succeeds.
#[derive(Debug)]
struct Recording {
    attributes: ConcreteAttributes,
    depends_on: Vec<ResourceId>,
}

type TaskOutput = (usize, Attempted<Option<Outputs>>);

#[derive(Debug)]
struct LockRenewal {
    lock_id: String,
    every: Duration,
}

/// Executor for plans.
#[derive(Debug)]
pub struct ApplyExecutor {
    provider: Arc<dyn Provider>,
    store: Arc<dyn StateStore>,
    secrets: Arc<dyn SecretStore>,
    templates: TemplateLibrary,
    options: ApplyOptions,
    cancel: CancelToken,
    renewal: Option<LockRenewal>,
    hasher: ConfigHasher,
}

impl ApplyExecutor {
    /// Creates a new executor.
    #[must_use]
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn StateStore>,
        secrets: Arc<dyn SecretStore>,
        templates: TemplateLibrary,
        options: ApplyOptions,
    ) -> Self {
        Self {
            provider,
            store,
            secrets,
            templates,
            options,
            cancel: CancelToken::new(),
            renewal: None,
            hasher: ConfigHasher::new(),
        }
    }

    /// Uses `token` for cancellation.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Renews the state lock `lock_id` every `every` while actions run. If a
    /// renewal fails no new actions start.
    #[must_use]
    pub fn with_lock_renewal(mut self, lock_id: impl Into<String>, every: Duration) -> Self {
        self.renewal = Some(LockRenewal {
            lock_id: lock_id.into(),
            every,
        });
        self
    }

    /// Executes every actionable step of `plan`, updating `snapshot` and
    /// saving it after each completed action.
    ///
    /// # Errors
    ///
    /// Returns an error only if the state store fails. Resource failures
    /// are reported in the [`RunReport`].
    pub async fn execute(&self, plan: &Plan, snapshot: &mut StateSnapshot) -> Result<RunReport> {
        let steps = &plan.steps;
        let parallelism = self.options.parallelism.max(1);
        info!(
            "Applying {} actions (parallelism {parallelism})",
            plan.action_count()
        );

        let mut outcomes: Vec<Option<Outcome>> = steps
            .iter()
            .map(|s| (s.action == Action::NoOp).then_some(Outcome::Succeeded { attempts: 0 }))
            .collect();
        let mut running: BTreeSet<usize> = BTreeSet::new();
        let mut recordings: BTreeMap<usize, Recording> = BTreeMap::new();
        let mut tasks: JoinSet<TaskOutput> = JoinSet::new();
        let mut task_index = HashMap::new();
        let mut halted = false;
        let mut renewal = self.renewal.as_ref().map(|r| (r, Instant::now() + r.every));

        loop {
            skip_blocked(steps, &mut outcomes);

            if !halted && !self.cancel.is_cancelled() {
                while tasks.len() < parallelism {
                    let Some(index) = next_ready(steps, &outcomes, &running) else {
                        break;
                    };
                    let step = &steps[index];
                    match self.prepare(step, snapshot) {
                        Ok((job, recording)) => {
                            info!("{} {}: {}", step.action, step.resource, step.reason);
                            let provider = Arc::clone(&self.provider);
                            let handle = tasks.spawn(run_job(provider, self.options.retry, job));
                            task_index.insert(handle.id(), index);
                            running.insert(index);
                            if let Some(recording) = recording {
                                recordings.insert(index, recording);
                            }
                        }
                        Err(e) => {
                            error!("{} {} failed before the provider call: {e}", step.action, step.resource);
                            outcomes[index] = Some(Outcome::Failed {
                                error: e.to_string(),
                                attempts: 0,
                            });
                            if self.options.halt_on_error {
                                halted = true;
                                break;
                            }
                            skip_blocked(steps, &mut outcomes);
                        }
                    }
                }
            }

            let joined = match renewal {
                Some((lock, due)) => tokio::select! {
                    joined = tasks.join_next_with_id() => joined,
                    () = tokio::time::sleep_until(due) => {
                        if self.renew_lock(lock).await {
                            renewal = Some((lock, Instant::now() + lock.every));
                        } else {
                            halted = true;
                            renewal = None;
                        }
                        continue;
                    }
                },
                None => tasks.join_next_with_id().await,
            };
            let Some(joined) = joined else {
                break;
            };
            let (index, attempted) = match joined {
                Ok((_, output)) => output,
                Err(e) => {
                    let Some(index) = task_index.get(&e.id()).copied() else {
                        return Err(PipeformError::internal(format!("unknown task failed: {e}")));
                    };
                    let failure = Attempted {
                        result: Err(ProviderError::InvalidResponse {
                            message: format!("provider task aborted: {e}"),
                        }),
                        attempts: 1,
                    };
                    (index, failure)
                }
            };
            running.remove(&index);

            let outcome = self
                .complete(&steps[index], recordings.remove(&index), attempted, snapshot)
                .await?;
            if matches!(outcome, Outcome::Failed { .. }) && self.options.halt_on_error {
                warn!("Halting: no new actions will start");
                halted = true;
            }
            outcomes[index] = Some(outcome);
        }

        skip_blocked(steps, &mut outcomes);
        let cancelled = self.cancel.is_cancelled();
        let actions = steps
            .iter()
            .zip(outcomes)
            .filter(|(step, _)| step.action != Action::NoOp)
            .map(|(step, outcome)| ActionReport {
                index: step.index,
                action: step.action,
                resource: step.resource.clone(),
                outcome: outcome.unwrap_or(if cancelled {
                    Outcome::Cancelled
                } else {
                    Outcome::Halted
                }),
            })
            .collect();

        let report = RunReport { actions };
        info!(
            "Apply finished: {} succeeded, {} failed, {} skipped, {} halted, {} cancelled",
            report.succeeded().count(),
            report.failed().count(),
            report.skipped().count(),
            report.halted().count(),
            report.cancelled().count()
        );
        Ok(report)
    }

    /// Resolves attributes against outputs recorded so far and builds the
    /// provider payload.
    fn prepare(
        &self,
        step: &PlannedAction,
        snapshot: &StateSnapshot,
    ) -> Result<(Job, Option<Recording>)> {
        let recorded_id = || snapshot.get(&step.resource).map(|r| r.provider_id.clone());
        let unresolvable = |message: &str| {
            PipeformError::Plan(PlanError::Unresolvable {
                resource: step.resource.to_string(),
                message: message.to_string(),
            })
        };

        match step.action {
            Action::Delete => {
                let provider_id = step
                    .provider_id
                    .clone()
                    .or_else(recorded_id)
                    .ok_or_else(|| unresolvable("no provider id recorded"))?;
                let job = Job {
                    index: step.index,
                    action: step.action,
                    resource: step.resource.clone(),
                    provider_id: Some(provider_id),
                    payload: Payload::new(),
                };
                Ok((job, None))
            }
            Action::Create | Action::Update => {
                let spec = step
                    .spec
                    .as_ref()
                    .ok_or_else(|| unresolvable("plan step carries no desired spec"))?;
                let outputs = snapshot.outputs();
                let settled = BTreeSet::new();
                let ctx = ResolveContext {
                    outputs: &outputs,
                    pending: &settled,
                    updating: &settled,
                    templates: &self.templates,
                };
                let attributes = resolve(spec, &ctx)?;
                if let Some(reference) = first_pending(&attributes) {
                    return Err(unresolvable(&format!("output '{reference}' is still unknown")));
                }
                let payload = to_payload(&attributes, self.secrets.as_ref())?;

                let provider_id = if step.action == Action::Update {
                    Some(
                        step.provider_id
                            .clone()
                            .or_else(recorded_id)
                            .ok_or_else(|| unresolvable("no provider id recorded"))?,
                    )
                } else {
                    None
                };

                let job = Job {
                    index: step.index,
                    action: step.action,
                    resource: step.resource.clone(),
                    provider_id,
                    payload,
                };
                let recording = Recording {
                    attributes,
                    depends_on: spec.dependencies().into_iter().collect(),
                };
                Ok((job, Some(recording)))
            }
            Action::NoOp => Err(PipeformError::internal("no-op steps are never executed")),
        }
    }

    /// Records a finished call in the snapshot and saves it.
    async fn complete(
        &self,
        step: &PlannedAction,
        recording: Option<Recording>,
        attempted: Attempted<Option<Outputs>>,
        snapshot: &mut StateSnapshot,
    ) -> Result<Outcome> {
        let exhausted = attempted.exhausted(&self.options.retry);
        let Attempted { result, attempts } = attempted;

        match result {
            Ok(outputs) => {
                match (step.action, recording) {
                    (Action::Delete, _) => {
                        snapshot.remove(&step.resource);
                    }
                    (Action::Create | Action::Update, Some(recording)) => {
                        let outputs = outputs.unwrap_or_default();
                        if step.action == Action::Create && !outputs.contains_key("id") {
                            warn!("{}: provider returned no 'id' output", step.resource);
                        }
                        self.record(step, recording, outputs, ResourceStatus::Present, snapshot);
                    }
                    _ => {}
                }
                self.save(snapshot).await?;
                info!(
                    "{} {} succeeded after {attempts} attempt(s)",
                    step.action, step.resource
                );
                Ok(Outcome::Succeeded { attempts })
            }
            Err(e) => {
                if let (Some(partial), Some(recording)) = (e.partial_outputs(), recording)
                    && matches!(step.action, Action::Create | Action::Update)
                {
                    warn!(
                        "{} partially applied; recording as tainted so the next plan replaces it",
                        step.resource
                    );
                    self.record(step, recording, partial.clone(), ResourceStatus::Tainted, snapshot);
                    self.save(snapshot).await?;
                }

                let failure = if exhausted {
                    ReconcileError::MaxRetriesExceeded {
                        attempts,
                        resource: step.resource.to_string(),
                        last_error: e.to_string(),
                    }
                } else {
                    ReconcileError::ResourceFailed {
                        resource: step.resource.to_string(),
                        reason: e.to_string(),
                    }
                };
                error!("{} {}: {failure}", step.action, step.resource);
                Ok(Outcome::Failed {
                    error: failure.to_string(),
                    attempts,
                })
            }
        }
    }

    fn record(
        &self,
        step: &PlannedAction,
        recording: Recording,
        outputs: Outputs,
        status: ResourceStatus,
        snapshot: &mut StateSnapshot,
    ) {
        let existing = snapshot.get(&step.resource).cloned();
        let provider_id = outputs
            .get("id")
            .cloned()
            .or_else(|| step.provider_id.clone())
            .or_else(|| existing.as_ref().map(|r| r.provider_id.clone()))
            .unwrap_or_default();

        let mut record = match existing {
            Some(mut existing) if step.action == Action::Update => {
                existing.outputs.extend(outputs);
                existing.updated_at = Utc::now();
                existing
            }
            _ => {
                let mut fresh = RecordedResource::new(&step.resource, &provider_id);
                fresh.outputs = outputs;
                fresh
            }
        };
        record.provider_id = provider_id;
        record.attributes_hash = self.hasher.hash_attributes(&recording.attributes);
        record.attributes = recording.attributes;
        record.depends_on = recording.depends_on;
        record.status = status;
        snapshot.record(record);
    }

    async fn renew_lock(&self, renewal: &LockRenewal) -> bool {
        match self.store.renew_lock(&renewal.lock_id).await {
            Ok(lock) => {
                debug!("State lock renewed until {}", lock.expires_at);
                true
            }
            Err(e) => {
                error!(
                    "Could not renew state lock {}: {e}; no new actions will start",
                    renewal.lock_id
                );
                false
            }
        }
    }

    async fn save(&self, snapshot: &mut StateSnapshot) -> Result<()> {
        snapshot.bump_serial();
        debug!("Saving state serial {}", snapshot.serial);
        self.store.save(snapshot).await
    }
}

/// Runs one provider call with retries.
async fn run_job(provider: Arc<dyn Provider>, retry: RetryPolicy, job: Job) -> TaskOutput {
    let label = format!("{} {}", job.action, job.resource);
    let provider = provider.as_ref();
    let job = &job;
    let attempted = retry.run(&label, move || call(provider, job)).await;
    (job.index, attempted)
}

async fn call(provider: &dyn Provider, job: &Job) -> ProviderResult<Option<Outputs>> {
    let provider_id = job.provider_id.as_deref().unwrap_or_default();
    match job.action {
        Action::Create => provider.create(&job.resource, &job.payload).await.map(Some),
        Action::Update => provider
            .update(&job.resource, provider_id, &job.payload)
            .await
            .map(Some),
        Action::Delete => match provider.delete(&job.resource, provider_id).await {
            Ok(()) => Ok(None),
            Err(ProviderError::NotFound { .. }) => {
                debug!("{} already gone", job.resource);
                Ok(None)
            }
            Err(e) => Err(e),
        },
        Action::NoOp => Ok(None),
    }
}

/// Lowest-index step that has not started and whose dependencies all succeeded.
fn next_ready(
    steps: &[PlannedAction],
    outcomes: &[Option<Outcome>],
    running: &BTreeSet<usize>,
) -> Option<usize> {
    steps
        .iter()
        .find(|step| {
            outcomes[step.index].is_none()
                && !running.contains(&step.index)
                && step
                    .depends_on
                    .iter()
                    .all(|d| matches!(outcomes[*d], Some(Outcome::Succeeded { .. })))
        })
        .map(|step| step.index)
}

/// Marks unstarted steps whose dependency failed or was skipped. Dependencies
/// always have lower indices, so one forward pass propagates transitively.
fn skip_blocked(steps: &[PlannedAction], outcomes: &mut [Option<Outcome>]) {
    for step in steps {
        if outcomes[step.index].is_some() {
            continue;
        }
        let blocker = step
            .depends_on
            .iter()
            .find(|d| outcomes[**d].as_ref().is_some_and(Outcome::blocks_dependents));
        if let Some(&dep) = blocker {
            warn!("Skipping {} {}: {} did not succeed", step.action, step.resource, steps[dep].resource);
            outcomes[step.index] = Some(Outcome::Skipped {
                dependency: steps[dep].resource.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigParser, DeployConfig};
    use crate::model::{Concrete, ResourceKind};
    use crate::planner::Planner;
    use crate::provider::{MemoryProvider, Operation, StaticSecretStore};
    use crate::state::MemoryStateStore;
    use async_trait::async_trait;

    const CONFIG: &str = r"
project:
  name: dns-analytics
resources:
  - kind: bucket
    name: results
    attributes:
      name: dns-results
  - kind: catalog_database
    name: dns
    attributes:
      name: dns
  - kind: workgroup
    name: primary
    attributes:
      name: primary
      result_location: { ref: bucket.results.name }
      description: { secret: WORKGROUP_NOTE }
  - kind: named_query
    name: all_dns
    attributes:
      name: all_dns
      workgroup: { ref: workgroup.primary.name }
      database: { ref: catalog_database.dns.name }
      query: SELECT 1
";

    struct Harness {
        config: DeployConfig,
        provider: Arc<MemoryProvider>,
        store: Arc<MemoryStateStore>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                config: ConfigParser::new().parse_yaml(CONFIG, None).unwrap(),
                provider: Arc::new(MemoryProvider::new()),
                store: Arc::new(MemoryStateStore::new()),
            }
        }

        fn executor(&self, options: ApplyOptions) -> ApplyExecutor {
            ApplyExecutor::new(
                self.provider.clone(),
                self.store.clone(),
                Arc::new(StaticSecretStore::new([("WORKGROUP_NOTE", "s3cr3t")])),
                self.config.template_library(),
                options,
            )
        }

        fn plan(&self, snapshot: &StateSnapshot) -> Plan {
            Planner::new().plan(&self.config, snapshot).unwrap()
        }
    }

    fn fast(parallelism: usize, halt_on_error: bool) -> ApplyOptions {
        ApplyOptions {
            parallelism,
            halt_on_error,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 5,
            },
        }
    }

    fn id(kind: ResourceKind, name: &str) -> ResourceId {
        ResourceId::new(kind, name)
    }

    fn outcome_of<'a>(report: &'a RunReport, resource: &ResourceId) -> &'a Outcome {
        &report
            .actions
            .iter()
            .find(|a| &a.resource == resource)
            .unwrap()
            .outcome
    }

    #[tokio::test]
    async fn test_apply_then_replan_is_empty() {
        let h = Harness::new();
        let mut snapshot = StateSnapshot::new("dns-analytics", "dev");
        let plan = h.plan(&snapshot);
        assert_eq!(plan.action_count(), 4);

        let report = h.executor(fast(4, false)).execute(&plan, &mut snapshot).await.unwrap();
        assert!(report.is_success(), "{report:?}");
        assert_eq!(snapshot.resources.len(), 4);
        assert_eq!(h.store.save_count(), 4);
        assert_eq!(h.provider.len(), 4);

        let query = snapshot.get(&id(ResourceKind::NamedQuery, "all_dns")).unwrap();
        assert_eq!(query.attributes["workgroup"], Concrete::String("primary".into()));

        let replan = h.plan(&snapshot);
        assert!(replan.is_empty(), "unexpected actions: {replan}");
    }

    #[tokio::test]
    async fn test_secret_reaches_provider_but_not_state() {
        let h = Harness::new();
        let mut snapshot = StateSnapshot::new("dns-analytics", "dev");
        let plan = h.plan(&snapshot);
        h.executor(fast(2, false)).execute(&plan, &mut snapshot).await.unwrap();

        let workgroup = snapshot.get(&id(ResourceKind::Workgroup, "primary")).unwrap();
        let stored = h.provider.resource(&workgroup.provider_id).unwrap();
        assert_eq!(stored.attributes["description"], serde_json::json!("s3cr3t"));
        assert!(matches!(workgroup.attributes["description"], Concrete::Secret(_)));

        let persisted = serde_json::to_string(&h.store.snapshot().unwrap()).unwrap();
        assert!(!persisted.contains("s3cr3t"));
    }

    #[tokio::test]
    async fn test_transient_error_retried_then_succeeds() {
        let h = Harness::new();
        let bucket = id(ResourceKind::Bucket, "results");
        h.provider.fail(
            Operation::Create,
            &bucket,
            ProviderError::RateLimited { retry_after_ms: 1 },
            2,
        );
        let mut snapshot = StateSnapshot::new("dns-analytics", "dev");
        let plan = h.plan(&snapshot);
        let report = h.executor(fast(4, false)).execute(&plan, &mut snapshot).await.unwrap();

        assert!(report.is_success());
        assert_eq!(outcome_of(&report, &bucket), &Outcome::Succeeded { attempts: 3 });
    }

    #[tokio::test]
    async fn test_exhausted_retries_reported() {
        let h = Harness::new();
        let bucket = id(ResourceKind::Bucket, "results");
        h.provider.fail(Operation::Create, &bucket, ProviderError::network("reset"), 10);
        let mut snapshot = StateSnapshot::new("dns-analytics", "dev");
        let plan = h.plan(&snapshot);
        let report = h.executor(fast(4, false)).execute(&plan, &mut snapshot).await.unwrap();

        match outcome_of(&report, &bucket) {
            Outcome::Failed { error, attempts } => {
                assert_eq!(*attempts, 3);
                assert!(error.contains("Maximum retry attempts"));
            }
            other => panic!("unexpected outcome: {other}"),
        }
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried_and_dependents_skipped() {
        let h = Harness::new();
        let bucket = id(ResourceKind::Bucket, "results");
        h.provider
            .fail(Operation::Create, &bucket, ProviderError::rejected("bad name"), 1);
        let mut snapshot = StateSnapshot::new("dns-analytics", "dev");
        let plan = h.plan(&snapshot);
        let report = h.executor(fast(4, false)).execute(&plan, &mut snapshot).await.unwrap();

        assert_eq!(
            outcome_of(&report, &bucket),
            &Outcome::Failed {
                error: String::from("Failed to reconcile bucket.results: Provider rejected request: bad name"),
                attempts: 1,
            }
        );
        assert_eq!(
            outcome_of(&report, &id(ResourceKind::Workgroup, "primary")),
            &Outcome::Skipped { dependency: bucket.clone() }
        );
        assert!(matches!(
            outcome_of(&report, &id(ResourceKind::NamedQuery, "all_dns")),
            Outcome::Skipped { .. }
        ));
        // Independent branch still applied.
        assert!(matches!(
            outcome_of(&report, &id(ResourceKind::CatalogDatabase, "dns")),
            Outcome::Succeeded { .. }
        ));
        let bucket_creates = h
            .provider
            .calls()
            .iter()
            .filter(|c| c.operation == Operation::Create && c.resource == bucket)
            .count();
        assert_eq!(bucket_creates, 1);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_partial_failure_recorded_tainted_and_replaced_next_plan() {
        let h = Harness::new();
        let workgroup = id(ResourceKind::Workgroup, "primary");
        h.provider.fail(
            Operation::Create,
            &workgroup,
            ProviderError::PartiallyApplied {
                message: String::from("encryption settings rejected"),
                outputs: BTreeMap::from([(String::from("id"), String::from("wg-partial"))]),
            },
            1,
        );
        let mut snapshot = StateSnapshot::new("dns-analytics", "dev");
        let plan = h.plan(&snapshot);
        let report = h.executor(fast(4, false)).execute(&plan, &mut snapshot).await.unwrap();

        assert!(matches!(outcome_of(&report, &workgroup), Outcome::Failed { attempts: 1, .. }));
        assert!(matches!(
            outcome_of(&report, &id(ResourceKind::NamedQuery, "all_dns")),
            Outcome::Skipped { .. }
        ));

        let recorded = h.store.snapshot().unwrap();
        let tainted = recorded.get(&workgroup).unwrap();
        assert!(tainted.is_tainted());
        assert_eq!(tainted.provider_id, "wg-partial");

        let next = h.plan(&snapshot);
        let actions: Vec<&PlannedAction> = next.actions().collect();
        assert_eq!(actions[0].action, Action::Delete);
        assert_eq!(actions[0].resource, workgroup);
        assert_eq!(actions[1].action, Action::Create);
        assert_eq!(actions[1].resource, workgroup);
    }

    #[tokio::test]
    async fn test_halt_on_error_stops_new_actions() {
        let h = Harness::new();
        let bucket = id(ResourceKind::Bucket, "results");
        h.provider
            .fail(Operation::Create, &bucket, ProviderError::rejected("bad name"), 1);
        let mut snapshot = StateSnapshot::new("dns-analytics", "dev");
        let plan = h.plan(&snapshot);
        let report = h.executor(fast(1, true)).execute(&plan, &mut snapshot).await.unwrap();

        assert_eq!(
            outcome_of(&report, &id(ResourceKind::CatalogDatabase, "dns")),
            &Outcome::Halted
        );
        assert!(matches!(
            outcome_of(&report, &id(ResourceKind::Workgroup, "primary")),
            Outcome::Skipped { .. }
        ));
        assert!(snapshot.resources.is_empty());
    }

    #[derive(Debug)]
    struct CancelOnCreate {
        inner: MemoryProvider,
        token: CancelToken,
    }

    #[async_trait]
    impl Provider for CancelOnCreate {
        async fn create(&self, resource: &ResourceId, attributes: &Payload) -> ProviderResult<Outputs> {
            self.token.cancel();
            self.inner.create(resource, attributes).await
        }

        async fn get(&self, resource: &ResourceId, provider_id: &str) -> ProviderResult<Payload> {
            self.inner.get(resource, provider_id).await
        }

        async fn update(
            &self,
            resource: &ResourceId,
            provider_id: &str,
            attributes: &Payload,
        ) -> ProviderResult<Outputs> {
            self.inner.update(resource, provider_id, attributes).await
        }

        async fn delete(&self, resource: &ResourceId, provider_id: &str) -> ProviderResult<()> {
            self.inner.delete(resource, provider_id).await
        }

        fn name(&self) -> &'static str {
            "cancel-on-create"
        }
    }

    #[derive(Debug)]
    struct SlowCreate {
        inner: MemoryProvider,
        delay: Duration,
    }

    #[async_trait]
    impl Provider for SlowCreate {
        async fn create(&self, resource: &ResourceId, attributes: &Payload) -> ProviderResult<Outputs> {
            tokio::time::sleep(self.delay).await;
            self.inner.create(resource, attributes).await
        }

        async fn get(&self, resource: &ResourceId, provider_id: &str) -> ProviderResult<Payload> {
            self.inner.get(resource, provider_id).await
        }

        async fn update(
            &self,
            resource: &ResourceId,
            provider_id: &str,
            attributes: &Payload,
        ) -> ProviderResult<Outputs> {
            self.inner.update(resource, provider_id, attributes).await
        }

        async fn delete(&self, resource: &ResourceId, provider_id: &str) -> ProviderResult<()> {
            self.inner.delete(resource, provider_id).await
        }

        fn name(&self) -> &'static str {
            "slow-create"
        }
    }

    fn slow_executor(h: &Harness) -> ApplyExecutor {
        ApplyExecutor::new(
            Arc::new(SlowCreate {
                inner: MemoryProvider::new(),
                delay: Duration::from_millis(40),
            }),
            h.store.clone(),
            Arc::new(StaticSecretStore::new([("WORKGROUP_NOTE", "x")])),
            h.config.template_library(),
            fast(1, false),
        )
    }

    #[tokio::test]
    async fn test_long_apply_keeps_lock_alive() {
        let h = Harness::new();
        let lock = h.store.acquire_lock("apply").await.unwrap();
        let executor = slow_executor(&h).with_lock_renewal(&lock.lock_id, Duration::from_millis(10));

        let mut snapshot = StateSnapshot::new("dns-analytics", "dev");
        let plan = h.plan(&snapshot);
        let report = executor.execute(&plan, &mut snapshot).await.unwrap();
        assert!(report.is_success(), "{report:?}");

        let held = h.store.get_lock_info().await.unwrap().unwrap();
        assert_eq!(held.lock_id, lock.lock_id);
        assert!(held.expires_at > lock.expires_at);
    }

    #[tokio::test]
    async fn test_lost_lock_stops_new_actions() {
        let h = Harness::new();
        let lock = h.store.acquire_lock("apply").await.unwrap();
        h.store.force_unlock().await.unwrap();
        h.store.acquire_lock("intruder").await.unwrap();
        let executor = slow_executor(&h).with_lock_renewal(&lock.lock_id, Duration::from_millis(10));

        let mut snapshot = StateSnapshot::new("dns-analytics", "dev");
        let plan = h.plan(&snapshot);
        let report = executor.execute(&plan, &mut snapshot).await.unwrap();

        assert_eq!(report.succeeded().count(), 1);
        assert_eq!(report.halted().count(), 3);
        assert_eq!(h.store.get_lock_info().await.unwrap().unwrap().holder, "intruder");
    }

    #[tokio::test]
    async fn test_cancellation_lets_in_flight_finish() {
        let h = Harness::new();
        let token = CancelToken::new();
        let provider = Arc::new(CancelOnCreate {
            inner: MemoryProvider::new(),
            token: token.clone(),
        });
        let executor = ApplyExecutor::new(
            provider,
            h.store.clone(),
            Arc::new(StaticSecretStore::new([("WORKGROUP_NOTE", "x")])),
            h.config.template_library(),
            fast(1, false),
        )
        .with_cancel_token(token);

        let mut snapshot = StateSnapshot::new("dns-analytics", "dev");
        let plan = h.plan(&snapshot);
        let report = executor.execute(&plan, &mut snapshot).await.unwrap();

        assert_eq!(report.succeeded().count(), 1);
        assert_eq!(report.cancelled().count(), 3);
        assert_eq!(snapshot.resources.len(), 1);
        assert_eq!(h.store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_secret_fails_only_that_resource() {
        let h = Harness::new();
        let executor = ApplyExecutor::new(
            h.provider.clone(),
            h.store.clone(),
            Arc::new(StaticSecretStore::new([])),
            h.config.template_library(),
            fast(4, false),
        );
        let mut snapshot = StateSnapshot::new("dns-analytics", "dev");
        let plan = h.plan(&snapshot);
        let report = executor.execute(&plan, &mut snapshot).await.unwrap();

        assert!(matches!(
            outcome_of(&report, &id(ResourceKind::Workgroup, "primary")),
            Outcome::Failed { attempts: 0, .. }
        ));
        assert_eq!(report.succeeded().count(), 2);
        assert_eq!(report.skipped().count(), 1);
    }

    #[tokio::test]
    async fn test_delete_of_missing_resource_counts_as_success() {
        let h = Harness::new();
        let mut snapshot = StateSnapshot::new("dns-analytics", "dev");
        let plan = h.plan(&snapshot);
        h.executor(fast(4, false)).execute(&plan, &mut snapshot).await.unwrap();

        let bucket = snapshot.get(&id(ResourceKind::Bucket, "results")).unwrap();
        h.provider.forget(&bucket.provider_id);

        let destroy = Planner::new().plan_destroy(&snapshot).unwrap();
        let report = h.executor(fast(4, false)).execute(&destroy, &mut snapshot).await.unwrap();
        assert!(report.is_success(), "{report:?}");
        assert!(snapshot.resources.is_empty());
        assert!(h.provider.is_empty());
    }

    #[tokio::test]
    async fn test_changed_script_reaches_job_in_same_apply() {
        use crate::config::inject_artifact_hashes;
        use crate::provider::{ArtifactProvider, MemoryObjectStore};

        const ARTIFACT_CONFIG: &str = r#"
project:
  name: dns-analytics
resources:
  - kind: bucket
    name: scripts
    attributes:
      name: dns-scripts
  - kind: script_artifact
    name: create_csv
    attributes:
      bucket: { ref: bucket.scripts.name }
      key: glue/create_csv.py
      source: create_csv.py
  - kind: etl_job
    name: create_csv
    attributes:
      name: create_csv
      role_arn: arn:role/glue
      script_location: { ref: script_artifact.create_csv.location }
      default_arguments:
        "--script-hash": { ref: script_artifact.create_csv.content_hash }
"#;
        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("create_csv.py");
        let load = || {
            let mut config = ConfigParser::new().parse_yaml(ARTIFACT_CONFIG, None).unwrap();
            inject_artifact_hashes(&mut config, dir.path()).unwrap();
            config
        };

        let objects = Arc::new(MemoryObjectStore::new());
        let provider = Arc::new(ArtifactProvider::new(
            MemoryProvider::new(),
            objects.clone(),
            dir.path(),
        ));
        let store = Arc::new(MemoryStateStore::new());
        let apply = |config: &DeployConfig| {
            ApplyExecutor::new(
                provider.clone(),
                store.clone(),
                Arc::new(StaticSecretStore::new([])),
                config.template_library(),
                fast(2, false),
            )
        };
        let job = id(ResourceKind::EtlJob, "create_csv");
        let mut snapshot = StateSnapshot::new("dns-analytics", "dev");

        std::fs::write(&script, b"print('v1')\n").unwrap();
        let v1 = load();
        let plan = Planner::new().plan(&v1, &snapshot).unwrap();
        let report = apply(&v1).execute(&plan, &mut snapshot).await.unwrap();
        assert!(report.is_success(), "{report:?}");

        std::fs::write(&script, b"print('v2')\n").unwrap();
        let v2 = load();
        let plan = Planner::new().plan(&v2, &snapshot).unwrap();
        assert_eq!(plan.count(Action::Update), 2, "{plan}");
        let report = apply(&v2).execute(&plan, &mut snapshot).await.unwrap();
        assert!(report.is_success(), "{report:?}");

        let hash = ConfigHasher::hash_bytes(b"print('v2')\n");
        assert_eq!(
            snapshot.get(&job).unwrap().attributes["default_arguments"],
            Concrete::Map(BTreeMap::from([(
                String::from("--script-hash"),
                Concrete::String(hash)
            )]))
        );
        assert_eq!(
            objects.object("dns-scripts", "glue/create_csv.py"),
            Some(b"print('v2')\n".to_vec())
        );

        let replan = Planner::new().plan(&v2, &snapshot).unwrap();
        assert!(replan.is_empty(), "unexpected actions: {replan}");
    }
}
