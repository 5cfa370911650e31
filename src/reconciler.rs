//! Reconciler for converging provider resources to the desired state.
//!
//! This module ties the pieces together: it locks state, loads the
//! snapshot, optionally refreshes it against the provider, plans, asks for
//! confirmation and executes the plan, then records the run in history.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{ConfigHasher, ConfigValidator, DeployConfig};
use crate::error::{Result, StateError};
use crate::model::ResourceId;
use crate::planner::{ApplyExecutor, ApplyOptions, CancelToken, Plan, Planner, RunReport};
use crate::provider::{DriftReport, ObservedState, Provider, ResourceObserver, SecretStore};
use crate::state::{
    HistoryEntry, LOCK_RENEW_SECS, LockInfo, RunOperation, STATE_VERSION, StateSnapshot,
    StateStore, generate_holder_id,
};

/// Per-run overrides of the `apply:` section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Drop recorded resources the provider no longer has before planning.
    pub refresh: bool,
    /// Overrides `apply.halt_on_error`.
    pub halt_on_error: Option<bool>,
    /// Overrides `apply.parallelism`.
    pub parallelism: Option<usize>,
}

/// Result of an apply or destroy run.
#[derive(Debug, Serialize)]
pub struct ApplyOutcome {
    /// The plan that was computed.
    pub plan: Plan,
    /// Resources dropped from state by refresh.
    pub refreshed: Vec<ResourceId>,
    /// Whether the plan was confirmed.
    pub confirmed: bool,
    /// Execution report, absent if nothing was executed.
    pub report: Option<RunReport>,
}

impl ApplyOutcome {
    /// Returns true unless an executed action did not succeed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.report.as_ref().is_none_or(RunReport::is_success)
    }
}

/// Reconciler for one project/environment.
#[derive(Debug)]
pub struct Reconciler {
    config: DeployConfig,
    store: Arc<dyn StateStore>,
    provider: Arc<dyn Provider>,
    secrets: Arc<dyn SecretStore>,
    planner: Planner,
    hasher: ConfigHasher,
    holder: String,
    cancel: CancelToken,
}

impl Reconciler {
    /// Creates a new reconciler.
    #[must_use]
    pub fn new(
        config: DeployConfig,
        store: Arc<dyn StateStore>,
        provider: Arc<dyn Provider>,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            config,
            store,
            provider,
            secrets,
            planner: Planner::new(),
            hasher: ConfigHasher::new(),
            holder: generate_holder_id(),
            cancel: CancelToken::new(),
        }
    }

    /// Sets the lock holder identity.
    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    /// Uses `token` to cancel runs.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Desired configuration.
    #[must_use]
    pub const fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Loads the snapshot, or an empty one on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the state version is unknown.
    pub async fn load_state(&self) -> Result<StateSnapshot> {
        let project = &self.config.project;
        let Some(snapshot) = self.store.load().await? else {
            debug!("No state found, starting empty");
            return Ok(StateSnapshot::new(&project.name, &project.environment));
        };

        if snapshot.version != STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: snapshot.version,
            }
            .into());
        }
        if snapshot.project != project.name || snapshot.environment != project.environment {
            warn!(
                "State belongs to {}/{}, configuration is {}/{}",
                snapshot.project, snapshot.environment, project.name, project.environment
            );
        }
        Ok(snapshot)
    }

    /// Drops recorded resources the provider reports as missing, so the next
    /// plan recreates them. Returns the dropped ids.
    pub async fn refresh(&self, snapshot: &mut StateSnapshot) -> Vec<ResourceId> {
        let observer = ResourceObserver::new(Arc::clone(&self.provider));
        let mut dropped = Vec::new();

        for observation in observer.observe(snapshot).await {
            if observation.state == ObservedState::Missing {
                warn!(
                    "{} ({}) no longer exists, dropping it from state",
                    observation.id, observation.provider_id
                );
                snapshot.remove(&observation.id);
                dropped.push(observation.id);
            }
        }

        if !dropped.is_empty() {
            let config_hash = snapshot.config_hash.clone();
            snapshot.add_history(HistoryEntry::new(
                RunOperation::Refresh,
                &config_hash,
                dropped.iter().map(ToString::to_string).collect(),
                None,
            ));
        }
        dropped
    }

    /// Computes a plan under the state lock. Nothing is written unless
    /// `refresh` drops resources.
    ///
    /// # Errors
    ///
    /// Returns an error if locking, loading, validation or planning fails.
    pub async fn plan(&self, refresh: bool) -> Result<Plan> {
        let lock = self.lock().await?;
        let result = self.plan_locked(refresh).await;
        self.unlock(&lock, result).await
    }

    async fn plan_locked(&self, refresh: bool) -> Result<Plan> {
        let mut snapshot = self.load_state().await?;
        if refresh && !self.refresh(&mut snapshot).await.is_empty() {
            self.save(&mut snapshot).await?;
        }
        ConfigValidator.validate(&self.config)?;
        self.planner.plan(&self.config, &snapshot)
    }

    /// Plans and applies, asking `confirm` before any change is made.
    ///
    /// # Errors
    ///
    /// Returns an error if locking, loading, validation, planning or a state
    /// write fails. Resource failures are reported in the outcome.
    pub async fn apply<F>(&self, options: ReconcileOptions, confirm: F) -> Result<ApplyOutcome>
    where
        F: FnOnce(&Plan) -> bool,
    {
        let lock = self.lock().await?;
        let result = self.apply_locked(&lock, options, confirm).await;
        self.unlock(&lock, result).await
    }

    async fn apply_locked<F>(
        &self,
        lock: &LockInfo,
        options: ReconcileOptions,
        confirm: F,
    ) -> Result<ApplyOutcome>
    where
        F: FnOnce(&Plan) -> bool,
    {
        info!(
            "Applying {}/{}",
            self.config.project.name, self.config.project.environment
        );
        let mut snapshot = self.load_state().await?;
        let refreshed = if options.refresh {
            self.refresh(&mut snapshot).await
        } else {
            Vec::new()
        };

        let validation = ConfigValidator.validate(&self.config)?;
        for warning in &validation.warnings {
            warn!("{warning}");
        }
        let plan = self.planner.plan(&self.config, &snapshot)?;
        let executor = self.executor(options, lock);

        self.run(plan, refreshed, snapshot, RunOperation::Apply, executor, confirm)
            .await
    }

    /// Deletes every recorded resource, dependents first.
    ///
    /// # Errors
    ///
    /// Returns an error if locking, loading, planning or a state write fails.
    pub async fn destroy<F>(&self, options: ReconcileOptions, confirm: F) -> Result<ApplyOutcome>
    where
        F: FnOnce(&Plan) -> bool,
    {
        let lock = self.lock().await?;
        let result = self.destroy_locked(&lock, options, confirm).await;
        self.unlock(&lock, result).await
    }

    async fn destroy_locked<F>(
        &self,
        lock: &LockInfo,
        options: ReconcileOptions,
        confirm: F,
    ) -> Result<ApplyOutcome>
    where
        F: FnOnce(&Plan) -> bool,
    {
        warn!(
            "Destroying all resources of {}/{}",
            self.config.project.name, self.config.project.environment
        );
        let snapshot = self.load_state().await?;
        let plan = self.planner.plan_destroy(&snapshot)?;
        let executor = self.executor(options, lock);
        self.run(plan, Vec::new(), snapshot, RunOperation::Destroy, executor, confirm)
            .await
    }

    async fn run<F>(
        &self,
        plan: Plan,
        refreshed: Vec<ResourceId>,
        mut snapshot: StateSnapshot,
        operation: RunOperation,
        executor: ApplyExecutor,
        confirm: F,
    ) -> Result<ApplyOutcome>
    where
        F: FnOnce(&Plan) -> bool,
    {
        if plan.is_empty() {
            info!("No changes required, resources match the configuration");
            if !refreshed.is_empty() {
                self.save(&mut snapshot).await?;
            }
            return Ok(ApplyOutcome {
                plan,
                refreshed,
                confirmed: true,
                report: None,
            });
        }

        if !confirm(&plan) {
            info!("Plan not confirmed, nothing applied");
            if !refreshed.is_empty() {
                self.save(&mut snapshot).await?;
            }
            return Ok(ApplyOutcome {
                plan,
                refreshed,
                confirmed: false,
                report: None,
            });
        }

        let report = executor.execute(&plan, &mut snapshot).await?;

        if report.is_success() {
            snapshot.config_hash = match operation {
                RunOperation::Destroy => String::new(),
                _ => plan.config_hash.clone(),
            };
        }
        snapshot.add_history(HistoryEntry::new(
            operation,
            &plan.config_hash,
            plan.touched_resources(),
            report.error_summary(),
        ));
        self.save(&mut snapshot).await?;

        Ok(ApplyOutcome {
            plan,
            refreshed,
            confirmed: true,
            report: Some(report),
        })
    }

    /// Reads every recorded resource back and reports missing and drifted
    /// ones. Takes no lock and writes nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be loaded.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        let snapshot = self.load_state().await?;
        let report = ResourceObserver::new(Arc::clone(&self.provider))
            .check_drift(&snapshot)
            .await;
        info!(
            "Drift check: {} checked, {} missing, {} drifted, {} unreadable",
            report.checked,
            report.missing.len(),
            report.drifted.len(),
            report.unreadable.len()
        );
        Ok(report)
    }

    /// Hash of the desired configuration.
    #[must_use]
    pub fn config_hash(&self) -> String {
        self.hasher.hash_config(&self.config)
    }

    fn executor(&self, options: ReconcileOptions, lock: &LockInfo) -> ApplyExecutor {
        let mut apply = ApplyOptions::from(&self.config.apply);
        if let Some(halt) = options.halt_on_error {
            apply.halt_on_error = halt;
        }
        if let Some(parallelism) = options.parallelism {
            apply.parallelism = parallelism.max(1);
        }
        ApplyExecutor::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.store),
            Arc::clone(&self.secrets),
            self.config.template_library(),
            apply,
        )
        .with_cancel_token(self.cancel.clone())
        .with_lock_renewal(&lock.lock_id, Duration::from_secs(LOCK_RENEW_SECS))
    }

    async fn save(&self, snapshot: &mut StateSnapshot) -> Result<()> {
        snapshot.bump_serial();
        self.store.save(snapshot).await
    }

    async fn lock(&self) -> Result<LockInfo> {
        debug!("Acquiring state lock as {}", self.holder);
        self.store.acquire_lock(&self.holder).await
    }

    /// Releases `lock`, preferring the run's own error over a release error.
    async fn unlock<T>(&self, lock: &LockInfo, result: Result<T>) -> Result<T> {
        match self.store.release_lock(&lock.lock_id).await {
            Ok(()) => result,
            Err(e) => {
                warn!("Failed to release state lock {}: {e}", lock.lock_id);
                result.and(Err(e))
            }
        }
    }
}
