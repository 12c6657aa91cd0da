//! Two-phase update runner
//!
//! [`SystemUpdater`] drives the registry through:
//!
//! 1. **Precheck**: every entry asks the live schema whether its effect is
//!    present and becomes `AlreadyUpdated`, `ReadyForUpdate` or `Error`.
//! 2. **Run**: every `ReadyForUpdate` entry renders its statements and hands
//!    them to the executor as one batch, becoming `Success` or `Failed`.
//!
//! The precheck phase completes for all regions before the run phase starts.
//! Inside a region entries run strictly in order; the first failure (or
//! precheck error) holds back the rest of that region. Other regions are not
//! affected, except regions that declared a dependency on the halted one.
//!
//! Status is re-derived on every pass; nothing is persisted.

use crate::config::UpdaterConfig;
use crate::update::registry::Region;
use crate::update::{
    PrecheckStatus, RunStatus, UpdateAction, UpdateContext, UpdateEntry, UpdateError,
    UpdateRegistry, UpdateReport,
};
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Execution options of [`SystemUpdater`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Upper bound for one entry's precheck and for its run
    ///
    /// `None` waits indefinitely.
    ///
    /// An expired entry is reported as failed, but its statements are not
    /// cancelled: the helper thread keeps running and may still commit the
    /// batch. With a single-connection executor such as
    /// [`PostgresSchema`](crate::postgres::PostgresSchema) the connection stays
    /// busy until it returns, so later entries (and other regions) wait on it.
    /// A later pass prechecks the entry again and reports it `AlreadyUpdated`
    /// if the batch did commit.
    pub entry_timeout: Option<Duration>,
    /// Run independent regions on separate threads
    ///
    /// Honoured only when the executor reports
    /// [`supports_concurrent_batches`](crate::executor::UpdateExecutor::supports_concurrent_batches).
    pub parallel_regions: bool,
}

impl RunOptions {
    pub fn from_config(config: &UpdaterConfig) -> Self {
        Self {
            entry_timeout: config.entry_timeout(),
            parallel_regions: config.parallel_regions,
        }
    }
}

/// Registry plus runner for region update entries
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use sysupdater::dialect::{DatabaseSupport, Dialect};
/// use sysupdater::test_helpers::InMemorySchema;
/// use sysupdater::update::{
///     ColumnKind, ColumnSpec, SchemaChange, SystemUpdater, UpdateContext, UpdateEntry,
///     UpdateRegistry,
/// };
///
/// let mut registry = UpdateRegistry::new();
/// registry
///     .register(
///         UpdateEntry::initial("core", "2024-01-01", "Base schema"),
///         Arc::new(SchemaChange::CreateTable {
///             table: "t_user".to_string(),
///             columns: vec![ColumnSpec::new("id", ColumnKind::BigInteger).primary_key()],
///         }),
///     )
///     .unwrap();
///
/// let schema = Arc::new(InMemorySchema::new());
/// let ctx = UpdateContext::new(
///     schema.clone(),
///     schema.clone(),
///     Arc::new(DatabaseSupport::new(Dialect::Postgres)),
/// );
///
/// let mut updater = SystemUpdater::new(registry);
/// let report = updater.run_all(&ctx);
/// assert_eq!(report.succeeded(), 1);
///
/// // A second pass finds everything in place
/// let report = updater.run_all(&ctx);
/// assert!(report.is_up_to_date());
/// ```
#[derive(Debug)]
pub struct SystemUpdater {
    registry: UpdateRegistry,
    options: RunOptions,
}

impl SystemUpdater {
    pub fn new(registry: UpdateRegistry) -> Self {
        Self::with_options(registry, RunOptions::default())
    }

    pub fn with_options(registry: UpdateRegistry, options: RunOptions) -> Self {
        Self { registry, options }
    }

    pub fn registry(&self) -> &UpdateRegistry {
        &self.registry
    }

    /// Mutable access for late registrations between passes
    pub fn registry_mut(&mut self) -> &mut UpdateRegistry {
        &mut self.registry
    }

    pub fn into_registry(self) -> UpdateRegistry {
        self.registry
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn execution_order(&self) -> Vec<&UpdateEntry> {
        self.registry.execution_order()
    }

    /// Current status of every entry, in execution order
    pub fn report(&self) -> UpdateReport {
        UpdateReport::from_entries(self.registry.execution_order())
    }

    /// Phase 1 only: derive every entry's precheck status, execute nothing
    pub fn precheck_all(&mut self, ctx: &UpdateContext) -> UpdateReport {
        let parallel = self.parallel_enabled(ctx);
        self.reset();
        self.precheck_phase(ctx, parallel);
        self.report()
    }

    /// Precheck every entry, then run every entry still needing an update
    ///
    /// Never fails as a whole: problems are recorded per entry and summarised
    /// in the returned report. Use [`UpdateReport::should_abort_startup`] to
    /// decide whether startup proceeds.
    pub fn run_all(&mut self, ctx: &UpdateContext) -> UpdateReport {
        let parallel = self.parallel_enabled(ctx);
        self.reset();

        log::info!(
            "Checking {} update(s) in {} region(s)",
            self.registry.len(),
            self.registry.regions().len()
        );
        self.precheck_phase(ctx, parallel);
        self.run_phase(ctx, parallel);

        let report = self.report();
        if report.should_abort_startup() {
            log::error!(
                "Schema update finished with problems: {} applied, {} failed, {} precheck error(s), {} skipped",
                report.succeeded(),
                report.failed(),
                report.precheck_errors(),
                report.skipped()
            );
        } else {
            log::info!(
                "Schema update finished: {} applied, {} already up to date",
                report.succeeded(),
                report.already_updated()
            );
        }
        report
    }

    fn reset(&mut self) {
        for region in self.registry.regions_mut() {
            for unit in &mut region.units {
                unit.entry.reset_status();
            }
        }
    }

    fn parallel_enabled(&self, ctx: &UpdateContext) -> bool {
        if !self.options.parallel_regions {
            return false;
        }
        if ctx.executor().supports_concurrent_batches() {
            true
        } else {
            log::warn!(
                "Parallel regions requested but the executor cannot run concurrent batches; running sequentially"
            );
            false
        }
    }

    fn precheck_phase(&mut self, ctx: &UpdateContext, parallel: bool) {
        #[cfg(feature = "tracing")]
        let _span = crate::metrics::tracing_helpers::phase_span("precheck", self.registry.len())
            .entered();

        let timeout = self.options.entry_timeout;
        let regions = self.registry.regions_mut();
        if parallel {
            let panicked: Vec<usize> = thread::scope(|scope| {
                let handles: Vec<_> = regions
                    .iter_mut()
                    .enumerate()
                    .map(|(idx, region)| (idx, scope.spawn(move || precheck_region(region, ctx, timeout))))
                    .collect();
                handles
                    .into_iter()
                    .filter_map(|(idx, handle)| handle.join().is_err().then_some(idx))
                    .collect()
            });
            for idx in panicked {
                precheck_panicked(&mut regions[idx]);
            }
        } else {
            for region in regions.iter_mut() {
                precheck_region(region, ctx, timeout);
            }
        }
    }

    fn run_phase(&mut self, ctx: &UpdateContext, parallel: bool) {
        #[cfg(feature = "tracing")]
        let _span =
            crate::metrics::tracing_helpers::phase_span("run", self.registry.len()).entered();

        let timeout = self.options.entry_timeout;
        let mut completed = vec![false; self.registry.regions().len()];

        let batches: Vec<Vec<usize>> = if parallel {
            self.registry.region_waves()
        } else {
            self.registry
                .region_order()
                .into_iter()
                .map(|idx| vec![idx])
                .collect()
        };

        for batch in batches {
            let mut runnable = Vec::with_capacity(batch.len());
            for idx in batch {
                match self.blocking_dependency(idx, &completed) {
                    Some(dependency) => self.skip_region(idx, &dependency),
                    None => runnable.push(idx),
                }
            }

            let regions = self.registry.regions_mut();
            if parallel && runnable.len() > 1 {
                let results: Vec<(usize, Option<bool>)> = thread::scope(|scope| {
                    let handles: Vec<_> = regions
                        .iter_mut()
                        .enumerate()
                        .filter(|(idx, _)| runnable.contains(idx))
                        .map(|(idx, region)| {
                            (idx, scope.spawn(move || run_region(region, ctx, timeout)))
                        })
                        .collect();
                    handles
                        .into_iter()
                        .map(|(idx, handle)| (idx, handle.join().ok()))
                        .collect()
                });
                for (idx, outcome) in results {
                    match outcome {
                        Some(ok) => completed[idx] = ok,
                        None => run_panicked(&mut regions[idx]),
                    }
                }
            } else {
                for idx in runnable {
                    completed[idx] = run_region(&mut regions[idx], ctx, timeout);
                }
            }
        }
    }

    /// First declared dependency of region `idx` that did not complete
    fn blocking_dependency(&self, idx: usize, completed: &[bool]) -> Option<String> {
        self.registry.regions()[idx]
            .depends_on
            .iter()
            .find(|dep| {
                self.registry
                    .region_position(dep)
                    .is_some_and(|dep_idx| !completed[dep_idx])
            })
            .cloned()
    }

    fn skip_region(&mut self, idx: usize, dependency: &str) {
        let region = &mut self.registry.regions_mut()[idx];
        log::warn!(
            "Skipping region '{}': dependency region '{}' did not complete",
            region.id,
            dependency
        );
        for unit in &mut region.units {
            if unit.entry.precheck_status() == PrecheckStatus::ReadyForUpdate {
                unit.entry
                    .mark_skipped(format!("skipped: dependency region '{dependency}' did not complete"));
            }
        }
    }
}

fn precheck_region(region: &mut Region, ctx: &UpdateContext, timeout: Option<Duration>) {
    #[cfg(feature = "tracing")]
    let _span = crate::metrics::tracing_helpers::region_span(&region.id).entered();

    for unit in &mut region.units {
        let entry = &mut unit.entry;
        let action = Arc::clone(&unit.action);
        let worker_ctx = ctx.clone();
        let outcome = run_guarded(timeout, move || action.is_applied(&worker_ctx));

        let (status, message) = match outcome {
            Guarded::Done(Ok(true)) => (PrecheckStatus::AlreadyUpdated, None),
            Guarded::Done(Ok(false)) => (PrecheckStatus::ReadyForUpdate, None),
            Guarded::Done(Err(source)) => {
                let error = UpdateError::Precheck {
                    region_id: entry.region_id().to_string(),
                    version: entry.version().to_string(),
                    source,
                };
                log::error!("{}", error);
                (PrecheckStatus::Error, Some(error.to_string()))
            }
            Guarded::TimedOut(limit) => {
                let error = timeout_error(entry, limit);
                log::error!("{}", error);
                (PrecheckStatus::Error, Some(error.to_string()))
            }
            Guarded::Aborted(reason) => {
                log::error!("Precheck of {} aborted: {}", entry.label(), reason);
                (PrecheckStatus::Error, Some(reason))
            }
        };

        log::debug!("Precheck {}: {:?}", entry.label(), status);
        #[cfg(feature = "metrics")]
        crate::metrics::METRICS.record_precheck(&region.id, status);
        entry.set_precheck(status, message);
    }
}

/// Run the ready entries of one region; false if the region was halted
fn run_region(region: &mut Region, ctx: &UpdateContext, timeout: Option<Duration>) -> bool {
    #[cfg(feature = "tracing")]
    let _span = crate::metrics::tracing_helpers::region_span(&region.id).entered();

    let mut halted_by: Option<String> = None;
    for unit in &mut region.units {
        let entry = &mut unit.entry;
        if let Some(blocker) = &halted_by {
            if entry.precheck_status() == PrecheckStatus::ReadyForUpdate {
                entry.mark_skipped(format!("skipped: {blocker} did not complete"));
            }
            continue;
        }

        match entry.precheck_status() {
            PrecheckStatus::ReadyForUpdate => {}
            PrecheckStatus::Error => {
                halted_by = Some(entry.label());
                continue;
            }
            PrecheckStatus::AlreadyUpdated | PrecheckStatus::Unchecked => continue,
        }

        #[cfg(feature = "tracing")]
        let _entry_span = crate::metrics::tracing_helpers::entry_span(&entry.label()).entered();

        log::info!("Applying update {}", entry);
        let started = Instant::now();
        let action = Arc::clone(&unit.action);
        let worker_ctx = ctx.clone();
        let outcome = run_guarded(timeout, move || apply(action.as_ref(), &worker_ctx));
        let elapsed = started.elapsed();

        let failure = match outcome {
            Guarded::Done(Ok(count)) => {
                log::info!(
                    "Applied update {} ({} statement(s) in {:?})",
                    entry.label(),
                    count,
                    elapsed
                );
                None
            }
            Guarded::Done(Err(error)) => Some(
                UpdateError::ExecutionFailure {
                    region_id: entry.region_id().to_string(),
                    version: entry.version().to_string(),
                    error: error.to_string(),
                }
                .to_string(),
            ),
            Guarded::TimedOut(limit) => {
                log::warn!(
                    "{} keeps running in the background and holds the executor until it returns",
                    entry.label()
                );
                Some(timeout_error(entry, limit).to_string())
            }
            Guarded::Aborted(reason) => Some(reason),
        };

        let status = if failure.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Success
        };
        #[cfg(feature = "metrics")]
        crate::metrics::METRICS.record_run(&region.id, status, elapsed);

        if let Some(message) = &failure {
            log::error!("{}; remaining updates of region '{}' are skipped", message, region.id);
            halted_by = Some(entry.label());
        }
        entry.set_run(status, elapsed, failure);
    }
    halted_by.is_none()
}

const WORKER_PANICKED: &str = "worker thread panicked";

/// Mark the entries a panicked precheck worker left unchecked
fn precheck_panicked(region: &mut Region) {
    log::error!("Precheck worker of region '{}' panicked", region.id);
    for unit in &mut region.units {
        if unit.entry.precheck_status() == PrecheckStatus::Unchecked {
            unit.entry
                .set_precheck(PrecheckStatus::Error, Some(WORKER_PANICKED.to_string()));
        }
    }
}

/// Fail the entry a panicked run worker was applying and hold back the rest
///
/// Entries complete in order, so the first ready entry without a result is
/// the one that was in flight.
fn run_panicked(region: &mut Region) {
    log::error!(
        "Run worker of region '{}' panicked; remaining updates of the region are skipped",
        region.id
    );
    let mut blocker: Option<String> = None;
    for unit in &mut region.units {
        let entry = &mut unit.entry;
        if entry.precheck_status() != PrecheckStatus::ReadyForUpdate
            || entry.run_status() != RunStatus::NotRun
            || entry.message().is_some()
        {
            continue;
        }
        match &blocker {
            None => {
                #[cfg(feature = "metrics")]
                crate::metrics::METRICS.record_run(&region.id, RunStatus::Failed, Duration::ZERO);
                entry.set_run(RunStatus::Failed, Duration::ZERO, Some(WORKER_PANICKED.to_string()));
                blocker = Some(entry.label());
            }
            Some(label) => entry.mark_skipped(format!("skipped: {label} did not complete")),
        }
    }
}

/// Render and execute one action, returning the number of statements
fn apply(action: &dyn UpdateAction, ctx: &UpdateContext) -> Result<usize, UpdateError> {
    let statements = action.statements(ctx)?;
    if !statements.is_empty() {
        ctx.executor().execute_batch(&statements)?;
    }
    Ok(statements.len())
}

fn timeout_error(entry: &UpdateEntry, limit: Duration) -> UpdateError {
    UpdateError::Timeout {
        region_id: entry.region_id().to_string(),
        version: entry.version().to_string(),
        limit,
    }
}

enum Guarded<T> {
    Done(T),
    TimedOut(Duration),
    Aborted(String),
}

/// Run `work` inline, or on a helper thread bounded by `timeout`
///
/// On expiry the helper thread is left to finish on its own; its result is
/// discarded and any executor it holds stays busy until then.
fn run_guarded<T, F>(timeout: Option<Duration>, work: F) -> Guarded<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let Some(limit) = timeout else {
        return Guarded::Done(work());
    };

    let (sender, receiver) = bounded(1);
    let spawned = thread::Builder::new()
        .name("sysupdater-entry".to_string())
        .spawn(move || {
            // The receiver is gone after a timeout
            let _ = sender.send(work());
        });
    if let Err(e) = spawned {
        return Guarded::Aborted(format!("could not start worker thread: {e}"));
    }

    match receiver.recv_timeout(limit) {
        Ok(value) => Guarded::Done(value),
        Err(RecvTimeoutError::Timeout) => Guarded::TimedOut(limit),
        Err(RecvTimeoutError::Disconnected) => Guarded::Aborted(WORKER_PANICKED.to_string()),
    }
}
