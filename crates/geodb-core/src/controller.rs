//! Update lifecycle: poll the remote token, and when it differs from the
//! installed one, download, expand, verify and install the new artifact.
//!
//! A single controller owns its schedule and its [`VersionState`]. At most one
//! check cycle runs at a time; a tick that arrives while a cycle is still in
//! flight is skipped with a notice. `stop()` only disarms future ticks, an
//! in-flight cycle always runs to completion.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::UpdaterConfig;
use crate::decompress::{Decompressor, expand_async};
use crate::error::{ConfigError, ControllerError, UpdateError};
use crate::events::{EventBus, LifecycleEvent};
use crate::fetch::fetch_to_file;
use crate::install::install_atomically;
use crate::oracle::VersionOracle;
use crate::transport::{HttpTransport, Transport};

/// Tokens the controller has learned so far. Empty strings mean "unknown".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionState {
    pub local_token: String,
    pub remote_token: String,
}

impl VersionState {
    #[must_use]
    pub fn needs_update(&self) -> bool {
        self.local_token != self.remote_token
    }
}

/// Where the controller currently is in a check cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    CheckingRemote,
    Fetching,
    Expanding,
    Verifying,
    Installing,
}

/// Result of one check cycle.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    UpToDate,
    Updated { token: String },
    /// Another cycle was already in flight.
    Skipped,
    Failed(Arc<UpdateError>),
}

/// Owned repeating timer. Dropping it cancels future ticks.
struct ScheduleHandle {
    _cancel: DropGuard,
    _task: JoinHandle<()>,
    interval: Duration,
}

pub struct UpdateController {
    inner: Arc<Inner>,
    schedule: Mutex<Option<ScheduleHandle>>,
}

struct Inner {
    config: UpdaterConfig,
    transport: Arc<dyn Transport>,
    oracle: VersionOracle,
    decompressor: Arc<dyn Decompressor>,
    state: Mutex<VersionState>,
    phase: Mutex<Phase>,
    seeded: AtomicBool,
    events: EventBus,
}

impl UpdateController {
    /// Build a controller that talks HTTP(S).
    ///
    /// # Errors
    /// Returns an error when the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: UpdaterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let transport = HttpTransport::new(config.request_timeout())?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Build a controller on a caller-provided transport, using the
    /// decompressor selected by `config.compression`.
    ///
    /// # Errors
    /// Returns an error when the configuration is invalid.
    pub fn with_transport(
        config: UpdaterConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        let decompressor = config.compression.decompressor();
        Self::with_components(config, transport, decompressor)
    }

    /// Build a controller with both pluggable strategies supplied.
    ///
    /// # Errors
    /// Returns an error when the configuration is invalid.
    pub fn with_components(
        config: UpdaterConfig,
        transport: Arc<dyn Transport>,
        decompressor: Arc<dyn Decompressor>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let oracle = VersionOracle::new(transport.clone(), config.hash_algorithm);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                oracle,
                decompressor,
                state: Mutex::new(VersionState::default()),
                phase: Mutex::new(Phase::Idle),
                seeded: AtomicBool::new(false),
                events: EventBus::default(),
            }),
            schedule: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn config(&self) -> &UpdaterConfig {
        &self.inner.config
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    #[must_use]
    pub fn version_state(&self) -> VersionState {
        self.inner.lock_state().clone()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.inner.lock_phase()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock_schedule().is_some()
    }

    /// Interval of the active schedule, if any.
    #[must_use]
    pub fn schedule_interval(&self) -> Option<Duration> {
        self.lock_schedule().as_ref().map(|handle| handle.interval)
    }

    /// Run a check cycle now and then every `poll_interval`.
    ///
    /// # Errors
    /// `AlreadyRunning` if a schedule is active, `NoRuntime` when called
    /// outside a Tokio runtime.
    pub fn start(&self) -> Result<(), ControllerError> {
        let mut schedule = self.lock_schedule();
        if schedule.is_some() {
            return Err(ControllerError::AlreadyRunning);
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| ControllerError::NoRuntime)?;

        let interval = self.inner.config.poll_interval();
        info!("Update schedule started ({} ms)", interval.as_millis());
        // Subscribers see the notice before any result of the first tick.
        self.inner.notice(format!(
            "update check scheduled every {} ms",
            interval.as_millis()
        ));

        let cancel = CancellationToken::new();
        let task = runtime.spawn(run_schedule(
            self.inner.clone(),
            interval,
            cancel.clone(),
        ));
        *schedule = Some(ScheduleHandle {
            _cancel: cancel.drop_guard(),
            _task: task,
            interval,
        });
        Ok(())
    }

    /// Disarm the schedule. Returns `false` if it was not running.
    ///
    /// A cycle that is already in flight is not cancelled.
    pub fn stop(&self) -> bool {
        let Some(handle) = self.lock_schedule().take() else {
            debug!("Stop requested but no update schedule is running");
            return false;
        };
        drop(handle);

        info!("Update schedule stopped");
        self.inner.notice("update schedule stopped".to_string());
        true
    }

    /// Run a single check cycle outside the schedule.
    pub async fn run_once(&self) -> CycleOutcome {
        self.inner.run_cycle().await
    }

    fn lock_schedule(&self) -> MutexGuard<'_, Option<ScheduleHandle>> {
        self.schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_schedule(inner: Arc<Inner>, period: Duration, cancel: CancellationToken) {
    let mut ticks = tokio::time::interval(period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticks.tick() => {
                let inner = inner.clone();
                tokio::spawn(async move {
                    inner.run_cycle().await;
                });
            }
        }
    }
    debug!("Update schedule loop exited");
}

/// Marks a cycle as in flight; returns the controller to `Idle` when dropped.
struct CycleGuard<'a> {
    inner: &'a Inner,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        *self.inner.lock_phase() = Phase::Idle;
        debug!("Update cycle finished, phase -> Idle");
    }
}

impl Inner {
    fn try_begin_cycle(&self) -> Option<CycleGuard<'_>> {
        let mut phase = self.lock_phase();
        if *phase != Phase::Idle {
            return None;
        }
        *phase = Phase::CheckingRemote;
        Some(CycleGuard { inner: self })
    }

    fn enter(&self, next: Phase) {
        let mut phase = self.lock_phase();
        debug!("Update cycle phase {:?} -> {next:?}", *phase);
        *phase = next;
    }

    async fn run_cycle(&self) -> CycleOutcome {
        let Some(_guard) = self.try_begin_cycle() else {
            info!("Skipping update check, previous cycle still in flight");
            self.notice("previous update check still in progress, skipping this tick".to_string());
            return CycleOutcome::Skipped;
        };

        self.seed_local_token().await;

        match self.check_and_update().await {
            Ok(outcome) => outcome,
            Err(failure) => {
                let failure = Arc::new(failure);
                if failure.is_integrity_failure() {
                    error!("Refusing to install downloaded artifact: {failure}");
                } else {
                    warn!("Update check failed during {}: {failure}", failure.stage());
                }
                self.events.emit(&LifecycleEvent::Error {
                    stage: failure.stage(),
                    error: failure.clone(),
                });
                CycleOutcome::Failed(failure)
            }
        }
    }

    async fn check_and_update(&self) -> Result<CycleOutcome, UpdateError> {
        let config = &self.config;

        let remote = self.oracle.fetch_remote_token(&config.token_url).await?;
        let state = {
            let mut state = self.lock_state();
            state.remote_token.clone_from(&remote);
            state.clone()
        };

        if !state.needs_update() {
            debug!("Remote token {remote} matches installed version");
            self.notice(format!(
                "{} is up to date ({remote})",
                config.install_path.display()
            ));
            return Ok(CycleOutcome::UpToDate);
        }

        self.enter(Phase::Fetching);
        fetch_to_file(
            self.transport.as_ref(),
            &config.artifact_url,
            &config.compressed_path,
        )
        .await?;

        self.enter(Phase::Expanding);
        expand_async(
            self.decompressor.clone(),
            &config.compressed_path,
            &config.expanded_path,
        )
        .await?;

        self.enter(Phase::Verifying);
        let actual = config
            .hash_algorithm
            .hash_file_async(&config.expanded_path)
            .await?;
        if actual != remote {
            discard(&config.expanded_path).await;
            return Err(UpdateError::HashMismatch {
                expected: remote,
                actual,
            });
        }

        self.enter(Phase::Installing);
        install_atomically(&config.expanded_path, &config.install_path).await?;
        self.lock_state().local_token.clone_from(&actual);

        let message = format!(
            "installed version {actual} at {}",
            config.install_path.display()
        );
        info!("Update succeeded: {message}");
        self.events
            .emit(&LifecycleEvent::UpdateSucceeded(message));
        Ok(CycleOutcome::Updated { token: actual })
    }

    async fn seed_local_token(&self) {
        if !self.config.seed_from_installed || self.seeded.swap(true, Ordering::AcqRel) {
            return;
        }

        let installed = &self.config.install_path;
        match self.config.hash_algorithm.hash_file_async(installed).await {
            Ok(token) => {
                info!(
                    "Seeded local version {token} from {}",
                    installed.display()
                );
                self.lock_state().local_token = token;
            }
            Err(error) => debug!("Not seeding local version: {error}"),
        }
    }

    fn notice(&self, message: String) {
        debug!("Notice: {message}");
        self.events.emit(&LifecycleEvent::Notice(message));
    }

    fn lock_state(&self) -> MutexGuard<'_, VersionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn discard(path: &Path) {
    if let Err(error) = tokio::fs::remove_file(path).await {
        debug!("Could not remove rejected artifact {}: {error}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::{Phase, VersionState};

    #[test]
    fn needs_update_compares_tokens() {
        let mut state = VersionState::default();
        assert!(!state.needs_update(), "two unknown tokens compare equal");

        state.remote_token = "a".repeat(32);
        assert!(state.needs_update());

        state.local_token = "a".repeat(32);
        assert!(!state.needs_update());
    }

    #[test]
    fn phase_defaults_to_idle() {
        assert_eq!(Phase::default(), Phase::Idle);
    }
}
