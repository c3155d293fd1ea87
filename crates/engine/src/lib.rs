pub mod clock;
pub mod config;
pub mod countdown;
pub mod error;
pub mod merge;
pub mod snapshot;
pub mod validator;
pub mod working_copy;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::SessionConfig;
pub use countdown::{Countdown, CountdownState};
pub use error::EngineError;
pub use merge::{MergeView, OwnerViolation, Resolved, Source};
pub use snapshot::Snapshot;
pub use validator::{validate, Conflict, EntityRef, Verdict};
pub use working_copy::{ReplayReport, StagingOutcome, WorkingCopy};

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{debug, info, warn};

use fleetroster_core::{ids::*, BatchDigest, RecordWrite, StagingRow, WriteBatch};
use fleetroster_storage::{BatchSink, SnapshotSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertReason {
    Cancelled,
    Expired,
}

/// Where the session stands in the stage, finalize, confirm cycle.
///
/// `Committed` and `Reverted` are terminal for one cycle; the next accepted
/// staging row starts a new one exactly as from `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Staged,
    ConfirmationPending,
    Committed,
    Reverted(RevertReason),
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Staged => "staged",
            Self::ConfirmationPending => "confirmation_pending",
            Self::Committed => "committed",
            Self::Reverted(RevertReason::Cancelled) => "cancelled",
            Self::Reverted(RevertReason::Expired) => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Expired { digest: BatchDigest },
}

/// Returned by [`Session::request_finalize`] so the operator can review what
/// confirm will write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeTicket {
    pub digest: BatchDigest,
    pub write_count: usize,
    pub row_count: usize,
    pub window: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReport {
    pub digest: BatchDigest,
    pub write_count: usize,
    /// False when the post-commit reload failed and the session kept the
    /// promoted working copy instead.
    pub reloaded: bool,
}

/// The rows frozen at finalize and the batch built from them.
#[derive(Debug)]
struct PendingCommit {
    rows: Vec<StagingRow>,
    batch: WriteBatch,
    countdown: Countdown,
}

/// One operator's staging session over a store.
pub struct Session<S> {
    config: SessionConfig,
    store: S,
    clock: Box<dyn Clock>,
    working: Option<WorkingCopy>,
    phase: Phase,
    pending: Option<PendingCommit>,
}

impl<S: SnapshotSource + BatchSink> Session<S> {
    /// A session with nothing loaded. Call [`Session::reload`] before staging.
    pub fn new(store: S, config: SessionConfig, clock: Box<dyn Clock>) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            clock,
            working: None,
            phase: Phase::Idle,
            pending: None,
        })
    }

    /// Construct and load in one step. Fails if the snapshot cannot be read.
    pub fn open(store: S, config: SessionConfig, clock: Box<dyn Clock>) -> Result<Self, EngineError> {
        let mut session = Self::new(store, config, clock)?;
        session.reload()?;
        Ok(session)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn working_copy(&self) -> Option<&WorkingCopy> {
        self.working.as_ref()
    }

    pub fn view(&self) -> Result<MergeView<'_>, EngineError> {
        self.working
            .as_ref()
            .map(MergeView::new)
            .ok_or(EngineError::NotLoaded)
    }

    /// Drop all staging and any pending commit, then read a fresh snapshot.
    /// On failure the session is left unloaded.
    pub fn reload(&mut self) -> Result<(), EngineError> {
        self.disarm();
        self.working = None;
        self.phase = Phase::Idle;
        let snapshot = snapshot::fetch(&self.store)?;
        self.working = Some(WorkingCopy::from_snapshot(snapshot));
        info!("snapshot loaded");
        Ok(())
    }

    // ========================================================================
    // Staging
    // ========================================================================

    /// Validate and stage a row. Conflicts come back as
    /// [`StagingOutcome::Rejected`]; `Err` is reserved for session misuse.
    pub fn add_staging_row(&mut self, row: StagingRow) -> Result<StagingOutcome, EngineError> {
        self.require_editable("stage a row")?;
        let working = self.working.as_mut().ok_or(EngineError::NotLoaded)?;
        let outcome = working.add_staging_row(row);
        if outcome.is_accepted() {
            self.phase = Phase::Staged;
        }
        Ok(outcome)
    }

    /// Stage a driver change on `bus_id`, taking the previous value from the
    /// current resolution.
    pub fn stage_driver(
        &mut self,
        bus_id: BusId,
        new_driver_id: Option<DriverId>,
    ) -> Result<StagingOutcome, EngineError> {
        let row = self
            .working
            .as_ref()
            .ok_or(EngineError::NotLoaded)?
            .propose_driver(bus_id, new_driver_id);
        self.add_staging_row(row)
    }

    pub fn stage_route(
        &mut self,
        bus_id: BusId,
        new_route_id: Option<RouteId>,
    ) -> Result<StagingOutcome, EngineError> {
        let row = self
            .working
            .as_ref()
            .ok_or(EngineError::NotLoaded)?
            .propose_route(bus_id, new_route_id);
        self.add_staging_row(row)
    }

    pub fn remove_staging_row(&mut self, row_id: StagingRowId) -> Result<ReplayReport, EngineError> {
        self.require_editable("remove a row")?;
        let working = self.working.as_mut().ok_or(EngineError::NotLoaded)?;
        let report = working
            .remove_staging_row(row_id)
            .ok_or_else(|| EngineError::StagingRowNotFound(row_id.to_string()))?;
        if working.staging().is_empty() {
            self.phase = Phase::Idle;
        }
        Ok(report)
    }

    pub fn clear_all_staging(&mut self) -> Result<(), EngineError> {
        self.require_editable("clear staging")?;
        let working = self.working.as_mut().ok_or(EngineError::NotLoaded)?;
        working.clear_all_staging();
        self.phase = Phase::Idle;
        Ok(())
    }

    fn require_editable(&self, action: &'static str) -> Result<(), EngineError> {
        if self.phase == Phase::ConfirmationPending {
            return Err(EngineError::InvalidTransition {
                action,
                phase: self.phase.as_str(),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Finalize / Confirm / Cancel
    // ========================================================================

    /// Freeze the staged rows, build the batch they produce, and start the
    /// confirmation countdown. Every row is re-validated in order first; any
    /// conflict keeps the session in `Staged` and nothing is frozen.
    pub fn request_finalize(&mut self) -> Result<FinalizeTicket, EngineError> {
        if self.phase != Phase::Staged {
            return Err(EngineError::InvalidTransition {
                action: "finalize",
                phase: self.phase.as_str(),
            });
        }
        let working = self.working.as_ref().ok_or(EngineError::NotLoaded)?;
        let conflicts = working.conflicts();
        if !conflicts.is_empty() {
            warn!(conflicts = conflicts.len(), "finalize blocked by conflicting rows");
            return Err(EngineError::StagingConflicts(conflicts));
        }
        let writes = MergeView::new(working).pending_writes();
        if writes.is_empty() {
            return Err(EngineError::NothingToCommit);
        }
        let rows = working.staging().to_vec();
        let batch = WriteBatch::new(writes)?;
        let window = self.config.confirmation_window();
        let countdown = Countdown::start(self.clock.now(), window);

        let ticket = FinalizeTicket {
            digest: batch.digest,
            write_count: batch.len(),
            row_count: rows.len(),
            window,
        };
        info!(
            digest = %batch.digest,
            writes = batch.len(),
            rows = rows.len(),
            window_secs = window.as_secs(),
            "finalize requested"
        );
        self.pending = Some(PendingCommit {
            rows,
            batch,
            countdown,
        });
        self.phase = Phase::ConfirmationPending;
        Ok(ticket)
    }

    /// Write the pending batch. The phase only moves to `Committed` after the
    /// store acknowledges; a rejected batch returns the session to `Staged`
    /// with every row still in place.
    pub fn confirm(&mut self) -> Result<CommitReport, EngineError> {
        if self.phase != Phase::ConfirmationPending {
            return Err(EngineError::InvalidTransition {
                action: "confirm",
                phase: self.phase.as_str(),
            });
        }
        if self.tick().is_some() {
            return Err(EngineError::Expired);
        }
        let Some(mut pending) = self.pending.take() else {
            return Err(EngineError::InvalidTransition {
                action: "confirm",
                phase: self.phase.as_str(),
            });
        };
        pending.countdown.cancel();

        if let Err(source) = self.store.apply_batch(&pending.batch) {
            let reload_required = source.is_stale();
            warn!(
                digest = %pending.batch.digest,
                reload_required,
                error = %source,
                "batch rejected"
            );
            self.phase = Phase::Staged;
            return Err(EngineError::Persistence {
                source,
                reload_required,
            });
        }

        let digest = pending.batch.digest;
        let write_count = pending.batch.len();
        let written_drivers: Vec<DriverId> =
            pending.batch.drivers().map(|d| d.driver_id).collect();
        let written_buses: Vec<BusId> = pending.batch.buses().map(|b| b.bus_id).collect();
        if let Some(working) = self.working.as_mut() {
            working.promote(&written_drivers, &written_buses);
        }
        info!(%digest, writes = write_count, rows = pending.rows.len(), "batch committed");

        let promoted = self.working.take();
        let reloaded = match snapshot::fetch(&self.store) {
            Ok(snapshot) => {
                self.working = Some(WorkingCopy::from_snapshot(snapshot));
                true
            }
            Err(e) => {
                warn!(error = %e, "reload after commit failed; keeping promoted copy");
                self.working = promoted;
                false
            }
        };
        self.phase = Phase::Committed;
        Ok(CommitReport {
            digest,
            write_count,
            reloaded,
        })
    }

    /// Abandon the staged rows. Returns false when there was nothing to
    /// cancel, so repeated calls are harmless.
    pub fn cancel(&mut self) -> bool {
        match self.phase {
            Phase::Staged | Phase::ConfirmationPending => {
                self.revert(RevertReason::Cancelled);
                true
            }
            Phase::Idle | Phase::Committed | Phase::Reverted(_) => false,
        }
    }

    /// Cooperative scheduler hook. Reverts the session once the
    /// confirmation window has elapsed.
    pub fn tick(&mut self) -> Option<SessionEvent> {
        let now = self.clock.now();
        let pending = self.pending.as_mut()?;
        if !pending.countdown.poll(now) {
            return None;
        }
        let digest = pending.batch.digest;
        warn!(%digest, "confirmation window expired");
        self.revert(RevertReason::Expired);
        Some(SessionEvent::Expired { digest })
    }

    /// Time left before the pending batch expires, rounded up to whole
    /// tick intervals since expiry is only observed on a tick.
    pub fn remaining(&self) -> Option<Duration> {
        let pending = self.pending.as_ref()?;
        let left = pending.countdown.remaining(self.clock.now());
        Some(round_up(left, self.config.tick_interval()))
    }

    pub fn pending_batch(&self) -> Option<&WriteBatch> {
        self.pending.as_ref().map(|p| &p.batch)
    }

    /// Rows frozen at finalize.
    pub fn pending_rows(&self) -> Option<&[StagingRow]> {
        self.pending.as_ref().map(|p| p.rows.as_slice())
    }

    /// How often the host should call `tick`.
    pub fn tick_interval(&self) -> Duration {
        self.config.tick_interval()
    }

    fn revert(&mut self, reason: RevertReason) {
        self.disarm();
        if let Some(working) = self.working.as_mut() {
            working.clear_all_staging();
        }
        self.phase = Phase::Reverted(reason);
        info!(phase = self.phase.as_str(), "staging reverted");
    }

    fn disarm(&mut self) {
        if let Some(mut pending) = self.pending.take()
            && pending.countdown.cancel()
        {
            debug!(digest = %pending.batch.digest, "countdown cancelled");
        }
    }

    // ========================================================================
    // Query Pass-Through
    // ========================================================================

    pub fn resolved_driver_for_bus(
        &self,
        bus_id: BusId,
    ) -> Result<Option<Resolved<Option<DriverId>>>, EngineError> {
        Ok(self.view()?.resolved_driver_for_bus(bus_id))
    }

    pub fn resolved_bus_for_driver(
        &self,
        driver_id: DriverId,
    ) -> Result<Option<Resolved<Option<BusId>>>, EngineError> {
        Ok(self.view()?.resolved_bus_for_driver(driver_id))
    }

    pub fn resolved_route_for_bus(
        &self,
        bus_id: BusId,
    ) -> Result<Option<Resolved<Option<RouteId>>>, EngineError> {
        Ok(self.view()?.resolved_route_for_bus(bus_id))
    }

    pub fn affected_drivers(&self) -> Result<BTreeSet<DriverId>, EngineError> {
        Ok(self.view()?.affected_drivers())
    }

    pub fn affected_buses(&self) -> Result<BTreeSet<BusId>, EngineError> {
        Ok(self.view()?.affected_buses())
    }

    pub fn pending_writes(&self) -> Result<Vec<RecordWrite>, EngineError> {
        Ok(self.view()?.pending_writes())
    }
}

fn round_up(left: Duration, tick: Duration) -> Duration {
    let tick_nanos = tick.as_nanos();
    if tick_nanos == 0 {
        return left;
    }
    let ticks = left.as_nanos().div_ceil(tick_nanos);
    let nanos = ticks.saturating_mul(tick_nanos);
    // Only a window near Duration::MAX fails to convert back.
    match u64::try_from(nanos / 1_000_000_000) {
        Ok(secs) => Duration::new(secs, (nanos % 1_000_000_000) as u32),
        Err(_) => left,
    }
}
