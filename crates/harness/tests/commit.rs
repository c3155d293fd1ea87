use std::time::Duration;

use fleetroster_core::ids::*;
use fleetroster_engine::{
    Conflict, EngineError, ManualClock, Phase, RevertReason, Session, SessionConfig,
    SessionEvent,
};
use fleetroster_harness::{init_tracing, FlakyStore, TestDepot};
use fleetroster_storage::{BatchSink, SnapshotSource, SqliteStorage, StorageError};

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Clone, Copy)]
struct Ids {
    bus_x: BusId,
    bus_y: BusId,
    alex: DriverId,
    blair: DriverId,
    north: RouteId,
}

/// Buses X (North) and Y (South) with Alex on X and Blair on Y.
fn seeded() -> Result<(TestDepot, Ids), Box<dyn std::error::Error>> {
    init_tracing();
    let mut depot = TestDepot::new()?;
    let north = depot.add_route("North", true)?;
    let south = depot.add_route("South", true)?;
    let bus_x = depot.add_bus("X-100", Some(north))?;
    let bus_y = depot.add_bus("Y-200", Some(south))?;
    let alex = depot.add_driver("E-001", "Alex")?;
    let blair = depot.add_driver("E-002", "Blair")?;
    depot.assign(alex, bus_x)?;
    depot.assign(blair, bus_y)?;
    let ids = Ids {
        bus_x,
        bus_y,
        alex,
        blair,
        north,
    };
    Ok((depot, ids))
}

fn stage_swap<S: SnapshotSource + BatchSink>(
    session: &mut Session<S>,
    ids: Ids,
) -> Result<(), EngineError> {
    assert!(session.stage_driver(ids.bus_x, Some(ids.blair))?.is_accepted());
    assert!(session.stage_driver(ids.bus_y, Some(ids.alex))?.is_accepted());
    Ok(())
}

fn flaky_session(
    depot: TestDepot,
    clock: &ManualClock,
) -> Result<Session<FlakyStore<SqliteStorage>>, EngineError> {
    Session::open(
        FlakyStore::new(depot.storage),
        SessionConfig::default(),
        Box::new(clock.clone()),
    )
}

// ============================================================================
// Countdown
// ============================================================================

#[test]
fn unconfirmed_batch_reverts_at_deadline() -> TestResult {
    let (depot, ids) = seeded()?;
    let clock = ManualClock::new();
    let mut session = depot.open_session(clock.clone())?;
    let baseline = session.working_copy().cloned().unwrap();

    stage_swap(&mut session, ids)?;
    let ticket = session.request_finalize()?;
    assert_eq!(ticket.window, Duration::from_secs(120));
    assert_eq!(ticket.row_count, 2);
    assert_eq!(ticket.write_count, 4);
    assert_eq!(session.phase(), Phase::ConfirmationPending);

    clock.advance_secs(119);
    assert_eq!(session.tick(), None);
    assert_eq!(session.remaining(), Some(Duration::from_secs(1)));

    clock.advance_secs(1);
    assert_eq!(
        session.tick(),
        Some(SessionEvent::Expired {
            digest: ticket.digest
        })
    );
    assert_eq!(session.phase(), Phase::Reverted(RevertReason::Expired));
    assert_eq!(session.working_copy(), Some(&baseline));
    assert!(session.pending_batch().is_none());
    assert_eq!(session.store().commit_count()?, 0);

    // Fires once.
    clock.advance_secs(5);
    assert_eq!(session.tick(), None);
    assert!(matches!(
        session.confirm(),
        Err(EngineError::InvalidTransition { .. })
    ));
    Ok(())
}

#[test]
fn confirm_after_deadline_reports_expired() -> TestResult {
    let (depot, ids) = seeded()?;
    let clock = ManualClock::new();
    let mut session = depot.open_session(clock.clone())?;

    stage_swap(&mut session, ids)?;
    session.request_finalize()?;
    clock.advance_secs(120);

    assert!(matches!(session.confirm(), Err(EngineError::Expired)));
    assert_eq!(session.phase(), Phase::Reverted(RevertReason::Expired));
    assert!(session.working_copy().unwrap().staging().is_empty());
    assert_eq!(session.store().commit_count()?, 0);
    Ok(())
}

#[test]
fn window_comes_from_config() -> TestResult {
    let (depot, ids) = seeded()?;
    let clock = ManualClock::new();
    let config = SessionConfig::from_toml_str("[session]\nconfirmation_window_secs = 30\n")?;
    let mut session = Session::open(depot.storage, config, Box::new(clock.clone()))?;

    stage_swap(&mut session, ids)?;
    assert_eq!(session.request_finalize()?.window, Duration::from_secs(30));
    clock.advance_secs(30);
    assert!(session.tick().is_some());
    Ok(())
}

#[test]
fn remaining_is_reported_in_whole_ticks() -> TestResult {
    let (depot, ids) = seeded()?;
    let clock = ManualClock::new();
    let config = SessionConfig::from_toml_str("[session]\ntick_interval_ms = 5000\n")?;
    let mut session = Session::open(depot.storage, config, Box::new(clock.clone()))?;
    assert_eq!(session.tick_interval(), Duration::from_secs(5));

    stage_swap(&mut session, ids)?;
    session.request_finalize()?;
    clock.advance_secs(1);
    assert_eq!(session.remaining(), Some(Duration::from_secs(120)));
    clock.advance_secs(115);
    assert_eq!(session.remaining(), Some(Duration::from_secs(5)));
    assert_eq!(session.tick(), None);
    Ok(())
}

#[test]
fn oversized_window_never_expires() -> TestResult {
    let (depot, ids) = seeded()?;
    let clock = ManualClock::new();
    clock.advance_secs(10);
    let config = SessionConfig {
        confirmation_window_secs: u64::MAX,
        ..SessionConfig::default()
    };
    let mut session = Session::open(depot.storage, config, Box::new(clock.clone()))?;

    stage_swap(&mut session, ids)?;
    session.request_finalize()?;
    clock.advance_secs(1_000_000);
    assert_eq!(session.tick(), None);
    assert!(session.remaining().is_some_and(|left| left > Duration::from_secs(1_000_000)));
    session.confirm()?;
    assert_eq!(session.phase(), Phase::Committed);
    Ok(())
}

// ============================================================================
// Cancel
// ============================================================================

#[test]
fn cancel_discards_staging_and_is_idempotent() -> TestResult {
    let (depot, ids) = seeded()?;
    let clock = ManualClock::new();
    let mut session = depot.open_session(clock.clone())?;

    stage_swap(&mut session, ids)?;
    session.request_finalize()?;

    assert!(session.cancel());
    assert!(!session.cancel());
    assert_eq!(session.phase(), Phase::Reverted(RevertReason::Cancelled));
    assert!(session.working_copy().unwrap().staging().is_empty());
    assert_eq!(session.remaining(), None);

    // A cancelled countdown never fires.
    clock.advance_secs(500);
    assert_eq!(session.tick(), None);
    assert_eq!(session.phase(), Phase::Reverted(RevertReason::Cancelled));
    Ok(())
}

#[test]
fn cancel_from_staged_reverts() -> TestResult {
    let (depot, ids) = seeded()?;
    let mut session = depot.open_session(ManualClock::new())?;

    stage_swap(&mut session, ids)?;
    assert!(session.cancel());
    assert!(session.pending_writes()?.is_empty());
    assert!(!session.cancel());
    Ok(())
}

// ============================================================================
// Confirm
// ============================================================================

#[test]
fn confirm_persists_swap_and_reloads() -> TestResult {
    let (depot, ids) = seeded()?;
    let loaded_version = depot.bus(ids.bus_x)?.version;
    let clock = ManualClock::new();
    let mut session = depot.open_session(clock.clone())?;

    stage_swap(&mut session, ids)?;
    let ticket = session.request_finalize()?;
    clock.advance_secs(60);
    let report = session.confirm()?;

    assert_eq!(report.digest, ticket.digest);
    assert_eq!(report.write_count, 4);
    assert!(report.reloaded);
    assert_eq!(session.phase(), Phase::Committed);

    let store = session.store();
    assert!(store.has_batch(&ticket.digest)?);
    assert_eq!(store.commit_count()?, 1);
    let bus_x = store.get_bus(ids.bus_x)?.unwrap();
    assert_eq!(bus_x.assigned_driver_id, Some(ids.blair));
    assert_eq!(bus_x.version, loaded_version + 1);
    let blair = store.get_driver(ids.blair)?.unwrap();
    assert_eq!(blair.assigned_bus_id, Some(ids.bus_x));
    assert_eq!(blair.assigned_route_id, Some(ids.north));
    assert_eq!(
        store.get_driver(ids.alex)?.unwrap().assigned_bus_id,
        Some(ids.bus_y)
    );

    // The reloaded baseline is the committed state.
    let working = session.working_copy().unwrap();
    assert!(working.staging().is_empty());
    assert_eq!(working.original_bus(ids.bus_x), Some(&bus_x));
    assert!(session.pending_writes()?.is_empty());
    Ok(())
}

#[test]
fn committed_session_starts_a_new_cycle() -> TestResult {
    let (depot, ids) = seeded()?;
    let loaded_version = depot.bus(ids.bus_x)?.version;
    let mut session = depot.open_session(ManualClock::new())?;

    stage_swap(&mut session, ids)?;
    session.request_finalize()?;
    session.confirm()?;

    // Swap back on top of the bumped versions.
    assert!(session.stage_driver(ids.bus_x, Some(ids.alex))?.is_accepted());
    assert!(session.stage_driver(ids.bus_y, Some(ids.blair))?.is_accepted());
    assert_eq!(session.phase(), Phase::Staged);
    session.request_finalize()?;
    session.confirm()?;

    let store = session.store();
    assert_eq!(store.commit_count()?, 2);
    let bus_x = store.get_bus(ids.bus_x)?.unwrap();
    assert_eq!(bus_x.assigned_driver_id, Some(ids.alex));
    assert_eq!(bus_x.version, loaded_version + 2);
    Ok(())
}

#[test]
fn persistence_failure_keeps_staging_for_retry() -> TestResult {
    let (depot, ids) = seeded()?;
    let clock = ManualClock::new();
    let mut session = flaky_session(depot, &clock)?;

    stage_swap(&mut session, ids)?;
    let staged = session.working_copy().cloned().unwrap();
    session.request_finalize()?;

    session.store_mut().fail_next_batches(1);
    let err = session.confirm().unwrap_err();
    assert!(matches!(
        err,
        EngineError::Persistence {
            source: StorageError::Unavailable(_),
            reload_required: false,
        }
    ));
    assert_eq!(session.phase(), Phase::Staged);
    assert_eq!(session.working_copy(), Some(&staged));
    assert_eq!(session.store().inner().commit_count()?, 0);

    // Retry without re-entering anything.
    session.request_finalize()?;
    session.confirm()?;
    assert_eq!(session.store().batch_attempts(), 2);
    assert_eq!(session.store().inner().commit_count()?, 1);
    Ok(())
}

#[test]
fn out_of_band_edit_requires_reload() -> TestResult {
    let (depot, ids) = seeded()?;
    let loaded_version = depot.bus(ids.bus_x)?.version;
    let mut session = depot.open_session(ManualClock::new())?;

    stage_swap(&mut session, ids)?;
    session.request_finalize()?;

    // Another console edits bus X after our snapshot was taken.
    let mut bus_x = session.store().get_bus(ids.bus_x)?.unwrap();
    bus_x.current_members = 31;
    session.store_mut().put_bus(&bus_x)?;

    let err = session.confirm().unwrap_err();
    match err {
        EngineError::Persistence {
            source: StorageError::Stale { kind, expected, .. },
            reload_required,
        } => {
            assert!(reload_required);
            assert_eq!(kind, "bus");
            assert_eq!(expected, loaded_version);
        }
        other => panic!("expected stale persistence failure, got {other:?}"),
    }
    assert_eq!(session.phase(), Phase::Staged);
    assert_eq!(session.working_copy().unwrap().staging().len(), 2);

    // Nothing from the batch leaked into the store.
    let store = session.store();
    assert_eq!(
        store.get_driver(ids.alex)?.unwrap().assigned_bus_id,
        Some(ids.bus_x)
    );
    assert_eq!(store.commit_count()?, 0);

    session.reload()?;
    assert_eq!(session.phase(), Phase::Idle);
    let working = session.working_copy().unwrap();
    assert!(working.staging().is_empty());
    assert_eq!(working.bus(ids.bus_x).unwrap().current_members, 31);
    assert_eq!(working.bus(ids.bus_x).unwrap().version, loaded_version + 1);
    Ok(())
}

// ============================================================================
// Transitions and loading
// ============================================================================

#[test]
fn out_of_order_actions_are_rejected() -> TestResult {
    let (depot, ids) = seeded()?;
    let mut session = depot.open_session(ManualClock::new())?;

    assert!(matches!(
        session.request_finalize(),
        Err(EngineError::InvalidTransition { .. })
    ));
    stage_swap(&mut session, ids)?;
    assert!(matches!(
        session.confirm(),
        Err(EngineError::InvalidTransition { .. })
    ));

    session.request_finalize()?;
    assert!(matches!(
        session.stage_driver(ids.bus_x, None),
        Err(EngineError::InvalidTransition { .. })
    ));
    assert!(matches!(
        session.clear_all_staging(),
        Err(EngineError::InvalidTransition { .. })
    ));
    assert!(matches!(
        session.request_finalize(),
        Err(EngineError::InvalidTransition { .. })
    ));
    assert_eq!(session.phase(), Phase::ConfirmationPending);
    Ok(())
}

#[test]
fn no_change_rows_have_nothing_to_commit() -> TestResult {
    let (depot, ids) = seeded()?;
    let mut session = depot.open_session(ManualClock::new())?;

    assert!(session.stage_driver(ids.bus_x, Some(ids.alex))?.is_accepted());
    assert_eq!(session.phase(), Phase::Staged);
    assert!(matches!(
        session.request_finalize(),
        Err(EngineError::NothingToCommit)
    ));
    assert_eq!(session.phase(), Phase::Staged);
    Ok(())
}

#[test]
fn finalize_refuses_rows_that_no_longer_validate() -> TestResult {
    let (mut depot, ids) = seeded()?;
    depot.start_trip(ids.bus_x)?;
    let mut session = depot.open_session(ManualClock::new())?;

    // Empty X, then give Alex to Y. Both are fine while X is empty.
    let release = session.stage_driver(ids.bus_x, None)?.row_id().unwrap();
    let take = session.stage_driver(ids.bus_y, Some(ids.alex))?;
    assert!(take.is_accepted());

    // Without the first row X is back on its trip holding Alex.
    let report = session.remove_staging_row(release)?;
    let conflict = Conflict::DoubleAssignment {
        driver_id: ids.alex,
        held_by: ids.bus_x,
    };
    assert_eq!(report.invalidated, vec![(take.row_id().unwrap(), conflict.clone())]);
    assert_eq!(session.phase(), Phase::Staged);

    match session.request_finalize() {
        Err(EngineError::StagingConflicts(conflicts)) => {
            assert_eq!(conflicts, vec![(take.row_id().unwrap(), conflict)]);
        }
        other => panic!("expected staging conflicts, got {other:?}"),
    }
    assert_eq!(session.phase(), Phase::Staged);
    assert!(session.pending_batch().is_none());
    assert!(matches!(
        session.confirm(),
        Err(EngineError::InvalidTransition { .. })
    ));

    let store = session.store();
    assert_eq!(store.commit_count()?, 0);
    let bus_x = store.get_bus(ids.bus_x)?.unwrap();
    assert!(bus_x.on_trip());
    assert_eq!(bus_x.assigned_driver_id, Some(ids.alex));

    // Editing the offending row away unblocks the session.
    session.remove_staging_row(take.row_id().unwrap())?;
    assert_eq!(session.phase(), Phase::Idle);
    Ok(())
}

#[test]
fn reload_discards_staging_and_pending_commit() -> TestResult {
    let (depot, ids) = seeded()?;
    let clock = ManualClock::new();
    let mut session = depot.open_session(clock.clone())?;

    stage_swap(&mut session, ids)?;
    session.request_finalize()?;
    session.reload()?;

    assert_eq!(session.phase(), Phase::Idle);
    assert!(session.pending_batch().is_none());
    assert!(session.working_copy().unwrap().staging().is_empty());
    clock.advance_secs(200);
    assert_eq!(session.tick(), None);
    Ok(())
}

#[test]
fn failed_load_leaves_session_unloaded() -> TestResult {
    let (depot, ids) = seeded()?;
    let mut store = FlakyStore::new(depot.storage);
    store.fail_reads(true);

    let mut session = Session::new(store, SessionConfig::default(), Box::new(ManualClock::new()))?;
    assert!(matches!(
        session.reload(),
        Err(EngineError::Storage(StorageError::Unavailable(_)))
    ));
    assert!(session.working_copy().is_none());
    assert!(matches!(
        session.stage_driver(ids.bus_x, None),
        Err(EngineError::NotLoaded)
    ));
    assert!(matches!(
        session.resolved_driver_for_bus(ids.bus_x),
        Err(EngineError::NotLoaded)
    ));

    session.store_mut().fail_reads(false);
    session.reload()?;
    assert_eq!(
        session.resolved_driver_for_bus(ids.bus_x)?.unwrap().value,
        Some(ids.alex)
    );
    Ok(())
}

#[test]
fn commit_survives_failed_reload() -> TestResult {
    let (depot, ids) = seeded()?;
    let loaded_version = depot.bus(ids.bus_x)?.version;
    let clock = ManualClock::new();
    let mut session = flaky_session(depot, &clock)?;

    stage_swap(&mut session, ids)?;
    session.request_finalize()?;
    session.store_mut().fail_reads(true);
    let report = session.confirm()?;

    assert!(!report.reloaded);
    assert_eq!(session.phase(), Phase::Committed);
    let working = session.working_copy().unwrap();
    assert!(working.staging().is_empty());
    // The promoted copy carries the versions the store assigned.
    assert_eq!(
        working.original_bus(ids.bus_x).unwrap().version,
        loaded_version + 1
    );
    assert_eq!(
        working.original_bus(ids.bus_x).unwrap().assigned_driver_id,
        Some(ids.blair)
    );
    Ok(())
}
