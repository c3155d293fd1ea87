use std::collections::BTreeMap;

use tracing::debug;

use fleetroster_core::{
    ids::*, BusRecord, DriverRecord, RouteRecord, Slot, StagingChange, StagingRow,
};

use crate::snapshot::Snapshot;
use crate::validator::{validate, Conflict, Verdict};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagingOutcome {
    Accepted {
        row_id: StagingRowId,
        /// The row re-states the slot's current value.
        no_change: bool,
        /// Row previously pending on the same slot, now dropped.
        replaced: Option<StagingRowId>,
        /// Surviving rows that stopped validating once `replaced` was dropped.
        invalidated: Vec<(StagingRowId, Conflict)>,
    },
    Rejected(Conflict),
}

impl StagingOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn row_id(&self) -> Option<StagingRowId> {
        match self {
            Self::Accepted { row_id, .. } => Some(*row_id),
            Self::Rejected(_) => None,
        }
    }

    pub fn conflict(&self) -> Option<&Conflict> {
        match self {
            Self::Accepted { .. } => None,
            Self::Rejected(conflict) => Some(conflict),
        }
    }
}

/// Rows that no longer validate cleanly after a replay. They are still
/// applied so the overlay keeps matching the row list, but a session will
/// not finalize while any remain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub invalidated: Vec<(StagingRowId, Conflict)>,
}

/// Baseline records, the overlay built from them, and the ordered rows
/// that turn one into the other.
///
/// The overlay always equals the baseline transformed by `staging` in
/// order. Baseline and overlay are separate owned maps; nothing mutates the
/// baseline after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingCopy {
    original_drivers: BTreeMap<DriverId, DriverRecord>,
    drivers: BTreeMap<DriverId, DriverRecord>,
    original_buses: BTreeMap<BusId, BusRecord>,
    buses: BTreeMap<BusId, BusRecord>,
    routes: BTreeMap<RouteId, RouteRecord>,
    staging: Vec<StagingRow>,
}

impl WorkingCopy {
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let original_drivers: BTreeMap<_, _> = snapshot
            .drivers
            .into_iter()
            .map(|d| (d.driver_id, d))
            .collect();
        let original_buses: BTreeMap<_, _> = snapshot
            .buses
            .into_iter()
            .map(|b| (b.bus_id, b))
            .collect();
        let routes = snapshot
            .routes
            .into_iter()
            .map(|r| (r.route_id, r))
            .collect();
        Self {
            drivers: original_drivers.clone(),
            buses: original_buses.clone(),
            original_drivers,
            original_buses,
            routes,
            staging: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn driver(&self, driver_id: DriverId) -> Option<&DriverRecord> {
        self.drivers.get(&driver_id)
    }

    pub fn bus(&self, bus_id: BusId) -> Option<&BusRecord> {
        self.buses.get(&bus_id)
    }

    pub fn route(&self, route_id: RouteId) -> Option<&RouteRecord> {
        self.routes.get(&route_id)
    }

    pub fn original_driver(&self, driver_id: DriverId) -> Option<&DriverRecord> {
        self.original_drivers.get(&driver_id)
    }

    pub fn original_bus(&self, bus_id: BusId) -> Option<&BusRecord> {
        self.original_buses.get(&bus_id)
    }

    pub fn drivers(&self) -> impl Iterator<Item = &DriverRecord> {
        self.drivers.values()
    }

    pub fn buses(&self) -> impl Iterator<Item = &BusRecord> {
        self.buses.values()
    }

    pub fn routes(&self) -> impl Iterator<Item = &RouteRecord> {
        self.routes.values()
    }

    pub fn staging(&self) -> &[StagingRow] {
        &self.staging
    }

    pub fn row_for_slot(&self, slot: Slot) -> Option<&StagingRow> {
        self.staging.iter().find(|r| r.slot() == slot)
    }

    pub fn is_staged(&self, slot: Slot) -> bool {
        self.row_for_slot(slot).is_some()
    }

    /// Build a driver row for `bus_id`. The previous value is taken from a
    /// row already pending on the slot, else from the overlay.
    pub fn propose_driver(&self, bus_id: BusId, new_driver_id: Option<DriverId>) -> StagingRow {
        let pending = self.staging.iter().find_map(|r| match r.change {
            StagingChange::Driver {
                bus_id: b,
                previous_driver_id,
                ..
            } if b == bus_id => Some(previous_driver_id),
            _ => None,
        });
        let previous = pending
            .unwrap_or_else(|| self.bus(bus_id).and_then(|b| b.assigned_driver_id));
        StagingRow::driver(bus_id, previous, new_driver_id)
    }

    pub fn propose_route(&self, bus_id: BusId, new_route_id: Option<RouteId>) -> StagingRow {
        let pending = self.staging.iter().find_map(|r| match r.change {
            StagingChange::Route {
                bus_id: b,
                previous_route_id,
                ..
            } if b == bus_id => Some(previous_route_id),
            _ => None,
        });
        let previous = pending.unwrap_or_else(|| self.bus(bus_id).and_then(|b| b.route_id));
        StagingRow::route(bus_id, previous, new_route_id)
    }

    // ------------------------------------------------------------------
    // Staging
    // ------------------------------------------------------------------

    /// Validate and stage `row`. A row already pending on the same slot is
    /// dropped first and the new row is validated against the overlay
    /// without it. Rejected rows leave the working copy untouched.
    pub fn add_staging_row(&mut self, row: StagingRow) -> StagingOutcome {
        let superseded = self.staging.iter().position(|r| r.slot() == row.slot());

        let (verdict, rebuilt) = match superseded {
            Some(index) => {
                let mut rebuilt = self.clone();
                rebuilt.staging.remove(index);
                let report = rebuilt.replay();
                (validate(&row, &rebuilt), Some((rebuilt, report)))
            }
            None => (validate(&row, self), None),
        };

        let no_change = match verdict {
            Verdict::Conflict(conflict) => {
                debug!(row = %row.row_id, kind = conflict.kind(), "staging row rejected");
                return StagingOutcome::Rejected(conflict);
            }
            Verdict::NoChange => true,
            Verdict::Clear => false,
        };

        let replaced = superseded.map(|index| self.staging[index].row_id);
        let mut invalidated = Vec::new();
        if let Some((rebuilt, report)) = rebuilt {
            *self = rebuilt;
            invalidated = report.invalidated;
        }
        self.apply_staging_row(&row);
        let row_id = row.row_id;
        debug!(
            row = %row_id,
            slot = row.slot().dimension.as_str(),
            no_change,
            invalidated = invalidated.len(),
            "staging row applied"
        );
        self.staging.push(row);

        StagingOutcome::Accepted {
            row_id,
            no_change,
            replaced,
            invalidated,
        }
    }

    /// Drop one row and rebuild the overlay from the baseline. Returns `None`
    /// if no row has that id.
    pub fn remove_staging_row(&mut self, row_id: StagingRowId) -> Option<ReplayReport> {
        let index = self.staging.iter().position(|r| r.row_id == row_id)?;
        self.staging.remove(index);
        let report = self.replay();
        debug!(
            row = %row_id,
            surviving = self.staging.len(),
            invalidated = report.invalidated.len(),
            "staging row removed"
        );
        Some(report)
    }

    pub fn clear_all_staging(&mut self) {
        self.drivers = self.original_drivers.clone();
        self.buses = self.original_buses.clone();
        self.staging.clear();
    }

    /// Reset the overlay to fresh copies of the baseline and reapply every
    /// staged row in insertion order.
    pub fn replay(&mut self) -> ReplayReport {
        let rows = std::mem::take(&mut self.staging);
        self.clear_all_staging();

        let mut report = ReplayReport::default();
        for row in rows {
            if let Verdict::Conflict(conflict) = validate(&row, self) {
                report.invalidated.push((row.row_id, conflict));
            }
            self.apply_staging_row(&row);
            self.staging.push(row);
        }
        report
    }

    /// Rows that fail validation when the staging list is replayed from the
    /// baseline. The working copy itself is left as it is.
    pub fn conflicts(&self) -> Vec<(StagingRowId, Conflict)> {
        let mut fresh = self.clone();
        fresh.replay().invalidated
    }

    /// Make the overlay the new baseline after the store accepted it.
    /// Written records take the version the store assigned them.
    pub(crate) fn promote(&mut self, written_drivers: &[DriverId], written_buses: &[BusId]) {
        for id in written_drivers {
            if let Some(driver) = self.drivers.get_mut(id) {
                driver.version += 1;
            }
        }
        for id in written_buses {
            if let Some(bus) = self.buses.get_mut(id) {
                bus.version += 1;
            }
        }
        self.original_drivers = self.drivers.clone();
        self.original_buses = self.buses.clone();
        self.staging.clear();
    }

    // ------------------------------------------------------------------
    // Overlay mutation
    // ------------------------------------------------------------------

    fn apply_staging_row(&mut self, row: &StagingRow) {
        match row.change {
            StagingChange::Driver {
                bus_id,
                new_driver_id,
                ..
            } => self.assign_driver(bus_id, new_driver_id),
            StagingChange::Route {
                bus_id,
                new_route_id,
                ..
            } => self.assign_route(bus_id, new_route_id),
        }
    }

    /// Point `bus_id` at `new_driver` and rewrite every record that referred
    /// to either side, so exactly-one-owner holds after the call.
    fn assign_driver(&mut self, bus_id: BusId, new_driver: Option<DriverId>) {
        let Some(route_id) = self.buses.get(&bus_id).map(|b| b.route_id) else {
            return;
        };
        if let Some(driver_id) = new_driver {
            if !self.drivers.contains_key(&driver_id) {
                return;
            }
            for bus in self.buses.values_mut() {
                if bus.bus_id != bus_id && bus.assigned_driver_id == Some(driver_id) {
                    bus.assigned_driver_id = None;
                }
            }
        }

        // Release whoever still points at this bus. A driver already moved
        // elsewhere by an earlier row no longer matches.
        for driver in self.drivers.values_mut() {
            if Some(driver.driver_id) != new_driver && driver.assigned_bus_id == Some(bus_id) {
                driver.assigned_bus_id = None;
                driver.assigned_route_id = None;
            }
        }

        if let Some(driver_id) = new_driver
            && let Some(driver) = self.drivers.get_mut(&driver_id)
        {
            driver.assigned_bus_id = Some(bus_id);
            driver.assigned_route_id = route_id;
        }
        if let Some(bus) = self.buses.get_mut(&bus_id) {
            bus.assigned_driver_id = new_driver;
        }
    }

    fn assign_route(&mut self, bus_id: BusId, new_route: Option<RouteId>) {
        let Some(bus) = self.buses.get_mut(&bus_id) else {
            return;
        };
        bus.route_id = new_route;
        for driver in self.drivers.values_mut() {
            if driver.assigned_bus_id == Some(bus_id) {
                driver.assigned_route_id = new_route;
            }
        }
    }
}
