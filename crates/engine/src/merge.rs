use std::collections::{BTreeMap, BTreeSet};

use fleetroster_core::{ids::*, Dimension, RecordWrite, Slot};

use crate::working_copy::WorkingCopy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// A pending staging row produced this value.
    Staged,
    Original,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved<T> {
    pub value: T,
    pub source: Source,
}

/// Read-only resolution of effective assignments over a working copy.
///
/// Every query reads the overlay directly. A value counts as staged when a
/// pending row targets its slot or when it differs from the baseline, which
/// covers seats vacated as a side effect of another row.
#[derive(Clone, Copy)]
pub struct MergeView<'a> {
    working: &'a WorkingCopy,
}

impl<'a> MergeView<'a> {
    pub fn new(working: &'a WorkingCopy) -> Self {
        Self { working }
    }

    pub fn resolved_driver_for_bus(&self, bus_id: BusId) -> Option<Resolved<Option<DriverId>>> {
        let bus = self.working.bus(bus_id)?;
        let original = self
            .working
            .original_bus(bus_id)
            .and_then(|b| b.assigned_driver_id);
        let staged = self.working.is_staged(Slot {
            bus_id,
            dimension: Dimension::Driver,
        }) || original != bus.assigned_driver_id;
        Some(resolved(bus.assigned_driver_id, staged))
    }

    pub fn resolved_bus_for_driver(&self, driver_id: DriverId) -> Option<Resolved<Option<BusId>>> {
        let driver = self.working.driver(driver_id)?;
        let original = self
            .working
            .original_driver(driver_id)
            .and_then(|d| d.assigned_bus_id);
        let staged = original != driver.assigned_bus_id
            || self
                .working
                .staging()
                .iter()
                .any(|r| r.change.driver_ids().any(|d| d == driver_id));
        Some(resolved(driver.assigned_bus_id, staged))
    }

    pub fn resolved_route_for_bus(&self, bus_id: BusId) -> Option<Resolved<Option<RouteId>>> {
        let bus = self.working.bus(bus_id)?;
        let original = self.working.original_bus(bus_id).and_then(|b| b.route_id);
        let staged = self.working.is_staged(Slot {
            bus_id,
            dimension: Dimension::Route,
        }) || original != bus.route_id;
        Some(resolved(bus.route_id, staged))
    }

    /// Drivers named as previous or new operator by any pending row.
    pub fn affected_drivers(&self) -> BTreeSet<DriverId> {
        self.working
            .staging()
            .iter()
            .flat_map(|r| r.change.driver_ids())
            .collect()
    }

    /// Buses targeted by any pending row.
    pub fn affected_buses(&self) -> BTreeSet<BusId> {
        self.working
            .staging()
            .iter()
            .map(|r| r.change.bus_id())
            .collect()
    }

    /// Resolved state of every record the overlay changed, each carrying the
    /// baseline version the store must still hold. Buses come first.
    pub fn pending_writes(&self) -> Vec<RecordWrite> {
        let buses = self
            .working
            .buses()
            .filter(|b| self.working.original_bus(b.bus_id) != Some(*b))
            .map(|b| RecordWrite::Bus(b.clone()));
        let drivers = self
            .working
            .drivers()
            .filter(|d| self.working.original_driver(d.driver_id) != Some(*d))
            .map(|d| RecordWrite::Driver(d.clone()));
        buses.chain(drivers).collect()
    }

    /// Drivers held by more than one bus, and buses claimed by more than one
    /// driver. Empty whenever exactly-one-owner holds.
    pub fn owner_violations(&self) -> Vec<OwnerViolation> {
        let mut holders: BTreeMap<DriverId, Vec<BusId>> = BTreeMap::new();
        for bus in self.working.buses() {
            if let Some(driver_id) = bus.assigned_driver_id {
                holders.entry(driver_id).or_default().push(bus.bus_id);
            }
        }
        let mut claimants: BTreeMap<BusId, Vec<DriverId>> = BTreeMap::new();
        for driver in self.working.drivers() {
            if let Some(bus_id) = driver.assigned_bus_id {
                claimants.entry(bus_id).or_default().push(driver.driver_id);
            }
        }

        let drivers = holders
            .into_iter()
            .filter(|(_, buses)| buses.len() > 1)
            .map(|(driver_id, buses)| OwnerViolation::DriverOnManyBuses { driver_id, buses });
        let buses = claimants
            .into_iter()
            .filter(|(_, drivers)| drivers.len() > 1)
            .map(|(bus_id, drivers)| OwnerViolation::BusWithManyDrivers { bus_id, drivers });
        drivers.chain(buses).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerViolation {
    DriverOnManyBuses { driver_id: DriverId, buses: Vec<BusId> },
    BusWithManyDrivers { bus_id: BusId, drivers: Vec<DriverId> },
}

fn resolved<T>(value: T, staged: bool) -> Resolved<T> {
    Resolved {
        value,
        source: if staged { Source::Staged } else { Source::Original },
    }
}
