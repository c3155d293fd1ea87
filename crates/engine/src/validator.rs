use thiserror::Error;

use fleetroster_core::{ids::*, StagingChange, StagingRow};

use crate::working_copy::WorkingCopy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef {
    Driver(DriverId),
    Bus(BusId),
    Route(RouteId),
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Driver(id) => write!(f, "driver {id}"),
            Self::Bus(id) => write!(f, "bus {id}"),
            Self::Route(id) => write!(f, "route {id}"),
        }
    }
}

/// Why a staging row cannot be applied. Returned as a value so the UI can
/// render it next to the offending row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Conflict {
    #[error("{0} is not in the loaded snapshot")]
    NotFound(EntityRef),

    #[error("reserved driver {driver_id} cannot operate bus {bus_id} during an active trip")]
    ReservedDriver { driver_id: DriverId, bus_id: BusId },

    #[error("driver {driver_id} is already held by bus {held_by}")]
    DoubleAssignment { driver_id: DriverId, held_by: BusId },

    #[error("route {route_id} is inactive")]
    InactiveRoute { route_id: RouteId },
}

impl Conflict {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::ReservedDriver { .. } => "reserved_driver",
            Self::DoubleAssignment { .. } => "double_assignment",
            Self::InactiveRoute { .. } => "inactive_route",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Clear,
    /// The row sets the value the slot already resolves to.
    NoChange,
    Conflict(Conflict),
}

/// Check `row` against the current overlay, including every row already
/// staged in `working`.
pub fn validate(row: &StagingRow, working: &WorkingCopy) -> Verdict {
    let result = match &row.change {
        StagingChange::Driver {
            bus_id,
            previous_driver_id,
            new_driver_id,
        } => check_driver(working, *bus_id, *previous_driver_id, *new_driver_id),
        StagingChange::Route {
            bus_id,
            previous_route_id,
            new_route_id,
        } => check_route(working, *bus_id, *previous_route_id, *new_route_id),
    };
    match result {
        Ok(verdict) => verdict,
        Err(conflict) => Verdict::Conflict(conflict),
    }
}

fn check_driver(
    working: &WorkingCopy,
    bus_id: BusId,
    previous: Option<DriverId>,
    new: Option<DriverId>,
) -> Result<Verdict, Conflict> {
    let bus = working
        .bus(bus_id)
        .ok_or(Conflict::NotFound(EntityRef::Bus(bus_id)))?;
    if let Some(id) = previous
        && working.driver(id).is_none()
    {
        return Err(Conflict::NotFound(EntityRef::Driver(id)));
    }
    let driver = match new {
        Some(id) => Some(
            working
                .driver(id)
                .ok_or(Conflict::NotFound(EntityRef::Driver(id)))?,
        ),
        None => None,
    };

    if bus.assigned_driver_id == new {
        return Ok(Verdict::NoChange);
    }

    let Some(driver) = driver else {
        return Ok(Verdict::Clear);
    };

    if driver.reserved && bus.on_trip() {
        return Err(Conflict::ReservedDriver {
            driver_id: driver.driver_id,
            bus_id,
        });
    }

    // Applying the row releases the driver from whatever bus holds it now.
    // That is only allowed when the holder is idle and no other pending row
    // explicitly put the driver there.
    if let Some(holder) = working
        .buses()
        .find(|b| b.bus_id != bus_id && b.assigned_driver_id == Some(driver.driver_id))
    {
        let claimed_by_row = working.staging().iter().any(|r| {
            matches!(
                r.change,
                StagingChange::Driver { bus_id: b, new_driver_id: Some(d), .. }
                    if b == holder.bus_id && d == driver.driver_id
            )
        });
        if holder.on_trip() || claimed_by_row {
            return Err(Conflict::DoubleAssignment {
                driver_id: driver.driver_id,
                held_by: holder.bus_id,
            });
        }
    }

    Ok(Verdict::Clear)
}

fn check_route(
    working: &WorkingCopy,
    bus_id: BusId,
    previous: Option<RouteId>,
    new: Option<RouteId>,
) -> Result<Verdict, Conflict> {
    let bus = working
        .bus(bus_id)
        .ok_or(Conflict::NotFound(EntityRef::Bus(bus_id)))?;
    for id in previous.into_iter().chain(new) {
        if working.route(id).is_none() {
            return Err(Conflict::NotFound(EntityRef::Route(id)));
        }
    }

    if bus.route_id == new {
        return Ok(Verdict::NoChange);
    }

    if let Some(route) = new.and_then(|id| working.route(id))
        && !route.active
    {
        return Err(Conflict::InactiveRoute {
            route_id: route.route_id,
        });
    }

    Ok(Verdict::Clear)
}
