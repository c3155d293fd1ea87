use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::*;

/// Which assignment of a bus a staging row rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Driver,
    Route,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Driver => "driver",
            Self::Route => "route",
        }
    }
}

/// A (bus, dimension) pair. At most one pending row exists per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub bus_id: BusId,
    pub dimension: Dimension,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StagingChange {
    Driver {
        bus_id: BusId,
        previous_driver_id: Option<DriverId>,
        new_driver_id: Option<DriverId>,
    },
    Route {
        bus_id: BusId,
        previous_route_id: Option<RouteId>,
        new_route_id: Option<RouteId>,
    },
}

impl StagingChange {
    pub fn bus_id(&self) -> BusId {
        match self {
            Self::Driver { bus_id, .. } | Self::Route { bus_id, .. } => *bus_id,
        }
    }

    pub fn dimension(&self) -> Dimension {
        match self {
            Self::Driver { .. } => Dimension::Driver,
            Self::Route { .. } => Dimension::Route,
        }
    }

    pub fn slot(&self) -> Slot {
        Slot {
            bus_id: self.bus_id(),
            dimension: self.dimension(),
        }
    }

    /// Driver ids named on either side of a driver row.
    pub fn driver_ids(&self) -> impl Iterator<Item = DriverId> {
        let (previous, new) = match self {
            Self::Driver {
                previous_driver_id,
                new_driver_id,
                ..
            } => (*previous_driver_id, *new_driver_id),
            Self::Route { .. } => (None, None),
        };
        previous.into_iter().chain(new)
    }
}

/// One speculative before/after change, identified independently of its slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingRow {
    pub row_id: StagingRowId,
    pub change: StagingChange,
}

impl StagingRow {
    pub fn new(change: StagingChange) -> Self {
        Self {
            row_id: StagingRowId::new(),
            change,
        }
    }

    pub fn driver(
        bus_id: BusId,
        previous_driver_id: Option<DriverId>,
        new_driver_id: Option<DriverId>,
    ) -> Self {
        Self::new(StagingChange::Driver {
            bus_id,
            previous_driver_id,
            new_driver_id,
        })
    }

    pub fn route(
        bus_id: BusId,
        previous_route_id: Option<RouteId>,
        new_route_id: Option<RouteId>,
    ) -> Self {
        Self::new(StagingChange::Route {
            bus_id,
            previous_route_id,
            new_route_id,
        })
    }

    pub fn slot(&self) -> Slot {
        self.change.slot()
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}
