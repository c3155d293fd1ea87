use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shift {
    Morning,
    Afternoon,
    Split,
}

impl Shift {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Split => "split",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "morning" => Ok(Self::Morning),
            "afternoon" => Ok(Self::Afternoon),
            "split" => Ok(Self::Split),
            _ => Err(CoreError::InvalidData(format!("unknown shift: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverStatus {
    Active,
    OnLeave,
    Inactive,
}

impl DriverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::OnLeave => "on_leave",
            Self::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "active" => Ok(Self::Active),
            "on_leave" => Ok(Self::OnLeave),
            "inactive" => Ok(Self::Inactive),
            _ => Err(CoreError::InvalidData(format!("unknown driver status: {s}"))),
        }
    }
}

/// A driver as held by the authoritative store.
///
/// `assigned_route_id` mirrors the route of `assigned_bus_id` and is kept in
/// step with it whenever either side is rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverRecord {
    pub driver_id: DriverId,
    pub employee_id: String,
    pub display_name: String,
    pub assigned_bus_id: Option<BusId>,
    pub assigned_route_id: Option<RouteId>,
    pub reserved: bool,
    pub shift: Shift,
    pub status: DriverStatus,
    /// Store-side version observed when the record was read.
    pub version: u64,
}

impl DriverRecord {
    pub fn new(employee_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            driver_id: DriverId::new(),
            employee_id: employee_id.into(),
            display_name: display_name.into(),
            assigned_bus_id: None,
            assigned_route_id: None,
            reserved: false,
            shift: Shift::Morning,
            status: DriverStatus::Active,
            version: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusRecord {
    pub bus_id: BusId,
    pub bus_number: String,
    pub assigned_driver_id: Option<DriverId>,
    /// Driver currently operating a trip, if any.
    pub active_driver_id: Option<DriverId>,
    pub route_id: Option<RouteId>,
    pub active_trip_id: Option<TripId>,
    pub capacity: u32,
    pub current_members: u32,
    pub version: u64,
}

impl BusRecord {
    pub fn new(bus_number: impl Into<String>, capacity: u32) -> Self {
        Self {
            bus_id: BusId::new(),
            bus_number: bus_number.into(),
            assigned_driver_id: None,
            active_driver_id: None,
            route_id: None,
            active_trip_id: None,
            capacity,
            current_members: 0,
            version: 0,
        }
    }

    pub fn on_trip(&self) -> bool {
        self.active_trip_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub route_id: RouteId,
    pub name: String,
    pub stops: Vec<String>,
    pub active: bool,
}

impl RouteRecord {
    pub fn new(name: impl Into<String>, stops: Vec<String>) -> Self {
        Self {
            route_id: RouteId::new(),
            name: name.into(),
            stops,
            active: true,
        }
    }

    pub fn stops_to_msgpack(&self) -> Result<Vec<u8>, CoreError> {
        rmp_serde::to_vec(&self.stops).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn stops_from_msgpack(bytes: &[u8]) -> Result<Vec<String>, CoreError> {
        rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}
