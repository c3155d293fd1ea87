use fleetroster_core::{ids::*, BusRecord, DriverRecord, RouteRecord};
use fleetroster_engine::{EngineError, ManualClock, Session, SessionConfig};
use fleetroster_storage::{SqliteStorage, StorageError};

/// An in-memory SQLite depot with helpers for seeding drivers, buses and
/// routes the way an admin tool would.
pub struct TestDepot {
    pub storage: SqliteStorage,
}

impl TestDepot {
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self {
            storage: SqliteStorage::open_in_memory()?,
        })
    }

    pub fn add_route(&mut self, name: &str, active: bool) -> Result<RouteId, StorageError> {
        let mut route = RouteRecord::new(name, vec!["Depot".into(), format!("{name} Terminal")]);
        route.active = active;
        self.storage.put_route(&route)?;
        Ok(route.route_id)
    }

    pub fn add_bus(&mut self, number: &str, route: Option<RouteId>) -> Result<BusId, StorageError> {
        let mut bus = BusRecord::new(number, 48);
        bus.route_id = route;
        self.storage.put_bus(&bus)?;
        Ok(bus.bus_id)
    }

    pub fn add_driver(&mut self, employee_id: &str, name: &str) -> Result<DriverId, StorageError> {
        let driver = DriverRecord::new(employee_id, name);
        self.storage.put_driver(&driver)?;
        Ok(driver.driver_id)
    }

    pub fn add_reserved_driver(
        &mut self,
        employee_id: &str,
        name: &str,
    ) -> Result<DriverId, StorageError> {
        let mut driver = DriverRecord::new(employee_id, name);
        driver.reserved = true;
        self.storage.put_driver(&driver)?;
        Ok(driver.driver_id)
    }

    /// Seat `driver_id` on `bus_id` directly in the store. Both must be
    /// unassigned. Like any admin edit this bumps both stored versions, so
    /// read versions back rather than assuming the seeded value.
    pub fn assign(&mut self, driver_id: DriverId, bus_id: BusId) -> Result<(), StorageError> {
        let mut bus = self.bus(bus_id)?;
        let mut driver = self.driver(driver_id)?;
        driver.assigned_bus_id = Some(bus_id);
        driver.assigned_route_id = bus.route_id;
        bus.assigned_driver_id = Some(driver_id);
        self.storage.put_driver(&driver)?;
        self.storage.put_bus(&bus)?;
        Ok(())
    }

    /// Put `bus_id` on an active trip run by its assigned driver.
    pub fn start_trip(&mut self, bus_id: BusId) -> Result<TripId, StorageError> {
        let mut bus = self.bus(bus_id)?;
        let trip_id = TripId::new();
        bus.active_trip_id = Some(trip_id);
        bus.active_driver_id = bus.assigned_driver_id;
        self.storage.put_bus(&bus)?;
        Ok(trip_id)
    }

    pub fn bus(&self, bus_id: BusId) -> Result<BusRecord, StorageError> {
        self.storage
            .get_bus(bus_id)?
            .ok_or_else(|| StorageError::NotFound(format!("bus {bus_id}")))
    }

    pub fn driver(&self, driver_id: DriverId) -> Result<DriverRecord, StorageError> {
        self.storage
            .get_driver(driver_id)?
            .ok_or_else(|| StorageError::NotFound(format!("driver {driver_id}")))
    }

    /// Hand the depot to a session with default config and a manual clock.
    pub fn open_session(self, clock: ManualClock) -> Result<Session<SqliteStorage>, EngineError> {
        Session::open(self.storage, SessionConfig::default(), Box::new(clock))
    }
}
