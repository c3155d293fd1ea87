use tracing::debug;

use fleetroster_core::{BusRecord, DriverRecord, RouteRecord};
use fleetroster_storage::{SnapshotSource, StorageError};

/// Everything the engine needs from the store, read once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub drivers: Vec<DriverRecord>,
    pub buses: Vec<BusRecord>,
    pub routes: Vec<RouteRecord>,
}

/// One-shot read of all three collections. Any failing read fails the load.
pub fn fetch<S: SnapshotSource + ?Sized>(source: &S) -> Result<Snapshot, StorageError> {
    let drivers = source.list_drivers()?;
    let buses = source.list_buses()?;
    let routes = source.list_routes()?;
    debug!(
        drivers = drivers.len(),
        buses = buses.len(),
        routes = routes.len(),
        "snapshot fetched"
    );
    Ok(Snapshot {
        drivers,
        buses,
        routes,
    })
}
