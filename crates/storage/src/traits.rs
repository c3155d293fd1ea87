use fleetroster_core::{BusRecord, DriverRecord, RouteRecord, WriteBatch};

use crate::error::StorageError;

/// Read side of the authoritative store. Every call is a one-shot read.
pub trait SnapshotSource {
    fn list_drivers(&self) -> Result<Vec<DriverRecord>, StorageError>;

    fn list_buses(&self) -> Result<Vec<BusRecord>, StorageError>;

    fn list_routes(&self) -> Result<Vec<RouteRecord>, StorageError>;
}

/// Write side of the authoritative store.
pub trait BatchSink {
    /// Apply every write or none of them. Each write carries the version its
    /// author observed; a store that holds a newer version must reject the
    /// whole batch with [`StorageError::Stale`].
    fn apply_batch(&mut self, batch: &WriteBatch) -> Result<(), StorageError>;
}
