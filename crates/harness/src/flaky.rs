use fleetroster_core::{BusRecord, DriverRecord, RouteRecord, WriteBatch};
use fleetroster_storage::{BatchSink, SnapshotSource, StorageError};

/// Wraps a store and injects `Unavailable` failures on demand.
#[derive(Debug)]
pub struct FlakyStore<S> {
    inner: S,
    failing_batches: u32,
    failing_reads: bool,
    batch_attempts: u32,
}

impl<S> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failing_batches: 0,
            failing_reads: false,
            batch_attempts: 0,
        }
    }

    /// Reject the next `count` batches without touching the inner store.
    pub fn fail_next_batches(&mut self, count: u32) {
        self.failing_batches = count;
    }

    pub fn fail_reads(&mut self, failing: bool) {
        self.failing_reads = failing;
    }

    pub fn batch_attempts(&self) -> u32 {
        self.batch_attempts
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    fn check_read(&self, what: &str) -> Result<(), StorageError> {
        if self.failing_reads {
            return Err(StorageError::Unavailable(format!("list {what}")));
        }
        Ok(())
    }
}

impl<S: SnapshotSource> SnapshotSource for FlakyStore<S> {
    fn list_drivers(&self) -> Result<Vec<DriverRecord>, StorageError> {
        self.check_read("drivers")?;
        self.inner.list_drivers()
    }

    fn list_buses(&self) -> Result<Vec<BusRecord>, StorageError> {
        self.check_read("buses")?;
        self.inner.list_buses()
    }

    fn list_routes(&self) -> Result<Vec<RouteRecord>, StorageError> {
        self.check_read("routes")?;
        self.inner.list_routes()
    }
}

impl<S: BatchSink> BatchSink for FlakyStore<S> {
    fn apply_batch(&mut self, batch: &WriteBatch) -> Result<(), StorageError> {
        self.batch_attempts += 1;
        if self.failing_batches > 0 {
            self.failing_batches -= 1;
            return Err(StorageError::Unavailable(format!("batch {}", batch.digest)));
        }
        self.inner.apply_batch(batch)
    }
}
