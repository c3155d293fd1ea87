pub mod batch;
pub mod error;
pub mod ids;
pub mod records;
pub mod staging;

pub use batch::{RecordWrite, WriteBatch};
pub use error::CoreError;
pub use ids::*;
pub use records::{BusRecord, DriverRecord, DriverStatus, RouteRecord, Shift};
pub use staging::{Dimension, Slot, StagingChange, StagingRow};
