use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::BatchDigest;
use crate::records::{BusRecord, DriverRecord};

/// One record's complete resolved state. `version` is the version the
/// writer last observed; the store rejects the write if it has moved on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordWrite {
    Driver(DriverRecord),
    Bus(BusRecord),
}

impl RecordWrite {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Driver(_) => "driver",
            Self::Bus(_) => "bus",
        }
    }

    pub fn expected_version(&self) -> u64 {
        match self {
            Self::Driver(d) => d.version,
            Self::Bus(b) => b.version,
        }
    }
}

/// All-or-nothing set of record writes produced by one finalize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
    pub digest: BatchDigest,
    pub writes: Vec<RecordWrite>,
}

impl WriteBatch {
    pub fn new(writes: Vec<RecordWrite>) -> Result<Self, CoreError> {
        let mut hasher = blake3::Hasher::new();
        for write in &writes {
            let bytes =
                rmp_serde::to_vec(write).map_err(|e| CoreError::Serialization(e.to_string()))?;
            hasher.update(&bytes);
        }
        let digest = BatchDigest::from_bytes(*hasher.finalize().as_bytes());
        Ok(Self { digest, writes })
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn drivers(&self) -> impl Iterator<Item = &DriverRecord> {
        self.writes.iter().filter_map(|w| match w {
            RecordWrite::Driver(d) => Some(d),
            RecordWrite::Bus(_) => None,
        })
    }

    pub fn buses(&self) -> impl Iterator<Item = &BusRecord> {
        self.writes.iter().filter_map(|w| match w {
            RecordWrite::Bus(b) => Some(b),
            RecordWrite::Driver(_) => None,
        })
    }
}
