//! Transport trace records
//!
//! A trace is the ordered log of everything that crossed the transport
//! boundary: events raised to the device core and primitives the core invoked
//! in response. Capturing both sides makes a session replayable.

use crate::types::{TransportEvent, TransportOp};
use serde::{Deserialize, Serialize};

/// One side of the transport boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceEntry {
    /// Raised by the transport to the core
    Event(TransportEvent),
    /// Invoked by the core on the transport
    Op(TransportOp),
    /// Input report queued by the application on a function's interface
    Report {
        interface: u8,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
}

/// A sequenced trace entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Monotonic, starting at 0 for each trace file
    pub sequence: u64,
    pub entry: TraceEntry,
}

impl TraceRecord {
    pub fn is_event(&self) -> bool {
        matches!(self.entry, TraceEntry::Event(_))
    }

    /// Whether this entry drove the device (as opposed to being its output)
    pub fn is_stimulus(&self) -> bool {
        !matches!(self.entry, TraceEntry::Op(_))
    }
}

/// Assigns sequence numbers as entries are recorded
#[derive(Debug, Default, Clone)]
pub struct TraceLog {
    records: Vec<TraceRecord>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: TraceEntry) {
        let sequence = self.records.len() as u64;
        self.records.push(TraceRecord { sequence, entry });
    }

    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<TraceRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
