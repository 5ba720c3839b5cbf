//! Append-only per-trip event log
//!
//! The log is the source of truth for ordering, idempotent replay and
//! notification reconstruction. Each trip owns a monotonically increasing
//! sequence starting at 1; records are never mutated or deleted. Appends
//! for distinct trips may run concurrently; the caller's per-trip exclusive
//! section guarantees a single appender per trip.

use crate::errors::{DispatchError, DispatchResult};
use crate::events::{EventPayload, EventRecord};
use crate::identifiers::{EventId, TripId};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// The durable, ordered, append-only record of accepted transitions
pub trait EventLog: Send + Sync {
    /// Append a transition at `seq`. Idempotent: when `(trip_id, seq)` has
    /// already been appended, the existing record is returned unchanged and
    /// no duplicate is created. A `seq` beyond the next free slot is a
    /// storage error; the exclusive section makes gaps impossible.
    fn append(
        &self,
        trip_id: TripId,
        seq: u64,
        payload: EventPayload,
    ) -> DispatchResult<EventRecord>;

    /// The sequence number the next append for this trip should use
    fn next_seq(&self, trip_id: TripId) -> DispatchResult<u64>;

    /// Read records for a trip starting at `from_seq` (inclusive, 1-based)
    fn read_events(&self, trip_id: TripId, from_seq: u64) -> DispatchResult<Vec<EventRecord>>;
}

/// In-memory event log
///
/// One lock over the whole map: appends hold it only long enough to push a
/// record, so cross-trip appends contend but never wait on each other's
/// validation or I/O.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    streams: RwLock<HashMap<TripId, Vec<EventRecord>>>,
}

impl InMemoryEventLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventLog for InMemoryEventLog {
    fn append(
        &self,
        trip_id: TripId,
        seq: u64,
        payload: EventPayload,
    ) -> DispatchResult<EventRecord> {
        let mut streams = self
            .streams
            .write()
            .map_err(|_| DispatchError::Storage("event log lock poisoned".to_string()))?;
        let stream = streams.entry(trip_id).or_default();

        if seq == 0 {
            return Err(DispatchError::Storage(format!(
                "append for trip {trip_id}: sequence numbers start at 1"
            )));
        }
        let next = stream.len() as u64 + 1;
        if seq < next {
            // Already applied: replay returns the existing record
            debug!(%trip_id, seq, "idempotent re-append, returning existing record");
            return Ok(stream[(seq - 1) as usize].clone());
        }
        if seq > next {
            return Err(DispatchError::Storage(format!(
                "append gap for trip {trip_id}: got seq {seq}, expected {next}"
            )));
        }

        let kind = payload.kind();
        let record = EventRecord {
            trip_id,
            seq,
            event_id: EventId::derive(trip_id, seq, kind.as_str()),
            kind,
            payload,
            timestamp: Utc::now(),
        };
        stream.push(record.clone());
        Ok(record)
    }

    fn next_seq(&self, trip_id: TripId) -> DispatchResult<u64> {
        let streams = self
            .streams
            .read()
            .map_err(|_| DispatchError::Storage("event log lock poisoned".to_string()))?;
        Ok(streams.get(&trip_id).map_or(0, Vec::len) as u64 + 1)
    }

    fn read_events(&self, trip_id: TripId, from_seq: u64) -> DispatchResult<Vec<EventRecord>> {
        let streams = self
            .streams
            .read()
            .map_err(|_| DispatchError::Storage("event log lock poisoned".to_string()))?;
        let Some(stream) = streams.get(&trip_id) else {
            return Ok(Vec::new());
        };
        let skip = from_seq.saturating_sub(1) as usize;
        Ok(stream.iter().skip(skip).cloned().collect())
    }
}
