use crate::error::TriageError;
use chrono::{DateTime, Utc};
use sensor_registry::{parse_timestamp, ConnectionEventV1, SignatureEventV1};
use std::collections::VecDeque;
use std::sync::Mutex;

pub const DEFAULT_FEED_CAPACITY: usize = 2_000;

/// Read contract of the two upstream sensors. Each call returns the most
/// recent `limit` events, newest first; repeated calls may return the same
/// events again.
pub trait SensorFeed: Send + Sync {
    fn fetch_signature_events(&self, limit: usize) -> Result<Vec<SignatureEventV1>, TriageError>;
    fn fetch_connection_events(&self, limit: usize) -> Result<Vec<ConnectionEventV1>, TriageError>;
}

/// Bounded in-process feed filled by the ingest webhooks. Reads do not
/// consume, so every poll sees the current window of recent events.
pub struct BufferedFeed {
    capacity: usize,
    signatures: Mutex<VecDeque<SignatureEventV1>>,
    connections: Mutex<VecDeque<ConnectionEventV1>>,
}

impl Default for BufferedFeed {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_FEED_CAPACITY)
    }
}

impl BufferedFeed {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            signatures: Mutex::new(VecDeque::new()),
            connections: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_signature(&self, event: SignatureEventV1) -> Result<(), TriageError> {
        push_bounded(&self.signatures, event, self.capacity)
    }

    pub fn push_connection(&self, event: ConnectionEventV1) -> Result<(), TriageError> {
        push_bounded(&self.connections, event, self.capacity)
    }

    /// Newest readable event time in the signature buffer.
    pub fn last_signature_at(&self) -> Result<Option<DateTime<Utc>>, TriageError> {
        newest(&self.signatures, |e| e.timestamp.as_str())
    }

    pub fn last_connection_at(&self) -> Result<Option<DateTime<Utc>>, TriageError> {
        newest(&self.connections, |e| e.timestamp.as_str())
    }
}

impl SensorFeed for BufferedFeed {
    fn fetch_signature_events(&self, limit: usize) -> Result<Vec<SignatureEventV1>, TriageError> {
        latest(&self.signatures, limit)
    }

    fn fetch_connection_events(&self, limit: usize) -> Result<Vec<ConnectionEventV1>, TriageError> {
        latest(&self.connections, limit)
    }
}

fn push_bounded<T>(buffer: &Mutex<VecDeque<T>>, event: T, capacity: usize) -> Result<(), TriageError> {
    let mut guard = buffer
        .lock()
        .map_err(|e| TriageError::Fetch(format!("feed buffer poisoned: {e}")))?;
    if guard.len() == capacity {
        guard.pop_front();
    }
    guard.push_back(event);
    Ok(())
}

fn latest<T: Clone>(buffer: &Mutex<VecDeque<T>>, limit: usize) -> Result<Vec<T>, TriageError> {
    let guard = buffer
        .lock()
        .map_err(|e| TriageError::Fetch(format!("feed buffer poisoned: {e}")))?;
    Ok(guard.iter().rev().take(limit).cloned().collect())
}

fn newest<T>(
    buffer: &Mutex<VecDeque<T>>,
    timestamp: impl Fn(&T) -> &str,
) -> Result<Option<DateTime<Utc>>, TriageError> {
    let guard = buffer
        .lock()
        .map_err(|e| TriageError::Fetch(format!("feed buffer poisoned: {e}")))?;
    Ok(guard
        .iter()
        .filter_map(|event| parse_timestamp(timestamp(event)).ok())
        .max())
}
