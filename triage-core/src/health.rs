use crate::alerts::SourceTag;
use crate::error::TriageError;
use crate::feeds::BufferedFeed;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

pub const DEFAULT_STALE_AFTER_SECS: i64 = 600;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorState {
    /// An event newer than the staleness window was seen.
    Online,
    /// Events exist, all older than the window.
    Stale,
    /// Nothing received yet.
    Offline,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SensorHealth {
    pub source: SourceTag,
    pub state: SensorState,
    pub last_event: Option<DateTime<Utc>>,
}

pub fn sensor_state(
    last_event: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> SensorState {
    match last_event {
        None => SensorState::Offline,
        Some(at) if now - at <= stale_after => SensorState::Online,
        Some(_) => SensorState::Stale,
    }
}

/// State of both sensors judged by the newest event each has delivered.
pub fn sensor_health(
    feed: &BufferedFeed,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> Result<Vec<SensorHealth>, TriageError> {
    let report = |source, last_event| SensorHealth {
        source,
        state: sensor_state(last_event, now, stale_after),
        last_event,
    };
    Ok(vec![
        report(SourceTag::Suricata, feed.last_signature_at()?),
        report(SourceTag::Zeek, feed.last_connection_at()?),
    ])
}
