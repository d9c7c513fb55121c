use crate::consolidate::{ConsolidationConfig, ConsolidationMode, GroupingPolicy, DEFAULT_WINDOW_SECS};
use crate::health::DEFAULT_STALE_AFTER_SECS;
use crate::identity::IdentityScheme;
use crate::pipeline::{CycleOptions, DEFAULT_FETCH_LIMIT};
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_DB_PATH: &str = "alerts.db";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriageConfig {
    pub poll_interval: Duration,
    pub fetch_limit: usize,
    pub identity_scheme: IdentityScheme,
    pub consolidation: ConsolidationConfig,
    /// `None` keeps metadata in memory only.
    pub db_path: Option<String>,
    pub bind_addr: String,
    /// A sensor with no event newer than this is reported stale.
    pub sensor_stale_after: chrono::Duration,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            fetch_limit: DEFAULT_FETCH_LIMIT,
            identity_scheme: IdentityScheme::default(),
            consolidation: ConsolidationConfig::default(),
            db_path: Some(DEFAULT_DB_PATH.into()),
            bind_addr: DEFAULT_BIND_ADDR.into(),
            sensor_stale_after: chrono::Duration::seconds(DEFAULT_STALE_AFTER_SECS),
        }
    }
}

impl TriageConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparseable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let window_secs = parsed("TRIAGE_WINDOW_SECS")
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_WINDOW_SECS);

        Self {
            poll_interval: parsed("TRIAGE_POLL_INTERVAL_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            fetch_limit: parsed("TRIAGE_FETCH_LIMIT")
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.fetch_limit),
            identity_scheme: parsed("TRIAGE_IDENTITY_SCHEME")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.identity_scheme),
            consolidation: ConsolidationConfig {
                mode: parsed("TRIAGE_CONSOLIDATE")
                    .and_then(|v| v.parse::<ConsolidationMode>().ok())
                    .unwrap_or(defaults.consolidation.mode),
                window: chrono::Duration::seconds(window_secs),
                grouping: GroupingPolicy {
                    include_ports: parsed("TRIAGE_GROUP_BY_PORTS")
                        .is_some_and(|v| flag(&v)),
                    include_protocol: parsed("TRIAGE_GROUP_BY_PROTOCOL")
                        .is_some_and(|v| flag(&v)),
                },
            },
            db_path: match parsed("TRIAGE_DB_PATH") {
                Some(v) if v == ":memory:" => None,
                Some(v) => Some(v),
                None => defaults.db_path,
            },
            bind_addr: parsed("TRIAGE_BIND_ADDR").unwrap_or(defaults.bind_addr),
            sensor_stale_after: parsed("TRIAGE_SENSOR_STALE_SECS")
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|v| *v > 0)
                .map(chrono::Duration::seconds)
                .unwrap_or(defaults.sensor_stale_after),
        }
    }

    pub fn cycle_options(&self) -> CycleOptions {
        CycleOptions {
            fetch_limit: self.fetch_limit,
            scheme: self.identity_scheme,
        }
    }
}

fn flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
