//! Time-windowed grouping of repeated detections.
//!
//! Alerts sharing a grouping key are sorted by time and chained while the gap
//! between neighbours stays within the window. Each chain becomes one
//! [`AlertCluster`] that remembers every member identity, so an edit made on
//! the cluster can be written back to all of them.

use crate::alerts::NormalizedAlert;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

pub const DEFAULT_WINDOW_SECS: i64 = 300;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationMode {
    Raw,
    #[default]
    Consolidated,
}

impl FromStr for ConsolidationMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "raw" | "false" | "0" | "off" => Ok(ConsolidationMode::Raw),
            "consolidated" | "true" | "1" | "on" => Ok(ConsolidationMode::Consolidated),
            other => Err(format!("unknown consolidation mode '{other}'")),
        }
    }
}

/// Extra fields folded into the grouping key. Label, source ip and
/// destination ip are always part of it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingPolicy {
    pub include_ports: bool,
    pub include_protocol: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsolidationConfig {
    pub mode: ConsolidationMode,
    pub window: Duration,
    pub grouping: GroupingPolicy,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            mode: ConsolidationMode::default(),
            window: Duration::seconds(DEFAULT_WINDOW_SECS),
            grouping: GroupingPolicy::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertCluster {
    /// Most recent member; its fields are what the row displays.
    pub representative: NormalizedAlert,
    pub count: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Every constituent identity, oldest first.
    pub member_ids: Vec<String>,
}

impl AlertCluster {
    fn from_chain(chain: &[&NormalizedAlert]) -> Option<Self> {
        let first = chain.first()?;
        let last = chain.last()?;
        Some(Self {
            representative: (*last).clone(),
            count: chain.len(),
            first_seen: first.timestamp,
            last_seen: last.timestamp,
            member_ids: chain.iter().map(|a| a.identity.clone()).collect(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "rows", rename_all = "snake_case")]
pub enum AlertView {
    Raw(Vec<NormalizedAlert>),
    Clustered(Vec<AlertCluster>),
}

impl AlertView {
    pub fn len(&self) -> usize {
        match self {
            AlertView::Raw(rows) => rows.len(),
            AlertView::Clustered(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct GroupKey<'a> {
    label: &'a str,
    src_ip: Option<&'a str>,
    dest_ip: Option<&'a str>,
    ports: Option<(Option<u16>, Option<u16>)>,
    protocol: Option<Option<&'a str>>,
}

impl<'a> GroupKey<'a> {
    fn of(alert: &'a NormalizedAlert, policy: GroupingPolicy) -> Self {
        Self {
            label: &alert.label,
            src_ip: alert.src.ip.as_deref(),
            dest_ip: alert.dest.ip.as_deref(),
            ports: policy
                .include_ports
                .then_some((alert.src.port, alert.dest.port)),
            protocol: policy
                .include_protocol
                .then_some(alert.protocol.as_deref()),
        }
    }
}

pub fn consolidate(alerts: &[NormalizedAlert], config: &ConsolidationConfig) -> AlertView {
    match config.mode {
        ConsolidationMode::Raw => {
            AlertView::Raw(alerts.iter().filter(|a| !a.archived).cloned().collect())
        }
        ConsolidationMode::Consolidated => {
            AlertView::Clustered(cluster_alerts(alerts, config.window, config.grouping))
        }
    }
}

/// Clusters sorted by `last_seen` descending, ties broken by representative
/// identity.
pub fn cluster_alerts(
    alerts: &[NormalizedAlert],
    window: Duration,
    grouping: GroupingPolicy,
) -> Vec<AlertCluster> {
    // Groups keep first-appearance order so equal inputs give equal outputs.
    let mut index: HashMap<GroupKey<'_>, usize> = HashMap::new();
    let mut groups: Vec<Vec<&NormalizedAlert>> = Vec::new();
    for alert in alerts.iter().filter(|a| !a.archived) {
        let slot = *index
            .entry(GroupKey::of(alert, grouping))
            .or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
        groups[slot].push(alert);
    }

    let mut clusters = Vec::new();
    for mut group in groups {
        group.sort_by_key(|a| a.timestamp);

        let mut start = 0;
        for i in 1..group.len() {
            if group[i].timestamp - group[i - 1].timestamp > window {
                clusters.extend(AlertCluster::from_chain(&group[start..i]));
                start = i;
            }
        }
        clusters.extend(AlertCluster::from_chain(&group[start..]));
    }

    clusters.sort_by(|a, b| {
        b.last_seen
            .cmp(&a.last_seen)
            .then_with(|| a.representative.identity.cmp(&b.representative.identity))
    });
    tracing::debug!(
        alerts = alerts.len(),
        clusters = clusters.len(),
        window_secs = window.num_seconds(),
        "consolidated alerts"
    );
    clusters
}
