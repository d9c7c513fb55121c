use crate::alerts::{NormalizedAlert, Severity, SourceTag};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Analyst filter criteria. Every field is optional and the set fields are
/// AND-combined. Empty strings and `all` count as unset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertFilter {
    #[serde(default)]
    pub search: Option<String>,
    /// `high`, `medium`, `low`; `critical` is read as `high`.
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "name")]
    pub label: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &NormalizedAlert) -> bool {
        if let Some(needle) = active(&self.search) {
            let needle = needle.to_lowercase();
            let haystacks = [
                alert.src.ip.as_deref().unwrap_or_default(),
                alert.dest.ip.as_deref().unwrap_or_default(),
                alert.label.as_str(),
            ];
            if !haystacks.iter().any(|h| h.to_lowercase().contains(&needle)) {
                return false;
            }
        }

        if let Some(label) = active(&self.severity) {
            // An unrecognised severity selects nothing.
            if Severity::from_label(label) != Some(alert.severity) {
                return false;
            }
        }

        if let Some(status) = active(&self.status) {
            if alert.status.as_str() != status {
                return false;
            }
        }

        if let Some(label) = active(&self.label) {
            if alert.label != label {
                return false;
            }
        }

        if let Some(source) = active(&self.source) {
            if source.parse::<SourceTag>().ok() != Some(alert.source) {
                return false;
            }
        }

        true
    }
}

fn active(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
}

/// Drops archived alerts, then keeps those matching every set criterion.
/// Order is preserved.
pub fn filter_alerts(alerts: &[NormalizedAlert], filter: &AlertFilter) -> Vec<NormalizedAlert> {
    alerts
        .iter()
        .filter(|a| !a.archived)
        .filter(|a| filter.matches(a))
        .cloned()
        .collect()
}

/// Sorted distinct labels of the visible (non-archived) alerts.
pub fn distinct_labels(alerts: &[NormalizedAlert]) -> Vec<String> {
    alerts
        .iter()
        .filter(|a| !a.archived)
        .map(|a| a.label.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCounts {
    pub fn total(&self) -> usize {
        self.high + self.medium + self.low
    }

    fn record(&mut self, severity: Severity) {
        match severity {
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
        }
    }
}

/// Per-sensor severity counts over the visible alerts.
pub fn severity_summary(alerts: &[NormalizedAlert]) -> BTreeMap<SourceTag, SeverityCounts> {
    let mut summary: BTreeMap<SourceTag, SeverityCounts> = BTreeMap::new();
    for alert in alerts.iter().filter(|a| !a.archived) {
        summary.entry(alert.source).or_default().record(alert.severity);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertStatus, Endpoint, TriageLevel};
    use chrono::{TimeZone, Utc};

    fn alert(id: &str, label: &str, src: &str, severity: Severity) -> NormalizedAlert {
        NormalizedAlert {
            identity: id.into(),
            source: SourceTag::Suricata,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            severity,
            label: label.into(),
            src: Endpoint::new(Some(src.into()), Some(40000)),
            dest: Endpoint::new(Some("10.0.0.9".into()), Some(22)),
            protocol: Some("TCP".into()),
            connection_uid: None,
            classification: "Unclassified".into(),
            status: AlertStatus::New,
            tags: BTreeSet::new(),
            triage_level: TriageLevel::Medium,
            notes: String::new(),
            archived: false,
            archive_reason: None,
        }
    }

    fn sample() -> Vec<NormalizedAlert> {
        let mut resolved = alert("c", "SSH Brute Force", "172.16.0.3", Severity::High);
        resolved.status = AlertStatus::Resolved;
        let mut zeek = alert("d", "dns", "192.168.1.20", Severity::Low);
        zeek.source = SourceTag::Zeek;
        vec![
            alert("a", "Port Scan Detected", "10.0.0.5", Severity::High),
            alert("b", "Port Scan Detected", "10.0.0.6", Severity::Medium),
            resolved,
            zeek,
        ]
    }

    fn ids(alerts: &[NormalizedAlert]) -> Vec<&str> {
        alerts.iter().map(|a| a.identity.as_str()).collect()
    }

    #[test]
    fn empty_filter_keeps_everything_visible() {
        assert_eq!(ids(&filter_alerts(&sample(), &AlertFilter::default())), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn search_is_case_insensitive_over_ips_and_label() {
        let by_label = AlertFilter {
            search: Some("port SCAN".into()),
            ..AlertFilter::default()
        };
        assert_eq!(ids(&filter_alerts(&sample(), &by_label)), vec!["a", "b"]);

        let by_ip = AlertFilter {
            search: Some("172.16".into()),
            ..AlertFilter::default()
        };
        assert_eq!(ids(&filter_alerts(&sample(), &by_ip)), vec!["c"]);
    }

    #[test]
    fn criteria_are_and_combined() {
        let filter = AlertFilter {
            search: Some("port".into()),
            severity: Some("critical".into()),
            ..AlertFilter::default()
        };
        assert_eq!(ids(&filter_alerts(&sample(), &filter)), vec!["a"]);

        let filter = AlertFilter {
            status: Some("Resolved".into()),
            label: Some("Port Scan Detected".into()),
            ..AlertFilter::default()
        };
        assert!(filter_alerts(&sample(), &filter).is_empty());
    }

    #[test]
    fn unknown_severity_matches_nothing_and_all_matches_everything() {
        let unknown = AlertFilter {
            severity: Some("info".into()),
            ..AlertFilter::default()
        };
        assert!(filter_alerts(&sample(), &unknown).is_empty());

        let all = AlertFilter {
            severity: Some("all".into()),
            status: Some("".into()),
            ..AlertFilter::default()
        };
        assert_eq!(filter_alerts(&sample(), &all).len(), 4);
    }

    #[test]
    fn source_narrows_to_one_sensor() {
        let filter = AlertFilter {
            source: Some("zeek".into()),
            ..AlertFilter::default()
        };
        assert_eq!(ids(&filter_alerts(&sample(), &filter)), vec!["d"]);
    }

    #[test]
    fn archived_alerts_never_pass() {
        let mut alerts = sample();
        alerts[0].archived = true;
        let filter = AlertFilter {
            search: Some("10.0.0.5".into()),
            ..AlertFilter::default()
        };
        assert!(filter_alerts(&alerts, &filter).is_empty());
        assert_eq!(distinct_labels(&alerts), vec!["Port Scan Detected", "SSH Brute Force", "dns"]);
    }

    #[test]
    fn summary_counts_per_sensor() {
        let summary = severity_summary(&sample());
        assert_eq!(
            summary[&SourceTag::Suricata],
            SeverityCounts { high: 2, medium: 1, low: 0 }
        );
        assert_eq!(summary[&SourceTag::Zeek].total(), 1);
    }

    #[test]
    fn filter_reads_the_name_query_parameter() {
        let filter: AlertFilter =
            serde_json::from_value(serde_json::json!({"name": "dns"})).expect("decode");
        assert_eq!(filter.label.as_deref(), Some("dns"));
    }
}
