use chrono::{DateTime, Utc};
use sensor_registry::{ConnectionEventV1, SignatureEventV1};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Severity ordinal used by both sensors: 1 is the most severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn ordinal(self) -> u8 {
        match self {
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
        }
    }

    pub fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            1 => Some(Severity::High),
            2 => Some(Severity::Medium),
            3 => Some(Severity::Low),
            _ => None,
        }
    }

    /// Filter vocabulary: `high`, `medium`, `low`, with `critical` folded into high.
    pub fn from_label(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "critical" | "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

impl From<Severity> for u8 {
    fn from(value: Severity) -> Self {
        value.ordinal()
    }
}

impl TryFrom<u8> for Severity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Severity::from_ordinal(value).ok_or_else(|| format!("invalid severity ordinal {value}"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceTag {
    Suricata,
    Zeek,
}

impl SourceTag {
    /// Prefix carried by every identity minted for this sensor.
    pub fn identity_prefix(self) -> &'static str {
        match self {
            SourceTag::Suricata => "suricata",
            SourceTag::Zeek => "zeek",
        }
    }
}

impl FromStr for SourceTag {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "suricata" => Ok(SourceTag::Suricata),
            "zeek" => Ok(SourceTag::Zeek),
            other => Err(format!("unknown sensor '{other}'")),
        }
    }
}

/// Analyst workflow state. Any status may move to `FalsePositive`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertStatus {
    #[default]
    New,
    #[serde(rename = "In Progress")]
    InProgress,
    Resolved,
    #[serde(rename = "False Positive")]
    FalsePositive,
}

impl AlertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::New => "New",
            AlertStatus::InProgress => "In Progress",
            AlertStatus::Resolved => "Resolved",
            AlertStatus::FalsePositive => "False Positive",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "New" => Ok(AlertStatus::New),
            "In Progress" => Ok(AlertStatus::InProgress),
            "Resolved" => Ok(AlertStatus::Resolved),
            "False Positive" => Ok(AlertStatus::FalsePositive),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriageLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl TriageLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            TriageLevel::Low => "Low",
            TriageLevel::Medium => "Medium",
            TriageLevel::High => "High",
            TriageLevel::Critical => "Critical",
        }
    }
}

impl FromStr for TriageLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "low" => Ok(TriageLevel::Low),
            "medium" => Ok(TriageLevel::Medium),
            "high" => Ok(TriageLevel::High),
            "critical" => Ok(TriageLevel::Critical),
            other => Err(format!("unknown triage level '{other}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpVersion {
    V4,
    V6,
    Unknown,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: Option<String>,
    pub port: Option<u16>,
}

impl Endpoint {
    pub fn new(ip: Option<String>, port: Option<u16>) -> Self {
        Self { ip, port }
    }

    pub fn ip_version(&self) -> IpVersion {
        match self.ip.as_deref().map(str::parse::<IpAddr>) {
            Some(Ok(IpAddr::V4(_))) => IpVersion::V4,
            Some(Ok(IpAddr::V6(_))) => IpVersion::V6,
            _ => IpVersion::Unknown,
        }
    }
}

/// One upstream record, before identity assignment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawSensorEvent {
    Signature(SignatureEventV1),
    Connection(ConnectionEventV1),
}

impl RawSensorEvent {
    pub fn source(&self) -> SourceTag {
        match self {
            RawSensorEvent::Signature(_) => SourceTag::Suricata,
            RawSensorEvent::Connection(_) => SourceTag::Zeek,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedAlert {
    pub identity: String,
    pub source: SourceTag,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub label: String,
    pub src: Endpoint,
    pub dest: Endpoint,
    pub protocol: Option<String>,
    pub connection_uid: Option<String>,
    pub classification: String,
    pub status: AlertStatus,
    pub tags: BTreeSet<String>,
    pub triage_level: TriageLevel,
    pub notes: String,
    pub archived: bool,
    pub archive_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordinals_roundtrip_through_json() {
        let json = serde_json::to_string(&Severity::Medium).expect("encode");
        assert_eq!(json, "2");
        let back: Severity = serde_json::from_str("1").expect("decode");
        assert_eq!(back, Severity::High);
        assert!(serde_json::from_str::<Severity>("7").is_err());
    }

    #[test]
    fn severity_labels_fold_critical_into_high() {
        assert_eq!(Severity::from_label("CRITICAL"), Some(Severity::High));
        assert_eq!(Severity::from_label("low"), Some(Severity::Low));
        assert_eq!(Severity::from_label("info"), None);
    }

    #[test]
    fn status_uses_display_names_on_the_wire() {
        let json = serde_json::to_string(&AlertStatus::InProgress).expect("encode");
        assert_eq!(json, "\"In Progress\"");
        assert_eq!("False Positive".parse::<AlertStatus>(), Ok(AlertStatus::FalsePositive));
        assert!("closed".parse::<AlertStatus>().is_err());
    }

    #[test]
    fn endpoint_reports_ip_version() {
        assert_eq!(Endpoint::new(Some("10.0.0.5".into()), None).ip_version(), IpVersion::V4);
        assert_eq!(Endpoint::new(Some("fe80::1".into()), None).ip_version(), IpVersion::V6);
        assert_eq!(Endpoint::new(Some("host-a".into()), None).ip_version(), IpVersion::Unknown);
        assert_eq!(Endpoint::default().ip_version(), IpVersion::Unknown);
    }
}
