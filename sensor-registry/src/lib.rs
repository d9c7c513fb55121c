use chrono::{DateTime, TimeZone, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Feed A record as produced by the signature detector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SignatureEventV1 {
    pub timestamp: String,
    #[serde(default)]
    pub severity: Option<u8>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub src_ip: Option<String>,
    #[serde(default)]
    pub src_port: Option<u16>,
    #[serde(default)]
    pub dest_ip: Option<String>,
    #[serde(default)]
    pub dest_port: Option<u16>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub raw: Option<serde_json::Value>,
}

/// Feed B record as produced by the connection monitor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConnectionEventV1 {
    pub timestamp: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub proto: Option<String>,
    #[serde(default)]
    pub origin_ip: Option<String>,
    #[serde(default)]
    pub origin_port: Option<u16>,
    #[serde(default)]
    pub responder_ip: Option<String>,
    #[serde(default)]
    pub responder_port: Option<u16>,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
}

pub fn validate_signature_event(event: &SignatureEventV1) -> Result<(), String> {
    parse_timestamp(&event.timestamp)?;
    if let Some(severity) = event.severity {
        if !(1..=3).contains(&severity) {
            return Err(format!("invalid severity '{severity}'"));
        }
    }
    if event
        .signature
        .as_deref()
        .is_some_and(|s| s.trim().is_empty())
    {
        return Err("signature must not be blank when present".into());
    }
    Ok(())
}

pub fn validate_connection_event(event: &ConnectionEventV1) -> Result<(), String> {
    parse_timestamp(&event.timestamp)?;
    if event.origin_ip.is_none() && event.responder_ip.is_none() {
        return Err("connection event needs origin_ip or responder_ip".into());
    }
    Ok(())
}

/// Accepts RFC 3339 strings and epoch seconds, fractional or not.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("timestamp is required".into());
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(secs) = trimmed.parse::<i64>() {
        if let Some(ts) = Utc.timestamp_opt(secs, 0).single() {
            return Ok(ts);
        }
    }
    if let Ok(secs) = trimmed.parse::<f64>() {
        if secs.is_finite() {
            let whole = secs.floor();
            let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
            if let Some(ts) = Utc.timestamp_opt(whole as i64, nanos).single() {
                return Ok(ts);
            }
        }
    }
    Err(format!("unparseable timestamp '{trimmed}'"))
}

/// JSON schema of both upstream feeds, keyed by feed name.
pub fn feed_schemas() -> serde_json::Value {
    serde_json::json!({
        "signature_event.v1": schemars::schema_for!(SignatureEventV1),
        "connection_event.v1": schemars::schema_for!(ConnectionEventV1),
    })
}
