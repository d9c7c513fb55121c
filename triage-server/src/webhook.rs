use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use sensor_registry::{
    validate_connection_event, validate_signature_event, ConnectionEventV1, SignatureEventV1,
};
use serde_json::Value;

/// Turns one sensor document into its feed record. Accepts the flat feed
/// shape as well as the nested Filebeat/ECS shape.
pub trait SensorAdapter: Send + Sync + 'static {
    type Event;

    fn parse(&self, payload: &Value) -> Result<Self::Event, String>;
}

pub struct SuricataAdapter;
pub struct ZeekAdapter;

impl SensorAdapter for SuricataAdapter {
    type Event = SignatureEventV1;

    fn parse(&self, payload: &Value) -> Result<SignatureEventV1, String> {
        let event = SignatureEventV1 {
            timestamp: field_str(payload, &[&["timestamp"], &["@timestamp"]])
                .ok_or_else(|| "suricata event missing timestamp".to_string())?,
            severity: field_u64(
                payload,
                &[
                    &["severity"],
                    &["alert", "severity"],
                    &["suricata", "eve", "alert", "severity"],
                    &["event", "severity"],
                    &["suricata", "eve", "severity"],
                ],
            )
            .and_then(|v| u8::try_from(v).ok()),
            signature: field_str(
                payload,
                &[
                    &["signature"],
                    &["alert", "signature"],
                    &["suricata", "eve", "alert", "signature"],
                ],
            ),
            src_ip: field_str(payload, &[&["src_ip"], &["source", "ip"]]),
            src_port: field_port(payload, &[&["src_port"], &["source", "port"]]),
            dest_ip: field_str(payload, &[&["dest_ip"], &["destination", "ip"]]),
            dest_port: field_port(payload, &[&["dest_port"], &["destination", "port"]]),
            protocol: field_str(
                payload,
                &[&["protocol"], &["proto"], &["network", "protocol"], &["network", "transport"]],
            ),
            raw: Some(payload.clone()),
        };
        validate_signature_event(&event)?;
        Ok(event)
    }
}

impl SensorAdapter for ZeekAdapter {
    type Event = ConnectionEventV1;

    fn parse(&self, payload: &Value) -> Result<ConnectionEventV1, String> {
        let event = ConnectionEventV1 {
            timestamp: field_str(payload, &[&["timestamp"], &["@timestamp"], &["ts"]])
                .ok_or_else(|| "zeek event missing timestamp".to_string())?,
            service: field_str(payload, &[&["service"], &["zeek", "service"]]),
            proto: field_str(payload, &[&["proto"], &["network", "transport"]]),
            origin_ip: field_str(
                payload,
                &[&["origin_ip"], &["src_ip"], &["id.orig_h"], &["source", "ip"]],
            ),
            origin_port: field_port(
                payload,
                &[&["origin_port"], &["src_port"], &["id.orig_p"], &["source", "port"]],
            ),
            responder_ip: field_str(
                payload,
                &[&["responder_ip"], &["dest_ip"], &["id.resp_h"], &["destination", "ip"]],
            ),
            responder_port: field_port(
                payload,
                &[&["responder_port"], &["dest_port"], &["id.resp_p"], &["destination", "port"]],
            ),
            uid: field_str(payload, &[&["uid"], &["zeek", "session_id"]]),
            event_type: field_str(payload, &[&["event_type"], &["zeek", "event"]]),
        };
        validate_connection_event(&event)?;
        Ok(event)
    }
}

pub fn webhook_router() -> Router<AppState> {
    Router::new()
        .route("/webhook/suricata", post(handle_suricata))
        .route("/webhook/zeek", post(handle_zeek))
}

/// A body is one event, an array of events, or `{"events": [...]}`.
/// Any malformed entry rejects the whole body.
pub fn parse_batch<A: SensorAdapter>(adapter: &A, payload: &Value) -> Result<Vec<A::Event>, String> {
    let items: Vec<&Value> = match payload {
        Value::Array(items) => items.iter().collect(),
        Value::Object(obj) => match obj.get("events").and_then(Value::as_array) {
            Some(items) => items.iter().collect(),
            None => vec![payload],
        },
        _ => return Err("expected a JSON object or array".into()),
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| adapter.parse(item).map_err(|e| format!("event {i}: {e}")))
        .collect()
}

async fn handle_suricata(State(state): State<AppState>, Json(payload): Json<Value>) -> StatusCode {
    let events = match parse_batch(&SuricataAdapter, &payload) {
        Ok(events) => events,
        Err(reason) => {
            tracing::warn!(%reason, "rejected suricata webhook");
            return StatusCode::BAD_REQUEST;
        }
    };
    let count = events.len();
    for event in events {
        if state.feed.push_signature(event).is_err() {
            return StatusCode::SERVICE_UNAVAILABLE;
        }
    }
    tracing::debug!(count, "buffered suricata events");
    StatusCode::ACCEPTED
}

async fn handle_zeek(State(state): State<AppState>, Json(payload): Json<Value>) -> StatusCode {
    let events = match parse_batch(&ZeekAdapter, &payload) {
        Ok(events) => events,
        Err(reason) => {
            tracing::warn!(%reason, "rejected zeek webhook");
            return StatusCode::BAD_REQUEST;
        }
    };
    let count = events.len();
    for event in events {
        if state.feed.push_connection(event).is_err() {
            return StatusCode::SERVICE_UNAVAILABLE;
        }
    }
    tracing::debug!(count, "buffered zeek events");
    StatusCode::ACCEPTED
}

fn lookup<'a>(payload: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(payload, |node, key| node.get(*key))
}

fn field<'a>(payload: &'a Value, paths: &[&[&str]]) -> Option<&'a Value> {
    paths
        .iter()
        .filter_map(|path| lookup(payload, path))
        .find(|v| !v.is_null())
}

fn field_str(payload: &Value, paths: &[&[&str]]) -> Option<String> {
    match field(payload, paths)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn field_u64(payload: &Value, paths: &[&[&str]]) -> Option<u64> {
    match field(payload, paths)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn field_port(payload: &Value, paths: &[&[&str]]) -> Option<u16> {
    field_u64(payload, paths).and_then(|v| u16::try_from(v).ok())
}
