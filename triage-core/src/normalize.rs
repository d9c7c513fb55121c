use crate::alerts::{
    AlertStatus, Endpoint, NormalizedAlert, RawSensorEvent, Severity, SourceTag, TriageLevel,
};
use crate::identity::{assign_identity, IdentityAllocator, IdentityScheme, InvariantFields};
use sensor_registry::{parse_timestamp, ConnectionEventV1, SignatureEventV1};
use std::collections::BTreeSet;

pub const UNCLASSIFIED: &str = "Unclassified";
pub const NETWORK_LOG: &str = "Network Log";
const UNKNOWN_SIGNATURE: &str = "Unknown";
const NETWORK_ACTIVITY: &str = "Network Activity";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NormalizedBatch {
    pub alerts: Vec<NormalizedAlert>,
    /// Events dropped because their timestamp could not be read.
    pub rejected: usize,
    /// Distinct alerts whose identities hashed to the same value.
    pub collisions: usize,
}

/// Normalizes one poll batch. Identities are unique within the batch; the
/// allocator that guarantees it lives only for the duration of this call.
pub fn normalize(events: &[RawSensorEvent], scheme: IdentityScheme) -> NormalizedBatch {
    let mut allocator = IdentityAllocator::new();
    let mut batch = NormalizedBatch::default();

    for event in events {
        let normalized = match event {
            RawSensorEvent::Signature(sig) => normalize_signature(sig, scheme, &mut allocator),
            RawSensorEvent::Connection(conn) => normalize_connection(conn, scheme, &mut allocator),
        };
        match normalized {
            Ok(alert) => batch.alerts.push(alert),
            Err(reason) => {
                tracing::warn!(source = ?event.source(), %reason, "dropping sensor event");
                batch.rejected += 1;
            }
        }
    }

    batch.collisions = allocator.collisions();
    tracing::debug!(
        normalized = batch.alerts.len(),
        rejected = batch.rejected,
        collisions = batch.collisions,
        "normalized sensor batch"
    );
    batch
}

pub fn normalize_signature(
    event: &SignatureEventV1,
    scheme: IdentityScheme,
    allocator: &mut IdentityAllocator,
) -> Result<NormalizedAlert, String> {
    let timestamp = parse_timestamp(&event.timestamp)?;
    let fields = InvariantFields {
        label: event.signature.as_deref(),
        src_ip: event.src_ip.as_deref(),
        dest_ip: event.dest_ip.as_deref(),
        src_port: event.src_port,
        dest_port: event.dest_port,
    };
    let identity = allocator.allocate(
        assign_identity(SourceTag::Suricata, &fields, scheme),
        &fields.canonical(),
    );

    Ok(NormalizedAlert {
        identity,
        source: SourceTag::Suricata,
        timestamp,
        severity: event
            .severity
            .and_then(Severity::from_ordinal)
            .unwrap_or(Severity::Medium),
        label: non_blank(event.signature.as_deref()).unwrap_or(UNKNOWN_SIGNATURE).to_string(),
        src: Endpoint::new(event.src_ip.clone(), event.src_port),
        dest: Endpoint::new(event.dest_ip.clone(), event.dest_port),
        protocol: event.protocol.clone(),
        connection_uid: None,
        classification: UNCLASSIFIED.into(),
        status: AlertStatus::New,
        tags: BTreeSet::new(),
        triage_level: TriageLevel::Medium,
        notes: String::new(),
        archived: false,
        archive_reason: None,
    })
}

pub fn normalize_connection(
    event: &ConnectionEventV1,
    scheme: IdentityScheme,
    allocator: &mut IdentityAllocator,
) -> Result<NormalizedAlert, String> {
    let timestamp = parse_timestamp(&event.timestamp)?;
    let label = non_blank(event.service.as_deref())
        .or_else(|| non_blank(event.proto.as_deref()))
        .unwrap_or(NETWORK_ACTIVITY)
        .to_string();
    let fields = InvariantFields {
        label: Some(&label),
        src_ip: event.origin_ip.as_deref(),
        dest_ip: event.responder_ip.as_deref(),
        src_port: event.origin_port,
        dest_port: event.responder_port,
    };
    let identity = allocator.allocate(
        assign_identity(SourceTag::Zeek, &fields, scheme),
        &fields.canonical(),
    );

    Ok(NormalizedAlert {
        identity,
        source: SourceTag::Zeek,
        timestamp,
        severity: Severity::Low,
        src: Endpoint::new(event.origin_ip.clone(), event.origin_port),
        dest: Endpoint::new(event.responder_ip.clone(), event.responder_port),
        protocol: event.proto.clone(),
        connection_uid: event.uid.clone(),
        label,
        classification: NETWORK_LOG.into(),
        status: AlertStatus::New,
        tags: BTreeSet::new(),
        triage_level: TriageLevel::Low,
        notes: String::new(),
        archived: false,
        archive_reason: None,
    })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
