use crate::alerts::NormalizedAlert;
use crate::metadata_store::{MetadataPayload, MetadataRecord};
use std::collections::HashMap;

/// Attaches persisted analyst metadata to freshly normalized alerts.
///
/// Every field the record sets replaces the sensor default; unset fields
/// leave the normalizer's value alone. Alerts without a record pass through
/// unchanged. Input slices are not modified.
pub fn merge_metadata(
    alerts: &[NormalizedAlert],
    records: &[MetadataRecord],
) -> Vec<NormalizedAlert> {
    let by_id: HashMap<&str, &MetadataRecord> =
        records.iter().map(|r| (r.alert_id.as_str(), r)).collect();

    alerts
        .iter()
        .map(|alert| match by_id.get(alert.identity.as_str()) {
            Some(record) => apply_payload(alert.clone(), &record.payload),
            None => alert.clone(),
        })
        .collect()
}

/// Applies one payload to one alert; also used to mirror an acknowledged
/// write into the local snapshot.
pub fn apply_payload(mut alert: NormalizedAlert, meta: &MetadataPayload) -> NormalizedAlert {
    if let Some(classification) = &meta.classification {
        alert.classification = classification.clone();
    }
    if let Some(status) = meta.status {
        alert.status = status;
    }
    if let Some(tags) = &meta.tags {
        alert.tags = tags.iter().cloned().collect();
    }
    if let Some(level) = meta.triage_level {
        alert.triage_level = level;
    }
    if let Some(notes) = &meta.notes {
        alert.notes = notes.clone();
    }
    if let Some(severity) = meta.severity {
        alert.severity = severity;
    }
    alert.archived = meta.archived;
    alert.archive_reason = meta.archive_reason.clone();
    alert
}
