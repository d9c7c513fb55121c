use crate::alerts::{NormalizedAlert, RawSensorEvent, SourceTag};
use crate::consolidate::{consolidate, AlertView, ConsolidationConfig};
use crate::error::TriageError;
use crate::feeds::SensorFeed;
use crate::filter::{distinct_labels, filter_alerts, severity_summary, AlertFilter, SeverityCounts};
use crate::identity::IdentityScheme;
use crate::metadata_store::MetadataStore;
use crate::normalize::normalize;
use crate::overlay::merge_metadata;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_FETCH_LIMIT: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CycleOptions {
    pub fetch_limit: usize,
    pub scheme: IdentityScheme,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            fetch_limit: DEFAULT_FETCH_LIMIT,
            scheme: IdentityScheme::default(),
        }
    }
}

/// Immutable result of one poll cycle. Views are derived from it on demand.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Snapshot {
    pub generated_at: DateTime<Utc>,
    /// Normalized alerts with metadata applied, archived ones included.
    pub alerts: Vec<NormalizedAlert>,
    pub labels: Vec<String>,
    pub summary: BTreeMap<SourceTag, SeverityCounts>,
    /// Transient, non-fatal problems of this cycle.
    pub notices: Vec<String>,
    pub rejected: usize,
    pub collisions: usize,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::from_alerts(Vec::new(), Vec::new())
    }

    fn from_alerts(alerts: Vec<NormalizedAlert>, notices: Vec<String>) -> Self {
        Self {
            generated_at: Utc::now(),
            labels: distinct_labels(&alerts),
            summary: severity_summary(&alerts),
            alerts,
            notices,
            rejected: 0,
            collisions: 0,
        }
    }

    /// Filter, then consolidate.
    pub fn view(&self, filter: &AlertFilter, consolidation: &ConsolidationConfig) -> AlertView {
        consolidate(&filter_alerts(&self.alerts, filter), consolidation)
    }

    pub fn alert(&self, alert_id: &str) -> Option<&NormalizedAlert> {
        self.alerts.iter().find(|a| a.identity == alert_id)
    }

    /// Copy with `alerts` replaced and the derived fields recomputed.
    pub fn with_alerts(&self, alerts: Vec<NormalizedAlert>) -> Self {
        Self {
            rejected: self.rejected,
            collisions: self.collisions,
            ..Self::from_alerts(alerts, self.notices.clone())
        }
    }
}

/// One fetch → normalize → overlay pass.
///
/// A sensor that cannot be read contributes an empty batch and a notice. A
/// store that cannot be read fails the whole cycle so that the caller keeps
/// its previous snapshot.
pub fn run_cycle(
    feed: &dyn SensorFeed,
    store: &dyn MetadataStore,
    options: CycleOptions,
) -> Result<Snapshot, TriageError> {
    let mut notices = Vec::new();
    let mut events = Vec::new();

    match feed.fetch_signature_events(options.fetch_limit) {
        Ok(batch) => events.extend(batch.into_iter().map(RawSensorEvent::Signature)),
        Err(err) => {
            tracing::warn!(error = %err, "suricata feed unavailable");
            notices.push(format!("suricata: {err}"));
        }
    }
    match feed.fetch_connection_events(options.fetch_limit) {
        Ok(batch) => events.extend(batch.into_iter().map(RawSensorEvent::Connection)),
        Err(err) => {
            tracing::warn!(error = %err, "zeek feed unavailable");
            notices.push(format!("zeek: {err}"));
        }
    }

    let batch = normalize(&events, options.scheme);
    let records = store.read_all().map_err(|err| {
        tracing::warn!(error = %err, "metadata store unavailable, keeping previous snapshot");
        TriageError::Fetch(err.to_string())
    })?;
    let merged = merge_metadata(&batch.alerts, &records);

    let damaged = records.iter().filter(|r| !r.unreadable.is_empty()).count();
    if damaged > 0 {
        notices.push(format!("{damaged} metadata records have unreadable fields"));
    }

    if batch.rejected > 0 {
        notices.push(format!("{} events with unreadable timestamps dropped", batch.rejected));
    }
    if batch.collisions > 0 {
        notices.push(format!("{} identity collisions in this batch", batch.collisions));
    }

    let mut snapshot = Snapshot::from_alerts(merged, notices);
    snapshot.rejected = batch.rejected;
    snapshot.collisions = batch.collisions;

    tracing::info!(
        events = events.len(),
        alerts = snapshot.alerts.len(),
        metadata = records.len(),
        notices = snapshot.notices.len(),
        "poll cycle complete"
    );
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertStatus;
    use crate::error::StoreError;
    use crate::feeds::BufferedFeed;
    use crate::metadata_store::{InMemoryMetadataStore, MetadataPayload, MetadataRecord};
    use sensor_registry::{ConnectionEventV1, SignatureEventV1};

    struct DownFeed;

    impl SensorFeed for DownFeed {
        fn fetch_signature_events(&self, _limit: usize) -> Result<Vec<SignatureEventV1>, TriageError> {
            Err(TriageError::Fetch("connection refused".into()))
        }

        fn fetch_connection_events(&self, _limit: usize) -> Result<Vec<ConnectionEventV1>, TriageError> {
            Ok(vec![ConnectionEventV1 {
                timestamp: "1714554000".into(),
                service: Some("dns".into()),
                proto: Some("udp".into()),
                origin_ip: Some("192.168.1.20".into()),
                origin_port: Some(53000),
                responder_ip: Some("8.8.8.8".into()),
                responder_port: Some(53),
                uid: None,
                event_type: None,
            }])
        }
    }

    struct DownStore;

    impl MetadataStore for DownStore {
        fn read_all(&self) -> Result<Vec<MetadataRecord>, StoreError> {
            Err(StoreError::Unavailable("database is locked".into()))
        }

        fn read_one(&self, _alert_id: &str) -> Result<Option<MetadataRecord>, StoreError> {
            Err(StoreError::Unavailable("database is locked".into()))
        }

        fn write_one(&self, _alert_id: &str, _payload: &MetadataPayload) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("database is locked".into()))
        }

        fn write_bulk(&self, _ids: &[String], _payload: &MetadataPayload) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("database is locked".into()))
        }
    }

    #[test]
    fn failing_sensor_yields_notice_and_keeps_the_other() {
        let snapshot =
            run_cycle(&DownFeed, &InMemoryMetadataStore::new(), CycleOptions::default()).expect("cycle");
        assert_eq!(snapshot.alerts.len(), 1);
        assert_eq!(snapshot.alerts[0].source, SourceTag::Zeek);
        assert_eq!(snapshot.notices.len(), 1);
        assert!(snapshot.notices[0].starts_with("suricata:"));
    }

    #[test]
    fn unreadable_store_fails_the_cycle() {
        let err = run_cycle(&BufferedFeed::default(), &DownStore, CycleOptions::default())
            .expect_err("must fail");
        assert!(err.is_transient());
    }

    /// Serves one healthy and one partly unreadable record.
    struct DamagedStore;

    impl MetadataStore for DamagedStore {
        fn read_all(&self) -> Result<Vec<MetadataRecord>, StoreError> {
            let record = |alert_id: &str, unreadable: Vec<String>| MetadataRecord {
                alert_id: alert_id.into(),
                payload: MetadataPayload {
                    classification: Some("Reconnaissance".into()),
                    ..MetadataPayload::default()
                },
                created_at: "now".into(),
                updated_at: "now".into(),
                unreadable,
            };
            Ok(vec![
                record("zeek-a", Vec::new()),
                record("legacy", vec!["tags".into()]),
            ])
        }

        fn read_one(&self, _alert_id: &str) -> Result<Option<MetadataRecord>, StoreError> {
            Ok(None)
        }

        fn write_one(&self, _alert_id: &str, _payload: &MetadataPayload) -> Result<(), StoreError> {
            Ok(())
        }

        fn write_bulk(&self, ids: &[String], _payload: &MetadataPayload) -> Result<usize, StoreError> {
            Ok(ids.len())
        }
    }

    #[test]
    fn damaged_metadata_is_a_notice_not_a_failure() {
        let snapshot = run_cycle(&DownFeed, &DamagedStore, CycleOptions::default()).expect("cycle");
        assert_eq!(snapshot.alerts.len(), 1);
        assert!(snapshot
            .notices
            .iter()
            .any(|n| n == "1 metadata records have unreadable fields"));
    }

    #[test]
    fn metadata_is_overlaid_by_identity() {
        let feed = BufferedFeed::default();
        feed.push_signature(SignatureEventV1 {
            timestamp: "2024-05-01T09:00:00Z".into(),
            severity: Some(1),
            signature: Some("Port Scan Detected".into()),
            src_ip: Some("10.0.0.5".into()),
            src_port: Some(51515),
            dest_ip: Some("10.0.0.9".into()),
            dest_port: Some(22),
            protocol: Some("TCP".into()),
            raw: None,
        })
        .expect("push");
        let store = InMemoryMetadataStore::new();
        store
            .write_one(
                "suricata-bx5y1d",
                &MetadataPayload {
                    status: Some(AlertStatus::Resolved),
                    ..MetadataPayload::default()
                },
            )
            .expect("seed");

        let snapshot = run_cycle(&feed, &store, CycleOptions::default()).expect("cycle");
        assert_eq!(snapshot.alert("suricata-bx5y1d").map(|a| a.status), Some(AlertStatus::Resolved));
        assert_eq!(snapshot.labels, vec!["Port Scan Detected"]);
        assert_eq!(snapshot.summary[&SourceTag::Suricata].high, 1);
    }
}
