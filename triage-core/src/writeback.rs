use crate::alerts::NormalizedAlert;
use crate::consolidate::AlertCluster;
use crate::error::{StoreError, TriageError};
use crate::metadata_store::{MetadataPayload, MetadataStore};
use serde::{Deserialize, Serialize};

/// What an analyst edit applies to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ids", rename_all = "snake_case")]
pub enum WriteTarget {
    Alert(String),
    /// Every member identity of a cluster, never more.
    Cluster(Vec<String>),
}

impl WriteTarget {
    pub fn alert_ids(&self) -> Vec<String> {
        match self {
            WriteTarget::Alert(id) => vec![id.clone()],
            WriteTarget::Cluster(ids) => ids.clone(),
        }
    }
}

impl From<&AlertCluster> for WriteTarget {
    fn from(cluster: &AlertCluster) -> Self {
        WriteTarget::Cluster(cluster.member_ids.clone())
    }
}

/// Acknowledged write. Only after receiving one may the caller mirror the
/// payload into its local state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReceipt {
    pub alert_ids: Vec<String>,
    pub payload: MetadataPayload,
}

/// Metadata as currently displayed for an alert, used as the base of edits
/// and archives so that only the fields they set change.
pub fn current_metadata(alert: &NormalizedAlert) -> MetadataPayload {
    MetadataPayload {
        classification: Some(alert.classification.clone()),
        status: Some(alert.status),
        tags: Some(alert.tags.iter().cloned().collect()),
        triage_level: Some(alert.triage_level),
        notes: Some(alert.notes.clone()),
        severity: Some(alert.severity),
        archived: alert.archived,
        archive_reason: alert.archive_reason.clone(),
        updated_by: None,
    }
}

/// Persists `payload` for the target: one upsert for an alert, one bulk
/// upsert with the identical payload for a cluster. No retry.
pub fn write_metadata(
    store: &dyn MetadataStore,
    target: &WriteTarget,
    payload: MetadataPayload,
) -> Result<WriteReceipt, TriageError> {
    validate_target(target)?;
    if payload.archived && blank(payload.archive_reason.as_deref()) {
        return Err(TriageError::Validation(
            "archiving requires a non-empty reason".into(),
        ));
    }

    match target {
        WriteTarget::Alert(alert_id) => {
            store.write_one(alert_id, &payload)?;
            tracing::info!(alert_id = %alert_id, "saved alert metadata");
        }
        WriteTarget::Cluster(alert_ids) => {
            let saved = store.write_bulk(alert_ids, &payload)?;
            if saved != alert_ids.len() {
                return Err(StoreError::PartialWrite {
                    saved,
                    attempted: alert_ids.len(),
                    failures: Vec::new(),
                }
                .into());
            }
            tracing::info!(members = saved, "saved cluster metadata");
        }
    }

    Ok(WriteReceipt {
        alert_ids: target.alert_ids(),
        payload,
    })
}

/// Archives the target with an analyst-supplied reason. Every other field
/// of `current` is written back unchanged, status included.
pub fn archive_alert(
    store: &dyn MetadataStore,
    target: &WriteTarget,
    current: &MetadataPayload,
    reason: &str,
) -> Result<WriteReceipt, TriageError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(TriageError::Validation(
            "archiving requires a non-empty reason".into(),
        ));
    }

    let payload = MetadataPayload {
        archived: true,
        archive_reason: Some(reason.to_string()),
        ..current.clone()
    };
    write_metadata(store, target, payload)
}

fn validate_target(target: &WriteTarget) -> Result<(), TriageError> {
    match target {
        WriteTarget::Alert(id) if blank(Some(id.as_str())) => {
            Err(TriageError::Validation("alert id must not be empty".into()))
        }
        WriteTarget::Cluster(ids) if ids.is_empty() => {
            Err(TriageError::Validation("cluster has no member ids".into()))
        }
        WriteTarget::Cluster(ids) if ids.iter().any(|id| blank(Some(id.as_str()))) => Err(
            TriageError::Validation("cluster member ids must not be empty".into()),
        ),
        _ => Ok(()),
    }
}

fn blank(value: Option<&str>) -> bool {
    value.map(str::trim).unwrap_or_default().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertStatus, TriageLevel};
    use crate::metadata_store::{InMemoryMetadataStore, MetadataRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls; single writes fail and bulk writes come up one short.
    #[derive(Default)]
    struct FailingStore {
        calls: AtomicUsize,
    }

    impl MetadataStore for FailingStore {
        fn read_all(&self) -> Result<Vec<MetadataRecord>, StoreError> {
            Ok(Vec::new())
        }

        fn read_one(&self, _alert_id: &str) -> Result<Option<MetadataRecord>, StoreError> {
            Ok(None)
        }

        fn write_one(&self, _alert_id: &str, _payload: &MetadataPayload) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("connection refused".into()))
        }

        fn write_bulk(
            &self,
            alert_ids: &[String],
            _payload: &MetadataPayload,
        ) -> Result<usize, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(alert_ids.len().saturating_sub(1))
        }
    }

    fn edit() -> MetadataPayload {
        MetadataPayload {
            classification: Some("Reconnaissance".into()),
            status: Some(AlertStatus::InProgress),
            triage_level: Some(TriageLevel::High),
            ..MetadataPayload::default()
        }
    }

    #[test]
    fn cluster_edit_writes_identical_payload_to_every_member() {
        let store = InMemoryMetadataStore::new();
        let target = WriteTarget::Cluster(vec!["a".into(), "b".into(), "c".into()]);
        let receipt = write_metadata(&store, &target, edit()).expect("write");
        assert_eq!(receipt.alert_ids, vec!["a", "b", "c"]);

        let all = store.read_all().expect("read");
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|r| r.payload == edit()));
    }

    #[test]
    fn single_edit_touches_only_that_alert() {
        let store = InMemoryMetadataStore::new();
        write_metadata(&store, &WriteTarget::Alert("a".into()), edit()).expect("write");
        assert_eq!(store.read_all().expect("read").len(), 1);
    }

    #[test]
    fn blank_reason_is_rejected_before_the_store() {
        let store = FailingStore::default();
        let err = archive_alert(&store, &WriteTarget::Alert("a".into()), &edit(), "   ")
            .expect_err("must fail");
        assert!(matches!(err, TriageError::Validation(_)));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_cluster_is_a_validation_error() {
        let store = FailingStore::default();
        let err = write_metadata(&store, &WriteTarget::Cluster(Vec::new()), edit())
            .expect_err("must fail");
        assert!(matches!(err, TriageError::Validation(_)));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn archive_keeps_current_metadata_and_status() {
        let store = InMemoryMetadataStore::new();
        let receipt = archive_alert(
            &store,
            &WriteTarget::Alert("a".into()),
            &edit(),
            "  known scanner ",
        )
        .expect("archive");

        assert!(receipt.payload.archived);
        assert_eq!(receipt.payload.archive_reason.as_deref(), Some("known scanner"));
        assert_eq!(receipt.payload.status, Some(AlertStatus::InProgress));
        assert_eq!(receipt.payload.classification.as_deref(), Some("Reconnaissance"));
    }

    #[test]
    fn store_failures_surface_as_persistence_errors() {
        let store = FailingStore::default();
        let err = write_metadata(&store, &WriteTarget::Alert("a".into()), edit())
            .expect_err("must fail");
        assert!(matches!(
            err,
            TriageError::Persistence(StoreError::Unavailable(_))
        ));
    }

    #[test]
    fn short_bulk_count_is_a_partial_write() {
        let store = FailingStore::default();
        let target = WriteTarget::Cluster(vec!["a".into(), "b".into()]);
        let err = write_metadata(&store, &target, edit()).expect_err("must fail");
        assert!(matches!(
            err,
            TriageError::Persistence(StoreError::PartialWrite { saved: 1, attempted: 2, .. })
        ));
    }
}
