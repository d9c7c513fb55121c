use crate::alerts::NormalizedAlert;
use crate::consolidate::{AlertView, ConsolidationConfig, ConsolidationMode};
use crate::error::TriageError;
use crate::feeds::SensorFeed;
use crate::filter::AlertFilter;
use crate::metadata_store::{MetadataPayload, MetadataStore};
use crate::overlay::apply_payload;
use crate::pipeline::{run_cycle, CycleOptions, Snapshot};
use crate::writeback::{archive_alert, current_metadata, write_metadata, WriteReceipt, WriteTarget};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Published { alerts: usize, notices: Vec<String> },
    /// Another refresh was already running.
    Skipped,
}

/// Owns the published snapshot and serializes refreshes and analyst writes
/// against it. Cheap to share behind an `Arc`.
pub struct Dashboard {
    feed: Arc<dyn SensorFeed>,
    store: Arc<dyn MetadataStore>,
    options: CycleOptions,
    consolidation: ConsolidationConfig,
    board: RwLock<Board>,
    refreshing: AtomicBool,
}

struct Board {
    snapshot: Arc<Snapshot>,
    /// Number of writes mirrored so far.
    acknowledged: u64,
    /// Writes mirrored while a refresh was running, with their sequence
    /// number. The refresh may have read the store before they landed.
    in_flight: Vec<(u64, WriteReceipt)>,
}

struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Dashboard {
    pub fn new(
        feed: Arc<dyn SensorFeed>,
        store: Arc<dyn MetadataStore>,
        options: CycleOptions,
        consolidation: ConsolidationConfig,
    ) -> Self {
        Self {
            feed,
            store,
            options,
            consolidation,
            board: RwLock::new(Board {
                snapshot: Arc::new(Snapshot::empty()),
                acknowledged: 0,
                in_flight: Vec::new(),
            }),
            refreshing: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn consolidation(&self) -> ConsolidationConfig {
        self.consolidation
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.read_board().snapshot.clone()
    }

    /// Single-flight: while one refresh runs, further calls return
    /// [`RefreshOutcome::Skipped`]. On error the previous snapshot stays.
    ///
    /// Writes acknowledged after the cycle started are replayed onto the new
    /// snapshot before it is published.
    pub fn refresh(&self) -> Result<RefreshOutcome, TriageError> {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("refresh already in flight, skipping");
            return Ok(RefreshOutcome::Skipped);
        }
        let _guard = RefreshGuard(&self.refreshing);
        let started = self.read_board().acknowledged;

        let cycle = run_cycle(self.feed.as_ref(), self.store.as_ref(), self.options);

        let mut board = self.write_board();
        let in_flight = std::mem::take(&mut board.in_flight);
        let mut next = cycle?;

        let late: Vec<&WriteReceipt> = in_flight
            .iter()
            .filter(|(seq, _)| *seq >= started)
            .map(|(_, receipt)| receipt)
            .collect();
        if !late.is_empty() {
            tracing::debug!(writes = late.len(), "replaying writes acknowledged during refresh");
            let alerts = late
                .into_iter()
                .fold(next.alerts.clone(), |alerts, receipt| mirror(&alerts, receipt));
            next = next.with_alerts(alerts);
        }

        let outcome = RefreshOutcome::Published {
            alerts: next.alerts.len(),
            notices: next.notices.clone(),
        };
        board.snapshot = Arc::new(next);
        Ok(outcome)
    }

    /// `mode` overrides the configured consolidation mode for this view only.
    pub fn view(&self, filter: &AlertFilter, mode: Option<ConsolidationMode>) -> AlertView {
        let consolidation = ConsolidationConfig {
            mode: mode.unwrap_or(self.consolidation.mode),
            ..self.consolidation
        };
        self.snapshot().view(filter, &consolidation)
    }

    /// Persists the edit layered over the metadata currently shown for the
    /// target, then mirrors exactly what was stored into the snapshot.
    pub fn edit(
        &self,
        target: &WriteTarget,
        payload: MetadataPayload,
    ) -> Result<WriteReceipt, TriageError> {
        let base = self.displayed_metadata(target);
        let receipt = write_metadata(self.store.as_ref(), target, payload.layered_over(&base))?;
        self.apply_locally(&receipt);
        Ok(receipt)
    }

    /// Archives with the metadata currently shown for the target. For a
    /// cluster that is the metadata of its most recent member, written to
    /// every member.
    pub fn archive(&self, target: &WriteTarget, reason: &str) -> Result<WriteReceipt, TriageError> {
        let current = self.displayed_metadata(target);
        let receipt = archive_alert(self.store.as_ref(), target, &current, reason)?;
        self.apply_locally(&receipt);
        Ok(receipt)
    }

    fn displayed_metadata(&self, target: &WriteTarget) -> MetadataPayload {
        let anchor = match target {
            WriteTarget::Alert(id) => Some(id),
            WriteTarget::Cluster(ids) => ids.last(),
        };
        let snapshot = self.snapshot();
        anchor
            .and_then(|id| snapshot.alert(id))
            .map(current_metadata)
            .unwrap_or_default()
    }

    fn apply_locally(&self, receipt: &WriteReceipt) {
        let mut board = self.write_board();
        let alerts = mirror(&board.snapshot.alerts, receipt);
        board.snapshot = Arc::new(board.snapshot.with_alerts(alerts));

        let seq = board.acknowledged;
        board.acknowledged += 1;
        if self.refreshing.load(Ordering::Acquire) {
            board.in_flight.push((seq, receipt.clone()));
        }
    }

    fn read_board(&self) -> RwLockReadGuard<'_, Board> {
        self.board.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_board(&self) -> RwLockWriteGuard<'_, Board> {
        self.board.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn mirror(alerts: &[NormalizedAlert], receipt: &WriteReceipt) -> Vec<NormalizedAlert> {
    let ids: HashSet<&str> = receipt.alert_ids.iter().map(String::as_str).collect();
    alerts
        .iter()
        .map(|alert| {
            if ids.contains(alert.identity.as_str()) {
                apply_payload(alert.clone(), &receipt.payload)
            } else {
                alert.clone()
            }
        })
        .collect()
}
