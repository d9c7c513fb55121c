use crate::alerts::{AlertStatus, Severity, TriageLevel};
use crate::error::StoreError;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Analyst annotations for one alert identity. `None` means "not set"; the
/// overlay falls back to the sensor default for those fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPayload {
    #[serde(default)]
    pub classification: Option<String>,
    #[serde(default)]
    pub status: Option<AlertStatus>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default, alias = "triageLevel")]
    pub triage_level: Option<TriageLevel>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default, alias = "archiveReason")]
    pub archive_reason: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

impl MetadataPayload {
    /// This edit on top of `base`: fields set here win, unset ones are taken
    /// from `base`. The archive flag is never inherited, and the archive
    /// reason only while the result stays archived.
    pub fn layered_over(self, base: &MetadataPayload) -> MetadataPayload {
        let archive_reason = if self.archived {
            self.archive_reason.or_else(|| base.archive_reason.clone())
        } else {
            self.archive_reason
        };
        MetadataPayload {
            classification: self.classification.or_else(|| base.classification.clone()),
            status: self.status.or(base.status),
            tags: self.tags.or_else(|| base.tags.clone()),
            triage_level: self.triage_level.or(base.triage_level),
            notes: self.notes.or_else(|| base.notes.clone()),
            severity: self.severity.or(base.severity),
            archived: self.archived,
            archive_reason,
            updated_by: self.updated_by,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub alert_id: String,
    #[serde(flatten)]
    pub payload: MetadataPayload,
    pub created_at: String,
    pub updated_at: String,
    /// Stored columns that could not be decoded and were read as unset.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unreadable: Vec<String>,
}

/// Read/write contract of the persistent annotation store.
///
/// `write_bulk` must store every id or none of them. Implementations that
/// cannot promise that return [`StoreError::PartialWrite`].
pub trait MetadataStore: Send + Sync {
    fn read_all(&self) -> Result<Vec<MetadataRecord>, StoreError>;
    fn read_one(&self, alert_id: &str) -> Result<Option<MetadataRecord>, StoreError>;
    fn write_one(&self, alert_id: &str, payload: &MetadataPayload) -> Result<(), StoreError>;
    /// Upserts the same payload under every id; returns the number stored.
    fn write_bulk(&self, alert_ids: &[String], payload: &MetadataPayload)
        -> Result<usize, StoreError>;

    /// Cheap reachability check for health reporting.
    fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

const UPSERT_SQL: &str = "
    INSERT INTO alert_metadata (
        alert_id, classification, status, tags, triage_level, notes, severity,
        archived, archive_reason, updated_by, created_at, updated_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
    ON CONFLICT(alert_id) DO UPDATE SET
        classification = excluded.classification,
        status = excluded.status,
        tags = excluded.tags,
        triage_level = excluded.triage_level,
        notes = excluded.notes,
        severity = excluded.severity,
        archived = excluded.archived,
        archive_reason = excluded.archive_reason,
        updated_by = excluded.updated_by,
        updated_at = excluded.updated_at";

const SELECT_COLUMNS: &str = "
    SELECT alert_id, classification, status, tags, triage_level, notes, severity,
           archived, archive_reason, updated_by, created_at, updated_at
    FROM alert_metadata";

#[derive(Clone)]
pub struct SqliteMetadataStore {
    db_path: Arc<PathBuf>,
}

impl SqliteMetadataStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let db_path = PathBuf::from(path);
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            }
        }

        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            CREATE TABLE IF NOT EXISTS alert_metadata (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                alert_id TEXT NOT NULL UNIQUE,
                classification TEXT,
                status TEXT,
                tags TEXT,
                triage_level TEXT,
                notes TEXT,
                severity INTEGER,
                archived INTEGER NOT NULL DEFAULT 0,
                archive_reason TEXT,
                updated_by TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_alert_metadata_updated ON alert_metadata(updated_at);
            ",
        )?;

        tracing::info!(path = %db_path.display(), "opened alert metadata store");
        Ok(Self {
            db_path: Arc::new(db_path),
        })
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        Connection::open(&*self.db_path).map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

impl MetadataStore for SqliteMetadataStore {
    fn read_all(&self) -> Result<Vec<MetadataRecord>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} ORDER BY updated_at DESC, alert_id ASC"
        ))?;
        let rows = stmt.query_map([], map_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.decode());
        }
        Ok(records)
    }

    fn read_one(&self, alert_id: &str) -> Result<Option<MetadataRecord>, StoreError> {
        let conn = self.connect()?;
        conn.query_row(
            &format!("{SELECT_COLUMNS} WHERE alert_id = ?1"),
            params![alert_id],
            map_row,
        )
        .optional()
        .map(|row| row.map(StoredRow::decode))
        .map_err(StoreError::from)
    }

    fn write_one(&self, alert_id: &str, payload: &MetadataPayload) -> Result<(), StoreError> {
        let conn = self.connect()?;
        let row = EncodedPayload::new(payload)?;
        let mut stmt = conn.prepare(UPSERT_SQL)?;
        row.upsert(&mut stmt, alert_id)?;
        Ok(())
    }

    fn write_bulk(
        &self,
        alert_ids: &[String],
        payload: &MetadataPayload,
    ) -> Result<usize, StoreError> {
        let mut conn = self.connect()?;
        let row = EncodedPayload::new(payload)?;

        // Dropping the transaction on error rolls every id back.
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(UPSERT_SQL)?;
            for alert_id in alert_ids {
                row.upsert(&mut stmt, alert_id)?;
            }
        }
        tx.commit()?;
        Ok(alert_ids.len())
    }

    fn ping(&self) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.query_row("SELECT COUNT(*) FROM alert_metadata", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

/// Payload columns encoded once and reused for every id of a bulk write.
struct EncodedPayload<'a> {
    payload: &'a MetadataPayload,
    status: Option<&'static str>,
    tags: Option<String>,
    triage_level: Option<&'static str>,
    severity: Option<i64>,
    now: String,
}

impl<'a> EncodedPayload<'a> {
    fn new(payload: &'a MetadataPayload) -> Result<Self, StoreError> {
        let tags = payload
            .tags
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(Self {
            payload,
            status: payload.status.map(AlertStatus::as_str),
            tags,
            triage_level: payload.triage_level.map(TriageLevel::as_str),
            severity: payload.severity.map(|s| i64::from(s.ordinal())),
            now: chrono::Utc::now().to_rfc3339(),
        })
    }

    fn upsert(&self, stmt: &mut rusqlite::Statement<'_>, alert_id: &str) -> rusqlite::Result<usize> {
        stmt.execute(params![
            alert_id,
            self.payload.classification,
            self.status,
            self.tags,
            self.triage_level,
            self.payload.notes,
            self.severity,
            self.payload.archived,
            self.payload.archive_reason,
            self.payload.updated_by,
            self.now,
        ])
    }
}

/// Columns as stored, before the enum and JSON fields are decoded.
struct StoredRow {
    alert_id: String,
    classification: Option<String>,
    status: Option<String>,
    tags: Option<String>,
    triage_level: Option<String>,
    notes: Option<String>,
    severity: Option<i64>,
    archived: bool,
    archive_reason: Option<String>,
    updated_by: Option<String>,
    created_at: String,
    updated_at: String,
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredRow> {
    Ok(StoredRow {
        alert_id: row.get(0)?,
        classification: row.get(1)?,
        status: row.get(2)?,
        tags: row.get(3)?,
        triage_level: row.get(4)?,
        notes: row.get(5)?,
        severity: row.get(6)?,
        archived: row.get(7)?,
        archive_reason: row.get(8)?,
        updated_by: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

impl StoredRow {
    /// Columns that fail to decode are read as unset and listed in
    /// `unreadable`, so one damaged row never hides the others.
    fn decode(self) -> MetadataRecord {
        let alert_id = self.alert_id;
        let mut unreadable = Vec::new();

        let status = column(
            &alert_id,
            "status",
            self.status.map(|s| s.parse::<AlertStatus>()).transpose(),
            &mut unreadable,
        );
        let tags = column(
            &alert_id,
            "tags",
            self.tags
                .map(|s| serde_json::from_str::<Vec<String>>(&s))
                .transpose()
                .map_err(|e| e.to_string()),
            &mut unreadable,
        );
        let triage_level = column(
            &alert_id,
            "triage_level",
            self.triage_level.map(|s| s.parse::<TriageLevel>()).transpose(),
            &mut unreadable,
        );
        let severity = column(
            &alert_id,
            "severity",
            self.severity
                .map(|v| {
                    u8::try_from(v)
                        .ok()
                        .and_then(Severity::from_ordinal)
                        .ok_or_else(|| format!("invalid severity {v}"))
                })
                .transpose(),
            &mut unreadable,
        );

        MetadataRecord {
            payload: MetadataPayload {
                classification: self.classification,
                status,
                tags,
                triage_level,
                notes: self.notes,
                severity,
                archived: self.archived,
                archive_reason: self.archive_reason,
                updated_by: self.updated_by,
            },
            alert_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            unreadable,
        }
    }
}

fn column<T>(
    alert_id: &str,
    name: &str,
    decoded: Result<Option<T>, String>,
    unreadable: &mut Vec<String>,
) -> Option<T> {
    match decoded {
        Ok(value) => value,
        Err(reason) => {
            tracing::warn!(alert_id = %alert_id, column = name, %reason, "unreadable metadata column");
            unreadable.push(name.to_string());
            None
        }
    }
}

/// Process-local store, used when no database path is configured and in tests.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    records: Mutex<BTreeMap<String, MetadataRecord>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert(
        records: &mut BTreeMap<String, MetadataRecord>,
        alert_id: &str,
        payload: &MetadataPayload,
        now: &str,
    ) {
        let created_at = records
            .get(alert_id)
            .map(|r| r.created_at.clone())
            .unwrap_or_else(|| now.to_string());
        records.insert(
            alert_id.to_string(),
            MetadataRecord {
                alert_id: alert_id.to_string(),
                payload: payload.clone(),
                created_at,
                updated_at: now.to_string(),
                unreadable: Vec::new(),
            },
        );
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn read_all(&self) -> Result<Vec<MetadataRecord>, StoreError> {
        let records = self
            .records
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(records.values().cloned().collect())
    }

    fn read_one(&self, alert_id: &str) -> Result<Option<MetadataRecord>, StoreError> {
        let records = self
            .records
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(records.get(alert_id).cloned())
    }

    fn write_one(&self, alert_id: &str, payload: &MetadataPayload) -> Result<(), StoreError> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::upsert(&mut records, alert_id, payload, &chrono::Utc::now().to_rfc3339());
        Ok(())
    }

    fn write_bulk(
        &self,
        alert_ids: &[String],
        payload: &MetadataPayload,
    ) -> Result<usize, StoreError> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let now = chrono::Utc::now().to_rfc3339();
        for alert_id in alert_ids {
            Self::upsert(&mut records, alert_id, payload, &now);
        }
        Ok(alert_ids.len())
    }

    fn ping(&self) -> Result<(), StoreError> {
        self.records
            .lock()
            .map(|_| ())
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}
