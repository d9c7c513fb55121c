use thiserror::Error;

/// Failure of the metadata store contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("metadata store unavailable: {0}")]
    Unavailable(String),

    #[error("metadata write failed: {0}")]
    Write(String),

    /// Only some ids of a bulk write were stored.
    #[error("bulk write stored {saved} of {attempted} records")]
    PartialWrite {
        saved: usize,
        attempted: usize,
        failures: Vec<(String, String)>,
    },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        let unavailable = matches!(
            &err,
            rusqlite::Error::SqliteFailure(failure, _)
                if matches!(
                    failure.code,
                    rusqlite::ErrorCode::CannotOpen
                        | rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                )
        );
        if unavailable {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Write(err.to_string())
        }
    }
}

/// Errors surfaced to the caller of a pipeline run or an analyst action.
/// None of them is fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriageError {
    /// A sensor or the store could not be read; retried on the next tick.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Rejected before any store call.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A write was not acknowledged; nothing was applied locally.
    #[error(transparent)]
    Persistence(#[from] StoreError),
}

impl TriageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TriageError::Fetch(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_write_message_reports_counts() {
        let err = StoreError::PartialWrite {
            saved: 2,
            attempted: 3,
            failures: vec![("suricata-x".into(), "locked".into())],
        };
        assert_eq!(err.to_string(), "bulk write stored 2 of 3 records");
    }

    #[test]
    fn store_errors_become_persistence_errors() {
        let err: TriageError = StoreError::Write("disk full".into()).into();
        assert!(matches!(err, TriageError::Persistence(_)));
        assert!(!err.is_transient());
        assert!(TriageError::Fetch("sensor down".into()).is_transient());
    }
}
