pub mod alerts;
pub mod config;
pub mod consolidate;
pub mod dashboard;
pub mod error;
pub mod feeds;
pub mod filter;
pub mod health;
pub mod identity;
pub mod metadata_store;
pub mod normalize;
pub mod overlay;
pub mod pipeline;
pub mod runtime;
pub mod writeback;

pub use alerts::{NormalizedAlert, RawSensorEvent, Severity, SourceTag};
pub use consolidate::{consolidate, AlertCluster, AlertView};
pub use error::{StoreError, TriageError};
pub use filter::{filter_alerts, AlertFilter};
pub use identity::assign_identity;
pub use normalize::normalize;
pub use overlay::merge_metadata;
pub use writeback::{archive_alert, write_metadata, WriteTarget};
