//! mien-store — Persistence for the face ingestion service.
//!
//! SQLite-backed identity gallery and recognition history, the on-disk
//! media layout that mirrors them, and the maintenance passes that keep
//! the two in sync: per-identity sample quotas, the capped history
//! ledger, and the startup reconciliation sweep.

mod fsops;

pub mod history;
pub mod layout;
pub mod quota;
pub mod settings;
pub mod store;
pub mod sweep;

pub use history::{CleanupReport, NewRecord};
pub use layout::Layout;
pub use settings::Tunables;
pub use store::{HistoryRecord, Identity, Store, StoreError, TrainingSample};
