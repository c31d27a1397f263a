//! Brand reconciliation engine.
//!
//! Leaves first: [`paginator`] and [`fetcher`] read from the marketplace,
//! [`reconcile`] decides, [`updater`] writes, [`orchestrator`] wires the two
//! directional flows together.

use std::time::Duration;
use thiserror::Error;

pub mod fetcher;
pub mod orchestrator;
pub mod paginator;
pub mod reconcile;
pub mod updater;

#[cfg(test)]
pub(crate) mod testing;

pub use fetcher::{CardFetcher, FetchReport, RootTarget};
pub use orchestrator::{resolve_mode, Orchestrator, RunReport};
pub use paginator::Paginator;
pub use reconcile::{reconcile, restore_original, Reconciliation};
pub use updater::{BatchUpdater, UpdateReport};

/// Only authorization failures and store failures abort a run; everything
/// else is absorbed into the run report.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("authorization failed for {account}; run aborted")]
    Unauthorized { account: String },
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub page_pause: Duration,
    pub card_pause: Duration,
    pub batch_pause: Duration,
    pub batch_limit: usize,
    pub card_page_size: u32,
    pub update_fields: Vec<String>,
    pub repair_cooldown: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_pause: Duration::from_millis(400),
            card_pause: Duration::from_secs(1),
            batch_pause: Duration::from_secs(6),
            batch_limit: 3000,
            card_page_size: 100,
            update_fields: [
                "nmID",
                "vendorCode",
                "brand",
                "title",
                "description",
                "dimensions",
                "characteristics",
                "sizes",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            repair_cooldown: Duration::from_secs(600),
        }
    }
}
