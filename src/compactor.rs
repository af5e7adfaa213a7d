use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::observability::WAL_COMPACTIONS_TOTAL;
use crate::store::WalReservationStore;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that compacts the reservation log once enough appends
/// have piled up since the last compaction.
pub async fn run_compactor(store: Arc<WalReservationStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}

/// One compactor pass. Returns the number of records kept, if it compacted.
pub async fn compact_if_due(store: &WalReservationStore, threshold: u64) -> Option<usize> {
    let appends = store.wal_appends_since_compact().await;
    if appends < threshold {
        return None;
    }
    match store.compact_wal().await {
        Ok(kept) => {
            info!("compacted reservation log: {appends} appends down to {kept} records");
            metrics::counter!(WAL_COMPACTIONS_TOTAL).increment(1);
            Some(kept)
        }
        Err(e) => {
            error!("reservation log compaction failed: {e}");
            None
        }
    }
}
