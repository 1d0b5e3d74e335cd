use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::clients::calendar::CalendarClient;
use crate::events::queue::TurnEvent;
use crate::service::snapshot_cache::SnapshotCache;

/// Applies snapshot invalidations. A committed event or a completed login
/// makes the cached view stale, so this worker is the single place that
/// re-reads the calendar and swaps the snapshot.
pub async fn run_refresh_worker(
    mut rx: mpsc::Receiver<TurnEvent>,
    cache: Arc<SnapshotCache>,
    client: Arc<dyn CalendarClient>,
) {
    while let Some(event) = rx.recv().await {
        match &event {
            TurnEvent::CommitCompleted { external_id } => {
                info!(%external_id, "commit invalidated the snapshot");
            }
            TurnEvent::LoginCompleted => {
                info!("login invalidated the snapshot");
            }
        }
        if let Err(e) = cache.refresh(client.as_ref()).await {
            warn!(error = %e, "snapshot refresh failed; keeping the previous snapshot");
        }
    }
}
