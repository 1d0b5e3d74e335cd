use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::clients::calendar::CalendarClient;
use crate::service::snapshot_cache::SnapshotCache;

const REFRESH_INTERVAL_SECONDS: u64 = 300;

/// Periodic safety net behind the event-driven refresh worker. Commits made
/// outside this process (directly in the external calendar) only become
/// visible through this loop.
pub async fn run_refresh_loop(cache: Arc<SnapshotCache>, client: Arc<dyn CalendarClient>) {
    loop {
        sleep(Duration::from_secs(REFRESH_INTERVAL_SECONDS)).await;
        refresh_tick(&cache, client.as_ref()).await;
    }
}

pub async fn refresh_tick(cache: &SnapshotCache, client: &dyn CalendarClient) {
    match cache.refresh(client).await {
        Ok(()) => debug!("periodic snapshot refresh"),
        Err(e) => warn!(error = %e, "periodic refresh failed; keeping the previous snapshot"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::calendar::CalendarError;
    use crate::models::event::{CalendarSnapshot, DraftEvent};
    use async_trait::async_trait;
    use chrono::Utc;

    struct FailingCalendar;

    #[async_trait]
    impl CalendarClient for FailingCalendar {
        async fn fetch_events(&self) -> Result<CalendarSnapshot, CalendarError> {
            Err(CalendarError::Fetch("driver gone".to_string()))
        }

        async fn create_event(&self, _draft: &DraftEvent) -> Result<String, CalendarError> {
            unreachable!("refresh never writes")
        }
    }

    #[tokio::test]
    async fn failed_tick_keeps_the_previous_snapshot() {
        let cache = SnapshotCache::new(CalendarSnapshot::new(Vec::new(), Utc::now()));
        let before = cache.load().await.captured_at();
        refresh_tick(&cache, &FailingCalendar).await;
        assert_eq!(cache.load().await.captured_at(), before);
    }
}
