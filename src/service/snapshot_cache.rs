use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::info;

use crate::clients::calendar::{CalendarClient, CalendarError};
use crate::models::event::CalendarSnapshot;

/// Shared, periodically refreshed view of the external calendar. Readers
/// clone the inner `Arc`, so a refresh never exposes a half-replaced
/// snapshot; the swap is the only write path.
pub struct SnapshotCache {
    inner: RwLock<Arc<CalendarSnapshot>>,
}

impl SnapshotCache {
    pub fn new(initial: CalendarSnapshot) -> Self {
        Self {
            inner: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn empty() -> Self {
        Self::new(CalendarSnapshot::empty(Utc::now()))
    }

    pub async fn load(&self) -> Arc<CalendarSnapshot> {
        self.inner.read().await.clone()
    }

    pub async fn replace(&self, snapshot: CalendarSnapshot) {
        let mut guard = self.inner.write().await;
        *guard = Arc::new(snapshot);
    }

    /// Re-reads the external calendar and swaps the snapshot whole.
    pub async fn refresh(&self, client: &dyn CalendarClient) -> Result<(), CalendarError> {
        let snapshot = client.fetch_events().await?;
        info!(events = snapshot.events().len(), "calendar snapshot refreshed");
        self.replace(snapshot).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::{ExistingEvent, TimeInterval};
    use chrono::TimeZone;
    use chrono_tz::Asia::Shanghai;

    #[tokio::test]
    async fn readers_keep_the_snapshot_they_loaded() {
        let cache = SnapshotCache::empty();
        let before = cache.load().await;

        let interval = TimeInterval::new(
            Shanghai.with_ymd_and_hms(2024, 6, 10, 9, 0, 0).unwrap(),
            Shanghai.with_ymd_and_hms(2024, 6, 10, 10, 0, 0).unwrap(),
        )
        .unwrap();
        cache
            .replace(CalendarSnapshot::new(
                vec![ExistingEvent {
                    title: "standup".to_string(),
                    interval,
                    external_id: "a".to_string(),
                }],
                Utc::now(),
            ))
            .await;

        // The old Arc is still the empty snapshot the reader took.
        assert!(before.events().is_empty());
        assert_eq!(cache.load().await.events().len(), 1);
    }
}
