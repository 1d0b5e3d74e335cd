use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::event::{CalendarSnapshot, DraftEvent, ExistingEvent, TimeInterval};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CalendarError {
    #[error("not signed in to the calendar")]
    NotAuthenticated,
    #[error("calendar write failed: {0}")]
    Write(String),
    #[error("calendar fetch failed: {0}")]
    Fetch(String),
}

/// Read/write seam to the external calendar. The write side is assumed
/// idempotent-unsafe: retrying a failed `create_event` may duplicate the
/// event, so callers must not retry automatically.
#[async_trait]
pub trait CalendarClient: Send + Sync {
    async fn fetch_events(&self) -> Result<CalendarSnapshot, CalendarError>;

    /// Commits one draft and returns the external id assigned to it.
    async fn create_event(&self, draft: &DraftEvent) -> Result<String, CalendarError>;
}

/// Login-state seam. Credentials are never synthesized here; the login flow
/// is completed out of band by the user.
#[async_trait]
pub trait AuthSession: Send + Sync {
    async fn is_authenticated(&self) -> bool;
    async fn begin_interactive_login(&self) -> Result<(), CalendarError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEvent {
    id: String,
    title: String,
    start_time: String,
    end_time: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LoginState {
    logged_in_at: DateTime<Utc>,
    origin: String,
}

/// File-backed calendar used in place of a live browser-automation driver.
/// Events live in a JSON file under the state directory, and login state is
/// a marker file written once the user finishes the out-of-band flow.
pub struct LocalCalendarClient {
    events_path: PathBuf,
    login_state_path: PathBuf,
    timezone: Tz,
}

impl LocalCalendarClient {
    pub fn new(state_dir: &Path, timezone: Tz) -> Self {
        Self {
            events_path: state_dir.join("simulated_events.json"),
            login_state_path: state_dir.join("login_state.json"),
            timezone,
        }
    }

    async fn read_store(&self) -> Result<Vec<StoredEvent>, CalendarError> {
        match tokio::fs::read_to_string(&self.events_path).await {
            Ok(content) => {
                serde_json::from_str(&content).map_err(|e| CalendarError::Fetch(e.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(CalendarError::Fetch(e.to_string())),
        }
    }

    async fn write_store(&self, events: &[StoredEvent]) -> Result<(), CalendarError> {
        if let Some(parent) = self.events_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CalendarError::Write(e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(events)
            .map_err(|e| CalendarError::Write(e.to_string()))?;
        tokio::fs::write(&self.events_path, content)
            .await
            .map_err(|e| CalendarError::Write(e.to_string()))
    }
}

#[async_trait]
impl CalendarClient for LocalCalendarClient {
    async fn fetch_events(&self) -> Result<CalendarSnapshot, CalendarError> {
        let stored = self.read_store().await?;
        let mut events = Vec::with_capacity(stored.len());
        for record in stored {
            let start = DateTime::parse_from_rfc3339(&record.start_time);
            let end = DateTime::parse_from_rfc3339(&record.end_time);
            let (Ok(start), Ok(end)) = (start, end) else {
                warn!(id = %record.id, "skipping event with unparseable timestamps");
                continue;
            };
            let interval = TimeInterval::new(
                start.with_timezone(&self.timezone),
                end.with_timezone(&self.timezone),
            );
            let Ok(interval) = interval else {
                warn!(id = %record.id, "skipping event with an empty interval");
                continue;
            };
            events.push(ExistingEvent {
                title: record.title,
                interval,
                external_id: record.id,
            });
        }
        Ok(CalendarSnapshot::new(events, Utc::now()))
    }

    async fn create_event(&self, draft: &DraftEvent) -> Result<String, CalendarError> {
        if !self.is_authenticated().await {
            return Err(CalendarError::NotAuthenticated);
        }
        let mut events = self
            .read_store()
            .await
            .map_err(|e| CalendarError::Write(e.to_string()))?;
        let id = format!("sim_{}", Uuid::new_v4());
        events.push(StoredEvent {
            id: id.clone(),
            title: draft.title.clone(),
            start_time: draft.interval.start().to_rfc3339(),
            end_time: draft.interval.end().to_rfc3339(),
            created_at: Utc::now(),
        });
        self.write_store(&events).await?;
        info!(%id, title = %draft.title, "event written to local calendar store");
        Ok(id)
    }
}

#[async_trait]
impl AuthSession for LocalCalendarClient {
    async fn is_authenticated(&self) -> bool {
        self.login_state_path.exists()
    }

    async fn begin_interactive_login(&self) -> Result<(), CalendarError> {
        if let Some(parent) = self.login_state_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CalendarError::Write(e.to_string()))?;
        }
        let state = LoginState {
            logged_in_at: Utc::now(),
            origin: "interactive".to_string(),
        };
        let content = serde_json::to_string_pretty(&state)
            .map_err(|e| CalendarError::Write(e.to_string()))?;
        tokio::fs::write(&self.login_state_path, content)
            .await
            .map_err(|e| CalendarError::Write(e.to_string()))?;
        info!("login state saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Asia::Shanghai;

    fn draft(title: &str, day: u32, start_hour: u32) -> DraftEvent {
        DraftEvent {
            title: title.to_string(),
            interval: TimeInterval::new(
                Shanghai.with_ymd_and_hms(2024, 6, day, start_hour, 0, 0).unwrap(),
                Shanghai
                    .with_ymd_and_hms(2024, 6, day, start_hour + 1, 0, 0)
                    .unwrap(),
            )
            .unwrap(),
            raw_utterance: String::new(),
        }
    }

    #[tokio::test]
    async fn create_requires_login() {
        let dir = tempfile::tempdir().unwrap();
        let client = LocalCalendarClient::new(dir.path(), Shanghai);
        let err = client.create_event(&draft("sync", 10, 14)).await.unwrap_err();
        assert_eq!(err, CalendarError::NotAuthenticated);
    }

    #[tokio::test]
    async fn events_round_trip_through_the_store_file() {
        let dir = tempfile::tempdir().unwrap();
        let client = LocalCalendarClient::new(dir.path(), Shanghai);
        client.begin_interactive_login().await.unwrap();
        assert!(client.is_authenticated().await);

        client.create_event(&draft("standup", 10, 9)).await.unwrap();
        client.create_event(&draft("review", 10, 15)).await.unwrap();

        let snapshot = client.fetch_events().await.unwrap();
        assert_eq!(snapshot.events().len(), 2);
        assert_eq!(snapshot.events()[0].title, "standup");
        assert_eq!(
            snapshot.events()[1].interval.start(),
            Shanghai.with_ymd_and_hms(2024, 6, 10, 15, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn missing_store_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let client = LocalCalendarClient::new(dir.path(), Shanghai);
        let snapshot = client.fetch_events().await.unwrap();
        assert!(snapshot.events().is_empty());
    }
}
