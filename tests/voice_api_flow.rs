use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use chrono_tz::Asia::Shanghai;
use tokio::sync::Mutex;

use calendarBot::clients::calendar::{AuthSession, CalendarClient, CalendarError};
use calendarBot::clients::speech::{SimulatedVoice, VoiceConfig};
use calendarBot::events::queue::EventBus;
use calendarBot::handlers::api::{routes, ApiContext};
use calendarBot::models::event::{CalendarSnapshot, DraftEvent, ExistingEvent};
use calendarBot::service::dialogue_flow::Coordinator;
use calendarBot::service::extractor::EventExtractor;
use calendarBot::service::resolver::LocaleGrammar;
use calendarBot::service::session_store::SessionStore;
use calendarBot::service::snapshot_cache::SnapshotCache;

struct FakeCalendar {
    existing: Mutex<Vec<ExistingEvent>>,
    writes: AtomicUsize,
}

#[async_trait]
impl CalendarClient for FakeCalendar {
    async fn fetch_events(&self) -> Result<CalendarSnapshot, CalendarError> {
        let existing = self.existing.lock().await;
        Ok(CalendarSnapshot::new(existing.clone(), Utc::now()))
    }

    async fn create_event(&self, draft: &DraftEvent) -> Result<String, CalendarError> {
        let id = format!("fake_{}", self.writes.fetch_add(1, Ordering::SeqCst));
        let mut existing = self.existing.lock().await;
        existing.push(ExistingEvent {
            title: draft.title.clone(),
            interval: draft.interval.clone(),
            external_id: id.clone(),
        });
        Ok(id)
    }
}

struct FlagAuth {
    authed: AtomicBool,
}

#[async_trait]
impl AuthSession for FlagAuth {
    async fn is_authenticated(&self) -> bool {
        self.authed.load(Ordering::SeqCst)
    }

    async fn begin_interactive_login(&self) -> Result<(), CalendarError> {
        self.authed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn api_context() -> (ApiContext, Arc<FlagAuth>) {
    let calendar = Arc::new(FakeCalendar {
        existing: Mutex::new(Vec::new()),
        writes: AtomicUsize::new(0),
    });
    let auth = Arc::new(FlagAuth {
        authed: AtomicBool::new(true),
    });
    let cache = Arc::new(SnapshotCache::empty());
    let (bus, _rx) = EventBus::new(8);
    let coordinator = Arc::new(Coordinator::new(
        EventExtractor::new(LocaleGrammar::default()),
        cache.clone(),
        calendar,
        auth.clone(),
        Arc::new(SessionStore::new()),
        bus.clone(),
        Shanghai,
    ));
    let voice = Arc::new(SimulatedVoice::with_phrases(vec![
        "schedule a project sync tomorrow at 2pm for 1 hour".to_string(),
    ]));
    let ctx = ApiContext {
        coordinator,
        stt: voice.clone(),
        tts: voice,
        auth: auth.clone(),
        cache,
        bus,
        voice: VoiceConfig::default(),
    };
    (ctx, auth)
}

#[tokio::test]
async fn text_turn_commits_and_returns_audio() {
    let (ctx, _auth) = api_context();
    let api = routes(ctx);

    let response = warp::test::request()
        .method("POST")
        .path("/api/turn")
        .json(&serde_json::json!({
            "session_id": "tab-1",
            "text": "schedule a team sync tomorrow at 10am to 11am",
        }))
        .reply(&api)
        .await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["event_committed"], true);
    assert_eq!(body["requires_login"], false);
    assert!(body["conflicting_events"].is_null());
    // Simulated synthesis embeds the reply text in the audio bytes.
    let audio = BASE64
        .decode(body["assistant_audio"].as_str().unwrap())
        .unwrap();
    assert!(audio.starts_with(b"RIFF"));
}

#[tokio::test]
async fn audio_turn_goes_through_recognition() {
    let (ctx, _auth) = api_context();
    let api = routes(ctx);

    let response = warp::test::request()
        .method("POST")
        .path("/api/turn")
        .json(&serde_json::json!({
            "session_id": "tab-1",
            "audio": BASE64.encode([1u8, 2, 3]),
            "encoding": "wav",
        }))
        .reply(&api)
        .await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["event_committed"], true);
}

#[tokio::test]
async fn turn_without_text_or_audio_is_rejected() {
    let (ctx, _auth) = api_context();
    let api = routes(ctx);

    let response = warp::test::request()
        .method("POST")
        .path("/api/turn")
        .json(&serde_json::json!({ "session_id": "tab-1" }))
        .reply(&api)
        .await;

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn invalid_base64_audio_is_rejected() {
    let (ctx, _auth) = api_context();
    let api = routes(ctx);

    let response = warp::test::request()
        .method("POST")
        .path("/api/turn")
        .json(&serde_json::json!({
            "session_id": "tab-1",
            "audio": "not base64!!",
        }))
        .reply(&api)
        .await;

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn login_endpoint_completes_the_auth_flow() {
    let (ctx, auth) = api_context();
    auth.authed.store(false, Ordering::SeqCst);
    let api = routes(ctx);

    let response = warp::test::request()
        .method("POST")
        .path("/api/login")
        .reply(&api)
        .await;

    assert_eq!(response.status(), 200);
    assert!(auth.authed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn health_reports_snapshot_age() {
    let (ctx, _auth) = api_context();
    let api = routes(ctx);

    let response = warp::test::request()
        .method("GET")
        .path("/api/health")
        .reply(&api)
        .await;

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["events_cached"], 0);
    assert!(body["snapshot_age_seconds"].as_i64().unwrap() >= 0);
}
