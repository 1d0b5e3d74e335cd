use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Asia::Shanghai;
use chrono_tz::Tz;
use tokio::sync::Mutex;

use calendarBot::clients::calendar::{AuthSession, CalendarClient, CalendarError};
use calendarBot::events::queue::EventBus;
use calendarBot::events::worker::run_refresh_worker;
use calendarBot::models::event::{CalendarSnapshot, DraftEvent, ExistingEvent, TimeInterval};
use calendarBot::models::session::DialogueState;
use calendarBot::service::dialogue_flow::Coordinator;
use calendarBot::service::extractor::EventExtractor;
use calendarBot::service::resolver::LocaleGrammar;
use calendarBot::service::session_store::SessionStore;
use calendarBot::service::snapshot_cache::SnapshotCache;

struct FakeCalendar {
    existing: Mutex<Vec<ExistingEvent>>,
    write_attempts: AtomicUsize,
    fail_writes: bool,
}

impl FakeCalendar {
    fn with_events(existing: Vec<ExistingEvent>) -> Self {
        Self {
            existing: Mutex::new(existing),
            write_attempts: AtomicUsize::new(0),
            fail_writes: false,
        }
    }

    fn failing() -> Self {
        Self {
            existing: Mutex::new(Vec::new()),
            write_attempts: AtomicUsize::new(0),
            fail_writes: true,
        }
    }

    fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CalendarClient for FakeCalendar {
    async fn fetch_events(&self) -> Result<CalendarSnapshot, CalendarError> {
        let existing = self.existing.lock().await;
        Ok(CalendarSnapshot::new(existing.clone(), Utc::now()))
    }

    async fn create_event(&self, draft: &DraftEvent) -> Result<String, CalendarError> {
        let attempt = self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes {
            return Err(CalendarError::Write("driver lost the page".to_string()));
        }
        let id = format!("fake_{attempt}");
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

impl FlagAuth {
    fn new(authed: bool) -> Self {
        Self {
            authed: AtomicBool::new(authed),
        }
    }
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

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Tz> {
    Shanghai
        .with_ymd_and_hms(2024, 6, day, hour, minute, 0)
        .unwrap()
}

fn existing(title: &str, day: u32, start_hour: u32, end_hour: u32) -> ExistingEvent {
    ExistingEvent {
        title: title.to_string(),
        interval: TimeInterval::new(at(day, start_hour, 0), at(day, end_hour, 0)).unwrap(),
        external_id: format!("ext_{title}"),
    }
}

fn reference_now() -> DateTime<Utc> {
    // Sunday 2024-06-09 08:00 Shanghai.
    at(9, 8, 0).with_timezone(&Utc)
}

struct Harness {
    coordinator: Coordinator,
    calendar: Arc<FakeCalendar>,
    auth: Arc<FlagAuth>,
    cache: Arc<SnapshotCache>,
    bus_rx: Option<tokio::sync::mpsc::Receiver<calendarBot::events::queue::TurnEvent>>,
}

fn harness(calendar: FakeCalendar, authed: bool) -> Harness {
    let calendar = Arc::new(calendar);
    let auth = Arc::new(FlagAuth::new(authed));
    let cache = Arc::new(SnapshotCache::empty());
    let (bus, rx) = EventBus::new(8);
    let coordinator = Coordinator::new(
        EventExtractor::new(LocaleGrammar::default()),
        cache.clone(),
        calendar.clone(),
        auth.clone(),
        Arc::new(SessionStore::new()),
        bus,
        Shanghai,
    );
    Harness {
        coordinator,
        calendar,
        auth,
        cache,
        bus_rx: Some(rx),
    }
}

#[tokio::test]
async fn clean_utterance_commits_in_one_turn() {
    let mut h = harness(FakeCalendar::with_events(Vec::new()), true);
    h.bus_rx.take();

    let reply = h
        .coordinator
        .run_turn_at(
            "tab-1",
            "schedule a meeting with John tomorrow at 10am to 11am",
            reference_now(),
        )
        .await;

    assert!(reply.event_committed);
    assert_eq!(reply.state, DialogueState::Idle);
    assert_eq!(h.calendar.write_attempts(), 1);

    let stored = h.calendar.existing.lock().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].title, "meeting with John");
    assert_eq!(stored[0].interval.start(), at(10, 10, 0));
    assert_eq!(stored[0].interval.end(), at(10, 11, 0));
}

#[tokio::test]
async fn overlap_reports_exactly_one_conflict_and_writes_nothing() {
    let mut h = harness(
        FakeCalendar::with_events(vec![existing("planning", 9, 14, 15)]),
        true,
    );
    h.bus_rx.take();
    h.cache
        .refresh(h.calendar.as_ref() as &dyn CalendarClient)
        .await
        .unwrap();

    let reply = h
        .coordinator
        .run_turn_at(
            "tab-1",
            "book a design review today 2:30pm to 3:30pm",
            reference_now(),
        )
        .await;

    assert_eq!(reply.state, DialogueState::Clarifying);
    assert!(!reply.event_committed);
    assert_eq!(reply.conflicting_events.len(), 1);
    assert_eq!(reply.conflicting_events[0].title, "planning");
    assert_eq!(h.calendar.write_attempts(), 0);
    // The shifted 15:00 slot is free and gets suggested.
    assert!(reply.assistant_text.contains("15:00"), "{}", reply.assistant_text);
}

#[tokio::test]
async fn failed_write_is_reported_and_never_retried() {
    let mut h = harness(FakeCalendar::failing(), true);
    h.bus_rx.take();

    let reply = h
        .coordinator
        .run_turn_at(
            "tab-1",
            "schedule a team sync tomorrow at 10am to 11am",
            reference_now(),
        )
        .await;

    assert_eq!(reply.state, DialogueState::Rejected);
    assert!(!reply.event_committed);
    assert!(reply.assistant_text.contains("driver lost the page"));
    assert_eq!(h.calendar.write_attempts(), 1);
}

#[tokio::test]
async fn committed_event_shows_up_in_the_refreshed_snapshot() {
    let mut h = harness(FakeCalendar::with_events(Vec::new()), true);
    let rx = h.bus_rx.take().unwrap();
    tokio::spawn(run_refresh_worker(rx, h.cache.clone(), h.calendar.clone()));

    let reply = h
        .coordinator
        .run_turn_at(
            "tab-1",
            "schedule a team sync tomorrow at 10am to 11am",
            reference_now(),
        )
        .await;
    assert!(reply.event_committed);

    // Give the worker a beat to process the commit event.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(h.cache.load().await.events().len(), 1);
}

#[tokio::test]
async fn unauthenticated_commit_asks_for_login_then_succeeds_on_yes() {
    let mut h = harness(FakeCalendar::with_events(Vec::new()), false);
    h.bus_rx.take();

    let first = h
        .coordinator
        .run_turn_at(
            "tab-1",
            "schedule a team sync tomorrow at 10am to 11am",
            reference_now(),
        )
        .await;
    assert!(first.requires_login);
    assert_eq!(first.state, DialogueState::Clarifying);
    assert_eq!(h.calendar.write_attempts(), 0);

    // Login completes out of band, then the user confirms the held draft.
    h.auth.begin_interactive_login().await.unwrap();
    let second = h.coordinator.run_turn_at("tab-1", "yes", reference_now()).await;
    assert!(second.event_committed);
    assert_eq!(h.calendar.write_attempts(), 1);
}

#[tokio::test]
async fn missing_time_is_clarified_and_the_followup_combines() {
    let mut h = harness(FakeCalendar::with_events(Vec::new()), true);
    h.bus_rx.take();

    let first = h
        .coordinator
        .run_turn_at("tab-1", "remind me to call mom", reference_now())
        .await;
    assert_eq!(first.state, DialogueState::Clarifying);
    assert!(!first.event_committed);

    let second = h
        .coordinator
        .run_turn_at("tab-1", "tomorrow at 3pm", reference_now())
        .await;
    assert!(second.event_committed);

    let stored = h.calendar.existing.lock().await;
    assert_eq!(stored[0].title, "call mom");
    assert_eq!(stored[0].interval.start(), at(10, 15, 0));
}

#[tokio::test]
async fn clarification_gives_up_after_three_rounds() {
    let mut h = harness(FakeCalendar::with_events(Vec::new()), true);
    h.bus_rx.take();

    for _ in 0..3 {
        let reply = h
            .coordinator
            .run_turn_at("tab-1", "hmm not sure", reference_now())
            .await;
        assert_eq!(reply.state, DialogueState::Clarifying);
    }
    let fourth = h
        .coordinator
        .run_turn_at("tab-1", "hmm not sure", reference_now())
        .await;
    assert_eq!(fourth.state, DialogueState::Rejected);
    assert_eq!(h.calendar.write_attempts(), 0);

    // The session starts clean after the rejection.
    let fresh = h
        .coordinator
        .run_turn_at(
            "tab-1",
            "schedule a team sync tomorrow at 10am to 11am",
            reference_now(),
        )
        .await;
    assert!(fresh.event_committed);
}

#[tokio::test]
async fn date_only_utterance_confirms_the_default_slot_before_committing() {
    let mut h = harness(FakeCalendar::with_events(Vec::new()), true);
    h.bus_rx.take();

    let first = h
        .coordinator
        .run_turn_at("tab-1", "book dentist tomorrow", reference_now())
        .await;
    assert_eq!(first.state, DialogueState::Clarifying);
    assert!(first.assistant_text.contains("confirm"), "{}", first.assistant_text);

    let second = h.coordinator.run_turn_at("tab-1", "yes", reference_now()).await;
    assert!(second.event_committed);

    let stored = h.calendar.existing.lock().await;
    assert_eq!(stored[0].title, "dentist");
    assert_eq!(stored[0].interval.start(), at(10, 10, 0));
    assert_eq!(stored[0].interval.end(), at(10, 11, 0));
}
