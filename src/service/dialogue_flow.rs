use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::clients::calendar::{AuthSession, CalendarClient, CalendarError};
use crate::events::queue::{EventBus, TurnEvent};
use crate::models::event::{CalendarSnapshot, DraftEvent, ExistingEvent, TimeInterval};
use crate::models::session::{DialogueState, Session};
use crate::service::conflict::{self, ConflictResult};
use crate::service::extractor::{EventExtractor, ExtractError};
use crate::service::resolver::Confidence;
use crate::service::session_store::SessionStore;
use crate::service::snapshot_cache::SnapshotCache;

/// Clarification attempts allowed before a turn gives up with REJECTED.
pub const MAX_CLARIFY_ROUNDS: u32 = 3;
const PROBE_STEP_MINUTES: i64 = 30;
const MAX_PROBES: u32 = 6;

/// What one completed turn tells the front end.
#[derive(Debug, Clone)]
pub struct TurnReply {
    pub assistant_text: String,
    pub event_committed: bool,
    pub conflicting_events: Vec<ExistingEvent>,
    pub requires_login: bool,
    pub state: DialogueState,
}

impl TurnReply {
    fn say(state: DialogueState, text: impl Into<String>) -> Self {
        Self {
            assistant_text: text.into(),
            event_committed: false,
            conflicting_events: Vec::new(),
            requires_login: false,
            state,
        }
    }
}

/// Orchestrates one voice turn: extract a draft from recognized text, check
/// it against the cached snapshot, and commit, clarify, or reject. One
/// session advances strictly one turn at a time; the commit step is the only
/// part serialized across sessions, because the calendar write channel must
/// not race against itself.
pub struct Coordinator {
    extractor: EventExtractor,
    cache: Arc<SnapshotCache>,
    calendar: Arc<dyn CalendarClient>,
    auth: Arc<dyn AuthSession>,
    sessions: Arc<SessionStore>,
    bus: EventBus,
    write_gate: Mutex<()>,
    timezone: Tz,
}

impl Coordinator {
    pub fn new(
        extractor: EventExtractor,
        cache: Arc<SnapshotCache>,
        calendar: Arc<dyn CalendarClient>,
        auth: Arc<dyn AuthSession>,
        sessions: Arc<SessionStore>,
        bus: EventBus,
        timezone: Tz,
    ) -> Self {
        Self {
            extractor,
            cache,
            calendar,
            auth,
            sessions,
            bus,
            write_gate: Mutex::new(()),
            timezone,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn run_turn(&self, session_id: &str, recognized_text: &str) -> TurnReply {
        self.run_turn_at(session_id, recognized_text, Utc::now()).await
    }

    /// Same as `run_turn`, with an explicit clock for deterministic tests.
    pub async fn run_turn_at(
        &self,
        session_id: &str,
        recognized_text: &str,
        now: DateTime<Utc>,
    ) -> TurnReply {
        let mut session = self.sessions.checkout(session_id, now).await;
        session.turn_count += 1;
        session.last_active = now;

        let trimmed = recognized_text.trim();
        if trimmed.is_empty() {
            let reply = TurnReply::say(
                DialogueState::AwaitingUtterance,
                "I didn't hear anything. Please try again.",
            );
            session.state = DialogueState::AwaitingUtterance;
            self.sessions.store(session).await;
            return reply;
        }

        // "yes" while a draft is on hold commits the held draft.
        if session.state == DialogueState::Clarifying && is_affirmation(trimmed) {
            if let Some(draft) = session.pending_draft.clone() {
                let reply = self.check_and_commit(&mut session, draft).await;
                self.sessions.store(session).await;
                return reply;
            }
        }

        // A clarifying session combines the stored utterance with the
        // follow-up, so "call mom" + "tomorrow at 5" extracts as one request.
        let combined = match (&session.state, &session.pending_utterance) {
            (DialogueState::Clarifying, Some(previous)) => format!("{previous} {trimmed}"),
            _ => trimmed.to_string(),
        };

        session.state = DialogueState::Extracting;
        let now_local = now.with_timezone(&self.timezone);
        let reply = match self.extractor.extract(&combined, now_local) {
            Err(ExtractError::NoTimeFound) => {
                session.pending_utterance = Some(combined);
                clarify(
                    &mut session,
                    "I didn't catch a date or time in that. When should the event happen?",
                    Vec::new(),
                )
            }
            Err(ExtractError::NoTitleFound) => {
                session.pending_utterance = Some(combined);
                clarify(
                    &mut session,
                    "I have the time, but not what the event is. What should I call it?",
                    Vec::new(),
                )
            }
            Ok(extraction) => {
                if extraction.confidence == Confidence::Ambiguous {
                    let draft = extraction.draft;
                    let prompt = format!(
                        "Just to confirm: \"{}\" on {}? Say yes, or give me a correction.",
                        draft.title, draft.interval
                    );
                    session.pending_draft = Some(draft);
                    session.pending_utterance = Some(combined);
                    clarify(&mut session, prompt, Vec::new())
                } else {
                    self.check_and_commit(&mut session, extraction.draft).await
                }
            }
        };

        self.sessions.store(session).await;
        reply
    }

    async fn check_and_commit(&self, session: &mut Session, draft: DraftEvent) -> TurnReply {
        session.state = DialogueState::CheckingConflict;
        let snapshot = self.cache.load().await;

        match conflict::check(&draft.interval, &snapshot) {
            ConflictResult::Busy { conflicting } => {
                let mut text = format!(
                    "\"{}\" would overlap {}.",
                    draft.title,
                    describe_conflicts(&conflicting)
                );
                if let Some(slot) = propose_free_slot(&draft.interval, &snapshot) {
                    text.push_str(&format!(" The next free slot I can see is {slot}."));
                }
                text.push_str(" Please pick another time.");
                session.pending_draft = Some(draft);
                session.pending_utterance = None;
                clarify(session, text, conflicting)
            }
            ConflictResult::Clear => self.commit(session, draft).await,
        }
    }

    async fn commit(&self, session: &mut Session, draft: DraftEvent) -> TurnReply {
        session.state = DialogueState::Committing;

        if !self.auth.is_authenticated().await {
            return self.ask_for_login(session, draft);
        }

        // One in-flight write at a time; the automation channel behind the
        // calendar seam must not race against itself.
        let _gate = self.write_gate.lock().await;
        match self.calendar.create_event(&draft).await {
            Ok(external_id) => {
                info!(%external_id, title = %draft.title, "event committed");
                self.bus.emit(TurnEvent::CommitCompleted { external_id }).await;
                session.reset_turn();
                let mut reply = TurnReply::say(
                    DialogueState::Idle,
                    format!("Done. I added \"{}\" on {}.", draft.title, draft.interval),
                );
                reply.event_committed = true;
                reply
            }
            Err(CalendarError::NotAuthenticated) => self.ask_for_login(session, draft),
            Err(e) => {
                // The write channel is not idempotent; report the failure
                // verbatim and never retry within the turn.
                warn!(error = %e, "calendar write failed");
                session.reset_turn();
                TurnReply::say(
                    DialogueState::Rejected,
                    format!("I couldn't save the event: {e}. Nothing was added."),
                )
            }
        }
    }

    fn ask_for_login(&self, session: &mut Session, draft: DraftEvent) -> TurnReply {
        session.state = DialogueState::Clarifying;
        let title = draft.title.clone();
        session.pending_draft = Some(draft);
        session.pending_utterance = None;
        let mut reply = TurnReply::say(
            DialogueState::Clarifying,
            format!(
                "You're not signed in to the calendar, so I can't add \"{title}\" yet. \
                 Please sign in, then say yes and I'll add it."
            ),
        );
        reply.requires_login = true;
        reply
    }
}

fn clarify(session: &mut Session, text: impl Into<String>, conflicting: Vec<ExistingEvent>) -> TurnReply {
    session.clarify_rounds += 1;
    if session.clarify_rounds > MAX_CLARIFY_ROUNDS {
        session.reset_turn();
        return TurnReply::say(
            DialogueState::Rejected,
            "I still couldn't pin that down after a few tries. Let's start over \
             with the full request, like \"schedule a team sync tomorrow at 2pm\".",
        );
    }
    session.state = DialogueState::Clarifying;
    let mut reply = TurnReply::say(DialogueState::Clarifying, text);
    reply.conflicting_events = conflicting;
    reply
}

/// Coordinator-level policy on top of the pure checker: walk the candidate
/// forward in fixed steps until a clear slot appears or the probe budget
/// runs out.
fn propose_free_slot(candidate: &TimeInterval, snapshot: &CalendarSnapshot) -> Option<TimeInterval> {
    for probe in 1..=MAX_PROBES {
        let shifted = candidate.shifted_by(Duration::minutes(PROBE_STEP_MINUTES * probe as i64));
        if conflict::check(&shifted, snapshot).is_clear() {
            return Some(shifted);
        }
    }
    None
}

fn describe_conflicts(conflicting: &[ExistingEvent]) -> String {
    let described: Vec<String> = conflicting
        .iter()
        .map(|event| format!("\"{}\" ({})", event.title, event.interval))
        .collect();
    described.join(", ")
}

fn is_affirmation(text: &str) -> bool {
    let normalized = text.trim().trim_end_matches(['.', '!', '。']).to_lowercase();
    matches!(
        normalized.as_str(),
        "yes" | "yeah" | "yep" | "ok" | "okay" | "sure" | "confirm" | "confirmed"
            | "对" | "好" | "好的" | "是的" | "确认"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affirmations_cover_both_grammars() {
        assert!(is_affirmation("Yes."));
        assert!(is_affirmation("好的"));
        assert!(!is_affirmation("yes but make it 3pm"));
    }
}
