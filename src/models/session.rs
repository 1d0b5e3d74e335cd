use chrono::{DateTime, Utc};

use crate::models::event::DraftEvent;

/// Where one dialogue session sits in its turn cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueState {
    Idle,
    AwaitingUtterance,
    Extracting,
    CheckingConflict,
    Committing,
    Clarifying,
    Rejected,
}

/// One voice interaction. Mutated once per turn by the coordinator and
/// evicted after sitting idle too long.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub state: DialogueState,
    pub pending_draft: Option<DraftEvent>,
    pub pending_utterance: Option<String>,
    pub turn_count: u32,
    pub clarify_rounds: u32,
    pub last_active: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            state: DialogueState::AwaitingUtterance,
            pending_draft: None,
            pending_utterance: None,
            turn_count: 0,
            clarify_rounds: 0,
            last_active: now,
        }
    }

    /// Clears per-turn carryover once a turn reaches a terminal outcome.
    pub fn reset_turn(&mut self) {
        self.state = DialogueState::AwaitingUtterance;
        self.pending_draft = None;
        self.pending_utterance = None;
        self.clarify_rounds = 0;
    }
}
