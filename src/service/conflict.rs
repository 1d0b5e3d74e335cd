use crate::models::event::{CalendarSnapshot, ExistingEvent, TimeInterval};

/// Outcome of checking one candidate interval against a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictResult {
    Clear,
    Busy { conflicting: Vec<ExistingEvent> },
}

impl ConflictResult {
    pub fn is_clear(&self) -> bool {
        matches!(self, ConflictResult::Clear)
    }
}

/// Pure overlap check: a candidate conflicts with an existing event iff
/// `candidate.start < existing.end && candidate.end > existing.start`.
/// Back-to-back events are not conflicts. Conflicting events come back in
/// start-time order because the snapshot is already sorted.
pub fn check(candidate: &TimeInterval, snapshot: &CalendarSnapshot) -> ConflictResult {
    let conflicting: Vec<ExistingEvent> = snapshot
        .events()
        .iter()
        .filter(|existing| candidate.overlaps(&existing.interval))
        .cloned()
        .collect();

    if conflicting.is_empty() {
        ConflictResult::Clear
    } else {
        ConflictResult::Busy { conflicting }
    }
}
