use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntervalError {
    #[error("interval end must be after start (start={start}, end={end})")]
    EmptyOrInverted {
        start: DateTime<Tz>,
        end: DateTime<Tz>,
    },
}

/// A half-open `[start, end)` span of time in the configured calendar zone.
/// Construction rejects zero and negative durations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeInterval {
    start: DateTime<Tz>,
    end: DateTime<Tz>,
}

impl TimeInterval {
    pub fn new(start: DateTime<Tz>, end: DateTime<Tz>) -> Result<Self, IntervalError> {
        if end <= start {
            return Err(IntervalError::EmptyOrInverted { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Tz> {
        self.start
    }

    pub fn end(&self) -> DateTime<Tz> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Open/closed overlap: touching boundaries (back-to-back events) do not
    /// count as overlapping.
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Shifts both endpoints by the same amount, preserving the duration.
    pub fn shifted_by(&self, delta: Duration) -> TimeInterval {
        TimeInterval {
            start: self.start + delta,
            end: self.end + delta,
        }
    }
}

impl std::fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to {}",
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%H:%M")
        )
    }
}

/// An event proposed from one utterance but not yet committed to the
/// external calendar. Lives for a single dialogue turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftEvent {
    pub title: String,
    pub interval: TimeInterval,
    pub raw_utterance: String,
}

/// An event already present on the external calendar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingEvent {
    pub title: String,
    pub interval: TimeInterval,
    pub external_id: String,
}

/// Point-in-time copy of the external calendar, ordered by start time.
/// Events inside one snapshot may overlap each other; only new candidates
/// are checked for conflicts.
#[derive(Debug, Clone)]
pub struct CalendarSnapshot {
    events: Vec<ExistingEvent>,
    captured_at: DateTime<Utc>,
}

impl CalendarSnapshot {
    pub fn new(mut events: Vec<ExistingEvent>, captured_at: DateTime<Utc>) -> Self {
        events.sort_by_key(|event| event.interval.start());
        Self {
            events,
            captured_at,
        }
    }

    pub fn empty(captured_at: DateTime<Utc>) -> Self {
        Self {
            events: Vec::new(),
            captured_at,
        }
    }

    pub fn events(&self) -> &[ExistingEvent] {
        &self.events
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}
