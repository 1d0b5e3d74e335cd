use std::ops::Range;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Weekday};
use chrono_tz::Tz;
use regex::Regex;
use thiserror::Error;

use crate::models::event::TimeInterval;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no date or time expression found in \"{0}\"")]
    NoTimeFound(String),
}

/// How certain the resolver is about the interval it produced. Anything
/// other than `Exact` is a hint for the coordinator to ask before committing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    Exact,
    InferredDuration,
    Ambiguous,
}

/// Interval resolved out of free text, plus the byte spans of the utterance
/// that carried date/time grammar. The extractor removes those spans to
/// recover the event title.
#[derive(Debug, Clone)]
pub struct ResolvedTimeReference {
    pub interval: TimeInterval,
    pub confidence: Confidence,
    pub consumed_spans: Vec<Range<usize>>,
}

impl ResolvedTimeReference {
    /// Returns the utterance with every consumed span removed, segments
    /// joined by single spaces.
    pub fn strip_consumed(&self, text: &str) -> String {
        let mut remainder = String::new();
        let mut cursor = 0usize;
        for span in &self.consumed_spans {
            if span.start > cursor {
                remainder.push_str(&text[cursor..span.start]);
                remainder.push(' ');
            }
            cursor = cursor.max(span.end);
        }
        if cursor < text.len() {
            remainder.push_str(&text[cursor..]);
        }
        remainder.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// The date/time grammar plus the documented defaults the resolver applies.
///
/// The defaults are deliberate configuration points, not incidental
/// behavior: a missing end time or duration always falls back to
/// `default_duration_minutes`, a date-only utterance always starts at
/// `default_start_hour`, and a bare hour below `daytime_start_hour` is
/// shifted into the afternoon.
pub struct LocaleGrammar {
    pub default_duration_minutes: i64,
    pub default_start_hour: u32,
    pub daytime_start_hour: u32,
    pub daytime_end_hour: u32,
    relative_day: Regex,
    weekday: Regex,
    iso_date: Regex,
    month_day: Regex,
    meridiem_cue: Regex,
    time_range: Regex,
    cn_time_range: Regex,
    time_colon: Regex,
    time_hour_meridiem: Regex,
    cn_time_point: Regex,
    time_at_bare: Regex,
    time_bare_before_for: Regex,
    duration_numeric: Regex,
    duration_word: Regex,
    cn_duration: Regex,
}

impl Default for LocaleGrammar {
    fn default() -> Self {
        Self::new(60, 10, 8, 19)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MeridiemCue {
    Am,
    Pm,
}

#[derive(Debug, Clone, Copy)]
struct TimePoint {
    hour: u32,
    minute: u32,
    meridiem: Option<MeridiemCue>,
}

impl LocaleGrammar {
    pub fn new(
        default_duration_minutes: i64,
        default_start_hour: u32,
        daytime_start_hour: u32,
        daytime_end_hour: u32,
    ) -> Self {
        let cn_digit = "[0-9一二三四五六七八九十两]{1,3}";
        Self {
            default_duration_minutes,
            default_start_hour,
            daytime_start_hour,
            daytime_end_hour,
            relative_day: Regex::new(
                r"(?i)\b(day after tomorrow|tomorrow|tonight|today)\b|大后天|后天|明天|明日|今天|今日",
            )
            .expect("relative day pattern"),
            weekday: Regex::new(
                r"(?i)\b(?:next\s+)?(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b",
            )
            .expect("weekday pattern"),
            iso_date: Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("iso date pattern"),
            month_day: Regex::new(
                r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december)\s+(\d{1,2})(?:st|nd|rd|th)?\b",
            )
            .expect("month day pattern"),
            meridiem_cue: Regex::new(
                r"(?i)\b(morning|afternoon|evening|night|noon|midday)\b|上午|早上|早晨|中午|下午|午后|晚上|傍晚",
            )
            .expect("meridiem cue pattern"),
            time_range: Regex::new(
                r"(?i)\b(?:(?:at|from)\s+)?(\d{1,2})(?::(\d{2}))?\s*(am|pm)?\s*(?:to|until|till|-|–)\s*(\d{1,2})(?::(\d{2}))?\s*(am|pm)?\b",
            )
            .expect("time range pattern"),
            cn_time_range: Regex::new(&format!(
                "({cn_digit})[点时](半)?(?:到|至)({cn_digit})[点时](半)?"
            ))
            .expect("cn time range pattern"),
            time_colon: Regex::new(r"(?i)\b(?:at\s+)?(\d{1,2}):(\d{2})\s*(am|pm)?\b")
                .expect("colon time pattern"),
            time_hour_meridiem: Regex::new(r"(?i)\b(?:at\s+)?(\d{1,2})\s*(am|pm)\b")
                .expect("hour meridiem pattern"),
            cn_time_point: Regex::new(&format!(
                "(上午|早上|早晨|中午|下午|晚上|傍晚)?({cn_digit})[点时](半)?"
            ))
            .expect("cn time point pattern"),
            time_at_bare: Regex::new(r"(?i)\bat\s+(\d{1,2})\b").expect("bare at pattern"),
            time_bare_before_for: Regex::new(r"(?i)\b(\d{1,2})\s+for\b")
                .expect("bare hour before duration pattern"),
            duration_numeric: Regex::new(
                r"(?i)\bfor\s+(?:about\s+)?(\d+)\s*(hours?|hrs?|minutes?|mins?)\b",
            )
            .expect("numeric duration pattern"),
            duration_word: Regex::new(r"(?i)\bfor\s+(half\s+an\s+hour|an?\s+hour|one\s+hour)\b")
                .expect("word duration pattern"),
            cn_duration: Regex::new(&format!("(半|{cn_digit})个?(?:小时|钟头)"))
                .expect("cn duration pattern"),
        }
    }
}

/// Resolves the date/time grammar in `text` into a concrete `[start, end)`
/// interval in the zone of `reference_now`. Fails with `NoTimeFound` when no
/// date or time expression is present; never silently falls back to "now".
pub fn resolve(
    text: &str,
    reference_now: DateTime<Tz>,
    grammar: &LocaleGrammar,
) -> Result<ResolvedTimeReference, ResolveError> {
    let mut spans: Vec<Range<usize>> = Vec::new();
    let tz = reference_now.timezone();

    let date = find_date(text, reference_now, grammar, &mut spans);
    let cue = find_meridiem_cue(text, grammar, &mut spans);
    let cue = cue.or(date.as_ref().and_then(|d| d.implied_cue));

    let taken = spans.clone();
    let times = find_times(text, grammar, &taken, &mut spans);
    let duration = find_duration(text, grammar, &mut spans);

    if date.is_none() && times.is_none() {
        return Err(ResolveError::NoTimeFound(text.to_string()));
    }

    let target_date = date
        .as_ref()
        .map(|d| d.date)
        .unwrap_or_else(|| reference_now.date_naive());

    let mut ambiguous = false;
    let start_point = match &times {
        Some(found) => found.start,
        None => {
            // Date-only utterance: documented fallback start hour.
            ambiguous = true;
            TimePoint {
                hour: grammar.default_start_hour,
                minute: 0,
                meridiem: None,
            }
        }
    };
    let end_point = times.as_ref().and_then(|found| found.end);

    // A meridiem given only on the end of a range also covers the start.
    let start_meridiem = start_point
        .meridiem
        .or(end_point.and_then(|p| p.meridiem))
        .or(cue);
    let (start_hour, start_ambiguous) =
        normalize_hour(start_point.hour, start_meridiem, grammar);
    ambiguous |= start_ambiguous;

    let start = local_datetime(tz, target_date, start_hour, start_point.minute)
        .ok_or_else(|| ResolveError::NoTimeFound(text.to_string()))?;

    let mut inferred_duration = false;
    let end = match (end_point, duration) {
        (Some(point), _) => {
            let end_meridiem = point.meridiem.or(cue);
            let (end_hour, end_ambiguous) =
                normalize_hour(point.hour, end_meridiem, grammar);
            ambiguous |= end_ambiguous;
            let mut end = local_datetime(tz, target_date, end_hour, point.minute)
                .ok_or_else(|| ResolveError::NoTimeFound(text.to_string()))?;
            // Inverted ranges like "11 to 1" roll the end into the afternoon,
            // or failing that onto the next day.
            if end <= start && point.meridiem.is_none() && end_hour + 12 <= 23 {
                end = local_datetime(tz, target_date, end_hour + 12, point.minute)
                    .ok_or_else(|| ResolveError::NoTimeFound(text.to_string()))?;
                ambiguous = true;
            }
            if end <= start {
                end += Duration::days(1);
                ambiguous = true;
            }
            end
        }
        (None, Some(minutes)) => start + Duration::minutes(minutes),
        (None, None) => {
            inferred_duration = true;
            start + Duration::minutes(grammar.default_duration_minutes)
        }
    };

    let interval = TimeInterval::new(start, end)
        .map_err(|_| ResolveError::NoTimeFound(text.to_string()))?;

    let confidence = if ambiguous {
        Confidence::Ambiguous
    } else if inferred_duration {
        Confidence::InferredDuration
    } else {
        Confidence::Exact
    };

    Ok(ResolvedTimeReference {
        interval,
        confidence,
        consumed_spans: merge_spans(spans),
    })
}

struct FoundDate {
    date: NaiveDate,
    implied_cue: Option<MeridiemCue>,
}

struct FoundTimes {
    start: TimePoint,
    end: Option<TimePoint>,
}

fn find_date(
    text: &str,
    reference_now: DateTime<Tz>,
    grammar: &LocaleGrammar,
    spans: &mut Vec<Range<usize>>,
) -> Option<FoundDate> {
    let today = reference_now.date_naive();

    if let Some(found) = grammar.relative_day.find(text) {
        let keyword = found.as_str().to_lowercase();
        let (offset, cue) = match keyword.as_str() {
            "today" | "今天" | "今日" => (0, None),
            "tonight" => (0, Some(MeridiemCue::Pm)),
            "tomorrow" | "明天" | "明日" => (1, None),
            "day after tomorrow" | "后天" => (2, None),
            "大后天" => (3, None),
            _ => (0, None),
        };
        spans.push(found.range());
        return Some(FoundDate {
            date: today + Duration::days(offset),
            implied_cue: cue,
        });
    }

    if let Some(captures) = grammar.weekday.captures(text) {
        let target = match captures[1].to_lowercase().as_str() {
            "monday" => Weekday::Mon,
            "tuesday" => Weekday::Tue,
            "wednesday" => Weekday::Wed,
            "thursday" => Weekday::Thu,
            "friday" => Weekday::Fri,
            "saturday" => Weekday::Sat,
            _ => Weekday::Sun,
        };
        let mut days_ahead = target.num_days_from_monday() as i64
            - today.weekday().num_days_from_monday() as i64;
        if days_ahead <= 0 {
            days_ahead += 7;
        }
        spans.push(captures.get(0).map(|m| m.range()).unwrap_or_default());
        return Some(FoundDate {
            date: today + Duration::days(days_ahead),
            implied_cue: None,
        });
    }

    if let Some(captures) = grammar.iso_date.captures(text) {
        let year: i32 = captures[1].parse().ok()?;
        let month: u32 = captures[2].parse().ok()?;
        let day: u32 = captures[3].parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            spans.push(captures.get(0).map(|m| m.range()).unwrap_or_default());
            return Some(FoundDate {
                date,
                implied_cue: None,
            });
        }
    }

    if let Some(captures) = grammar.month_day.captures(text) {
        let month = month_number(&captures[1]);
        let day: u32 = captures[2].parse().ok()?;
        let mut date = NaiveDate::from_ymd_opt(today.year(), month, day)?;
        if date < today {
            date = NaiveDate::from_ymd_opt(today.year() + 1, month, day)?;
        }
        spans.push(captures.get(0).map(|m| m.range()).unwrap_or_default());
        return Some(FoundDate {
            date,
            implied_cue: None,
        });
    }

    None
}

fn find_meridiem_cue(
    text: &str,
    grammar: &LocaleGrammar,
    spans: &mut Vec<Range<usize>>,
) -> Option<MeridiemCue> {
    let mut cue = None;
    for found in grammar.meridiem_cue.find_iter(text) {
        let word = found.as_str().to_lowercase();
        let this = match word.as_str() {
            "morning" | "上午" | "早上" | "早晨" => MeridiemCue::Am,
            _ => MeridiemCue::Pm,
        };
        spans.push(found.range());
        cue.get_or_insert(this);
    }
    cue
}

fn find_times(
    text: &str,
    grammar: &LocaleGrammar,
    taken: &[Range<usize>],
    spans: &mut Vec<Range<usize>>,
) -> Option<FoundTimes> {
    // Ranges first: two points joined by "to"/"到" and friends.
    for captures in grammar.time_range.captures_iter(text) {
        let whole = captures.get(0)?.range();
        if overlaps_any(&whole, taken) {
            continue;
        }
        let start = TimePoint {
            hour: captures[1].parse().ok()?,
            minute: captures.get(2).map_or(0, |m| m.as_str().parse().unwrap_or(0)),
            meridiem: captures.get(3).map(|m| parse_meridiem(m.as_str())),
        };
        let end = TimePoint {
            hour: captures[4].parse().ok()?,
            minute: captures.get(5).map_or(0, |m| m.as_str().parse().unwrap_or(0)),
            meridiem: captures.get(6).map(|m| parse_meridiem(m.as_str())),
        };
        if start.hour > 23 || end.hour > 23 || start.minute > 59 || end.minute > 59 {
            continue;
        }
        spans.push(whole);
        return Some(FoundTimes {
            start,
            end: Some(end),
        });
    }

    if let Some(captures) = grammar.cn_time_range.captures(text) {
        let start = TimePoint {
            hour: parse_hour_token(&captures[1])?,
            minute: if captures.get(2).is_some() { 30 } else { 0 },
            meridiem: None,
        };
        let end = TimePoint {
            hour: parse_hour_token(&captures[3])?,
            minute: if captures.get(4).is_some() { 30 } else { 0 },
            meridiem: None,
        };
        spans.push(captures.get(0)?.range());
        return Some(FoundTimes {
            start,
            end: Some(end),
        });
    }

    // Single points, most specific form first.
    for captures in grammar.time_colon.captures_iter(text) {
        let whole = captures.get(0)?.range();
        if overlaps_any(&whole, taken) {
            continue;
        }
        let point = TimePoint {
            hour: captures[1].parse().ok()?,
            minute: captures[2].parse().ok()?,
            meridiem: captures.get(3).map(|m| parse_meridiem(m.as_str())),
        };
        if point.hour > 23 || point.minute > 59 {
            continue;
        }
        spans.push(whole);
        return Some(FoundTimes {
            start: point,
            end: None,
        });
    }

    for captures in grammar.time_hour_meridiem.captures_iter(text) {
        let whole = captures.get(0)?.range();
        if overlaps_any(&whole, taken) {
            continue;
        }
        let point = TimePoint {
            hour: captures[1].parse().ok()?,
            minute: 0,
            meridiem: Some(parse_meridiem(&captures[2])),
        };
        if point.hour > 23 {
            continue;
        }
        spans.push(whole);
        return Some(FoundTimes {
            start: point,
            end: None,
        });
    }

    if let Some(captures) = grammar.cn_time_point.captures(text) {
        let meridiem = captures.get(1).map(|m| match m.as_str() {
            "上午" | "早上" | "早晨" => MeridiemCue::Am,
            _ => MeridiemCue::Pm,
        });
        let point = TimePoint {
            hour: parse_hour_token(&captures[2])?,
            minute: if captures.get(3).is_some() { 30 } else { 0 },
            meridiem,
        };
        spans.push(captures.get(0)?.range());
        return Some(FoundTimes {
            start: point,
            end: None,
        });
    }

    for regex in [&grammar.time_at_bare, &grammar.time_bare_before_for] {
        for captures in regex.captures_iter(text) {
            let whole = captures.get(0)?.range();
            if overlaps_any(&whole, taken) {
                continue;
            }
            let hour: u32 = captures[1].parse().ok()?;
            if hour > 23 {
                continue;
            }
            spans.push(captures.get(1)?.range());
            return Some(FoundTimes {
                start: TimePoint {
                    hour,
                    minute: 0,
                    meridiem: None,
                },
                end: None,
            });
        }
    }

    None
}

fn find_duration(
    text: &str,
    grammar: &LocaleGrammar,
    spans: &mut Vec<Range<usize>>,
) -> Option<i64> {
    if let Some(captures) = grammar.duration_numeric.captures(text) {
        let amount: i64 = captures[1].parse().ok()?;
        let unit = captures[2].to_lowercase();
        let minutes = if unit.starts_with('h') {
            amount * 60
        } else {
            amount
        };
        spans.push(captures.get(0)?.range());
        return Some(minutes);
    }

    if let Some(captures) = grammar.duration_word.captures(text) {
        let phrase = captures[1].to_lowercase();
        let minutes = if phrase.starts_with("half") { 30 } else { 60 };
        spans.push(captures.get(0)?.range());
        return Some(minutes);
    }

    if let Some(captures) = grammar.cn_duration.captures(text) {
        let token = &captures[1];
        let minutes = if token == "半" {
            30
        } else {
            parse_hour_token(token)? as i64 * 60
        };
        spans.push(captures.get(0)?.range());
        return Some(minutes);
    }

    None
}

/// Normalizes an hour to 24h form. Returns the hour plus whether the value
/// was ambiguous (no am/pm marker or daypart word to disambiguate it).
fn normalize_hour(
    hour: u32,
    meridiem: Option<MeridiemCue>,
    grammar: &LocaleGrammar,
) -> (u32, bool) {
    match meridiem {
        Some(MeridiemCue::Pm) => {
            let normalized = if hour < 12 { hour + 12 } else { hour };
            (normalized.min(23), false)
        }
        Some(MeridiemCue::Am) => {
            let normalized = if hour == 12 { 0 } else { hour };
            (normalized, false)
        }
        None => {
            if hour >= 13 {
                // Already unambiguous 24-hour form.
                (hour.min(23), false)
            } else if hour < grammar.daytime_start_hour {
                // "3" in a scheduling context means mid-afternoon, not 03:00.
                (hour + 12, true)
            } else {
                (hour, true)
            }
        }
    }
}

fn local_datetime(tz: Tz, date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Tz>> {
    let naive = date.and_hms_opt(hour, minute, 0)?;
    tz.from_local_datetime(&naive).earliest()
}

fn parse_meridiem(s: &str) -> MeridiemCue {
    if s.eq_ignore_ascii_case("am") {
        MeridiemCue::Am
    } else {
        MeridiemCue::Pm
    }
}

/// Parses an hour written in ASCII digits or Chinese numerals, including the
/// 十-composed forms (十 = 10, 十一 = 11, 二十 = 20, 二十三 = 23).
fn parse_hour_token(token: &str) -> Option<u32> {
    if token.chars().all(|c| c.is_ascii_digit()) {
        return token.parse().ok().filter(|h| *h <= 23);
    }
    let digit = |c: char| -> Option<u32> {
        match c {
            '零' | '〇' => Some(0),
            '一' => Some(1),
            '二' | '两' => Some(2),
            '三' => Some(3),
            '四' => Some(4),
            '五' => Some(5),
            '六' => Some(6),
            '七' => Some(7),
            '八' => Some(8),
            '九' => Some(9),
            _ => None,
        }
    };
    let chars: Vec<char> = token.chars().collect();
    let value = match chars.as_slice() {
        [single] if *single == '十' => Some(10),
        [single] => digit(*single),
        ['十', ones] => digit(*ones).map(|v| 10 + v),
        [tens, '十'] => digit(*tens).map(|v| v * 10),
        [tens, '十', ones] => match (digit(*tens), digit(*ones)) {
            (Some(t), Some(o)) => Some(t * 10 + o),
            _ => None,
        },
        _ => None,
    };
    value.filter(|h| *h <= 23)
}

fn month_number(name: &str) -> u32 {
    match name.to_lowercase().as_str() {
        "january" => 1,
        "february" => 2,
        "march" => 3,
        "april" => 4,
        "may" => 5,
        "june" => 6,
        "july" => 7,
        "august" => 8,
        "september" => 9,
        "october" => 10,
        "november" => 11,
        _ => 12,
    }
}

fn overlaps_any(span: &Range<usize>, taken: &[Range<usize>]) -> bool {
    taken
        .iter()
        .any(|other| span.start < other.end && span.end > other.start)
}

fn merge_spans(mut spans: Vec<Range<usize>>) -> Vec<Range<usize>> {
    spans.sort_by_key(|span| span.start);
    let mut merged: Vec<Range<usize>> = Vec::new();
    for span in spans {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }
    merged
}
