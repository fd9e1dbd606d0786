//! Meeting scheduling dialogue.
//!
//! Nothing is stored between requests. Each request re-extracts the slots from
//! the whole history, merges them with the values the previous scheduler reply
//! recorded in its state marker, and picks the next prompt from the result.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ConciergeError, Result};
use crate::events::Sentinel;
use crate::models::{GenerateRequest, Role, Turn, render_transcript};
use crate::streaming::strip_code_fences;
use crate::transport::Transport;

/// Subject value the extractor returns when the user cancels.
pub const CANCELLED_SUBJECT: &str = "__CANCELLED__";

/// Opening words of the confirmation question. Only consulted when a reply
/// carries no state marker.
pub const CONFIRMATION_PREFIX: &str = "Please confirm the meeting details";

pub const EXTRACTION_APOLOGY: &str = "Sorry, I couldn't process the meeting details. Could you tell me again what the meeting is about and the date and time you prefer?";

const MARKER_OPEN: &str = "<!-- scheduling-state:";
const MARKER_CLOSE: &str = "-->";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slots {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
}

impl Slots {
    /// Blank strings and textual nulls become `None`.
    pub fn normalized(self) -> Self {
        fn clean(v: Option<String>) -> Option<String> {
            v.map(|s| s.trim().to_string()).filter(|s| {
                !s.is_empty() && !matches!(s.to_lowercase().as_str(), "null" | "none" | "n/a")
            })
        }
        Self {
            subject: clean(self.subject),
            date: clean(self.date),
            time: clean(self.time),
        }
    }

    /// Fresh non-null values win; nulls keep what was already known.
    pub fn merge(&self, fresh: &Slots) -> Slots {
        Slots {
            subject: fresh.subject.clone().or_else(|| self.subject.clone()),
            date: fresh.date.clone().or_else(|| self.date.clone()),
            time: fresh.time.clone().or_else(|| self.time.clone()),
        }
    }

    pub fn filled(&self) -> usize {
        [&self.subject, &self.date, &self.time]
            .iter()
            .filter(|v| v.is_some())
            .count()
    }

    fn is_cancellation(&self) -> bool {
        self.subject
            .as_deref()
            .is_some_and(|s| s.trim().eq_ignore_ascii_case(CANCELLED_SUBJECT))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    NeedSubject,
    NeedDate,
    NeedTime,
    AwaitingConfirmation,
    Done,
    Cancelled,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Cancelled)
    }

    pub fn sentinel(&self) -> Sentinel {
        match self {
            Stage::NeedSubject | Stage::NeedDate | Stage::NeedTime => Sentinel::ContinueScheduling,
            Stage::AwaitingConfirmation => Sentinel::AwaitingConfirmation,
            Stage::Done => Sentinel::ScheduleSuccess,
            Stage::Cancelled => Sentinel::ConversationEnded,
        }
    }
}

/// Tagged state appended to every scheduler reply as an HTML comment.
/// The client sends it back inside the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMarker {
    pub stage: Stage,
    #[serde(flatten)]
    pub slots: Slots,
}

impl StateMarker {
    pub fn render(&self) -> String {
        let body = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        // "--" may not appear inside an HTML comment and the reply is rendered as
        // HTML; '-', '<' and '>' can only occur inside string values.
        let body = body
            .replace('-', "\\u002d")
            .replace('<', "\\u003c")
            .replace('>', "\\u003e");
        format!("{MARKER_OPEN} {body} {MARKER_CLOSE}")
    }

    /// Last marker in `text`, if any parses.
    pub fn find_in(text: &str) -> Option<Self> {
        let start = text.rfind(MARKER_OPEN)? + MARKER_OPEN.len();
        let end = text[start..].find(MARKER_CLOSE)? + start;
        serde_json::from_str(text[start..end].trim()).ok()
    }
}

/// Everything the prompt ladder needs, derived from one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotState {
    pub slots: Slots,
    pub cancelled: bool,
    /// The assistant turn right before the latest user turn asked to confirm
    /// exactly these slots.
    pub confirmation_asked: bool,
    /// The latest user turn is a final "yes".
    pub confirmed: bool,
}

impl SlotState {
    pub fn stage(&self) -> Stage {
        if self.cancelled {
            Stage::Cancelled
        } else if self.slots.subject.is_none() {
            Stage::NeedSubject
        } else if self.slots.date.is_none() {
            Stage::NeedDate
        } else if self.slots.time.is_none() {
            Stage::NeedTime
        } else if self.confirmation_asked && self.confirmed {
            Stage::Done
        } else {
            Stage::AwaitingConfirmation
        }
    }
}

/// Slots recorded by the most recent scheduler reply of the ongoing dialogue.
/// A finished or cancelled dialogue contributes nothing.
pub fn remembered_slots(history: &[Turn]) -> Slots {
    history
        .iter()
        .rev()
        .filter(|t| t.role == Role::Model)
        .find_map(|t| StateMarker::find_in(&t.text()))
        .filter(|m| !m.stage.is_terminal())
        .map(|m| m.slots)
        .unwrap_or_default()
}

/// The model turn immediately preceding the latest user turn.
pub fn previous_assistant_turn(history: &[Turn]) -> Option<&Turn> {
    match history {
        [.., previous, last] if last.role == Role::User && previous.role == Role::Model => {
            Some(previous)
        }
        _ => None,
    }
}

pub fn was_confirmation_question(turn: &Turn) -> bool {
    let text = turn.text();
    match StateMarker::find_in(&text) {
        Some(marker) => marker.stage == Stage::AwaitingConfirmation,
        None => text.trim_start().starts_with(CONFIRMATION_PREFIX),
    }
}

/// True when `turn` asked to confirm `slots`. A legacy question without a
/// marker carries no slots to compare against.
pub fn asked_to_confirm(turn: &Turn, slots: &Slots) -> bool {
    was_confirmation_question(turn)
        && StateMarker::find_in(&turn.text()).is_none_or(|marker| marker.slots == *slots)
}

pub fn is_affirmative(text: &str, phrases: &[String]) -> bool {
    let normalized = text
        .trim()
        .trim_matches(|c: char| c.is_ascii_punctuation() || "¡¿".contains(c) || c.is_whitespace())
        .to_lowercase();
    if normalized.is_empty() {
        return false;
    }
    phrases.iter().any(|phrase| {
        let phrase = phrase.trim().to_lowercase();
        if phrase.is_empty() {
            return false;
        }
        normalized == phrase
            || normalized
                .strip_prefix(&phrase)
                .and_then(|rest| rest.chars().next())
                .is_some_and(|c| c == ',' || c == '!' || c == '.' || c.is_whitespace())
    })
}

/// Combines the fresh extraction with what the history already established.
pub fn derive_state(history: &[Turn], fresh: &Slots, affirmative_phrases: &[String]) -> SlotState {
    let remembered = remembered_slots(history);
    let cancelled = fresh.is_cancellation();
    let slots = if cancelled {
        remembered
    } else {
        remembered.merge(fresh)
    };

    let confirmation_asked =
        previous_assistant_turn(history).is_some_and(|turn| asked_to_confirm(turn, &slots));
    let confirmed = history
        .last()
        .filter(|t| t.role == Role::User)
        .is_some_and(|t| is_affirmative(&t.text(), affirmative_phrases));

    SlotState {
        slots,
        cancelled,
        confirmation_asked,
        confirmed,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub stage: Stage,
    /// Message shown to the user, state marker included.
    pub text: String,
    pub sentinel: Sentinel,
}

/// Picks the reply for a derived state.
pub fn next_action(state: &SlotState) -> Prompt {
    let stage = state.stage();
    let slots = &state.slots;
    let subject = escape_html(slots.subject.as_deref().unwrap_or_default());
    let date = escape_html(&slots.date.as_deref().map(display_date).unwrap_or_default());
    let time = escape_html(slots.time.as_deref().unwrap_or_default());

    let message = match stage {
        Stage::Cancelled => {
            "No problem, I've cancelled the scheduling request. Is there anything else I can help you with?".to_string()
        }
        Stage::NeedSubject => {
            "I'd be glad to help you schedule a meeting. What would you like the meeting to be about?".to_string()
        }
        Stage::NeedDate => {
            format!("Great, a meeting about \"{subject}\". What date works best for you?")
        }
        Stage::NeedTime => {
            format!("Perfect, {date}. What time would you like the meeting to start?")
        }
        Stage::AwaitingConfirmation => format!(
            "{CONFIRMATION_PREFIX}: subject \"{subject}\", date {date}, time {time}. Shall I schedule it? Reply \"yes\" to confirm."
        ),
        Stage::Done => format!(
            "All set! Your meeting about \"{subject}\" is scheduled for {date} at {time}. This is a simulation, so no calendar event has been created."
        ),
    };

    let marker = StateMarker {
        stage,
        slots: slots.clone(),
    };

    Prompt {
        stage,
        text: format!("{message}\n{}", marker.render()),
        sentinel: stage.sentinel(),
    }
}

/// Slot values come from user text and replies are rendered as HTML.
fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// `2026-10-17` becomes `Saturday, October 17, 2026`; anything else is shown as is.
fn display_date(raw: &str) -> String {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|d| d.format("%A, %B %-d, %Y").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

// ───────────────────────────────────────────────────────────────────────────────
// Extraction
// ───────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait SlotExtractor: Send + Sync {
    async fn extract(&self, history: &[Turn], today: NaiveDate) -> Result<Slots>;
}

pub struct GeminiSlotExtractor {
    tx: Arc<dyn Transport>,
    model: String,
}

impl GeminiSlotExtractor {
    pub fn new(tx: Arc<dyn Transport>, model: String) -> Self {
        Self { tx, model }
    }
}

fn slot_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "subject": { "type": "STRING", "nullable": true },
            "date": { "type": "STRING", "nullable": true },
            "time": { "type": "STRING", "nullable": true }
        },
        "required": ["subject", "date", "time"]
    })
}

pub fn extraction_prompt(history: &[Turn], today: NaiveDate) -> String {
    format!(
        r#"You extract meeting details from a conversation between a user and an assistant.
Today is {today_iso} ({weekday}). Resolve relative expressions such as "tomorrow" or "next Monday" against today's date.

Return a JSON object with exactly these fields:
- "subject": what the meeting is about, or null if not stated.
- "date": the meeting date as YYYY-MM-DD, or null if not stated.
- "time": the start time as HH:MM in 24-hour format, or null if not stated.

Only use what the user actually said about the current scheduling request. Ignore details of meetings that were already confirmed or cancelled earlier in the conversation.
If the user's latest message cancels the scheduling request or says they no longer want the meeting, return {{"subject": "{CANCELLED_SUBJECT}", "date": null, "time": null}}.

Conversation:
{transcript}"#,
        today_iso = today.format("%Y-%m-%d"),
        weekday = today.format("%A"),
        transcript = render_transcript(history),
    )
}

/// Parses the extractor's JSON reply. Anything that is not an object with
/// nullable string fields is an extraction error.
pub fn parse_extraction(raw: &str) -> Result<Slots> {
    let cleaned = strip_code_fences(raw);
    serde_json::from_str::<Slots>(cleaned.trim())
        .map(Slots::normalized)
        .map_err(|e| ConciergeError::Extraction(format!("{e}. Raw: {raw}")))
}

#[async_trait]
impl SlotExtractor for GeminiSlotExtractor {
    async fn extract(&self, history: &[Turn], today: NaiveDate) -> Result<Slots> {
        let request =
            GenerateRequest::prompt(extraction_prompt(history, today)).with_json_schema(slot_schema());
        let reply = self.tx.generate(&self.model, &request).await?;
        parse_extraction(&reply)
    }
}

/// One scheduler answer: a single message and its sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerReply {
    pub text: String,
    pub sentinel: Sentinel,
}

pub struct Scheduler {
    extractor: Arc<dyn SlotExtractor>,
    affirmative_phrases: Vec<String>,
}

impl Scheduler {
    pub fn new(extractor: Arc<dyn SlotExtractor>, affirmative_phrases: Vec<String>) -> Self {
        Self {
            extractor,
            affirmative_phrases,
        }
    }

    pub async fn respond(&self, history: &[Turn], today: NaiveDate) -> SchedulerReply {
        let fresh = match self.extractor.extract(history, today).await {
            Ok(slots) => slots,
            Err(e) => {
                warn!("Slot extraction failed: {}", e);
                return SchedulerReply {
                    text: EXTRACTION_APOLOGY.to_string(),
                    sentinel: Sentinel::ScheduleError,
                };
            }
        };

        let state = derive_state(history, &fresh, &self.affirmative_phrases);
        let prompt = next_action(&state);
        info!(
            stage = ?prompt.stage,
            filled = state.slots.filled(),
            "Scheduling turn resolved"
        );

        SchedulerReply {
            text: prompt.text,
            sentinel: prompt.sentinel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulingConfig;
    use std::sync::Mutex;

    fn phrases() -> Vec<String> {
        SchedulingConfig::default().affirmative_phrases
    }

    fn slots(subject: Option<&str>, date: Option<&str>, time: Option<&str>) -> Slots {
        Slots {
            subject: subject.map(str::to_string),
            date: date.map(str::to_string),
            time: time.map(str::to_string),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).expect("valid date")
    }

    /// Replays queued extraction results, last first.
    struct QueuedExtractor {
        results: Mutex<Vec<Result<Slots>>>,
    }

    impl QueuedExtractor {
        fn new(mut results: Vec<Result<Slots>>) -> Self {
            results.reverse();
            Self {
                results: Mutex::new(results),
            }
        }
    }

    #[async_trait]
    impl SlotExtractor for QueuedExtractor {
        async fn extract(&self, _history: &[Turn], _today: NaiveDate) -> Result<Slots> {
            self.results
                .lock()
                .expect("extractor mutex")
                .pop()
                .unwrap_or_else(|| Err(ConciergeError::Internal("no more results".to_string())))
        }
    }

    #[test]
    fn test_merge_never_regresses() {
        let known = slots(Some("pricing"), Some("2026-10-17"), None);
        let merged = known.merge(&slots(None, None, Some("15:00")));
        assert_eq!(merged, slots(Some("pricing"), Some("2026-10-17"), Some("15:00")));

        let overwritten = known.merge(&slots(None, Some("2026-10-20"), None));
        assert_eq!(overwritten.date.as_deref(), Some("2026-10-20"));
        assert_eq!(overwritten.subject.as_deref(), Some("pricing"));
    }

    #[test]
    fn test_stage_ladder() {
        let mut state = SlotState {
            slots: Slots::default(),
            cancelled: false,
            confirmation_asked: false,
            confirmed: true,
        };
        assert_eq!(state.stage(), Stage::NeedSubject);
        state.slots.date = Some("2026-10-17".to_string());
        assert_eq!(state.stage(), Stage::NeedSubject);
        state.slots.subject = Some("pricing".to_string());
        assert_eq!(state.stage(), Stage::NeedTime);
        state.slots.date = None;
        assert_eq!(state.stage(), Stage::NeedDate);
        state.slots.date = Some("2026-10-17".to_string());
        state.slots.time = Some("15:00".to_string());
        assert_eq!(state.stage(), Stage::AwaitingConfirmation);
        state.confirmation_asked = true;
        assert_eq!(state.stage(), Stage::Done);
        state.cancelled = true;
        assert_eq!(state.stage(), Stage::Cancelled);
    }

    #[test]
    fn test_marker_round_trip_inside_html_comment() {
        let marker = StateMarker {
            stage: Stage::NeedTime,
            slots: slots(Some("pricing --> review"), Some("2026-10-17"), None),
        };
        let rendered = marker.render();
        let inner = &rendered[MARKER_OPEN.len()..rendered.len() - MARKER_CLOSE.len()];
        assert!(!inner.contains("--"));
        let text = format!("Perfect.\n{rendered}");
        assert_eq!(StateMarker::find_in(&text), Some(marker));
    }

    #[test]
    fn test_terminal_markers_are_forgotten() {
        let done = next_action(&SlotState {
            slots: slots(Some("pricing"), Some("2026-10-17"), Some("15:00")),
            cancelled: false,
            confirmation_asked: true,
            confirmed: true,
        });
        assert_eq!(done.stage, Stage::Done);
        let history = vec![
            Turn::user("yes"),
            Turn::model(done.text),
            Turn::user("Schedule another meeting"),
        ];
        assert_eq!(remembered_slots(&history), Slots::default());
    }

    #[test]
    fn test_affirmative_detection() {
        let p = phrases();
        assert!(is_affirmative("Yes!", &p));
        assert!(is_affirmative("  sí ", &p));
        assert!(is_affirmative("¡Sí, confirmo!", &p));
        assert!(is_affirmative("yes, please go ahead", &p));
        assert!(!is_affirmative("yesterday works", &p));
        assert!(!is_affirmative("no", &p));
        assert!(!is_affirmative("", &p));
    }

    #[test]
    fn test_legacy_confirmation_prefix_without_marker() {
        let turn = Turn::model("Please confirm the meeting details: subject \"x\". Shall I schedule it?");
        assert!(was_confirmation_question(&turn));
        assert!(!was_confirmation_question(&Turn::model("What time would you like?")));
    }

    #[test]
    fn test_confirmation_requires_preceding_question() {
        let history = vec![
            Turn::user("Book a meeting about pricing tomorrow at 3pm"),
            Turn::model("Sure, let me check."),
            Turn::user("yes"),
        ];
        let fresh = slots(Some("pricing"), Some("2026-10-17"), Some("15:00"));
        let state = derive_state(&history, &fresh, &phrases());
        assert!(state.confirmed);
        assert!(!state.confirmation_asked);
        assert_eq!(state.stage(), Stage::AwaitingConfirmation);
    }

    #[test]
    fn test_parse_extraction() {
        assert_eq!(
            parse_extraction(r#"{"subject": "pricing", "date": null, "time": "null"}"#)
                .expect("valid json"),
            slots(Some("pricing"), None, None)
        );
        assert_eq!(
            parse_extraction("```json\n{\"subject\": \" \", \"date\": \"2026-10-17\"}\n```")
                .expect("fenced json"),
            slots(None, Some("2026-10-17"), None)
        );
        assert!(matches!(
            parse_extraction("Sure! The subject is pricing."),
            Err(ConciergeError::Extraction(_))
        ));
        assert!(parse_extraction(r#"{"subject": 42}"#).is_err());
    }

    #[test]
    fn test_extraction_prompt_carries_reference_date() {
        let prompt = extraction_prompt(&[Turn::user("tomorrow please")], today());
        assert!(prompt.contains("Today is 2026-10-16 (Friday)"));
        assert!(prompt.contains("User: tomorrow please"));
        assert!(prompt.contains(CANCELLED_SUBJECT));
    }

    #[tokio::test]
    async fn test_subject_only_asks_for_date() {
        let scheduler = Scheduler::new(
            Arc::new(QueuedExtractor::new(vec![Ok(slots(Some("pricing"), None, None))])),
            phrases(),
        );
        let history = vec![Turn::user("I'd like to schedule a call about pricing")];
        let reply = scheduler.respond(&history, today()).await;

        assert_eq!(reply.sentinel, Sentinel::ContinueScheduling);
        assert!(reply.text.contains("What date works best for you?"));
        assert!(reply.text.contains("pricing"));
    }

    #[tokio::test]
    async fn test_full_dialogue_accumulates_monotonically() {
        // Each turn supplies one field; the extractor misses earlier facts on
        // later turns and the markers keep them.
        let supplied = [
            (slots(Some("pricing"), None, None), "It's about pricing"),
            (slots(None, Some("2026-10-17"), None), "Tomorrow"),
            (slots(None, None, Some("15:00")), "3pm"),
        ];
        let orderings = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

        for order in orderings {
            let mut extractions: Vec<Result<Slots>> =
                order.iter().map(|&i| Ok(supplied[i].0.clone())).collect();
            extractions.push(Ok(Slots::default()));
            let scheduler = Scheduler::new(Arc::new(QueuedExtractor::new(extractions)), phrases());

            let mut history = vec![Turn::user(supplied[order[0]].1)];
            let mut filled = Vec::new();
            let mut sentinels = Vec::new();
            let user_turns = order.iter().skip(1).map(|&i| supplied[i].1).chain(["yes"]);
            for next_user in user_turns {
                let reply = scheduler.respond(&history, today()).await;
                sentinels.push(reply.sentinel);
                filled.push(remembered_slots(&[Turn::model(reply.text.clone())]).filled());
                history.push(Turn::model(reply.text));
                history.push(Turn::user(next_user));
            }
            let last = scheduler.respond(&history, today()).await;
            sentinels.push(last.sentinel);

            assert_eq!(filled, vec![1, 2, 3], "order: {order:?}");
            assert_eq!(
                sentinels,
                vec![
                    Sentinel::ContinueScheduling,
                    Sentinel::ContinueScheduling,
                    Sentinel::AwaitingConfirmation,
                    Sentinel::ScheduleSuccess,
                ],
                "order: {order:?}"
            );
            assert!(last.text.contains("Saturday, October 17, 2026"));
            assert!(last.text.contains("15:00"));
            assert!(last.text.contains("simulation"));
        }
    }

    #[tokio::test]
    async fn test_changed_detail_in_confirmation_reply_is_asked_again() {
        let confirmed = slots(Some("pricing"), Some("2026-10-17"), Some("15:00"));
        let question = next_action(&SlotState {
            slots: confirmed,
            cancelled: false,
            confirmation_asked: false,
            confirmed: false,
        });
        assert_eq!(question.stage, Stage::AwaitingConfirmation);

        let scheduler = Scheduler::new(
            Arc::new(QueuedExtractor::new(vec![
                Ok(slots(None, Some("2026-10-20"), None)),
                Ok(Slots::default()),
            ])),
            phrases(),
        );
        let mut history = vec![
            Turn::user("Schedule a pricing call tomorrow at 3pm"),
            Turn::model(question.text),
            Turn::user("yes, but make it Tuesday the 20th instead"),
        ];

        let reply = scheduler.respond(&history, today()).await;
        assert_eq!(reply.sentinel, Sentinel::AwaitingConfirmation);
        assert!(reply.text.contains("Tuesday, October 20, 2026"));
        assert!(!reply.text.contains("All set"));

        history.push(Turn::model(reply.text));
        history.push(Turn::user("yes"));
        let booked = scheduler.respond(&history, today()).await;
        assert_eq!(booked.sentinel, Sentinel::ScheduleSuccess);
        assert!(booked.text.contains("Tuesday, October 20, 2026"));
    }

    #[test]
    fn test_slot_values_are_escaped_in_replies() {
        let prompt = next_action(&SlotState {
            slots: slots(Some("<img src=x onerror=alert(1)>"), None, None),
            cancelled: false,
            confirmation_asked: false,
            confirmed: false,
        });
        assert!(!prompt.text.contains("<img"));
        assert!(prompt.text.contains("&lt;img src=x onerror=alert(1)&gt;"));
        assert_eq!(
            remembered_slots(&[Turn::model(prompt.text)]).subject.as_deref(),
            Some("<img src=x onerror=alert(1)>")
        );
    }

    #[tokio::test]
    async fn test_cancellation_wins() {
        let scheduler = Scheduler::new(
            Arc::new(QueuedExtractor::new(vec![Ok(slots(
                Some("__cancelled__"),
                Some("2026-10-17"),
                None,
            ))])),
            phrases(),
        );
        let history = vec![
            Turn::user("schedule a meeting"),
            Turn::model("What would you like the meeting to be about?"),
            Turn::user("never mind, cancel it"),
        ];
        let reply = scheduler.respond(&history, today()).await;
        assert_eq!(reply.sentinel, Sentinel::ConversationEnded);
        assert!(reply.text.contains("cancelled"));
    }

    #[tokio::test]
    async fn test_extraction_failure_apologizes() {
        let scheduler = Scheduler::new(
            Arc::new(QueuedExtractor::new(vec![Err(ConciergeError::Extraction(
                "expected value".to_string(),
            ))])),
            phrases(),
        );
        let reply = scheduler.respond(&[Turn::user("meeting?")], today()).await;
        assert_eq!(reply.sentinel, Sentinel::ScheduleError);
        assert_eq!(reply.text, EXTRACTION_APOLOGY);
    }
}
