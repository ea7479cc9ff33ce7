//! Translation of OpenAI chat requests into the vendor chat payload.

use chrono::{DateTime, TimeZone};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::proxy::types::{ChatCompletionRequest, Message, Role};

/// Status the vendor expects on every prior turn.
const HISTORY_STATUS: &str = "success";
const INTENT_NAME: &str = "general_qa_intent";
/// `YYYYMMDD HH:MM:SS <WeekdayName>`
const CURRENT_TIME_FORMAT: &str = "%Y%m%d %H:%M:%S %A";

/// Body of `POST /api/ide/v1/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatPayload {
    pub chat_history: Vec<HistoryEntry>,
    pub context_resolvers: Vec<serde_json::Value>,
    pub conversation_id: String,
    pub current_turn: usize,
    pub generate_suggested_questions: bool,
    pub intent_name: &'static str,
    pub is_preset: bool,
    pub model_name: String,
    pub session_id: String,
    pub stream: bool,
    pub user_input: String,
    pub valid_turns: Vec<u32>,
    /// JSON document encoded as a string; see [`Variables`].
    pub variables: String,
}

/// A prior turn, framed as already completed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub status: &'static str,
    pub locale: String,
}

/// Contents of the nested `variables` string.
#[derive(Debug, Serialize)]
struct Variables<'a> {
    locale: &'a str,
    current_time: String,
}

/// Build the vendor payload for a chat request.
///
/// `now` is the clock reading used for `current_time`; callers pass
/// `chrono::Local::now()` so the timestamp is in the server's time zone.
/// Fresh conversation and session ids are generated on every call.
pub fn build_payload<Tz>(
    request: &ChatCompletionRequest,
    locale: &str,
    now: DateTime<Tz>,
) -> Result<ChatPayload>
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let (last, history) = request
        .messages
        .split_last()
        .ok_or_else(|| Error::InvalidRequest("messages must not be empty".to_string()))?;

    let variables = serde_json::to_string(&Variables {
        locale,
        current_time: now.format(CURRENT_TIME_FORMAT).to_string(),
    })
    .map_err(|e| Error::Internal(format!("Failed to encode variables: {}", e)))?;

    Ok(ChatPayload {
        chat_history: history
            .iter()
            .map(|m| HistoryEntry {
                role: m.role,
                content: m.content.clone(),
                status: HISTORY_STATUS,
                locale: locale.to_string(),
            })
            .collect(),
        context_resolvers: Vec::new(),
        conversation_id: uuid::Uuid::new_v4().to_string(),
        current_turn: count_user_turns(history),
        generate_suggested_questions: false,
        intent_name: INTENT_NAME,
        is_preset: true,
        model_name: request.model.clone(),
        session_id: uuid::Uuid::new_v4().to_string(),
        stream: request.stream,
        user_input: last.content.clone(),
        valid_turns: Vec::new(),
        variables,
    })
}

/// Number of user-authored messages in `history`.
fn count_user_turns(history: &[Message]) -> usize {
    history.iter().filter(|m| m.role == Role::User).count()
}
