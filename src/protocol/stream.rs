//! Helpers for simulated streams: turning a short-circuited response into text
//! and shaping words as chat-completion chunks.

use crate::plugin::ResponseBody;
use serde_json::{json, Value};

/// Emitted instead of content that cannot be streamed as text
pub const UNSUPPORTED_CONTENT: &str = "[binary content not supported]";
/// Emitted when JSON content cannot be rendered to a string
pub const UNSERIALIZABLE_CONTENT: &str = "[unserializable content]";

pub const CHUNK_OBJECT: &str = "chat.completion.chunk";
pub const DEFAULT_MODEL: &str = "mock";

/// Text to stream for a short-circuited response.
///
/// Supports plain strings, chat completions (`choices[0].message.content`),
/// `{ "content": "..." }` wrappers, and falls back to the JSON text.
pub fn extract_stream_content(body: &ResponseBody) -> String {
    let value = match body {
        ResponseBody::Binary(_) => return UNSUPPORTED_CONTENT.to_string(),
        ResponseBody::Json(value) => value,
    };

    if let Some(text) = value.as_str() {
        return text.to_string();
    }

    let completion = value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str);
    if let Some(text) = completion.or_else(|| value.get("content").and_then(Value::as_str)) {
        return text.to_string();
    }

    serde_json::to_string(value).unwrap_or_else(|_| UNSERIALIZABLE_CONTENT.to_string())
}

/// Model name to report in chunks; taken from the response when present
pub fn stream_model(body: &ResponseBody) -> String {
    body.as_json()
        .and_then(|v| v.get("model"))
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_MODEL)
        .to_string()
}

/// Split content into per-word deltas. Every word but the last keeps one
/// trailing space so the deltas concatenate back to the normalized text.
pub fn word_deltas(content: &str) -> Vec<String> {
    let words: Vec<&str> = content.split_whitespace().collect();
    let last = words.len().saturating_sub(1);
    words
        .iter()
        .enumerate()
        .map(|(index, word)| {
            if index == last {
                word.to_string()
            } else {
                format!("{word} ")
            }
        })
        .collect()
}

pub fn completion_chunk(id: &str, model: &str, created: i64, content: &str, is_last: bool) -> Value {
    let finish_reason = if is_last { Value::from("stop") } else { Value::Null };
    json!({
        "id": id,
        "object": CHUNK_OBJECT,
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": { "content": content },
            "finish_reason": finish_reason,
        }],
    })
}
