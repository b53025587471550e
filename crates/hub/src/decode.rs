//! Raw hub frames to [`InboundEvent`]s.

use {
    hubrelay_channels::{Error, InboundEvent, Result, ThreadDetails},
    serde_json::Value,
};

const UNKNOWN_SENDER: &str = "unknown";
const UNTITLED: &str = "untitled";

/// Decode one text frame.
///
/// Returns `Ok(None)` for liveness frames (`pong`) that carry no event.
/// Malformed frames fail with [`Error::InvalidInput`] or [`Error::SerdeJson`];
/// callers drop them and keep the session running.
pub fn decode_frame(raw: &str) -> Result<Option<InboundEvent>> {
    let frame: Value = serde_json::from_str(raw)?;
    if !frame.is_object() {
        return Err(Error::invalid_input("frame is not a JSON object"));
    }
    let Some(kind) = text(&frame, &["type"]) else {
        return Err(Error::invalid_input("frame has no type"));
    };

    let event = match kind {
        "pong" => return Ok(None),
        "message" => InboundEvent::DirectMessage {
            sender: sender_name(&frame),
            sender_id: sender_id(&frame),
            content: content(&frame),
        },
        "channel_message" => {
            let group_id = required(&frame, &["channel_id"], kind)?;
            InboundEvent::GroupMessage {
                group_name: text(&frame, &["channel_name"])
                    .unwrap_or(&group_id)
                    .to_string(),
                group_id,
                sender: sender_name(&frame),
                sender_id: sender_id(&frame),
                content: content(&frame),
            }
        },
        "thread_message" => {
            let sender_id = text(&frame, &["message", "sender_id"]).map(str::to_string);
            InboundEvent::ThreadMessage {
                thread_id: required(&frame, &["thread_id"], kind)?,
                sender: text(&frame, &["message", "sender_name"])
                    .or(sender_id.as_deref())
                    .unwrap_or(UNKNOWN_SENDER)
                    .to_string(),
                sender_id,
                content: text(&frame, &["message", "content"])
                    .unwrap_or_default()
                    .to_string(),
            }
        },
        "thread_created" => InboundEvent::ThreadLifecycle {
            thread_id: required(&frame, &["thread", "id"], kind)?,
            details: ThreadDetails::Created {
                topic: owned_or(&frame, &["thread", "topic"], UNTITLED),
                tags: strings(&frame, &["thread", "tags"]),
            },
        },
        "thread_updated" => InboundEvent::ThreadLifecycle {
            thread_id: required(&frame, &["thread", "id"], kind)?,
            details: ThreadDetails::Updated {
                topic: owned_or(&frame, &["thread", "topic"], UNTITLED),
                changes: strings(&frame, &["changes"]),
                status: owned(&frame, &["thread", "status"]),
            },
        },
        "thread_artifact" => InboundEvent::ThreadLifecycle {
            thread_id: required(&frame, &["thread_id"], kind)?,
            details: ThreadDetails::Artifact {
                action: owned_or(&frame, &["action"], "added"),
                title: text(&frame, &["artifact", "title"])
                    .or_else(|| text(&frame, &["artifact", "artifact_key"]))
                    .unwrap_or(UNTITLED)
                    .to_string(),
                artifact_type: owned(&frame, &["artifact", "type"]),
            },
        },
        "thread_participant" => {
            let participant_id = owned(&frame, &["bot_id"]);
            InboundEvent::ThreadLifecycle {
                thread_id: required(&frame, &["thread_id"], kind)?,
                details: ThreadDetails::Participant {
                    participant: text(&frame, &["bot_name"])
                        .or(participant_id.as_deref())
                        .unwrap_or(UNKNOWN_SENDER)
                        .to_string(),
                    participant_id,
                    action: owned_or(&frame, &["action"], "joined"),
                    by: owned(&frame, &["by"]),
                    label: owned(&frame, &["label"]),
                },
            }
        },
        "agent_online" | "agent_offline" => {
            let name = owned(&frame, &["agent", "name"]);
            InboundEvent::PresenceChange {
                entity_id: text(&frame, &["agent", "id"])
                    .or(name.as_deref())
                    .unwrap_or(UNKNOWN_SENDER)
                    .to_string(),
                name,
                online: kind == "agent_online",
            }
        },
        other => InboundEvent::Unknown {
            raw_type: other.to_string(),
            raw_payload: frame.clone(),
        },
    };
    Ok(Some(event))
}

fn text<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |cur, key| cur.get(key))?
        .as_str()
        .filter(|s| !s.is_empty())
}

fn owned(value: &Value, path: &[&str]) -> Option<String> {
    text(value, path).map(str::to_string)
}

fn owned_or(value: &Value, path: &[&str], fallback: &str) -> String {
    text(value, path).unwrap_or(fallback).to_string()
}

fn required(value: &Value, path: &[&str], kind: &str) -> Result<String> {
    owned(value, path)
        .ok_or_else(|| Error::invalid_input(format!("{kind} frame missing {}", path.join("."))))
}

fn strings(value: &Value, path: &[&str]) -> Vec<String> {
    path.iter()
        .try_fold(value, |cur, key| cur.get(key))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn sender_name(frame: &Value) -> String {
    text(frame, &["sender_name"])
        .or_else(|| text(frame, &["message", "sender_name"]))
        .unwrap_or(UNKNOWN_SENDER)
        .to_string()
}

fn sender_id(frame: &Value) -> Option<String> {
    text(frame, &["message", "sender_id"])
        .or_else(|| text(frame, &["sender_id"]))
        .map(str::to_string)
}

fn content(frame: &Value) -> String {
    text(frame, &["message", "content"])
        .or_else(|| text(frame, &["content"]))
        .unwrap_or_default()
        .to_string()
}
