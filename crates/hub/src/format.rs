//! Human-readable rendering of accepted events.

use hubrelay_channels::{InboundEvent, ThreadDetails};

use crate::threads::BufferedMessage;

const TAG: &str = "HXA";

/// `[HXA <scope>]`, or `[HXA:<label> <scope>]` when running several orgs.
fn header(label: Option<&str>, scope: &str) -> String {
    match label {
        Some(label) => format!("[{TAG}:{label} {scope}]"),
        None => format!("[{TAG} {scope}]"),
    }
}

/// Render an event for the consumer.
///
/// Returns `None` for events that are never delivered (presence, unknown
/// frames) and for messages with empty content.
pub fn format_event(event: &InboundEvent, label: Option<&str>) -> Option<String> {
    let line = match event {
        InboundEvent::DirectMessage {
            sender, content, ..
        } => {
            non_empty(content)?;
            format!("{} {sender} said: {content}", header(label, "DM"))
        },
        InboundEvent::GroupMessage {
            group_name,
            sender,
            content,
            ..
        } => {
            non_empty(content)?;
            format!(
                "{} {sender} said: {content}",
                header(label, &format!("GROUP:{group_name}"))
            )
        },
        InboundEvent::ThreadMessage {
            thread_id,
            sender,
            content,
            ..
        } => {
            non_empty(content)?;
            format!(
                "{} {sender} said: {content}",
                header(label, &thread_scope(thread_id))
            )
        },
        InboundEvent::ThreadLifecycle { thread_id, details } => {
            format_lifecycle(thread_id, details, label)
        },
        InboundEvent::PresenceChange { .. } | InboundEvent::Unknown { .. } => return None,
    };
    Some(line)
}

fn format_lifecycle(thread_id: &str, details: &ThreadDetails, label: Option<&str>) -> String {
    match details {
        ThreadDetails::Created { topic, tags } => {
            let tags = if tags.is_empty() {
                "none".to_string()
            } else {
                tags.join(", ")
            };
            format!(
                "{} New thread created: \"{topic}\" (tags: {tags}, id: {thread_id})",
                header(label, "Thread")
            )
        },
        ThreadDetails::Updated {
            topic,
            changes,
            status,
        } => format!(
            "{} Thread \"{topic}\" updated: {} (status: {})",
            header(label, &thread_scope(thread_id)),
            changes.join(", "),
            status.as_deref().unwrap_or("unknown"),
        ),
        ThreadDetails::Artifact {
            action,
            title,
            artifact_type,
        } => format!(
            "{} Artifact {action}: \"{title}\" (type: {})",
            header(label, &thread_scope(thread_id)),
            artifact_type.as_deref().unwrap_or("unknown"),
        ),
        ThreadDetails::Participant {
            participant,
            action,
            by,
            label: role,
            ..
        } => {
            let mut line = format!("{} {participant}", header(label, &thread_scope(thread_id)));
            if let Some(role) = role {
                line.push_str(&format!(" [{role}]"));
            }
            line.push_str(&format!(" {action} the thread"));
            if let Some(by) = by {
                line.push_str(&format!(" (by {by})"));
            }
            line
        },
    }
}

/// Render a mention together with the thread messages buffered before it.
pub fn format_mention(
    thread_id: &str,
    sender: &str,
    content: &str,
    context: &[BufferedMessage],
    label: Option<&str>,
) -> String {
    let mut out = format!(
        "{} {sender} mentioned you: {content}",
        header(label, &thread_scope(thread_id))
    );
    if !context.is_empty() {
        out.push_str("\n\nRecent thread context:");
        for msg in context {
            out.push_str(&format!("\n- {}: {}", msg.sender, msg.content));
        }
    }
    out
}

fn thread_scope(thread_id: &str) -> String {
    format!("Thread:{thread_id}")
}

fn non_empty(content: &str) -> Option<()> {
    (!content.is_empty()).then_some(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, rstest::rstest};

    fn dm(content: &str) -> InboundEvent {
        InboundEvent::DirectMessage {
            sender: "alice".into(),
            sender_id: None,
            content: content.into(),
        }
    }

    fn lifecycle(details: ThreadDetails) -> InboundEvent {
        InboundEvent::ThreadLifecycle {
            thread_id: "t-1".into(),
            details,
        }
    }

    #[rstest]
    #[case(None, "[HXA DM] alice said: hi")]
    #[case(Some("acme"), "[HXA:acme DM] alice said: hi")]
    fn direct_message(#[case] label: Option<&str>, #[case] expected: &str) {
        assert_eq!(format_event(&dm("hi"), label).unwrap(), expected);
    }

    #[test]
    fn empty_content_is_not_delivered() {
        assert_eq!(format_event(&dm(""), None), None);
    }

    #[test]
    fn group_and_thread_messages() {
        let group = InboundEvent::GroupMessage {
            group_id: "c-9".into(),
            group_name: "ops".into(),
            sender: "bob".into(),
            sender_id: None,
            content: "deploy?".into(),
        };
        assert_eq!(
            format_event(&group, None).unwrap(),
            "[HXA GROUP:ops] bob said: deploy?"
        );

        let thread = InboundEvent::ThreadMessage {
            thread_id: "t-1".into(),
            sender: "bob".into(),
            sender_id: None,
            content: "done".into(),
        };
        assert_eq!(
            format_event(&thread, Some("beta")).unwrap(),
            "[HXA:beta Thread:t-1] bob said: done"
        );
    }

    #[rstest]
    #[case(
        ThreadDetails::Created { topic: "launch".into(), tags: vec![] },
        "[HXA Thread] New thread created: \"launch\" (tags: none, id: t-1)"
    )]
    #[case(
        ThreadDetails::Created { topic: "launch".into(), tags: vec!["ops".into(), "q3".into()] },
        "[HXA Thread] New thread created: \"launch\" (tags: ops, q3, id: t-1)"
    )]
    #[case(
        ThreadDetails::Updated {
            topic: "launch".into(),
            changes: vec!["status".into(), "topic".into()],
            status: Some("resolved".into()),
        },
        "[HXA Thread:t-1] Thread \"launch\" updated: status, topic (status: resolved)"
    )]
    #[case(
        ThreadDetails::Artifact {
            action: "updated".into(),
            title: "plan.md".into(),
            artifact_type: Some("markdown".into()),
        },
        "[HXA Thread:t-1] Artifact updated: \"plan.md\" (type: markdown)"
    )]
    #[case(
        ThreadDetails::Participant {
            participant: "helper".into(),
            participant_id: None,
            action: "joined".into(),
            by: Some("alice".into()),
            label: Some("reviewer".into()),
        },
        "[HXA Thread:t-1] helper [reviewer] joined the thread (by alice)"
    )]
    #[case(
        ThreadDetails::Participant {
            participant: "helper".into(),
            participant_id: None,
            action: "left".into(),
            by: None,
            label: None,
        },
        "[HXA Thread:t-1] helper left the thread"
    )]
    fn lifecycle_lines(#[case] details: ThreadDetails, #[case] expected: &str) {
        assert_eq!(format_event(&lifecycle(details), None).unwrap(), expected);
    }

    #[test]
    fn presence_and_unknown_are_not_rendered() {
        let presence = InboundEvent::PresenceChange {
            entity_id: "a-1".into(),
            name: None,
            online: true,
        };
        assert_eq!(format_event(&presence, None), None);
        let unknown = InboundEvent::Unknown {
            raw_type: "x".into(),
            raw_payload: serde_json::json!({}),
        };
        assert_eq!(format_event(&unknown, None), None);
    }

    #[test]
    fn mention_bundles_context() {
        let context = vec![
            BufferedMessage {
                sender: "alice".into(),
                content: "first".into(),
            },
            BufferedMessage {
                sender: "bob".into(),
                content: "second".into(),
            },
        ];
        assert_eq!(
            format_mention("t-1", "carol", "@relay-bot thoughts?", &context, None),
            "[HXA Thread:t-1] carol mentioned you: @relay-bot thoughts?\n\n\
             Recent thread context:\n- alice: first\n- bob: second"
        );
        assert_eq!(
            format_mention("t-1", "carol", "@relay-bot hi", &[], Some("acme")),
            "[HXA:acme Thread:t-1] carol mentioned you: @relay-bot hi"
        );
    }
}
