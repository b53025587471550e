use serde_json::Value;

/// Thread lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadLifecycleKind {
    Created,
    Updated,
    Participant,
    Artifact,
}

/// Kind-specific payload of a thread lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadDetails {
    Created {
        topic: String,
        tags: Vec<String>,
    },
    Updated {
        topic: String,
        changes: Vec<String>,
        status: Option<String>,
    },
    Participant {
        participant: String,
        participant_id: Option<String>,
        /// `joined`, `left`, ...
        action: String,
        by: Option<String>,
        label: Option<String>,
    },
    Artifact {
        action: String,
        title: String,
        artifact_type: Option<String>,
    },
}

impl ThreadDetails {
    pub fn kind(&self) -> ThreadLifecycleKind {
        match self {
            Self::Created { .. } => ThreadLifecycleKind::Created,
            Self::Updated { .. } => ThreadLifecycleKind::Updated,
            Self::Participant { .. } => ThreadLifecycleKind::Participant,
            Self::Artifact { .. } => ThreadLifecycleKind::Artifact,
        }
    }
}

/// A hub frame normalized into the closed set of events the relay handles.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    DirectMessage {
        sender: String,
        sender_id: Option<String>,
        content: String,
    },
    GroupMessage {
        group_id: String,
        group_name: String,
        sender: String,
        sender_id: Option<String>,
        content: String,
    },
    ThreadMessage {
        thread_id: String,
        sender: String,
        sender_id: Option<String>,
        content: String,
    },
    ThreadLifecycle {
        thread_id: String,
        details: ThreadDetails,
    },
    PresenceChange {
        entity_id: String,
        name: Option<String>,
        online: bool,
    },
    /// A frame type this relay does not understand yet.
    Unknown {
        raw_type: String,
        raw_payload: Value,
    },
}

impl InboundEvent {
    /// Hub id of whoever caused the event, when the frame carried one.
    pub fn origin_id(&self) -> Option<&str> {
        match self {
            Self::DirectMessage { sender_id, .. }
            | Self::GroupMessage { sender_id, .. }
            | Self::ThreadMessage { sender_id, .. } => sender_id.as_deref(),
            Self::ThreadLifecycle {
                details: ThreadDetails::Participant { participant_id, .. },
                ..
            } => participant_id.as_deref(),
            Self::PresenceChange { entity_id, .. } => Some(entity_id),
            Self::ThreadLifecycle { .. } | Self::Unknown { .. } => None,
        }
    }

    /// Display name of whoever caused the event.
    pub fn origin_name(&self) -> Option<&str> {
        match self {
            Self::DirectMessage { sender, .. }
            | Self::GroupMessage { sender, .. }
            | Self::ThreadMessage { sender, .. } => Some(sender),
            Self::ThreadLifecycle {
                details: ThreadDetails::Participant { participant, .. },
                ..
            } => Some(participant),
            Self::PresenceChange { name, .. } => name.as_deref(),
            Self::ThreadLifecycle { .. } | Self::Unknown { .. } => None,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DirectMessage { .. } => "dm",
            Self::GroupMessage { .. } => "group",
            Self::ThreadMessage { .. } => "thread_message",
            Self::ThreadLifecycle { details, .. } => match details.kind() {
                ThreadLifecycleKind::Created => "thread_created",
                ThreadLifecycleKind::Updated => "thread_updated",
                ThreadLifecycleKind::Participant => "thread_participant",
                ThreadLifecycleKind::Artifact => "thread_artifact",
            },
            Self::PresenceChange { .. } => "presence",
            Self::Unknown { .. } => "unknown",
        }
    }
}
