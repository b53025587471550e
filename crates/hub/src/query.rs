//! Read-only hub queries: peers, threads, messages, profile, org info and
//! the catch-up feed for events missed while disconnected.

use {
    hubrelay_channels::{Error as ChannelError, HubClient, Result as ChannelResult},
    serde_json::Value,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubQuery {
    /// Agents in the org.
    Peers,
    Threads {
        status: Option<String>,
    },
    Thread {
        id: String,
    },
    Messages {
        thread_id: String,
        limit: Option<u32>,
        /// Epoch milliseconds.
        since: Option<i64>,
        before: Option<i64>,
    },
    /// The agent's own profile.
    Profile,
    Org,
    /// Events since `since` (epoch ms), paged by `cursor`.
    Catchup {
        since: i64,
        cursor: Option<String>,
        limit: Option<u32>,
    },
    CatchupCount {
        since: i64,
    },
    /// Direct messages since `since` (epoch ms).
    Inbox {
        since: i64,
    },
}

impl HubQuery {
    /// API path segments and query parameters.
    pub fn request(&self) -> (Vec<&str>, Vec<(&'static str, String)>) {
        let mut params = Vec::new();
        let path = match self {
            Self::Peers => vec!["api", "peers"],
            Self::Threads { status } => {
                push(&mut params, "status", status.as_ref());
                vec!["api", "threads"]
            },
            Self::Thread { id } => vec!["api", "threads", id.as_str()],
            Self::Messages {
                thread_id,
                limit,
                since,
                before,
            } => {
                push(&mut params, "limit", limit.as_ref());
                push(&mut params, "since", since.as_ref());
                push(&mut params, "before", before.as_ref());
                vec!["api", "threads", thread_id.as_str(), "messages"]
            },
            Self::Profile => vec!["api", "me"],
            Self::Org => vec!["api", "org"],
            Self::Catchup {
                since,
                cursor,
                limit,
            } => {
                params.push(("since", since.to_string()));
                push(&mut params, "cursor", cursor.as_ref());
                push(&mut params, "limit", limit.as_ref());
                vec!["api", "me", "catchup"]
            },
            Self::CatchupCount { since } => {
                params.push(("since", since.to_string()));
                vec!["api", "me", "catchup", "count"]
            },
            Self::Inbox { since } => {
                params.push(("since", since.to_string()));
                vec!["api", "inbox"]
            },
        };
        (path, params)
    }

    fn validate(&self) -> ChannelResult<()> {
        let id = match self {
            Self::Thread { id } => id,
            Self::Messages { thread_id, .. } => thread_id,
            _ => return Ok(()),
        };
        if id.trim().is_empty() {
            return Err(ChannelError::invalid_input("thread id must not be empty"));
        }
        Ok(())
    }
}

fn push(params: &mut Vec<(&'static str, String)>, key: &'static str, value: Option<&impl ToString>) {
    if let Some(value) = value {
        params.push((key, value.to_string()));
    }
}

/// Run one query and return the hub's JSON answer unchanged.
pub async fn run_query(client: &dyn HubClient, query: &HubQuery) -> ChannelResult<Value> {
    query.validate()?;
    let (path, params) = query.request();
    client.get_json(&path, &params).await
}
