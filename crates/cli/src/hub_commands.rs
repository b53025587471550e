//! Read-only hub queries. Output is pretty-printed JSON on stdout.

use std::path::Path;

use {
    anyhow::Result,
    clap::Subcommand,
    hubrelay_config::{load_config, resolve_config_path},
    hubrelay_hub::{HttpHubClient, HubQuery, OrgRegistry, run_query},
};

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum HubAction {
    /// List agents in the org.
    Peers,
    /// List threads.
    Threads {
        /// active, blocked, reviewing, resolved or closed.
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one thread.
    Thread { id: String },
    /// Messages of a thread.
    Messages {
        thread_id: String,
        #[arg(long)]
        limit: Option<u32>,
        /// Epoch milliseconds.
        #[arg(long)]
        since: Option<i64>,
        /// Epoch milliseconds.
        #[arg(long)]
        before: Option<i64>,
    },
    /// This agent's profile.
    Profile,
    /// Org info.
    Org,
    /// Events missed since a point in time.
    Catchup {
        /// Epoch milliseconds.
        #[arg(long)]
        since: i64,
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Count of events missed since a point in time.
    CatchupCount {
        /// Epoch milliseconds.
        #[arg(long)]
        since: i64,
    },
    /// Direct messages since a point in time.
    Inbox {
        /// Epoch milliseconds.
        #[arg(long)]
        since: i64,
    },
}

impl From<HubAction> for HubQuery {
    fn from(action: HubAction) -> Self {
        match action {
            HubAction::Peers => Self::Peers,
            HubAction::Threads { status } => Self::Threads { status },
            HubAction::Thread { id } => Self::Thread { id },
            HubAction::Messages {
                thread_id,
                limit,
                since,
                before,
            } => Self::Messages {
                thread_id,
                limit,
                since,
                before,
            },
            HubAction::Profile => Self::Profile,
            HubAction::Org => Self::Org,
            HubAction::Catchup {
                since,
                cursor,
                limit,
            } => Self::Catchup {
                since,
                cursor,
                limit,
            },
            HubAction::CatchupCount { since } => Self::CatchupCount { since },
            HubAction::Inbox { since } => Self::Inbox { since },
        }
    }
}

pub async fn handle_hub(config_path: Option<&Path>, org: Option<&str>, action: HubAction) -> Result<()> {
    let path = resolve_config_path(config_path)?;
    let config = load_config(&path)?;
    let registry = OrgRegistry::from_config(&config)?;
    let spec = registry.select(org)?;

    let client = HttpHubClient::new(spec)?;
    let answer = run_query(&client, &action.into()).await?;
    println!("{}", serde_json::to_string_pretty(&answer)?);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, clap::Parser};

    #[derive(Parser)]
    struct Harness {
        #[command(subcommand)]
        action: HubAction,
    }

    fn parse(args: &[&str]) -> HubQuery {
        let harness = Harness::try_parse_from(std::iter::once("hub").chain(args.iter().copied())).unwrap();
        harness.action.into()
    }

    #[test]
    fn flags_become_query_parameters() {
        assert_eq!(parse(&["threads", "--status", "active"]), HubQuery::Threads {
            status: Some("active".into()),
        });
        assert_eq!(
            parse(&["messages", "t-1", "--limit", "20", "--since", "1700000000000"]),
            HubQuery::Messages {
                thread_id: "t-1".into(),
                limit: Some(20),
                since: Some(1_700_000_000_000),
                before: None,
            }
        );
        assert_eq!(parse(&["catchup-count", "--since", "5"]), HubQuery::CatchupCount {
            since: 5
        });
    }

    #[test]
    fn catchup_and_inbox_need_a_start_time() {
        assert!(Harness::try_parse_from(["hub", "catchup"]).is_err());
        assert!(Harness::try_parse_from(["hub", "inbox"]).is_err());
    }
}
