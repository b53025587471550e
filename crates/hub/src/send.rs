//! Outbound sends addressed with routing endpoint strings.

use std::{fmt, sync::Arc};

use {
    hubrelay_channels::{EndpointTarget, Error as ChannelError, HubClient, RoutingEndpoint},
    tracing::{debug, info},
};

use crate::{
    Error, Result,
    delivery::{LOG_PREVIEW_CHARS, preview},
    registry::{OrgRegistry, OrgSpec},
};

/// Where an outbound message actually goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTarget {
    Direct(String),
    Thread(String),
}

impl fmt::Display for SendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(name) => write!(f, "DM to {name}"),
            Self::Thread(id) => write!(f, "thread {id}"),
        }
    }
}

/// Resolve an endpoint target against the hub.
///
/// A bare name is tried as a thread id first and only treated as a DM
/// recipient when the hub reports no such thread. Group channels cannot be
/// sent to.
pub async fn resolve_target(
    client: &dyn HubClient,
    target: &EndpointTarget,
) -> hubrelay_channels::Result<SendTarget> {
    match target {
        EndpointTarget::Channel(id) => Err(ChannelError::unsupported(format!(
            "sending to group channel {id} is not supported"
        ))),
        EndpointTarget::Thread(id) => Ok(SendTarget::Thread(id.clone())),
        EndpointTarget::Direct(name) => match client.get_thread(name).await {
            Ok(thread) => {
                debug!(thread = %thread.id, "target resolved to a thread");
                Ok(SendTarget::Thread(thread.id))
            },
            Err(e) if e.is_not_found() => Ok(SendTarget::Direct(name.clone())),
            Err(e) => Err(e),
        },
    }
}

/// Resolve and send. Returns where the message went.
pub async fn send_message(
    client: &dyn HubClient,
    target: &EndpointTarget,
    content: &str,
) -> hubrelay_channels::Result<SendTarget> {
    if content.trim().is_empty() {
        return Err(ChannelError::invalid_input("message content is empty"));
    }
    let resolved = resolve_target(client, target).await?;
    match &resolved {
        SendTarget::Direct(name) => client.send_direct(name, content).await?,
        SendTarget::Thread(id) => client.send_thread(id, content).await?,
    }
    info!(target = %resolved, content = %preview(content, LOG_PREVIEW_CHARS), "message sent");
    Ok(resolved)
}

/// Pick the org an endpoint belongs to: its `org:` prefix, else `fallback`,
/// else the only configured org.
pub fn select_org<'a>(
    registry: &'a OrgRegistry,
    endpoint: &RoutingEndpoint,
    fallback: Option<&str>,
) -> Result<&'a Arc<OrgSpec>> {
    if let (Some(prefix), Some(flag)) = (endpoint.org.as_deref(), fallback)
        && prefix != flag
    {
        return Err(Error::message(format!(
            "endpoint names org \"{prefix}\" but --org is \"{flag}\""
        )));
    }
    registry.select(endpoint.org.as_deref().or(fallback))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        hubrelay_channels::ThreadInfo,
        hubrelay_config::RelayConfig,
        std::sync::Mutex,
    };

    /// Knows thread `t-1`; looking up `broken` fails.
    #[derive(Default)]
    struct FakeClient {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HubClient for FakeClient {
        async fn send_direct(&self, to: &str, content: &str) -> hubrelay_channels::Result<()> {
            self.sent.lock().unwrap().push(format!("dm {to}: {content}"));
            Ok(())
        }

        async fn send_thread(&self, thread_id: &str, content: &str) -> hubrelay_channels::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push(format!("thread {thread_id}: {content}"));
            Ok(())
        }

        async fn get_thread(&self, thread_id: &str) -> hubrelay_channels::Result<ThreadInfo> {
            match thread_id {
                "t-1" => Ok(ThreadInfo {
                    id: "t-1".into(),
                    topic: Some("launch".into()),
                    status: None,
                }),
                "broken" => Err(ChannelError::unavailable("hub down")),
                other => Err(ChannelError::not_found(format!("thread {other}"))),
            }
        }

        async fn get_json(
            &self,
            path: &[&str],
            _: &[(&str, String)],
        ) -> hubrelay_channels::Result<serde_json::Value> {
            Err(ChannelError::not_found(path.join("/")))
        }
    }

    fn target(s: &str) -> EndpointTarget {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn bare_name_prefers_thread_then_dm() {
        let client = FakeClient::default();
        assert_eq!(
            send_message(&client, &target("t-1"), "hello").await.unwrap(),
            SendTarget::Thread("t-1".into())
        );
        assert_eq!(
            send_message(&client, &target("alice"), "hi").await.unwrap(),
            SendTarget::Direct("alice".into())
        );
        assert_eq!(*client.sent.lock().unwrap(), vec![
            "thread t-1: hello",
            "dm alice: hi"
        ]);
    }

    #[tokio::test]
    async fn lookup_errors_other_than_not_found_propagate() {
        let client = FakeClient::default();
        let err = send_message(&client, &target("broken"), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Unavailable { .. }));
        assert!(client.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn channels_and_empty_messages_are_refused() {
        let client = FakeClient::default();
        assert!(matches!(
            send_message(&client, &target("channel:c-1"), "hi").await,
            Err(ChannelError::Unsupported { .. })
        ));
        assert!(matches!(
            send_message(&client, &target("thread:t-9"), "  ").await,
            Err(ChannelError::InvalidInput { .. })
        ));
        assert_eq!(
            send_message(&client, &target("thread:t-9"), "direct").await.unwrap(),
            SendTarget::Thread("t-9".into())
        );
    }

    fn registry(labels: &[&str]) -> OrgRegistry {
        let orgs: serde_json::Map<String, serde_json::Value> = labels
            .iter()
            .map(|label| {
                (
                    label.to_string(),
                    serde_json::json!({"org_id": "o", "agent_token": "t", "agent_name": "bot"}),
                )
            })
            .collect();
        let config: RelayConfig = serde_json::from_value(serde_json::json!({
            "default_hub_url": "https://hub.example.com",
            "orgs": orgs,
        }))
        .unwrap();
        OrgRegistry::from_config(&config).unwrap()
    }

    #[test]
    fn org_selection() {
        let one = registry(&["acme"]);
        let bare: RoutingEndpoint = "alice".parse().unwrap();
        assert_eq!(select_org(&one, &bare, None).unwrap().label, "acme");

        let two = registry(&["acme", "beta"]);
        assert!(matches!(
            select_org(&two, &bare, None),
            Err(Error::Config { .. })
        ));
        assert_eq!(select_org(&two, &bare, Some("beta")).unwrap().label, "beta");

        let prefixed: RoutingEndpoint = "org:beta|thread:t-1".parse().unwrap();
        assert_eq!(select_org(&two, &prefixed, None).unwrap().label, "beta");
        assert!(matches!(
            select_org(&two, &prefixed, Some("acme")),
            Err(Error::Message { .. })
        ));
        let unknown: RoutingEndpoint = "org:gamma|alice".parse().unwrap();
        assert!(matches!(
            select_org(&two, &unknown, None),
            Err(Error::UnknownOrg { .. })
        ));
    }
}
