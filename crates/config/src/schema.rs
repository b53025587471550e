/// Config schema types (orgs, access policy, connection and delivery tunables).
use std::collections::BTreeMap;

use {
    hubrelay_channels::gating::{AccessPolicy, DmPolicy, GroupEntry, GroupPolicy, ThreadMode},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
///
/// Two shapes are accepted. The multi-org shape lists identities under
/// `orgs`. The single-tenant shape puts one identity and its policy at the
/// top level; [`crate::migrate::upgrade_single_tenant`] turns it into an org
/// labelled `default`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Hub URL used by orgs that do not set their own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_hub_url: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub orgs: BTreeMap<String, OrgConfig>,

    // Single-tenant fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub agent_token: Option<Secret<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(alias = "dmPolicy", skip_serializing_if = "Option::is_none")]
    pub dm_policy: Option<DmPolicy>,
    #[serde(alias = "dmAllowFrom", skip_serializing_if = "Option::is_none")]
    pub dm_allow_from: Option<Vec<String>>,
    #[serde(alias = "groupPolicy", skip_serializing_if = "Option::is_none")]
    pub group_policy: Option<GroupPolicy>,
    #[serde(alias = "channels", skip_serializing_if = "Option::is_none")]
    pub groups: Option<BTreeMap<String, GroupEntry>>,
    #[serde(alias = "threadMode", skip_serializing_if = "Option::is_none")]
    pub thread_mode: Option<ThreadMode>,

    pub connection: ConnectionConfig,
    pub delivery: DeliveryConfig,
    pub threads: ThreadsConfig,
}

impl RelayConfig {
    /// Whether any single-tenant identity field is set.
    pub fn has_single_tenant_identity(&self) -> bool {
        self.org_id.is_some()
            || self.agent_token.is_some()
            || self.agent_name.is_some()
            || self.agent_id.is_some()
    }

    /// Whether any single-tenant policy field is set.
    pub fn has_single_tenant_policy(&self) -> bool {
        self.dm_policy.is_some()
            || self.dm_allow_from.is_some()
            || self.group_policy.is_some()
            || self.groups.is_some()
            || self.thread_mode.is_some()
    }

    /// Move the single-tenant policy fields into an [`AccessPolicy`],
    /// leaving them unset.
    pub fn take_single_tenant_policy(&mut self) -> AccessPolicy {
        AccessPolicy {
            dm_policy: self.dm_policy.take().unwrap_or_default(),
            dm_allow_from: self.dm_allow_from.take().unwrap_or_default(),
            group_policy: self.group_policy.take().unwrap_or_default(),
            groups: self.groups.take().unwrap_or_default(),
            thread_mode: self.thread_mode.take().unwrap_or_default(),
        }
    }
}

/// One org identity under `orgs.<label>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgConfig {
    #[serde(default, alias = "orgId")]
    pub org_id: String,
    #[serde(
        default = "empty_secret",
        alias = "agentToken",
        serialize_with = "serialize_secret"
    )]
    pub agent_token: Secret<String>,
    #[serde(default, alias = "agentName")]
    pub agent_name: String,
    #[serde(default, alias = "agentId", skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Overrides `default_hub_url` for this org.
    #[serde(default, alias = "hubUrl", skip_serializing_if = "Option::is_none")]
    pub hub_url: Option<String>,
    #[serde(default)]
    pub access: AccessPolicy,
}

impl Default for OrgConfig {
    fn default() -> Self {
        Self {
            org_id: String::new(),
            agent_token: empty_secret(),
            agent_name: String::new(),
            agent_id: None,
            hub_url: None,
            access: AccessPolicy::default(),
        }
    }
}

/// Streaming connection tunables shared by every org session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    /// First reconnect delay.
    pub initial_delay_ms: u64,
    /// Upper bound for the reconnect delay.
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    /// Failed handshakes tolerated before an org that never connected is abandoned.
    pub max_initial_attempts: u32,
    /// Interval between application-level pings.
    pub keepalive_secs: u64,
    /// How long shutdown waits for sessions and in-flight deliveries.
    pub shutdown_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 3_000,
            max_delay_ms: 60_000,
            backoff_factor: 1.5,
            max_initial_attempts: 20,
            keepalive_secs: 30,
            shutdown_timeout_ms: 5_000,
        }
    }
}

/// How accepted events reach the downstream consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Program and leading arguments of the consumer bridge. A leading `~/`
    /// in any element is expanded to the home directory.
    pub command: Vec<String>,
    /// Channel name passed to the consumer as `--channel`.
    pub channel: String,
    /// Fixed delay before the single retry of a failed delivery.
    pub retry_delay_ms: u64,
    /// Kill the consumer after this long.
    pub timeout_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "node".into(),
                "~/zylos/.claude/skills/comm-bridge/scripts/c4-receive.js".into(),
            ],
            channel: "hxa-connect".into(),
            retry_delay_ms: 2_000,
            timeout_ms: 30_000,
        }
    }
}

/// Thread context buffering for orgs in `mention` mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ThreadsConfig {
    /// Messages kept per thread while waiting for a mention.
    pub buffer_limit: usize,
    /// Threads buffered at once; the least recently active is dropped first.
    pub max_threads: usize,
}

impl Default for ThreadsConfig {
    fn default() -> Self {
        Self {
            buffer_limit: 50,
            max_threads: 200,
        }
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn empty_secret() -> Secret<String> {
    Secret::new(String::new())
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
