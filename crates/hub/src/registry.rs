//! Resolution of configured orgs into validated session identities.

use std::{fmt, sync::Arc};

use {
    hubrelay_channels::AccessPolicy,
    hubrelay_config::{ConnectionConfig, RelayConfig, upgrade_single_tenant},
    secrecy::{ExposeSecret, Secret},
    tracing::warn,
};

use crate::{Error, Result};

/// One org identity, ready to drive a session.
#[derive(Clone)]
pub struct OrgSpec {
    /// Routing label, unique within the process.
    pub label: String,
    pub hub_url: String,
    pub org_id: String,
    pub token: Secret<String>,
    /// Hub id of the agent. Used by the self-origin filter when known.
    pub agent_id: Option<String>,
    pub agent_name: String,
    pub policy: AccessPolicy,
}

impl fmt::Debug for OrgSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrgSpec")
            .field("label", &self.label)
            .field("hub_url", &self.hub_url)
            .field("org_id", &self.org_id)
            .field("token", &"[REDACTED]")
            .field("agent_id", &self.agent_id)
            .field("agent_name", &self.agent_name)
            .finish_non_exhaustive()
    }
}

/// The validated set of orgs this process serves.
#[derive(Debug, Clone)]
pub struct OrgRegistry {
    orgs: Vec<Arc<OrgSpec>>,
}

impl OrgRegistry {
    /// Resolve and validate every configured org.
    ///
    /// Fails with a single error listing every problem found; nothing is
    /// returned for partially valid configs.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let mut config = config.clone();
        upgrade_single_tenant(&mut config);

        let mut problems = validate_connection(&config.connection);
        if config.orgs.is_empty() {
            problems.push("no orgs configured".to_string());
        }

        let default_hub_url = config
            .default_hub_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());

        let mut orgs = Vec::with_capacity(config.orgs.len());
        for (label, org) in &config.orgs {
            let before = problems.len();
            if !is_valid_label(label) {
                problems.push(format!(
                    "org label \"{label}\" must match [a-z0-9][a-z0-9-]*"
                ));
            }
            if org.org_id.trim().is_empty() {
                problems.push(format!("org \"{label}\": org_id is required"));
            }
            if org.agent_token.expose_secret().trim().is_empty() {
                problems.push(format!("org \"{label}\": agent_token is required"));
            }
            if org.agent_name.trim().is_empty() {
                problems.push(format!("org \"{label}\": agent_name is required"));
            }
            let hub_url = org
                .hub_url
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .or(default_hub_url);
            let Some(hub_url) = hub_url else {
                problems.push(format!(
                    "org \"{label}\": no hub_url and no default_hub_url"
                ));
                continue;
            };
            if problems.len() > before {
                continue;
            }

            let agent_id = org
                .agent_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string);
            if agent_id.is_none() {
                warn!(
                    org = %label,
                    agent_name = %org.agent_name,
                    "agent_id not set; self-message filtering falls back to agent_name"
                );
            }

            orgs.push(Arc::new(OrgSpec {
                label: label.clone(),
                hub_url: hub_url.trim_end_matches('/').to_string(),
                org_id: org.org_id.trim().to_string(),
                token: org.agent_token.clone(),
                agent_id,
                agent_name: org.agent_name.trim().to_string(),
                policy: org.access.clone(),
            }));
        }

        if !problems.is_empty() {
            return Err(Error::config(problems.join("; ")));
        }
        Ok(Self { orgs })
    }

    /// Orgs sorted by label.
    pub fn orgs(&self) -> &[Arc<OrgSpec>] {
        &self.orgs
    }

    pub fn get(&self, label: &str) -> Option<&Arc<OrgSpec>> {
        self.orgs.iter().find(|o| o.label == label)
    }

    pub fn len(&self) -> usize {
        self.orgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orgs.is_empty()
    }

    /// Whether endpoints must carry the `org:<label>|` prefix.
    pub fn is_multi_org(&self) -> bool {
        self.orgs.len() > 1
    }

    /// Pick an org by label, or the only one when no label is given.
    pub fn select(&self, label: Option<&str>) -> Result<&Arc<OrgSpec>> {
        match label {
            Some(label) => self.get(label).ok_or_else(|| Error::UnknownOrg {
                label: label.to_string(),
            }),
            None => match self.orgs.as_slice() {
                [only] => Ok(only),
                _ => Err(Error::config(format!(
                    "{} orgs configured; pick one with --org ({})",
                    self.orgs.len(),
                    self.labels().join(", ")
                ))),
            },
        }
    }

    pub fn labels(&self) -> Vec<&str> {
        self.orgs.iter().map(|o| o.label.as_str()).collect()
    }
}

/// Labels are lowercase ASCII letters, digits and `-`, not starting with `-`.
pub fn is_valid_label(label: &str) -> bool {
    let mut chars = label.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {},
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn validate_connection(connection: &ConnectionConfig) -> Vec<String> {
    let mut problems = Vec::new();
    if connection.initial_delay_ms == 0 {
        problems.push("connection.initial_delay_ms must be positive".to_string());
    }
    if connection.max_delay_ms < connection.initial_delay_ms {
        problems.push("connection.max_delay_ms must be >= initial_delay_ms".to_string());
    }
    if !connection.backoff_factor.is_finite() || connection.backoff_factor < 1.0 {
        problems.push("connection.backoff_factor must be a finite number >= 1".to_string());
    }
    if connection.keepalive_secs == 0 {
        problems.push("connection.keepalive_secs must be positive".to_string());
    }
    problems
}
