//! Access policy administration. Changes are written back to the config
//! file and picked up on the next relay start.

use std::path::Path;

use {
    anyhow::{Result, bail},
    chrono::{SecondsFormat, Utc},
    clap::Subcommand,
    hubrelay_channels::{AccessPolicy, DmPolicy, GroupPolicy, ThreadMode},
    hubrelay_config::{
        RelayConfig, load_config_unexpanded, resolve_config_path, save_config,
        upgrade_single_tenant,
    },
    secrecy::{ExposeSecret, Secret},
};

const RESTART_REMINDER: &str = "Restart hubrelay to apply the change.";
const REDACTED: &str = "[REDACTED]";

#[derive(Subcommand, Debug, Clone)]
pub enum AdminAction {
    /// Print the configuration with tokens redacted.
    Show,
    /// Set the DM policy: open or allowlist.
    SetDmPolicy { policy: DmPolicy },
    /// List senders allowed to DM the agent.
    ListDmAllow,
    /// Allow a sender to DM the agent.
    AddDmAllow { name: String },
    /// Remove a sender from the DM allowlist.
    RemoveDmAllow { name: String },
    /// Set the group policy: open, allowlist or disabled.
    SetGroupPolicy { policy: GroupPolicy },
    /// List registered groups and threads.
    ListGroups,
    /// Register a group or thread, open to all of its members.
    AddGroup { group_id: String, name: String },
    /// Unregister a group or thread.
    RemoveGroup { group_id: String },
    /// Restrict which senders a registered group admits (`*` for everyone).
    SetGroupAllowFrom {
        group_id: String,
        #[arg(required = true, num_args = 1..)]
        senders: Vec<String>,
    },
    /// Set the thread mode: mention or smart.
    SetThreadMode { mode: ThreadMode },
}

/// Text to print, and whether the policy changed.
#[derive(Debug, PartialEq, Eq)]
struct Outcome {
    message: String,
    changed: bool,
}

impl Outcome {
    fn changed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            changed: true,
        }
    }

    fn unchanged(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            changed: false,
        }
    }
}

pub fn handle_admin(config_path: Option<&Path>, org: Option<&str>, action: AdminAction) -> Result<()> {
    let path = resolve_config_path(config_path)?;
    let mut config = load_config_unexpanded(&path)?;

    if matches!(action, AdminAction::Show) {
        println!("{}", serde_json::to_string_pretty(&redacted(&config))?);
        return Ok(());
    }

    let upgraded = upgrade_single_tenant(&mut config);
    let label = pick_org(&config, org)?;
    let Some(org_config) = config.orgs.get_mut(&label) else {
        bail!("unknown org \"{label}\"");
    };
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let outcome = apply(&mut org_config.access, action, &now)?;

    println!("{}", outcome.message);
    if outcome.changed {
        save_config(&config, &path)?;
        if upgraded {
            println!("Converted {} to the multi-org layout.", path.display());
        }
        println!("{RESTART_REMINDER}");
    }
    Ok(())
}

/// `--org` if given, else the only configured org.
fn pick_org(config: &RelayConfig, org: Option<&str>) -> Result<String> {
    let labels: Vec<&str> = config.orgs.keys().map(String::as_str).collect();
    match (org, labels.as_slice()) {
        (Some(org), _) if config.orgs.contains_key(org) => Ok(org.to_string()),
        (Some(org), _) => bail!("unknown org \"{org}\" (configured: {})", labels.join(", ")),
        (None, [only]) => Ok((*only).to_string()),
        (None, []) => bail!("no orgs configured"),
        (None, _) => bail!(
            "several orgs configured ({}); choose one with --org",
            labels.join(", ")
        ),
    }
}

fn apply(policy: &mut AccessPolicy, action: AdminAction, now: &str) -> Result<Outcome> {
    let outcome = match action {
        AdminAction::Show => Outcome::unchanged(String::new()),
        AdminAction::SetDmPolicy { policy: dm_policy } => {
            policy.dm_policy = dm_policy;
            Outcome::changed(format!("DM policy set to {dm_policy}"))
        },
        AdminAction::ListDmAllow => {
            let mut out = format!("DM policy: {}", policy.dm_policy);
            if policy.dm_allow_from.is_empty() {
                out.push_str("\nDM allowlist is empty");
            }
            for name in &policy.dm_allow_from {
                out.push_str(&format!("\n  {name}"));
            }
            Outcome::unchanged(out)
        },
        AdminAction::AddDmAllow { name } => {
            if !policy.add_dm_allow(&name) {
                return Ok(Outcome::unchanged(format!("{name} is already on the DM allowlist")));
            }
            let mut out = format!("Added {name} to the DM allowlist");
            if policy.dm_policy != DmPolicy::Allowlist {
                out.push_str(&format!(
                    "\nNote: DM policy is {}; the allowlist only applies with set-dm-policy allowlist",
                    policy.dm_policy
                ));
            }
            Outcome::changed(out)
        },
        AdminAction::RemoveDmAllow { name } => {
            if !policy.remove_dm_allow(&name) {
                return Ok(Outcome::unchanged(format!("{name} is not on the DM allowlist")));
            }
            Outcome::changed(format!("Removed {name} from the DM allowlist"))
        },
        AdminAction::SetGroupPolicy {
            policy: group_policy,
        } => {
            policy.group_policy = group_policy;
            Outcome::changed(format!("Group policy set to {group_policy}"))
        },
        AdminAction::ListGroups => {
            let mut out = format!("Group policy: {}", policy.group_policy);
            if policy.groups.is_empty() {
                out.push_str("\nNo groups registered");
            }
            for (id, entry) in &policy.groups {
                out.push_str(&format!(
                    "\n  {id}  {}  allow: {}",
                    entry.name,
                    entry.allow_from.join(", ")
                ));
            }
            Outcome::unchanged(out)
        },
        AdminAction::AddGroup { group_id, name } => {
            if !policy.add_group(&group_id, &name, now) {
                return Ok(Outcome::unchanged(format!("Group {group_id} is already registered")));
            }
            Outcome::changed(format!("Registered group {group_id} ({name})"))
        },
        AdminAction::RemoveGroup { group_id } => match policy.remove_group(&group_id) {
            Some(entry) => Outcome::changed(format!("Removed group {group_id} ({})", entry.name)),
            None => bail!("group {group_id} is not registered"),
        },
        AdminAction::SetGroupAllowFrom { group_id, senders } => {
            let list = senders.join(", ");
            policy.set_group_allow_from(&group_id, senders)?;
            Outcome::changed(format!("Group {group_id} now admits: {list}"))
        },
        AdminAction::SetThreadMode { mode } => {
            policy.thread_mode = mode;
            Outcome::changed(format!("Thread mode set to {mode}"))
        },
    };
    Ok(outcome)
}

/// Copy of `config` with every non-empty token replaced.
fn redacted(config: &RelayConfig) -> RelayConfig {
    let mut config = config.clone();
    let hide = |token: &Secret<String>| {
        if token.expose_secret().is_empty() {
            token.clone()
        } else {
            Secret::new(REDACTED.to_string())
        }
    };
    config.agent_token = config.agent_token.as_ref().map(hide);
    for org in config.orgs.values_mut() {
        org.agent_token = hide(&org.agent_token);
    }
    config
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const NOW: &str = "2026-01-02T03:04:05.000Z";

    #[test]
    fn dm_allowlist_edits() {
        let mut policy = AccessPolicy::default();
        let added = apply(
            &mut policy,
            AdminAction::AddDmAllow {
                name: "Alice".into(),
            },
            NOW,
        )
        .unwrap();
        assert!(added.changed);
        assert!(added.message.contains("Note: DM policy is open"));

        let again = apply(
            &mut policy,
            AdminAction::AddDmAllow {
                name: "alice".into(),
            },
            NOW,
        )
        .unwrap();
        assert!(!again.changed);
        assert_eq!(policy.dm_allow_from, vec!["Alice"]);

        let removed = apply(
            &mut policy,
            AdminAction::RemoveDmAllow {
                name: "ALICE".into(),
            },
            NOW,
        )
        .unwrap();
        assert!(removed.changed);
        assert!(policy.dm_allow_from.is_empty());
    }

    #[test]
    fn group_edits() {
        let mut policy = AccessPolicy::default();
        apply(
            &mut policy,
            AdminAction::AddGroup {
                group_id: "c-1".into(),
                name: "ops".into(),
            },
            NOW,
        )
        .unwrap();
        let entry = &policy.groups["c-1"];
        assert_eq!(entry.allow_from, vec!["*"]);
        assert_eq!(entry.added_at.as_deref(), Some(NOW));

        apply(
            &mut policy,
            AdminAction::SetGroupAllowFrom {
                group_id: "c-1".into(),
                senders: vec!["bob".into(), "carol".into()],
            },
            NOW,
        )
        .unwrap();
        assert_eq!(policy.groups["c-1"].allow_from, vec!["bob", "carol"]);

        assert!(
            apply(
                &mut policy,
                AdminAction::SetGroupAllowFrom {
                    group_id: "c-9".into(),
                    senders: vec!["bob".into()],
                },
                NOW,
            )
            .is_err()
        );
        assert!(
            apply(
                &mut policy,
                AdminAction::RemoveGroup {
                    group_id: "c-9".into()
                },
                NOW
            )
            .is_err()
        );

        let listing = apply(&mut policy, AdminAction::ListGroups, NOW).unwrap();
        assert!(!listing.changed);
        assert_eq!(
            listing.message,
            "Group policy: open\n  c-1  ops  allow: bob, carol"
        );
    }

    #[test]
    fn org_selection() {
        let config: RelayConfig = serde_json::from_value(serde_json::json!({
            "orgs": {"acme": {}, "beta": {}},
        }))
        .unwrap();
        assert_eq!(pick_org(&config, Some("beta")).unwrap(), "beta");
        assert!(pick_org(&config, None).is_err());
        assert!(pick_org(&config, Some("gamma")).is_err());
    }

    #[test]
    fn show_hides_tokens() {
        let config: RelayConfig = serde_json::from_value(serde_json::json!({
            "agent_token": "flat-secret",
            "orgs": {"acme": {"agent_token": "org-secret"}},
        }))
        .unwrap();
        let shown = serde_json::to_string(&redacted(&config)).unwrap();
        assert!(!shown.contains("secret"));
        assert!(shown.contains(REDACTED));
    }

    #[test]
    fn mutation_upgrades_single_tenant_file_and_keeps_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hubrelay.toml");
        std::fs::write(
            &path,
            r#"
hub_url = "https://hub.example.com"
org_id = "o-1"
agent_token = "${HXA_TOKEN}"
agent_name = "relay-bot"
dmPolicy = "allowlist"
"#,
        )
        .unwrap();

        handle_admin(Some(&path), None, AdminAction::AddDmAllow {
            name: "alice".into(),
        })
        .unwrap();

        let saved = load_config_unexpanded(&path).unwrap();
        assert!(saved.org_id.is_none());
        assert_eq!(saved.default_hub_url.as_deref(), Some("https://hub.example.com"));
        let org = &saved.orgs["default"];
        assert_eq!(org.agent_token.expose_secret(), "${HXA_TOKEN}");
        assert_eq!(org.access.dm_policy, DmPolicy::Allowlist);
        assert_eq!(org.access.dm_allow_from, vec!["alice"]);
    }
}
