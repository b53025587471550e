//! Upgrade of the single-tenant config shape to the multi-org shape.

use tracing::{info, warn};

use crate::schema::{OrgConfig, RelayConfig};

/// Label assigned to the org built from single-tenant fields.
pub const DEFAULT_ORG_LABEL: &str = "default";

/// Fold top-level identity and policy fields into `orgs.default`.
///
/// Returns `true` when the config was rewritten. When `orgs` is already
/// populated the top-level identity and policy fields are ignored (with a
/// warning) and cleared. A top-level `hub_url` still fills an unset
/// `default_hub_url` in that case.
pub fn upgrade_single_tenant(config: &mut RelayConfig) -> bool {
    let has_identity = config.has_single_tenant_identity();
    let has_policy = config.has_single_tenant_policy();

    if !config.orgs.is_empty() {
        if has_identity || has_policy {
            warn!("config has both `orgs` and top-level identity fields; ignoring the top-level fields");
            clear_single_tenant(config);
        }
        if let Some(hub_url) = config.hub_url.take()
            && config.default_hub_url.is_none()
        {
            config.default_hub_url = Some(hub_url);
        }
        return false;
    }

    if !has_identity {
        return false;
    }

    let access = config.take_single_tenant_policy();
    let mut org = OrgConfig {
        org_id: config.org_id.take().unwrap_or_default(),
        agent_name: config.agent_name.take().unwrap_or_default(),
        agent_id: config.agent_id.take(),
        access,
        ..Default::default()
    };
    if let Some(token) = config.agent_token.take() {
        org.agent_token = token;
    }
    if let Some(hub_url) = config.hub_url.take() {
        if config.default_hub_url.is_none() {
            config.default_hub_url = Some(hub_url);
        } else {
            org.hub_url = Some(hub_url);
        }
    }
    config.orgs.insert(DEFAULT_ORG_LABEL.into(), org);
    info!(label = DEFAULT_ORG_LABEL, "upgraded single-tenant config");
    true
}

fn clear_single_tenant(config: &mut RelayConfig) {
    config.org_id = None;
    config.agent_token = None;
    config.agent_name = None;
    config.agent_id = None;
    let _ = config.take_single_tenant_policy();
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        hubrelay_channels::gating::{DmPolicy, ThreadMode},
        secrecy::ExposeSecret,
    };

    fn parse(value: serde_json::Value) -> RelayConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn folds_flat_fields_into_default_org() {
        let mut cfg = parse(serde_json::json!({
            "hub_url": "https://hub.example.com",
            "org_id": "o1",
            "agent_token": "tok",
            "agent_name": "relay-bot",
            "agent_id": "a-1",
            "dmPolicy": "allowlist",
            "dmAllowFrom": ["alice"],
            "threadMode": "mention",
        }));

        assert!(upgrade_single_tenant(&mut cfg));

        assert_eq!(cfg.default_hub_url.as_deref(), Some("https://hub.example.com"));
        let org = &cfg.orgs[DEFAULT_ORG_LABEL];
        assert_eq!(org.org_id, "o1");
        assert_eq!(org.agent_token.expose_secret(), "tok");
        assert_eq!(org.agent_name, "relay-bot");
        assert_eq!(org.agent_id.as_deref(), Some("a-1"));
        assert_eq!(org.access.dm_policy, DmPolicy::Allowlist);
        assert_eq!(org.access.thread_mode, ThreadMode::Mention);
        assert!(!cfg.has_single_tenant_identity());
        assert!(cfg.hub_url.is_none());
    }

    #[test]
    fn explicit_default_hub_url_wins_over_flat_hub_url() {
        let mut cfg = parse(serde_json::json!({
            "default_hub_url": "https://shared.example.com",
            "hub_url": "https://own.example.com",
            "org_id": "o1",
        }));
        assert!(upgrade_single_tenant(&mut cfg));
        assert_eq!(
            cfg.orgs[DEFAULT_ORG_LABEL].hub_url.as_deref(),
            Some("https://own.example.com")
        );
    }

    #[test]
    fn orgs_win_over_flat_fields() {
        let mut cfg = parse(serde_json::json!({
            "org_id": "ignored",
            "dmPolicy": "allowlist",
            "orgs": {"acme": {"org_id": "o1", "agent_token": "t", "agent_name": "bot"}},
        }));
        assert!(!upgrade_single_tenant(&mut cfg));
        assert_eq!(cfg.orgs.len(), 1);
        assert_eq!(cfg.orgs["acme"].org_id, "o1");
        assert!(cfg.org_id.is_none());
        assert!(cfg.dm_policy.is_none());
    }

    #[test]
    fn empty_config_is_left_alone() {
        let mut cfg = RelayConfig::default();
        assert!(!upgrade_single_tenant(&mut cfg));
        assert!(cfg.orgs.is_empty());
    }
}
