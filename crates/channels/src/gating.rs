use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

/// Allow-set entry that admits every sender.
pub const WILDCARD: &str = "*";

/// DM access policy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DmPolicy {
    /// Anyone can DM the agent.
    #[default]
    Open,
    /// Only senders in the DM allow-set.
    Allowlist,
}

/// Group access policy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    /// Every group and thread is accepted.
    #[default]
    Open,
    /// Only groups present in the group map.
    Allowlist,
    /// Group and thread traffic is dropped.
    Disabled,
}

/// Delivery mode for thread messages.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ThreadMode {
    /// Buffer thread messages; deliver them bundled when the agent is mentioned.
    Mention,
    /// Deliver every thread message.
    #[default]
    Smart,
}

macro_rules! keyword_enum {
    ($ty:ty, $($variant:ident => $text:literal),+ $(,)?) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(Error::invalid_input(format!(
                        "unknown {} \"{other}\" (expected one of: {})",
                        stringify!($ty),
                        [$($text),+].join(", "),
                    ))),
                }
            }
        }
    };
}

keyword_enum!(DmPolicy, Open => "open", Allowlist => "allowlist");
keyword_enum!(GroupPolicy, Open => "open", Allowlist => "allowlist", Disabled => "disabled");
keyword_enum!(ThreadMode, Mention => "mention", Smart => "smart");

/// One group or thread the operator has registered.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GroupEntry {
    pub name: String,
    /// Senders allowed to reach the agent through this group. Empty or `*` admits all.
    #[serde(alias = "allowFrom")]
    pub allow_from: Vec<String>,
    #[serde(alias = "addedAt", skip_serializing_if = "Option::is_none")]
    pub added_at: Option<String>,
}

/// Per-org access policy.
///
/// Every field is optional in configuration files: a missing policy is
/// `open` and a missing allow-set is empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AccessPolicy {
    #[serde(alias = "dmPolicy")]
    pub dm_policy: DmPolicy,
    #[serde(alias = "dmAllowFrom")]
    pub dm_allow_from: Vec<String>,
    #[serde(alias = "groupPolicy")]
    pub group_policy: GroupPolicy,
    /// Group and thread ids mapped to their entry.
    #[serde(alias = "channels")]
    pub groups: BTreeMap<String, GroupEntry>,
    #[serde(alias = "threadMode")]
    pub thread_mode: ThreadMode,
}

impl AccessPolicy {
    /// Add a DM sender. Returns `false` when the name is already present.
    pub fn add_dm_allow(&mut self, name: &str) -> bool {
        if contains_ignore_case(&self.dm_allow_from, name) {
            return false;
        }
        self.dm_allow_from.push(name.to_string());
        true
    }

    /// Remove a DM sender, matching case-insensitively. Returns `false` when absent.
    pub fn remove_dm_allow(&mut self, name: &str) -> bool {
        let before = self.dm_allow_from.len();
        let needle = name.to_lowercase();
        self.dm_allow_from
            .retain(|entry| entry.to_lowercase() != needle);
        self.dm_allow_from.len() != before
    }

    /// Register a group open to all of its members. Returns `false` when the
    /// id was already registered (the existing entry is kept).
    pub fn add_group(&mut self, group_id: &str, name: &str, added_at: impl Into<String>) -> bool {
        if self.groups.contains_key(group_id) {
            return false;
        }
        self.groups.insert(group_id.to_string(), GroupEntry {
            name: name.to_string(),
            allow_from: vec![WILDCARD.to_string()],
            added_at: Some(added_at.into()),
        });
        true
    }

    pub fn remove_group(&mut self, group_id: &str) -> Option<GroupEntry> {
        self.groups.remove(group_id)
    }

    /// Replace a registered group's sender allow-set.
    pub fn set_group_allow_from(&mut self, group_id: &str, senders: Vec<String>) -> crate::Result<()> {
        let entry = self
            .groups
            .get_mut(group_id)
            .ok_or_else(|| Error::not_found(format!("group {group_id}")))?;
        entry.allow_from = senders;
        Ok(())
    }
}

/// DM gate: `open` admits everyone, `allowlist` admits case-insensitive members.
pub fn is_dm_allowed(policy: &AccessPolicy, sender_name: &str) -> bool {
    match policy.dm_policy {
        DmPolicy::Open => true,
        DmPolicy::Allowlist => contains_ignore_case(&policy.dm_allow_from, sender_name),
    }
}

/// Group gate. Thread ids are looked up in the same map as group ids.
pub fn is_group_allowed(policy: &AccessPolicy, group_id: &str) -> bool {
    match policy.group_policy {
        GroupPolicy::Disabled => false,
        GroupPolicy::Open => true,
        GroupPolicy::Allowlist => policy.groups.contains_key(group_id),
    }
}

/// Sender gate inside a group. Unregistered groups and empty or wildcard
/// allow-sets admit every sender.
pub fn is_sender_allowed_in_group(policy: &AccessPolicy, group_id: &str, sender_name: &str) -> bool {
    let Some(entry) = policy.groups.get(group_id) else {
        return true;
    };
    if entry.allow_from.is_empty() || entry.allow_from.iter().any(|a| a == WILDCARD) {
        return true;
    }
    contains_ignore_case(&entry.allow_from, sender_name)
}

fn contains_ignore_case(list: &[String], name: &str) -> bool {
    let needle = name.to_lowercase();
    list.iter().any(|entry| entry.to_lowercase() == needle)
}

/// What an inbound event asks permission for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRequest<'a> {
    Direct { sender: &'a str },
    /// Group or thread traffic. Lifecycle events carry no sender.
    Group {
        group_id: &'a str,
        sender: Option<&'a str>,
    },
}

/// Determine if an inbound event may be delivered.
///
/// Returns `Ok(())` if the event is allowed, or `Err(reason)` if it should
/// be dropped.
pub fn check_access(policy: &AccessPolicy, request: AccessRequest<'_>) -> Result<(), AccessDenied> {
    match request {
        AccessRequest::Direct { sender } => {
            if is_dm_allowed(policy, sender) {
                Ok(())
            } else {
                Err(AccessDenied::NotOnDmAllowlist)
            }
        },
        AccessRequest::Group { group_id, sender } => {
            if policy.group_policy == GroupPolicy::Disabled {
                return Err(AccessDenied::GroupsDisabled);
            }
            if !is_group_allowed(policy, group_id) {
                return Err(AccessDenied::GroupNotOnAllowlist);
            }
            match sender {
                Some(sender) if !is_sender_allowed_in_group(policy, group_id, sender) => {
                    Err(AccessDenied::SenderNotAllowed)
                },
                _ => Ok(()),
            }
        },
    }
}

/// Reason an inbound event was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenied {
    NotOnDmAllowlist,
    GroupsDisabled,
    GroupNotOnAllowlist,
    SenderNotAllowed,
}

impl fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotOnDmAllowlist => write!(f, "sender not on DM allowlist"),
            Self::GroupsDisabled => write!(f, "groups are disabled"),
            Self::GroupNotOnAllowlist => write!(f, "group not on allowlist"),
            Self::SenderNotAllowed => write!(f, "sender not allowed in group"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, rstest::rstest};

    fn dm_allowlist(names: &[&str]) -> AccessPolicy {
        AccessPolicy {
            dm_policy: DmPolicy::Allowlist,
            dm_allow_from: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    fn with_group(policy: GroupPolicy, id: &str, allow_from: &[&str]) -> AccessPolicy {
        let mut access = AccessPolicy {
            group_policy: policy,
            ..Default::default()
        };
        access.groups.insert(id.into(), GroupEntry {
            name: "ops".into(),
            allow_from: allow_from.iter().map(|n| n.to_string()).collect(),
            added_at: None,
        });
        access
    }

    #[test]
    fn default_policy_is_open() {
        let policy = AccessPolicy::default();
        assert!(is_dm_allowed(&policy, "anyone"));
        assert!(is_group_allowed(&policy, "g1"));
        assert!(is_sender_allowed_in_group(&policy, "g1", "anyone"));
        assert_eq!(policy.thread_mode, ThreadMode::Smart);
    }

    #[rstest]
    #[case("alice", true)]
    #[case("ALICE", true)]
    #[case("Alice", true)]
    #[case("Bob", false)]
    #[case("", false)]
    fn dm_allowlist_is_case_insensitive(#[case] sender: &str, #[case] allowed: bool) {
        assert_eq!(is_dm_allowed(&dm_allowlist(&["alice"]), sender), allowed);
    }

    #[test]
    fn empty_dm_allowlist_denies_everyone() {
        assert!(!is_dm_allowed(&dm_allowlist(&[]), "alice"));
    }

    #[rstest]
    #[case(&[])]
    #[case(&["*"])]
    #[case(&["bob", "*"])]
    fn disabled_groups_ignore_allow_sets(#[case] allow_from: &[&str]) {
        let policy = with_group(GroupPolicy::Disabled, "g1", allow_from);
        assert!(!is_group_allowed(&policy, "g1"));
        assert_eq!(
            check_access(&policy, AccessRequest::Group {
                group_id: "g1",
                sender: Some("bob"),
            }),
            Err(AccessDenied::GroupsDisabled)
        );
    }

    #[test]
    fn group_allowlist_requires_registration() {
        let policy = with_group(GroupPolicy::Allowlist, "g1", &[]);
        assert!(is_group_allowed(&policy, "g1"));
        assert!(!is_group_allowed(&policy, "g2"));
    }

    #[rstest]
    #[case(&[], "mallory", true)]
    #[case(&["*"], "mallory", true)]
    #[case(&["bob"], "BOB", true)]
    #[case(&["bob"], "mallory", false)]
    fn sender_allow_set(#[case] allow_from: &[&str], #[case] sender: &str, #[case] allowed: bool) {
        let policy = with_group(GroupPolicy::Open, "g1", allow_from);
        assert_eq!(is_sender_allowed_in_group(&policy, "g1", sender), allowed);
    }

    #[test]
    fn unregistered_group_admits_every_sender() {
        let policy = with_group(GroupPolicy::Open, "g1", &["bob"]);
        assert!(is_sender_allowed_in_group(&policy, "elsewhere", "mallory"));
    }

    #[test]
    fn lifecycle_requests_skip_sender_check() {
        let policy = with_group(GroupPolicy::Allowlist, "t1", &["bob"]);
        assert_eq!(
            check_access(&policy, AccessRequest::Group {
                group_id: "t1",
                sender: None,
            }),
            Ok(())
        );
        assert_eq!(
            check_access(&policy, AccessRequest::Group {
                group_id: "t1",
                sender: Some("mallory"),
            }),
            Err(AccessDenied::SenderNotAllowed)
        );
        assert_eq!(
            check_access(&policy, AccessRequest::Group {
                group_id: "t2",
                sender: None,
            }),
            Err(AccessDenied::GroupNotOnAllowlist)
        );
    }

    #[test]
    fn parses_camel_case_keys() {
        let policy: AccessPolicy = serde_json::from_value(serde_json::json!({
            "dmPolicy": "allowlist",
            "dmAllowFrom": ["alice"],
            "groupPolicy": "allowlist",
            "channels": {"g1": {"name": "ops", "allowFrom": ["*"]}},
            "threadMode": "mention",
        }))
        .unwrap();
        assert_eq!(policy.dm_policy, DmPolicy::Allowlist);
        assert_eq!(policy.dm_allow_from, vec!["alice"]);
        assert_eq!(policy.group_policy, GroupPolicy::Allowlist);
        assert_eq!(policy.groups["g1"].allow_from, vec!["*"]);
        assert_eq!(policy.thread_mode, ThreadMode::Mention);
    }

    #[test]
    fn dm_allow_edits_dedupe_case_insensitively() {
        let mut policy = AccessPolicy::default();
        assert!(policy.add_dm_allow("Alice"));
        assert!(!policy.add_dm_allow("alice"));
        assert_eq!(policy.dm_allow_from, vec!["Alice"]);
        assert!(policy.remove_dm_allow("ALICE"));
        assert!(!policy.remove_dm_allow("alice"));
        assert!(policy.dm_allow_from.is_empty());
    }

    #[test]
    fn group_edits() {
        let mut policy = AccessPolicy::default();
        assert!(policy.add_group("g1", "ops", "2026-01-01T00:00:00Z"));
        assert!(!policy.add_group("g1", "other", "2026-01-02T00:00:00Z"));
        assert_eq!(policy.groups["g1"].name, "ops");
        assert_eq!(policy.groups["g1"].allow_from, vec![WILDCARD]);

        policy
            .set_group_allow_from("g1", vec!["bob".into()])
            .unwrap();
        assert_eq!(policy.groups["g1"].allow_from, vec!["bob"]);
        assert!(
            policy
                .set_group_allow_from("missing", vec![])
                .unwrap_err()
                .is_not_found()
        );
        assert!(policy.remove_group("g1").is_some());
        assert!(policy.remove_group("g1").is_none());
    }

    #[rstest]
    #[case("open", DmPolicy::Open)]
    #[case(" Allowlist ", DmPolicy::Allowlist)]
    fn parses_dm_policy(#[case] input: &str, #[case] expected: DmPolicy) {
        assert_eq!(input.parse::<DmPolicy>().unwrap(), expected);
    }

    #[test]
    fn rejects_unknown_keywords() {
        let err = "closed".parse::<DmPolicy>().unwrap_err();
        assert!(err.to_string().contains("open, allowlist"));
        assert!("sometimes".parse::<ThreadMode>().is_err());
        assert_eq!("disabled".parse::<GroupPolicy>().unwrap(), GroupPolicy::Disabled);
    }
}
