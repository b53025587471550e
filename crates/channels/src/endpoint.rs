//! Routing endpoint strings handed to the downstream consumer.
//!
//! Grammar: `[org:<label>|]<target>` where target is a bare name (DM),
//! `channel:<id>` or `thread:<id>`.

use std::{fmt, str::FromStr};

use crate::{Error, Result};

pub const ORG_PREFIX: &str = "org:";
pub const ORG_SEPARATOR: char = '|';
pub const CHANNEL_PREFIX: &str = "channel:";
pub const THREAD_PREFIX: &str = "thread:";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EndpointTarget {
    Direct(String),
    Channel(String),
    Thread(String),
}

impl fmt::Display for EndpointTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(name) => f.write_str(name),
            Self::Channel(id) => write!(f, "{CHANNEL_PREFIX}{id}"),
            Self::Thread(id) => write!(f, "{THREAD_PREFIX}{id}"),
        }
    }
}

impl FromStr for EndpointTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let target = if let Some(id) = s.strip_prefix(CHANNEL_PREFIX) {
            Self::Channel(non_empty(id, "channel id")?)
        } else if let Some(id) = s.strip_prefix(THREAD_PREFIX) {
            Self::Thread(non_empty(id, "thread id")?)
        } else {
            Self::Direct(non_empty(s, "target")?)
        };
        Ok(target)
    }
}

fn non_empty(value: &str, what: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::invalid_input(format!("{what} must not be empty")));
    }
    Ok(value.to_string())
}

/// Whether `name` round-trips through the endpoint grammar as a bare name.
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name.trim() == name
        && !name.starts_with(CHANNEL_PREFIX)
        && !name.starts_with(THREAD_PREFIX)
        && !(name.starts_with(ORG_PREFIX) && name.contains(ORG_SEPARATOR))
}

/// A delivery destination, optionally qualified by org label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingEndpoint {
    pub org: Option<String>,
    pub target: EndpointTarget,
}

impl RoutingEndpoint {
    pub fn direct(name: impl Into<String>) -> Self {
        Self {
            org: None,
            target: EndpointTarget::Direct(name.into()),
        }
    }

    /// DM endpoint for `name`, refused when the name would parse back as a
    /// different endpoint (a `thread:`/`channel:` or `org:<label>|` lead-in,
    /// or surrounding whitespace).
    pub fn try_direct(name: &str) -> Result<Self> {
        if !is_plain_name(name) {
            return Err(Error::invalid_input(format!(
                "\"{name}\" cannot be used as a direct endpoint"
            )));
        }
        Ok(Self::direct(name))
    }

    pub fn channel(id: impl Into<String>) -> Self {
        Self {
            org: None,
            target: EndpointTarget::Channel(id.into()),
        }
    }

    pub fn thread(id: impl Into<String>) -> Self {
        Self {
            org: None,
            target: EndpointTarget::Thread(id.into()),
        }
    }

    #[must_use]
    pub fn with_org(mut self, label: impl Into<String>) -> Self {
        self.org = Some(label.into());
        self
    }
}

impl fmt::Display for RoutingEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(org) = &self.org {
            write!(f, "{ORG_PREFIX}{org}{ORG_SEPARATOR}")?;
        }
        self.target.fmt(f)
    }
}

impl FromStr for RoutingEndpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix(ORG_PREFIX)
            && let Some((label, target)) = rest.split_once(ORG_SEPARATOR)
        {
            if label.is_empty() {
                return Err(Error::invalid_input(format!("empty org label in \"{s}\"")));
            }
            return Ok(Self {
                org: Some(label.to_string()),
                target: target.parse()?,
            });
        }
        Ok(Self {
            org: None,
            target: s.parse()?,
        })
    }
}
