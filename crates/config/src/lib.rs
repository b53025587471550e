//! Configuration loading, env substitution, and single-tenant upgrade.
//!
//! Config files: `hubrelay.toml`, `hubrelay.yaml`, `hubrelay.yml` or `hubrelay.json`.
//! Searched in `./` then `~/.config/hubrelay/`.
//!
//! Supports `${ENV_VAR}` substitution anywhere in the file.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod migrate;
pub mod schema;

pub use {
    error::{Error, Result},
    loader::{
        config_dir, expand_home, load_config, load_config_unexpanded, resolve_config_path,
        save_config,
    },
    migrate::{DEFAULT_ORG_LABEL, upgrade_single_tenant},
    schema::{ConnectionConfig, DeliveryConfig, OrgConfig, RelayConfig, ThreadsConfig},
};
