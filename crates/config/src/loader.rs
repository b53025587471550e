use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::RelayConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "hubrelay.toml",
    "hubrelay.yaml",
    "hubrelay.yml",
    "hubrelay.json",
];

/// Load config from the given path (any supported format), substituting
/// `${ENV_VAR}` placeholders first.
pub fn load_config(path: &Path) -> Result<RelayConfig> {
    let raw = read(path)?;
    parse_config(&substitute_env(&raw), path)
}

/// Load config without env substitution. Used by commands that write the
/// file back, so placeholders survive the round trip.
pub fn load_config_unexpanded(path: &Path) -> Result<RelayConfig> {
    let raw = read(path)?;
    parse_config(&raw, path)
}

/// Pick the config file to use.
///
/// An explicit path wins and must exist. Otherwise the first hit of:
/// 1. `./hubrelay.{toml,yaml,yml,json}`
/// 2. `~/.config/hubrelay/hubrelay.{toml,yaml,yml,json}`
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::NotFound {
            searched: path.display().to_string(),
        });
    }

    let dirs = search_dirs();
    find_config_in(&dirs).ok_or_else(|| Error::NotFound {
        searched: dirs
            .iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// Returns the user-global config directory (`~/.config/hubrelay/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "hubrelay").map(|d| d.config_dir().to_path_buf())
}

fn search_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from(".")];
    dirs.extend(config_dir());
    dirs
}

fn find_config_in(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)))
        .find(|p| p.is_file())
}

/// Write `config` to `path` in the format implied by its extension.
///
/// The file is written to a sibling temp file first and renamed into place.
pub fn save_config(config: &RelayConfig, path: &Path) -> Result<()> {
    let body = serialize_config(config, path)?;
    let tmp = tmp_path(path);
    let write_err = |source| Error::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    std::fs::write(&tmp, body).map_err(write_err)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(write_err(e));
    }
    debug!(path = %path.display(), "saved config");
    Ok(())
}

/// Expand a leading `~/` to the current user's home directory.
pub fn expand_home(value: &str) -> String {
    let Some(rest) = value.strip_prefix("~/") else {
        return value.to_string();
    };
    match directories::BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest).display().to_string(),
        None => value.to_string(),
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("toml")
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".tmp.{}", std::process::id()));
    path.with_file_name(name)
}

fn parse_config(raw: &str, path: &Path) -> Result<RelayConfig> {
    let parse_err = |message: String| Error::Parse {
        path: path.to_path_buf(),
        message,
    };

    match extension(path) {
        "toml" => toml::from_str(raw).map_err(|e| parse_err(e.to_string())),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| parse_err(e.to_string())),
        "json" => serde_json::from_str(raw).map_err(|e| parse_err(e.to_string())),
        ext => Err(Error::UnsupportedFormat { ext: ext.into() }),
    }
}

fn serialize_config(config: &RelayConfig, path: &Path) -> Result<String> {
    let ser_err = |message: String| Error::Serialize { message };

    match extension(path) {
        "toml" => toml::to_string_pretty(config).map_err(|e| ser_err(e.to_string())),
        "yaml" | "yml" => serde_yaml::to_string(config).map_err(|e| ser_err(e.to_string())),
        "json" => serde_json::to_string_pretty(config)
            .map(|s| s + "\n")
            .map_err(|e| ser_err(e.to_string())),
        ext => Err(Error::UnsupportedFormat { ext: ext.into() }),
    }
}
