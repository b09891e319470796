use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::SkillportConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "skillport.toml",
    "skillport.yaml",
    "skillport.yml",
    "skillport.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<SkillportConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then apply environment
/// overrides.
///
/// Search order:
/// 1. `./skillport.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/skillport/skillport.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `SkillportConfig::default()` if no file is found or the file
/// fails to parse.
pub fn discover_and_load() -> SkillportConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                SkillportConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            SkillportConfig::default()
        },
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config
}

/// Apply `SKILLPORT_DATA_DIR` and `GITHUB_TOKEN` on top of file values.
pub fn apply_env_overrides(
    config: &mut SkillportConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    if let Some(dir) = lookup("SKILLPORT_DATA_DIR").filter(|v| !v.is_empty()) {
        config.storage.data_dir = Some(PathBuf::from(dir));
    }
    if config.github.token.is_none()
        && let Some(token) = lookup("GITHUB_TOKEN").filter(|v| !v.is_empty())
    {
        config.github.token = Some(Secret::new(token));
    }
}

fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/skillport/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "skillport").map(|d| d.config_dir().to_path_buf())
}

/// Platform data directory, or `./.skillport` when no home directory can be
/// determined.
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "skillport")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".skillport"))
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<SkillportConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
