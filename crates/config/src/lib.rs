//! Configuration loading, env substitution, and storage path resolution.
//!
//! Config files: `skillport.toml`, `skillport.yaml`, or `skillport.json`
//! Searched in `./` then `~/.config/skillport/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        apply_env_overrides, config_dir, default_data_dir, discover_and_load, load_config,
    },
    schema::{GitHubConfig, ImportConfig, SkillportConfig, StorageConfig},
};
