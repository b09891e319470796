/// Config schema types (storage, GitHub access, import limits).
use std::path::PathBuf;

use {
    secrecy::Secret,
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillportConfig {
    pub storage: StorageConfig,
    pub github: GitHubConfig,
    pub import: ImportConfig,
}

/// Where the catalog database and blob objects live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory. Defaults to the platform data dir
    /// (`~/.local/share/skillport` on Linux).
    pub data_dir: Option<PathBuf>,
    /// SQLite file name (relative to `data_dir`) or an absolute path.
    pub database: String,
    /// Blob root (relative to `data_dir`) or an absolute path.
    pub blob_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            database: "skillport.db".into(),
            blob_dir: "blobs".into(),
        }
    }
}

/// GitHub API access used by repository imports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub api_base: String,
    pub user_agent: String,
    /// Personal access token; raises the anonymous rate limit and grants
    /// access to private repositories.
    #[serde(skip_serializing)]
    pub token: Option<Secret<String>>,
    pub timeout_secs: u64,
    /// Branch used when neither the URL nor the caller names one.
    pub default_branch: String,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".into(),
            user_agent: "skillport-skill-importer".into(),
            token: None,
            timeout_secs: 60,
            default_branch: "main".into(),
        }
    }
}

/// Limits applied while importing archives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Largest archive (downloaded or uploaded) accepted, in bytes.
    pub max_archive_bytes: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_archive_bytes: 50 * 1024 * 1024,
        }
    }
}

impl SkillportConfig {
    /// Resolved base data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(crate::loader::default_data_dir)
    }

    /// Absolute path of the catalog database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join(&self.storage.database)
    }

    /// Absolute path of the blob root.
    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir().join(&self.storage.blob_dir)
    }
}
