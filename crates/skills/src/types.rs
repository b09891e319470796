use std::{collections::BTreeMap, fmt, str::FromStr};

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

/// Virtual path → stored blob pointer, as persisted on a skill.
pub type ResourceMap = BTreeMap<String, ResourceMeta>;

/// Virtual path → raw bytes, as produced by an archive parser.
pub type ResourceBytes = BTreeMap<String, Vec<u8>>;

// ── Manifest ────────────────────────────────────────────────────────────────

/// Skill author: either a bare name or a name with a profile URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SkillAuthor {
    Name(String),
    Detailed {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
}

/// Structured skill metadata.
///
/// Known keys are typed; anything else lands in `extra` and is written back
/// unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<SkillAuthor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Location the skill was imported from (may point into a subdirectory).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_url: Option<String>,
    /// Canonical repository URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SkillManifest {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    /// Overlay `patch` on top of this manifest. Keys in `patch` win, keys
    /// absent from it are kept, unknown keys survive in `extra`.
    pub fn merged_with(&self, patch: &Map<String, Value>) -> serde_json::Result<Self> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(fields) = &mut value {
            for (key, val) in patch {
                fields.insert(key.clone(), val.clone());
            }
        }
        serde_json::from_value(value)
    }
}

// ── Skill ───────────────────────────────────────────────────────────────────

/// Where a catalog entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillSource {
    /// Created or uploaded by the user.
    User,
    /// Imported from a public repository.
    Market,
    /// Shipped with the product.
    Builtin,
}

impl SkillSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Market => "market",
            Self::Builtin => "builtin",
        }
    }
}

impl fmt::Display for SkillSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SkillSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "market" => Ok(Self::Market),
            "builtin" => Ok(Self::Builtin),
            other => Err(format!("unknown skill source '{other}'")),
        }
    }
}

/// Pointer from a virtual path to its blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMeta {
    pub file_hash: String,
}

/// A catalog row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    pub id: String,
    /// Unique per owning user, fixed at creation.
    pub identifier: String,
    pub name: String,
    pub description: Option<String>,
    pub content: String,
    pub manifest: SkillManifest,
    pub resources: Option<ResourceMap>,
    pub source: SkillSource,
    /// Content hash of the archive this skill was imported from.
    pub archive_hash: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Catalog row without the heavy columns, for listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillListItem {
    pub id: String,
    pub identifier: String,
    pub name: String,
    pub description: Option<String>,
    pub manifest: SkillManifest,
    pub source: SkillSource,
    pub archive_hash: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl From<Skill> for SkillListItem {
    fn from(s: Skill) -> Self {
        Self {
            id: s.id,
            identifier: s.identifier,
            name: s.name,
            description: s.description,
            manifest: s.manifest,
            source: s.source,
            archive_hash: s.archive_hash,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

/// Insert payload for the catalog.
#[derive(Debug, Clone)]
pub struct NewSkill {
    pub identifier: String,
    pub name: String,
    pub description: Option<String>,
    pub content: String,
    pub manifest: SkillManifest,
    pub resources: Option<ResourceMap>,
    pub source: SkillSource,
    pub archive_hash: Option<String>,
}

/// Update payload for the catalog. `None` leaves a column untouched.
#[derive(Debug, Clone, Default)]
pub struct SkillPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub manifest: Option<SkillManifest>,
    pub resources: Option<ResourceMap>,
    /// `Some(None)` clears the stored hash.
    pub archive_hash: Option<Option<String>>,
}

// ── Resource tree ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceNodeKind {
    File,
    Directory,
}

/// Display node derived from a [`ResourceMap`]; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTreeNode {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ResourceNodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<ResourceTreeNode>>,
}

// ── Service inputs / outputs ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSkillInput {
    pub content: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportZipInput {
    /// Id of a previously uploaded archive in the blob store.
    pub zip_file_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportGitHubInput {
    pub git_url: String,
    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSkillInput {
    pub id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Partial manifest, merged over the stored one.
    #[serde(default)]
    pub manifest: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Created,
    Updated,
    Unchanged,
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillImportResult {
    pub skill: Skill,
    pub status: ImportStatus,
}
