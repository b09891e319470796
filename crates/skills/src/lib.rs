//! Skill import and storage.
//!
//! A skill is a `SKILL.md` file (YAML frontmatter plus markdown body) with an
//! optional tree of auxiliary files. Skills enter a per-user catalog through
//! one of three flows driven by [`importer::SkillImporter`]: manual creation,
//! an uploaded ZIP archive, or a GitHub repository (optionally a
//! subdirectory). Auxiliary files are stored content-addressed by
//! [`resource::SkillResourceService`].
//!
//! Collaborators are traits ([`store::SkillStore`], [`blob::BlobStore`],
//! [`github::SourceControl`], [`parser::SkillArchiveParser`]); SQLite,
//! filesystem, GitHub and ZIP implementations are provided.

pub mod blob;
pub mod error;
pub mod github;
pub mod importer;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod parser;
pub mod resource;
pub mod service;
pub mod store;
pub mod types;

pub use {
    blob::{BlobStore, FsBlobStore, LocalFile},
    error::{Error, ImportErrorCode, Result},
    github::{GitHubClient, GitHubClientConfig, GitHubError, RepoInfo, SourceControl},
    importer::SkillImporter,
    parser::{ParseOptions, ParsedArchive, SkillArchiveParser, ZipSkillParser},
    resource::SkillResourceService,
    service::SkillService,
    store::{SkillStore, SqliteSkillStore, connect},
};

/// Run database migrations for the skill catalog and blob registry.
///
/// Creates the `agent_skills`, `global_files` and `files` tables. Call at
/// startup before using [`SqliteSkillStore`] or [`FsBlobStore`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
