//! Import orchestration: manual creation, ZIP import and GitHub import.

use std::sync::Arc;

use {
    rand::{Rng, distr::Alphanumeric},
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use crate::metrics::{counter, histogram, labels, names};
use crate::{
    blob::{BlobLocation, BlobStore, GlobalBlob},
    error::{Error, ImportErrorCode, Result},
    github::{GitHubError, SourceControl},
    parser::{ParseOptions, SkillArchiveParser},
    resource::SkillResourceService,
    store::{SkillStore, now_ms},
    types::{
        CreateSkillInput, ImportGitHubInput, ImportStatus, ImportZipInput, NewSkill, ResourceBytes,
        ResourceMap, Skill, SkillImportResult, SkillManifest, SkillPatch, SkillSource,
    },
};

/// Storage key prefix for imported skill archives.
pub const ZIP_PREFIX: &str = "skills/zip";

const USER_TOKEN_LEN: usize = 12;
const MAX_IDENTIFIER_ATTEMPTS: usize = 8;

/// Storage key of the archive whose content hash is `hash`.
pub fn archive_key(hash: &str) -> String {
    format!("{ZIP_PREFIX}/{hash}.zip")
}

/// `github.{owner}.{repo}` plus `.{path}` with `/` replaced by `.`.
pub fn github_identifier(owner: &str, repo: &str, path: Option<&str>) -> String {
    match path {
        Some(path) => format!("github.{owner}.{repo}.{}", path.replace('/', ".")),
        None => format!("github.{owner}.{repo}"),
    }
}

fn random_user_identifier() -> String {
    let token: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(USER_TOKEN_LEN)
        .map(char::from)
        .collect();
    format!("user.{token}")
}

/// A catalog insert rejected for a taken identifier becomes `CONFLICT`.
fn conflict_on_duplicate(err: Error) -> Error {
    match err {
        Error::DuplicateIdentifier { identifier } => Error::conflict(format!(
            "Skill with identifier \"{identifier}\" already exists"
        )),
        other => other,
    }
}

/// Runs the import flows on behalf of one user.
///
/// Stateless apart from the user scope; build one per request.
pub struct SkillImporter {
    user_id: String,
    store: Arc<dyn SkillStore>,
    parser: Arc<dyn SkillArchiveParser>,
    blobs: Arc<dyn BlobStore>,
    source_control: Arc<dyn SourceControl>,
    resources: SkillResourceService,
}

impl SkillImporter {
    pub fn new(
        user_id: impl Into<String>,
        store: Arc<dyn SkillStore>,
        parser: Arc<dyn SkillArchiveParser>,
        blobs: Arc<dyn BlobStore>,
        source_control: Arc<dyn SourceControl>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            resources: SkillResourceService::new(Arc::clone(&blobs)),
            store,
            parser,
            blobs,
            source_control,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Create a skill from user-supplied content.
    pub async fn create_user_skill(&self, input: CreateSkillInput) -> Result<Skill> {
        if input.content.trim().is_empty() {
            return Err(Error::invalid_input("content must not be empty"));
        }
        if input.name.trim().is_empty() {
            return Err(Error::invalid_input("name must not be empty"));
        }

        if self
            .store
            .find_by_name(&self.user_id, &input.name)
            .await?
            .is_some()
        {
            return Err(Error::conflict(format!(
                "Skill with name \"{}\" already exists",
                input.name
            )));
        }

        let identifier = match input.identifier.filter(|id| !id.is_empty()) {
            Some(identifier) => {
                if self
                    .store
                    .find_by_identifier(&self.user_id, &identifier)
                    .await?
                    .is_some()
                {
                    return Err(Error::conflict(format!(
                        "Skill with identifier \"{identifier}\" already exists"
                    )));
                }
                identifier
            },
            None => self.derive_user_identifier().await?,
        };

        let manifest = SkillManifest::new(
            input.name.clone(),
            input.description.clone().unwrap_or_default(),
        );
        let skill = self
            .store
            .create(&self.user_id, NewSkill {
                identifier,
                name: input.name,
                description: input.description,
                content: input.content,
                manifest,
                resources: None,
                source: SkillSource::User,
                archive_hash: None,
            })
            .await
            .map_err(conflict_on_duplicate)?;

        info!(user_id = %self.user_id, identifier = %skill.identifier, id = %skill.id, "created user skill");
        Ok(skill)
    }

    async fn derive_user_identifier(&self) -> Result<String> {
        for _ in 0..MAX_IDENTIFIER_ATTEMPTS {
            let candidate = random_user_identifier();
            if self
                .store
                .find_by_identifier(&self.user_id, &candidate)
                .await?
                .is_none()
            {
                return Ok(candidate);
            }
            debug!(%candidate, "generated identifier already taken, retrying");
        }
        Err(Error::conflict("could not derive a free skill identifier"))
    }

    /// Import a previously uploaded ZIP archive. Always creates a new skill.
    pub async fn import_from_zip(&self, input: ImportZipInput) -> Result<SkillImportResult> {
        #[cfg(feature = "metrics")]
        let start = std::time::Instant::now();

        let result = self.import_zip_inner(&input).await;

        #[cfg(feature = "metrics")]
        record_outcome("zip", &result, start);
        result
    }

    async fn import_zip_inner(&self, input: &ImportZipInput) -> Result<SkillImportResult> {
        debug!(user_id = %self.user_id, zip_file_id = %input.zip_file_id, "importing skill from zip");

        // Released on every path out of this function when `local` drops.
        let local = self
            .blobs
            .download_to_local(&self.user_id, &input.zip_file_id)
            .await?;
        let bytes = tokio::fs::read(local.path()).await?;
        debug!(path = %local.path().display(), size = bytes.len(), "read uploaded archive");

        let parsed = self.parser.parse(&bytes, ParseOptions::default()).await?;
        debug!(
            name = %parsed.manifest.name,
            resources = parsed.resources.len(),
            zip_hash = ?parsed.content_hash,
            "parsed archive"
        );

        let resources = self
            .store_resources(parsed.content_hash.as_deref(), &parsed.resources)
            .await?;

        let identifier = format!("import.{}.{}", self.user_id, now_ms());
        let skill = self
            .store
            .create(&self.user_id, NewSkill {
                identifier,
                name: parsed.manifest.name.clone(),
                description: Some(parsed.manifest.description.clone()),
                content: parsed.content,
                manifest: parsed.manifest,
                resources: Some(resources),
                source: SkillSource::User,
                archive_hash: parsed.content_hash,
            })
            .await
            .map_err(conflict_on_duplicate)?;

        local.release();
        info!(user_id = %self.user_id, identifier = %skill.identifier, id = %skill.id, "imported skill from zip");
        Ok(SkillImportResult {
            skill,
            status: ImportStatus::Created,
        })
    }

    /// Import from a GitHub repository, creating, updating or leaving the
    /// skill untouched depending on its archive content hash.
    pub async fn import_from_github(&self, input: ImportGitHubInput) -> Result<SkillImportResult> {
        #[cfg(feature = "metrics")]
        let start = std::time::Instant::now();

        let result = self.import_github_inner(&input).await;

        #[cfg(feature = "metrics")]
        record_outcome("github", &result, start);
        result
    }

    async fn import_github_inner(&self, input: &ImportGitHubInput) -> Result<SkillImportResult> {
        debug!(user_id = %self.user_id, git_url = %input.git_url, branch = ?input.branch, "importing skill from github");

        let repo = self
            .source_control
            .parse_repo_url(&input.git_url, input.branch.as_deref())
            .map_err(|e| match e {
                GitHubError::InvalidUrl { .. } => {
                    warn!(git_url = %input.git_url, error = %e, "rejected repository url");
                    Error::import(ImportErrorCode::InvalidUrl, e.to_string())
                },
                other => Error::external("parse repository url", other),
            })?;
        debug!(owner = %repo.owner, repo = %repo.repo, branch = %repo.branch, path = ?repo.path, "parsed repository url");

        let archive = self
            .source_control
            .download_archive(&repo)
            .await
            .map_err(|e| {
                warn!(owner = %repo.owner, repo = %repo.repo, error = %e, "repository download failed");
                match e {
                    GitHubError::NotFound { .. } => {
                        Error::import(ImportErrorCode::NotFound, e.to_string())
                    },
                    other => Error::import(
                        ImportErrorCode::DownloadFailed,
                        format!("Failed to download GitHub repository: {other}"),
                    ),
                }
            })?;
        debug!(size = archive.len(), "downloaded repository archive");

        let parsed = self
            .parser
            .parse(&archive, ParseOptions {
                base_path: repo.path.clone(),
                repack: true,
            })
            .await?;
        debug!(
            name = %parsed.manifest.name,
            resources = parsed.resources.len(),
            zip_hash = ?parsed.content_hash,
            repacked = parsed.repacked.as_ref().map_or(0, Vec::len),
            "parsed archive"
        );

        let identifier = github_identifier(&repo.owner, &repo.repo, repo.path.as_deref());
        let existing = self
            .store
            .find_by_identifier(&self.user_id, &identifier)
            .await?;

        if let Some(existing) = existing.as_ref()
            && parsed.content_hash.is_some()
            && existing.archive_hash == parsed.content_hash
        {
            info!(%identifier, id = %existing.id, "skill unchanged, skipping update");
            return Ok(SkillImportResult {
                skill: existing.clone(),
                status: ImportStatus::Unchanged,
            });
        }

        let resources = self
            .store_resources(parsed.content_hash.as_deref(), &parsed.resources)
            .await?;

        let mut manifest = parsed.manifest;
        manifest.git_url = Some(input.git_url.clone());
        manifest.repository = Some(repo.repository_url());

        if let Some(hash) = parsed.content_hash.as_deref() {
            let zip_bytes = parsed.repacked.as_deref().unwrap_or(archive.as_slice());
            let key = archive_key(hash);
            self.blobs.upload(&key, zip_bytes, "application/zip").await?;
            self.blobs
                .register_global_blob(GlobalBlob {
                    file_hash: hash.to_string(),
                    file_type: "application/zip".into(),
                    url: key.clone(),
                    size: zip_bytes.len() as u64,
                    metadata: BlobLocation::from_key(&key),
                })
                .await?;
            debug!(%key, size = zip_bytes.len(), "uploaded skill archive");
        }

        if let Some(existing) = existing {
            let skill = self
                .store
                .update(&self.user_id, &existing.id, SkillPatch {
                    name: Some(manifest.name.clone()),
                    description: Some(manifest.description.clone()),
                    content: Some(parsed.content),
                    manifest: Some(manifest),
                    resources: Some(resources),
                    archive_hash: Some(parsed.content_hash),
                })
                .await?;
            info!(%identifier, id = %skill.id, "updated skill from github");
            return Ok(SkillImportResult {
                skill,
                status: ImportStatus::Updated,
            });
        }

        let skill = self
            .store
            .create(&self.user_id, NewSkill {
                identifier: identifier.clone(),
                name: manifest.name.clone(),
                description: Some(manifest.description.clone()),
                content: parsed.content,
                manifest,
                resources: Some(resources),
                source: SkillSource::Market,
                archive_hash: parsed.content_hash,
            })
            .await
            .map_err(conflict_on_duplicate)?;
        info!(%identifier, id = %skill.id, "created skill from github");
        Ok(SkillImportResult {
            skill,
            status: ImportStatus::Created,
        })
    }

    async fn store_resources(
        &self,
        hash: Option<&str>,
        files: &ResourceBytes,
    ) -> Result<ResourceMap> {
        match hash {
            Some(hash) => self.resources.store_resources(hash, files).await,
            None => Ok(ResourceMap::new()),
        }
    }
}

#[cfg(feature = "metrics")]
fn record_outcome(source: &'static str, result: &Result<SkillImportResult>, start: std::time::Instant) {
    match result {
        Ok(r) => {
            counter!(names::IMPORTS_TOTAL, labels::SOURCE => source, labels::STATUS => r.status.to_string())
                .increment(1);
        },
        Err(e) => {
            let code = e.code().map_or("OTHER", ImportErrorCode::as_str);
            counter!(names::IMPORT_ERRORS_TOTAL, labels::SOURCE => source, labels::CODE => code)
                .increment(1);
        },
    }
    histogram!(names::IMPORT_DURATION_SECONDS, labels::SOURCE => source)
        .record(start.elapsed().as_secs_f64());
}
