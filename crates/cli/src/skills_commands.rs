use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Context,
    clap::Subcommand,
    skillport_config::SkillportConfig,
    skillport_skills::{
        FsBlobStore, GitHubClient, GitHubClientConfig, SkillImporter, SkillService,
        SqliteSkillStore, ZipSkillParser,
        types::{
            CreateSkillInput, ImportGitHubInput, ImportZipInput, ResourceNodeKind,
            ResourceTreeNode, Skill, SkillImportResult, SkillSource, UpdateSkillInput,
        },
    },
};

use crate::db_commands;

#[derive(Subcommand)]
pub enum SkillAction {
    /// Create a skill from a markdown file.
    Create {
        /// Display name; must be unique for the user.
        #[arg(long)]
        name: String,
        /// File holding the skill content.
        #[arg(long)]
        content_file: PathBuf,
        #[arg(long)]
        description: Option<String>,
        /// Explicit identifier (default: `user.<random>`).
        #[arg(long)]
        identifier: Option<String>,
    },
    /// Upload a ZIP archive and import it as a new skill.
    ImportZip {
        /// Path to a ZIP containing SKILL.md.
        path: PathBuf,
    },
    /// Import (or refresh) a skill from a GitHub repository.
    ImportGithub {
        /// `owner/repo`, a repository URL, or a `.../tree/<branch>/<path>` URL.
        url: String,
        /// Branch to import (overrides the URL's branch).
        #[arg(long)]
        branch: Option<String>,
    },
    /// List skills, newest first.
    List {
        /// Only skills from this source (user, market, builtin).
        #[arg(long)]
        source: Option<SkillSource>,
        /// Case-insensitive match on name or description.
        #[arg(long)]
        search: Option<String>,
    },
    /// Show a skill by id or identifier.
    Show {
        skill: String,
        /// Print the full record as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Edit a skill in place.
    Edit {
        skill: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        content_file: Option<PathBuf>,
        /// JSON object merged over the stored manifest.
        #[arg(long)]
        manifest: Option<String>,
    },
    /// Print a skill's resource tree.
    Tree { skill: String },
    /// Print one resource file of a skill.
    Cat { skill: String, path: String },
    /// Delete a skill.
    Remove { skill: String },
}

/// Collaborators wired for one CLI invocation.
struct Wiring {
    user_id: String,
    store: Arc<SqliteSkillStore>,
    blobs: Arc<FsBlobStore>,
    config: SkillportConfig,
}

impl Wiring {
    async fn open(config: &SkillportConfig, user_id: &str) -> anyhow::Result<Self> {
        let pool = db_commands::open_pool(config).await?;
        Ok(Self {
            user_id: user_id.to_string(),
            store: Arc::new(SqliteSkillStore::new(pool.clone())),
            blobs: Arc::new(FsBlobStore::new(config.blob_dir(), pool)),
            config: config.clone(),
        })
    }

    fn importer(&self) -> anyhow::Result<SkillImporter> {
        let github = &self.config.github;
        let client = GitHubClient::new(GitHubClientConfig {
            api_base: github.api_base.clone(),
            user_agent: github.user_agent.clone(),
            token: github.token.clone(),
            timeout: Duration::from_secs(github.timeout_secs),
            default_branch: github.default_branch.clone(),
            max_archive_bytes: self.config.import.max_archive_bytes,
        })?;
        Ok(SkillImporter::new(
            self.user_id.clone(),
            self.store.clone(),
            Arc::new(ZipSkillParser::new(self.config.import.max_archive_bytes)),
            self.blobs.clone(),
            Arc::new(client),
        ))
    }

    fn service(&self) -> SkillService {
        SkillService::new(self.user_id.clone(), self.store.clone(), self.blobs.clone())
    }
}

pub async fn handle_skills(
    action: SkillAction,
    config: &SkillportConfig,
    user_id: &str,
) -> anyhow::Result<()> {
    let ctx = Wiring::open(config, user_id).await?;

    match action {
        SkillAction::Create {
            name,
            content_file,
            description,
            identifier,
        } => {
            let content = read_text(&content_file)?;
            let skill = ctx
                .importer()?
                .create_user_skill(CreateSkillInput {
                    content,
                    name,
                    description,
                    identifier,
                })
                .await?;
            println!("Created skill '{}' ({})", skill.name, skill.identifier);
        },
        SkillAction::ImportZip { path } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            anyhow::ensure!(
                bytes.len() as u64 <= config.import.max_archive_bytes,
                "{} exceeds the {} byte import limit",
                path.display(),
                config.import.max_archive_bytes
            );
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "skill.zip".into());
            let upload = ctx
                .blobs
                .create_user_file(&ctx.user_id, &name, "application/zip", &bytes)
                .await?;
            let result = ctx
                .importer()?
                .import_from_zip(ImportZipInput {
                    zip_file_id: upload.id,
                })
                .await?;
            print_import(&result);
        },
        SkillAction::ImportGithub { url, branch } => {
            let result = ctx
                .importer()?
                .import_from_github(ImportGitHubInput {
                    git_url: url,
                    branch,
                })
                .await?;
            print_import(&result);
        },
        SkillAction::List { source, search } => {
            let service = ctx.service();
            let skills = match search {
                Some(query) => service.search_skills(&query).await?,
                None => service.list_skills(source).await?,
            };
            if skills.is_empty() {
                println!("No skills found.");
            }
            for skill in &skills {
                println!(
                    "  {} - {} [{}] {}",
                    skill.name,
                    skill.description.as_deref().unwrap_or(""),
                    skill.source,
                    skill.identifier
                );
            }
        },
        SkillAction::Show { skill, json } => {
            let skill = ctx.service().resolve(&skill).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&skill)?);
            } else {
                print_skill(&skill);
            }
        },
        SkillAction::Edit {
            skill,
            name,
            description,
            content_file,
            manifest,
        } => {
            let service = ctx.service();
            let current = service.resolve(&skill).await?;
            let content = content_file.as_deref().map(read_text).transpose()?;
            let manifest = manifest
                .map(|raw| {
                    serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&raw)
                        .context("--manifest must be a JSON object")
                })
                .transpose()?;
            let updated = service
                .update_skill(UpdateSkillInput {
                    id: current.id,
                    content,
                    description,
                    name,
                    manifest,
                })
                .await?;
            println!("Updated skill '{}' ({})", updated.name, updated.identifier);
        },
        SkillAction::Tree { skill } => {
            let service = ctx.service();
            let skill = service.resolve(&skill).await?;
            let tree = service.resource_tree(&skill.id).await?;
            if tree.is_empty() {
                println!("{} has no resources.", skill.identifier);
            }
            print_tree(&tree, 0);
        },
        SkillAction::Cat { skill, path } => {
            let service = ctx.service();
            let skill = service.resolve(&skill).await?;
            print!("{}", service.read_resource(&skill.id, &path).await?);
        },
        SkillAction::Remove { skill } => {
            let service = ctx.service();
            let skill = service.resolve(&skill).await?;
            service.delete_skill(&skill.id).await?;
            println!("Removed skill '{}' ({})", skill.name, skill.identifier);
        },
    }

    Ok(())
}

fn read_text(path: &std::path::Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn print_import(result: &SkillImportResult) {
    println!(
        "Skill '{}' {} ({})",
        result.skill.name, result.status, result.skill.identifier
    );
}

fn print_skill(skill: &Skill) {
    println!("Id:          {}", skill.id);
    println!("Identifier:  {}", skill.identifier);
    println!("Name:        {}", skill.name);
    if let Some(ref description) = skill.description {
        println!("Description: {description}");
    }
    println!("Source:      {}", skill.source);
    if let Some(ref license) = skill.manifest.license {
        println!("License:     {license}");
    }
    if let Some(ref repository) = skill.manifest.repository {
        println!("Repository:  {repository}");
    }
    if let Some(ref hash) = skill.archive_hash {
        println!("Archive:     {hash}");
    }
    let resources = skill.resources.as_ref().map_or(0, |r| r.len());
    println!("Resources:   {resources}");
    println!("\n{}", skill.content);
}

fn print_tree(nodes: &[ResourceTreeNode], depth: usize) {
    for node in nodes {
        let suffix = match node.kind {
            ResourceNodeKind::Directory => "/",
            ResourceNodeKind::File => "",
        };
        println!("{}{}{suffix}", "  ".repeat(depth), node.name);
        if let Some(children) = &node.children {
            print_tree(children, depth + 1);
        }
    }
}
