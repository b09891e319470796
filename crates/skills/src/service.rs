//! Catalog operations outside the import flows: edit, delete, listing and
//! resource browsing.

use std::sync::Arc;

use tracing::info;

use crate::{
    blob::BlobStore,
    error::{Error, Result},
    resource::SkillResourceService,
    store::SkillStore,
    types::{
        ResourceMap, ResourceTreeNode, Skill, SkillListItem, SkillPatch, SkillSource,
        UpdateSkillInput,
    },
};

pub struct SkillService {
    user_id: String,
    store: Arc<dyn SkillStore>,
    resources: SkillResourceService,
}

impl SkillService {
    pub fn new(
        user_id: impl Into<String>,
        store: Arc<dyn SkillStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            store,
            resources: SkillResourceService::new(blobs),
        }
    }

    pub async fn get_skill(&self, id: &str) -> Result<Skill> {
        self.store
            .find_by_id(&self.user_id, id)
            .await?
            .ok_or_else(|| Error::SkillNotFound { id: id.to_string() })
    }

    /// Look a skill up by row id, falling back to its identifier.
    pub async fn resolve(&self, id_or_identifier: &str) -> Result<Skill> {
        if let Some(skill) = self.store.find_by_id(&self.user_id, id_or_identifier).await? {
            return Ok(skill);
        }
        self.store
            .find_by_identifier(&self.user_id, id_or_identifier)
            .await?
            .ok_or_else(|| Error::SkillNotFound {
                id: id_or_identifier.to_string(),
            })
    }

    pub async fn list_skills(&self, source: Option<SkillSource>) -> Result<Vec<SkillListItem>> {
        match source {
            Some(source) => self.store.list_by_source(&self.user_id, source).await,
            None => self.store.find_all(&self.user_id).await,
        }
    }

    pub async fn search_skills(&self, query: &str) -> Result<Vec<SkillListItem>> {
        self.store.search(&self.user_id, query).await
    }

    /// Edit a skill in place. The identifier never changes; a manifest patch
    /// is merged over the stored manifest key by key.
    pub async fn update_skill(&self, input: UpdateSkillInput) -> Result<Skill> {
        let current = self.get_skill(&input.id).await?;

        if let Some(name) = input.name.as_deref() {
            if name.trim().is_empty() {
                return Err(Error::invalid_input("name must not be empty"));
            }
            if let Some(other) = self.store.find_by_name(&self.user_id, name).await?
                && other.id != current.id
            {
                return Err(Error::conflict(format!(
                    "Skill with name \"{name}\" already exists"
                )));
            }
        }
        if input.content.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(Error::invalid_input("content must not be empty"));
        }

        let mut manifest = match &input.manifest {
            Some(patch) => current
                .manifest
                .merged_with(patch)
                .map_err(|e| Error::invalid_input(format!("invalid manifest: {e}")))?,
            None => current.manifest.clone(),
        };
        if let Some(name) = &input.name {
            manifest.name = name.clone();
        }
        if let Some(description) = &input.description {
            manifest.description = description.clone();
        }

        let skill = self
            .store
            .update(&self.user_id, &current.id, SkillPatch {
                name: input.name,
                description: input.description,
                content: input.content,
                manifest: Some(manifest),
                ..SkillPatch::default()
            })
            .await?;
        info!(user_id = %self.user_id, id = %skill.id, "updated skill");
        Ok(skill)
    }

    pub async fn delete_skill(&self, id: &str) -> Result<()> {
        let skill = self.get_skill(id).await?;
        self.store.delete(&self.user_id, &skill.id).await?;
        info!(user_id = %self.user_id, id = %skill.id, identifier = %skill.identifier, "deleted skill");
        Ok(())
    }

    pub async fn resource_tree(&self, id: &str) -> Result<Vec<ResourceTreeNode>> {
        let skill = self.get_skill(id).await?;
        Ok(self
            .resources
            .list_resources(&skill.resources.unwrap_or_default()))
    }

    pub async fn read_resource(&self, id: &str, path: &str) -> Result<String> {
        let skill = self.get_skill(id).await?;
        let resources: ResourceMap = skill.resources.unwrap_or_default();
        self.resources.read_resource(&resources, path).await
    }
}
