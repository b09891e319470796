use std::time::{SystemTime, UNIX_EPOCH};

use {
    async_trait::async_trait,
    sqlx::{SqlitePool, sqlite::SqlitePoolOptions},
};

use crate::{
    error::{Error, Result},
    types::{NewSkill, ResourceMap, Skill, SkillListItem, SkillManifest, SkillPatch, SkillSource},
};

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Durable skill catalog. Every call is scoped to one owning user; rows of
/// other users are never visible or writable.
#[async_trait]
pub trait SkillStore: Send + Sync {
    async fn find_by_id(&self, user_id: &str, id: &str) -> Result<Option<Skill>>;
    async fn find_by_identifier(&self, user_id: &str, identifier: &str) -> Result<Option<Skill>>;
    async fn find_by_name(&self, user_id: &str, name: &str) -> Result<Option<Skill>>;
    /// Newest first.
    async fn find_all(&self, user_id: &str) -> Result<Vec<SkillListItem>>;
    async fn list_by_source(&self, user_id: &str, source: SkillSource)
    -> Result<Vec<SkillListItem>>;
    /// Case-insensitive substring match on name or description.
    async fn search(&self, user_id: &str, query: &str) -> Result<Vec<SkillListItem>>;
    /// Insert a row. A taken identifier yields [`Error::DuplicateIdentifier`].
    async fn create(&self, user_id: &str, skill: NewSkill) -> Result<Skill>;
    /// Apply `patch` and bump `updated_at`.
    async fn update(&self, user_id: &str, id: &str, patch: SkillPatch) -> Result<Skill>;
    async fn delete(&self, user_id: &str, id: &str) -> Result<()>;
}

// ── SQLite-backed implementation ────────────────────────────────────

const SKILL_COLUMNS: &str = "id, identifier, name, description, content, manifest, resources, \
                             source, archive_hash, created_at, updated_at";

/// Stores skills in the `agent_skills` table.
pub struct SqliteSkillStore {
    pool: SqlitePool,
}

impl SqliteSkillStore {
    /// Create a store using an existing pool (migrations must already be run).
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_one_where(
        &self,
        user_id: &str,
        column: &'static str,
        value: &str,
    ) -> Result<Option<Skill>> {
        let sql = format!(
            "SELECT {SKILL_COLUMNS} FROM agent_skills WHERE user_id = ? AND {column} = ? LIMIT 1"
        );
        let row = sqlx::query_as::<_, SkillRow>(&sql)
            .bind(user_id)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Skill::try_from).transpose()
    }

    async fn fetch_list(&self, sql: &str, binds: &[&str]) -> Result<Vec<SkillListItem>> {
        let mut query = sqlx::query_as::<_, SkillRow>(sql);
        for value in binds {
            query = query.bind(*value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|r| Skill::try_from(r).map(SkillListItem::from))
            .collect()
    }
}

#[async_trait]
impl SkillStore for SqliteSkillStore {
    async fn find_by_id(&self, user_id: &str, id: &str) -> Result<Option<Skill>> {
        self.fetch_one_where(user_id, "id", id).await
    }

    async fn find_by_identifier(&self, user_id: &str, identifier: &str) -> Result<Option<Skill>> {
        self.fetch_one_where(user_id, "identifier", identifier).await
    }

    async fn find_by_name(&self, user_id: &str, name: &str) -> Result<Option<Skill>> {
        self.fetch_one_where(user_id, "name", name).await
    }

    async fn find_all(&self, user_id: &str) -> Result<Vec<SkillListItem>> {
        let sql = format!(
            "SELECT {SKILL_COLUMNS} FROM agent_skills WHERE user_id = ? \
             ORDER BY updated_at DESC, rowid DESC"
        );
        self.fetch_list(&sql, &[user_id]).await
    }

    async fn list_by_source(
        &self,
        user_id: &str,
        source: SkillSource,
    ) -> Result<Vec<SkillListItem>> {
        let sql = format!(
            "SELECT {SKILL_COLUMNS} FROM agent_skills WHERE user_id = ? AND source = ? \
             ORDER BY updated_at DESC, rowid DESC"
        );
        self.fetch_list(&sql, &[user_id, source.as_str()]).await
    }

    async fn search(&self, user_id: &str, query: &str) -> Result<Vec<SkillListItem>> {
        let pattern = format!("%{}%", escape_like(query));
        let sql = format!(
            "SELECT {SKILL_COLUMNS} FROM agent_skills WHERE user_id = ? \
             AND (name LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\') \
             ORDER BY updated_at DESC, rowid DESC"
        );
        self.fetch_list(&sql, &[user_id, pattern.as_str(), pattern.as_str()]).await
    }

    async fn create(&self, user_id: &str, skill: NewSkill) -> Result<Skill> {
        let now = now_ms();
        let row = Skill {
            id: uuid::Uuid::new_v4().to_string(),
            identifier: skill.identifier,
            name: skill.name,
            description: skill.description,
            content: skill.content,
            manifest: skill.manifest,
            resources: skill.resources,
            source: skill.source,
            archive_hash: skill.archive_hash,
            created_at: now,
            updated_at: now,
        };

        let result = sqlx::query(
            r#"INSERT INTO agent_skills (id, user_id, identifier, name, description, content, manifest, resources, source, archive_hash, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&row.id)
        .bind(user_id)
        .bind(&row.identifier)
        .bind(&row.name)
        .bind(&row.description)
        .bind(&row.content)
        .bind(serde_json::to_string(&row.manifest)?)
        .bind(encode_resources(row.resources.as_ref())?)
        .bind(row.source.as_str())
        .bind(&row.archive_hash)
        .bind(row.created_at as i64)
        .bind(row.updated_at as i64)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(row),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(Error::DuplicateIdentifier {
                    identifier: row.identifier,
                })
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, user_id: &str, id: &str, patch: SkillPatch) -> Result<Skill> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {SKILL_COLUMNS} FROM agent_skills WHERE user_id = ? AND id = ?");
        let current = sqlx::query_as::<_, SkillRow>(&sql)
            .bind(user_id)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::SkillNotFound { id: id.to_string() })?;
        let mut skill = Skill::try_from(current)?;

        if let Some(name) = patch.name {
            skill.name = name;
        }
        if let Some(description) = patch.description {
            skill.description = Some(description);
        }
        if let Some(content) = patch.content {
            skill.content = content;
        }
        if let Some(manifest) = patch.manifest {
            skill.manifest = manifest;
        }
        if let Some(resources) = patch.resources {
            skill.resources = Some(resources);
        }
        if let Some(archive_hash) = patch.archive_hash {
            skill.archive_hash = archive_hash;
        }
        // updated_at strictly increases on every write.
        skill.updated_at = now_ms().max(skill.updated_at + 1);

        sqlx::query(
            r#"UPDATE agent_skills
               SET name = ?, description = ?, content = ?, manifest = ?, resources = ?, archive_hash = ?, updated_at = ?
               WHERE user_id = ? AND id = ?"#,
        )
        .bind(&skill.name)
        .bind(&skill.description)
        .bind(&skill.content)
        .bind(serde_json::to_string(&skill.manifest)?)
        .bind(encode_resources(skill.resources.as_ref())?)
        .bind(&skill.archive_hash)
        .bind(skill.updated_at as i64)
        .bind(user_id)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(skill)
    }

    async fn delete(&self, user_id: &str, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM agent_skills WHERE user_id = ? AND id = ?")
            .bind(user_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn encode_resources(resources: Option<&ResourceMap>) -> Result<Option<String>> {
    resources
        .map(serde_json::to_string)
        .transpose()
        .map_err(Into::into)
}

fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Internal row type for sqlx mapping.
#[derive(sqlx::FromRow)]
struct SkillRow {
    id: String,
    identifier: String,
    name: String,
    description: Option<String>,
    content: String,
    manifest: String,
    resources: Option<String>,
    source: String,
    archive_hash: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<SkillRow> for Skill {
    type Error = Error;

    fn try_from(r: SkillRow) -> Result<Self> {
        let manifest: SkillManifest = serde_json::from_str(&r.manifest)?;
        let resources = r
            .resources
            .as_deref()
            .map(serde_json::from_str::<ResourceMap>)
            .transpose()?;
        let source = r
            .source
            .parse::<SkillSource>()
            .map_err(Error::invalid_input)?;
        Ok(Self {
            id: r.id,
            identifier: r.identifier,
            name: r.name,
            description: r.description,
            content: r.content,
            manifest,
            resources,
            source,
            archive_hash: r.archive_hash,
            created_at: r.created_at as u64,
            updated_at: r.updated_at as u64,
        })
    }
}

/// Open (creating if needed) a SQLite database and run the catalog
/// migrations.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    crate::run_migrations(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory pool with migrations applied.
#[cfg(test)]
pub(crate) async fn memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    crate::run_migrations(&pool).await?;
    Ok(pool)
}
