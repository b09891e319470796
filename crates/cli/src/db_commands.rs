use {clap::Subcommand, skillport_config::SkillportConfig, sqlx::SqlitePool};

#[derive(Subcommand)]
pub enum DbAction {
    /// Delete the catalog database and all stored blobs.
    Reset,
    /// Run all pending database migrations.
    Migrate,
}

fn database_url(config: &SkillportConfig) -> String {
    format!("sqlite:{}?mode=rwc", config.database_path().display())
}

/// Open the catalog database, creating it and applying migrations if needed.
pub async fn open_pool(config: &SkillportConfig) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = config.database_path().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let pool = skillport_skills::connect(&database_url(config))
        .await
        .map_err(|e| anyhow::anyhow!("failed to open catalog database: {e}"))?;
    Ok(pool)
}

pub async fn handle_db(action: DbAction, config: &SkillportConfig) -> anyhow::Result<()> {
    match action {
        DbAction::Reset => reset(config),
        DbAction::Migrate => migrate(config).await,
    }
}

fn reset(config: &SkillportConfig) -> anyhow::Result<()> {
    let db = config.database_path();
    let mut deleted = false;

    // SQLite may leave WAL and SHM files next to the database.
    for suffix in ["", "-wal", "-shm"] {
        let mut path = db.clone().into_os_string();
        path.push(suffix);
        let path = std::path::PathBuf::from(path);
        if path.exists() {
            std::fs::remove_file(&path)?;
            println!("Deleted: {}", path.display());
            deleted = true;
        }
    }

    let blobs = config.blob_dir();
    if blobs.exists() {
        std::fs::remove_dir_all(&blobs)?;
        println!("Deleted: {}", blobs.display());
        deleted = true;
    }

    if deleted {
        println!("Run `skillport db migrate` to recreate the database.");
    } else {
        println!("Nothing to delete.");
    }
    Ok(())
}

async fn migrate(config: &SkillportConfig) -> anyhow::Result<()> {
    println!("Running migrations for {}...", config.database_path().display());
    let pool = open_pool(config).await?;
    pool.close().await;
    println!("All migrations complete.");
    Ok(())
}
