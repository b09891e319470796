mod db_commands;
mod skills_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    skillport_config::SkillportConfig,
    tracing::{debug, info},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "skillport", about = "Skillport: import skills from ZIP archives and GitHub")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of skillport.{toml,yaml,yml,json}).
    #[arg(long, global = true, env = "SKILLPORT_CONFIG")]
    config: Option<PathBuf>,

    /// Custom data directory (overrides config value).
    #[arg(long, global = true, env = "SKILLPORT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// User the catalog operations act on behalf of.
    #[arg(long, global = true, env = "SKILLPORT_USER", default_value = "local")]
    user: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Skill catalog and imports.
    Skills {
        #[command(subcommand)]
        action: skills_commands::SkillAction,
    },
    /// Database management (reset, migrate).
    Db {
        #[command(subcommand)]
        action: db_commands::DbAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<SkillportConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = skillport_config::load_config(path)?;
            skillport_config::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
            config
        },
        None => skillport_config::discover_and_load(),
    };
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = Some(dir.clone());
    }
    debug!(data_dir = %config.data_dir().display(), "resolved storage");
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "skillport starting");

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Skills { action } => {
            skills_commands::handle_skills(action, &config, &cli.user).await
        },
        Commands::Db { action } => db_commands::handle_db(action, &config).await,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn user_defaults_to_local() {
        let cli = Cli::try_parse_from(["skillport", "skills", "list"]).unwrap();
        assert_eq!(cli.user, "local");
        assert!(matches!(cli.command, Commands::Skills { .. }));
    }

    #[test]
    fn data_dir_flag_overrides_config() {
        let cli =
            Cli::try_parse_from(["skillport", "--data-dir", "/tmp/sp", "db", "migrate"]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skillport.toml");
        std::fs::write(&path, "[storage]\ndata_dir = \"/elsewhere\"\n").unwrap();
        let cli = Cli {
            config: Some(path),
            ..cli
        };
        let config = load_config(&cli).unwrap();
        assert_eq!(config.data_dir(), PathBuf::from("/tmp/sp"));
    }
}
