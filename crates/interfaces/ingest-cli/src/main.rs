use anyhow::Context;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use ingest_cli::{commands, default_config_path};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Config file (defaults to the per-user config directory)
    #[arg(short, long, global = true, env = "INGEST_CONFIG")]
    config: Option<Utf8PathBuf>,
    /// SFTP password, overriding the config file
    #[arg(long, global = true, env = "INGEST_SFTP_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the remote folder until interrupted
    Run,
    /// Run a single poll cycle and exit
    Once,
    /// Validate the config file and print a summary
    #[command(name = "check-config")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("installing log subscriber")?;

    let path = match cli.config {
        Some(path) => path,
        None => default_config_path().context("cannot determine config dir; pass --config")?,
    };
    let cfg = commands::load_config(&path, cli.password)?;

    match cli.command {
        Commands::Run => commands::cmd_run(cfg).await?,
        Commands::Once => commands::cmd_once(cfg).await?,
        Commands::CheckConfig => commands::cmd_check_config(&path, &cfg)?,
    }

    Ok(())
}
