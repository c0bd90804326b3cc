use clap::{Parser, Subcommand};
use guard_core::store::SqliteConfigStore;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod commands;
use commands::{
    handle_config_command, handle_store_command, utils::print_error, ConfigCommands,
    StoreCommands,
};

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Guard CLI - management tool for the JSON-RPC node guard")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config store URL, e.g. sqlite://proxy.db
    #[arg(long, env = "DB_SERVER", global = true)]
    database: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Durable upstream target management
    #[command(subcommand)]
    Store(StoreCommands),

    /// Environment configuration checks
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Store(store_command) => {
            let Some(database_url) = cli.database else {
                print_error("no config store given, pass --database or set DB_SERVER");
                std::process::exit(2);
            };
            debug!(database = %database_url, "connecting to config store");
            let store = SqliteConfigStore::connect(&database_url).await?;
            handle_store_command(store_command, &store).await?;
        }

        Commands::Config(config_command) => {
            handle_config_command(config_command)?;
        }
    }

    Ok(())
}
