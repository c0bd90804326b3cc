use clap::Subcommand;
use guard_core::{
    store::{ConfigRecord, ConfigStore, StoreError},
    types::{Credentials, TargetPayload, UpstreamTarget},
};
use prettytable::{row, Table};

use super::utils::{describe_credentials, print_info, print_success, CliError, CliResult};

#[derive(Subcommand)]
pub enum StoreCommands {
    /// List every stored upstream target
    List {
        /// Show credentials unmasked
        #[arg(long)]
        show_sensitive: bool,
    },

    /// Show the stored target for one node key
    Show {
        #[arg(short, long)]
        key: String,
    },

    /// Create or replace the stored target for a node key
    Set {
        #[arg(short, long)]
        key: String,

        #[arg(short, long)]
        url: String,

        /// Bearer token; wins over username/password
        #[arg(long)]
        jwt: Option<String>,

        #[arg(long, requires = "password")]
        username: Option<String>,

        #[arg(long)]
        password: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Created,
    Updated,
}

pub async fn handle_store_command(command: StoreCommands, store: &dyn ConfigStore) -> CliResult<()> {
    match command {
        StoreCommands::List { show_sensitive } => {
            let records = store.list().await?;
            if records.is_empty() {
                print_info("No upstream targets stored");
                return Ok(());
            }
            records_table(&records, show_sensitive).printstd();
        }

        StoreCommands::Show { key } => {
            let record = store.get(&key).await?.ok_or_else(|| StoreError::NotFound(key.clone()))?;
            println!("{}", serde_json::to_string_pretty(&record.value)?);
        }

        StoreCommands::Set { key, url, jwt, username, password } => {
            let cred = Credentials::from_parts(
                jwt.as_deref().unwrap_or_default(),
                username.as_deref().unwrap_or_default(),
                password.as_deref().unwrap_or_default(),
            );
            let outcome = set_target(store, &key, &url, cred).await?;
            let verb = match outcome {
                SetOutcome::Created => "created",
                SetOutcome::Updated => "updated",
            };
            print_success(&format!("Target for '{key}' {verb}: {url}"));
            print_info("Running proxies pick this up on restart or via the admin endpoint");
        }
    }

    Ok(())
}

/// Validates `url` and writes the target, updating an existing record or creating a new one.
pub async fn set_target(
    store: &dyn ConfigStore,
    key: &str,
    url: &str,
    cred: Credentials,
) -> CliResult<SetOutcome> {
    let target = UpstreamTarget::parse(url, cred)
        .map_err(|e| CliError::Input(format!("invalid target {url}: {e}")))?;
    let payload: TargetPayload = target.to_payload();

    if store.get(key).await?.is_some() {
        store.update(key, &payload).await?;
        Ok(SetOutcome::Updated)
    } else {
        store.create(key, &payload).await?;
        Ok(SetOutcome::Created)
    }
}

fn records_table(records: &[ConfigRecord], show_sensitive: bool) -> Table {
    let mut table = Table::new();
    table.add_row(row!["Key", "Url", "Credentials"]);
    for record in records {
        table.add_row(row![
            record.key,
            record.value.url,
            describe_credentials(&record.value.cred, show_sensitive),
        ]);
    }
    table
}
