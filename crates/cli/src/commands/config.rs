use clap::Subcommand;
use guard_core::config::AppConfig;

use super::utils::{describe_credentials, print_info, print_success, CliResult};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Load the environment configuration the way the server does and print a summary
    Check {
        /// Show credentials unmasked
        #[arg(long)]
        show_sensitive: bool,
    },
}

pub fn handle_config_command(command: ConfigCommands) -> CliResult<()> {
    match command {
        ConfigCommands::Check { show_sensitive } => {
            print_info("Loading configuration from the environment...");
            let config = AppConfig::load()?;
            print_success("Configuration is valid!");
            for line in summary(&config, show_sensitive) {
                println!("{line}");
            }
            Ok(())
        }
    }
}

fn list_or_all(entries: &std::collections::HashSet<String>) -> String {
    if entries.is_empty() {
        return "all".to_string();
    }
    let mut sorted: Vec<_> = entries.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.join(",")
}

/// Human-readable summary of a loaded configuration.
pub fn summary(config: &AppConfig, show_sensitive: bool) -> Vec<String> {
    let policy = &config.policy;
    let mut lines = vec![
        "Configuration Summary:".to_string(),
        format!("  Server: {}:{}", config.server.host, config.server.port),
        format!("  Workers: {}", config.server.num_workers),
        format!("  Max body: {} bytes", config.server.max_body_bytes),
        format!(
            "  Metrics: {}",
            config.server.metrics_port.map_or_else(|| "off".to_string(), |port| format!(":{port}"))
        ),
        format!("  Mode: {}", if config.has_failover() { "failover" } else { "single" }),
        format!("  Client auth: {}", describe_credentials(&policy.proxy_cred, show_sensitive)),
        format!("  Admin auth: {}", describe_credentials(&policy.admin_cred, show_sensitive)),
        format!("  Allowed paths: {}", list_or_all(&policy.allowed_paths)),
        format!("  Allowed methods: {}", list_or_all(&policy.allowed_methods)),
        format!("  Store: {}", config.store.server),
        format!("  Dev mode: {}", config.logging.dev_mode),
        "  Nodes:".to_string(),
    ];
    for node in &config.nodes {
        lines.push(format!(
            "    {} [{}] {} ({}) admin={}{}",
            node.key,
            node.role,
            node.defaults.raw_url(),
            describe_credentials(node.defaults.cred(), show_sensitive),
            node.admin_path,
            if node.store_backed { "" } else { " not persisted" },
        ));
    }
    lines
}
