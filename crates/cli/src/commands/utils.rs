use guard_core::{config::ConfigError, store::StoreError, types::Credentials};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Error: {0}")]
    General(String),
}

impl From<serde_json::Error> for CliError {
    fn from(error: serde_json::Error) -> Self {
        Self::General(error.to_string())
    }
}

pub type CliResult<T> = Result<T, CliError>;

pub fn print_success(message: &str) {
    println!("[SUCCESS] {message}");
}

pub fn print_error(message: &str) {
    eprintln!("[ERROR] {message}");
}

pub fn print_info(message: &str) {
    println!("[INFO] {message}");
}

/// Keeps the first two characters of a secret and hides the rest.
pub fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(2).collect();
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}

/// One-line description of a credential. Secrets are masked unless `show_sensitive` is set.
pub fn describe_credentials(cred: &Credentials, show_sensitive: bool) -> String {
    let hide = |secret: &str| if show_sensitive { secret.to_string() } else { mask(secret) };
    match cred {
        Credentials::None => "none".to_string(),
        Credentials::Bearer(token) => format!("bearer {}", hide(token)),
        Credentials::Basic { username, password } => {
            format!("basic {username}:{}", hide(password))
        }
    }
}
