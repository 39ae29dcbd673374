use clap::{Parser, Subcommand};

/// CLI surface for inspecting and editing global preferences.
#[derive(Parser, Debug)]
#[command(
    name = "pocketbook",
    about = "Global preference store with encryption of sensitive values",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print a preference as JSON (decrypted when sensitive).
    Get { key: String },
    /// Store a preference. The value is parsed as JSON, falling back to a plain string.
    Set { key: String, value: String },
    /// Remove one or more preferences.
    Remove {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Print the value exactly as stored on disk.
    Inspect { key: String },
    /// Run a health check against the store and the encryption key.
    Health,
    /// Print version and exit.
    Version,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
