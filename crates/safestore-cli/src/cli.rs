use clap::{Parser, Subcommand};
use safestore_core::Mechanism;

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "safestore",
    about = "Encrypted key-value store layered over a plain storage backend",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Backend mechanism to operate on (`local` or `session`); overrides the config file.
    #[arg(long, global = true)]
    pub mechanism: Option<Mechanism>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Store a value. VALUE is parsed as JSON, falling back to a plain string.
    Set { key: String, value: String },
    /// Print the stored value as JSON.
    Get { key: String },
    /// Remove a key (no-op when missing).
    Remove { key: String },
    /// Remove every entry from the selected backend. The encryption key is kept.
    Clear,
    /// Round-trip a probe value through the encrypted store.
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
