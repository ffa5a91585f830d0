pub mod config;

use clap::{Parser, Subcommand};

/// Tether — reliable session server over WebSocket.
#[derive(Debug, Parser)]
#[command(name = "tether", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the session server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `TETHER_CONFIG` (or
/// `tether.toml` by default).  Returns the parsed config and the path that
/// was used.  A missing file yields the defaults.
pub fn load_config() -> anyhow::Result<(tether_domain::config::Config, String)> {
    let config_path =
        std::env::var("TETHER_CONFIG").unwrap_or_else(|_| "tether.toml".into());
    let config = tether_domain::config::Config::load_from(&config_path)
        .map_err(|e| anyhow::anyhow!("loading {config_path}: {e}"))?;
    Ok((config, config_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["tether"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn config_subcommands_parse() {
        let cli = Cli::try_parse_from(["tether", "config", "validate"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Config(ConfigCommand::Validate))
        ));
        let cli = Cli::try_parse_from(["tether", "config", "show"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Config(ConfigCommand::Show))));
    }
}
