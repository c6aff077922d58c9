//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use themepark_reconciler::ProviderConfig;

/// Theme park provider
#[derive(Parser, Debug)]
#[command(name = "themepark")]
#[command(version)]
#[command(about = "Reconciles Rides against the Operators assigned to them")]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Run with debug logging
    #[arg(short, long, global = true, default_value_t = false)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile continuously until interrupted
    Run {
        /// YAML or JSON manifest declaring Rides and Operators
        #[arg(short, long)]
        manifests: PathBuf,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Reconcile every resource once and print the resulting statuses as JSON
    Check {
        /// YAML or JSON manifest declaring Rides and Operators
        #[arg(short, long)]
        manifests: PathBuf,
    },
}

/// Flags overriding file and environment configuration.
#[derive(Args, Debug, Default, Clone)]
pub struct Overrides {
    /// Address of the external-collaborator endpoint
    #[arg(long)]
    pub provider_endpoint: Option<String>,

    /// Seconds between steady-state reconciles
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Maximum concurrent reconciles
    #[arg(long)]
    pub max_reconcile_rate: Option<usize>,

    /// Only reconcile while holding the leader lease
    #[arg(long)]
    pub leader_election: Option<bool>,
}

impl Overrides {
    /// Apply the flags that were given on top of `config`.
    #[must_use]
    pub fn apply(&self, config: ProviderConfig) -> ProviderConfig {
        ProviderConfig {
            provider_endpoint: self
                .provider_endpoint
                .clone()
                .unwrap_or(config.provider_endpoint),
            poll_interval_secs: self.poll_interval.unwrap_or(config.poll_interval_secs),
            max_reconcile_rate: self.max_reconcile_rate.unwrap_or(config.max_reconcile_rate),
            leader_election: self.leader_election.unwrap_or(config.leader_election),
            ..config
        }
    }
}

impl Cli {
    /// Resolve configuration: file, then environment, then flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded, an environment
    /// override is malformed, or the result fails validation.
    pub fn provider_config(&self) -> themepark_reconciler::Result<ProviderConfig> {
        let base = match &self.config {
            Some(path) => ProviderConfig::from_file(path)?,
            None => ProviderConfig::default(),
        };
        let config = base.with_env()?;
        let config = match &self.command {
            Commands::Run { overrides, .. } => overrides.apply(config),
            Commands::Check { .. } => config,
        };
        config.validate()?;
        Ok(config)
    }

    /// Manifest path of the selected command.
    #[must_use]
    pub fn manifests(&self) -> &std::path::Path {
        match &self.command {
            Commands::Run { manifests, .. } | Commands::Check { manifests } => manifests,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::unreachable)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "themepark",
            "run",
            "--manifests",
            "park.yaml",
            "--poll-interval",
            "5",
            "--max-reconcile-rate",
            "2",
            "--leader-election",
            "false",
            "--provider-endpoint",
            "localhost:7000",
        ]);
        let Commands::Run { overrides, .. } = &cli.command else {
            unreachable!("parsed run")
        };
        let config = overrides.apply(ProviderConfig::default());
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.max_reconcile_rate, 2);
        assert!(!config.leader_election);
        assert_eq!(config.provider_endpoint, "localhost:7000");
        assert_eq!(cli.manifests(), std::path::Path::new("park.yaml"));
    }

    #[test]
    fn test_overrides_keep_unset_values() {
        let config = Overrides::default().apply(ProviderConfig::default());
        assert_eq!(config, ProviderConfig::default());
    }

    #[test]
    fn test_parse_check_with_debug() {
        let cli = Cli::parse_from(["themepark", "--debug", "check", "-m", "park.yaml"]);
        assert!(cli.debug);
        assert!(matches!(cli.command, Commands::Check { .. }));
    }

    #[test]
    fn test_zero_rate_rejected() {
        let cli = Cli::parse_from([
            "themepark",
            "run",
            "-m",
            "park.yaml",
            "--max-reconcile-rate",
            "0",
        ]);
        assert!(cli.provider_config().is_err());
    }
}
