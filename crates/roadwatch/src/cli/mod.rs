//! Command-line interface for roadwatch.
//!
//! This module provides the CLI structure for the `roadwatch` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    ConfigCommand, IncidentsCommand, ServeCommand, SosCommand, StatusCommand, TriggerArg,
    WatchChannel, WatchCommand,
};

/// roadwatch - In-vehicle sensor fusion and alert engine
///
/// Receives readings from edge sensors, keeps the latest value of every
/// channel for dashboards, throttles drowsiness alerts and escalates
/// emergencies to an external contact.
#[derive(Debug, Parser)]
#[command(name = "roadwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the ingestion and dashboard server
    Serve(ServeCommand),

    /// Show storage status
    Status(StatusCommand),

    /// List recent incidents
    Incidents(IncidentsCommand),

    /// Send an SOS to a running server
    Sos(SosCommand),

    /// Poll a running server and print channel changes
    Watch(WatchCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn status_cli(verbose: u8, quiet: bool) -> Cli {
        Cli {
            config: None,
            verbose,
            quiet,
            command: Command::Status(StatusCommand { json: false }),
        }
    }

    #[test]
    fn test_cli_name() {
        assert_eq!(Cli::command().get_name(), "roadwatch");
    }

    #[test]
    fn test_verbosity_levels() {
        use crate::logging::Verbosity;
        assert_eq!(status_cli(0, true).verbosity(), Verbosity::Quiet);
        assert_eq!(status_cli(0, false).verbosity(), Verbosity::Normal);
        assert_eq!(status_cli(1, false).verbosity(), Verbosity::Verbose);
        assert_eq!(status_cli(3, false).verbosity(), Verbosity::Trace);
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_with_bind() {
        let cli = Cli::try_parse_from(["roadwatch", "serve", "--bind", "127.0.0.1:9000"]).unwrap();
        match cli.command {
            Command::Serve(cmd) => assert_eq!(cmd.bind.as_deref(), Some("127.0.0.1:9000")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_incidents_defaults() {
        let cli = Cli::try_parse_from(["roadwatch", "incidents"]).unwrap();
        match cli.command {
            Command::Incidents(cmd) => {
                assert_eq!(cmd.limit, 20);
                assert!(!cmd.json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_sos() {
        let cli = Cli::try_parse_from([
            "roadwatch",
            "sos",
            "--trigger",
            "hazard",
            "--message",
            "Tree on road",
        ])
        .unwrap();
        match cli.command {
            Command::Sos(cmd) => {
                assert_eq!(cmd.trigger, TriggerArg::Hazard);
                assert_eq!(cmd.message.as_deref(), Some("Tree on road"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_sos_rejects_unknown_trigger() {
        assert!(Cli::try_parse_from(["roadwatch", "sos", "--trigger", "boredom"]).is_err());
    }

    #[test]
    fn test_parse_watch_channels() {
        let cli = Cli::try_parse_from(["roadwatch", "watch", "radar", "alcohol"]).unwrap();
        match cli.command {
            Command::Watch(cmd) => {
                assert_eq!(cmd.channels, vec![WatchChannel::Radar, WatchChannel::Alcohol]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_config_validate() {
        let cli =
            Cli::try_parse_from(["roadwatch", "config", "validate", "-f", "/tmp/x.toml"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Config(ConfigCommand::Validate { file: Some(_) })
        ));
    }

    #[test]
    fn test_parse_with_config() {
        let cli =
            Cli::try_parse_from(["roadwatch", "-c", "/custom/config.toml", "status"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
    }

    #[test]
    fn test_parse_with_verbose_and_quiet() {
        let cli = Cli::try_parse_from(["roadwatch", "-vv", "status"]).unwrap();
        assert_eq!(cli.verbose, 2);
        let cli = Cli::try_parse_from(["roadwatch", "-q", "status"]).unwrap();
        assert!(cli.quiet);
    }
}
