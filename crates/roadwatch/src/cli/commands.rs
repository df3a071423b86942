//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::escalation::Trigger;
use crate::poll::PollTarget;

/// Serve command arguments.
#[derive(Debug, Args)]
pub struct ServeCommand {
    /// Address to listen on (overrides `server.bind`)
    #[arg(short, long, value_name = "ADDR")]
    pub bind: Option<String>,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Incidents command arguments.
#[derive(Debug, Args)]
pub struct IncidentsCommand {
    /// Maximum number of incidents to list
    #[arg(short, long, default_value = "20")]
    pub limit: usize,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// SOS command arguments.
#[derive(Debug, Args)]
pub struct SosCommand {
    /// What caused the SOS
    #[arg(short, long, value_enum, default_value = "manual")]
    pub trigger: TriggerArg,

    /// Message to send instead of the default template
    #[arg(short, long)]
    pub message: Option<String>,
}

/// Watch command arguments.
#[derive(Debug, Args)]
pub struct WatchCommand {
    /// Channels to watch (all when omitted)
    #[arg(value_enum)]
    pub channels: Vec<WatchChannel>,
}

impl WatchCommand {
    /// Poll targets selected on the command line.
    #[must_use]
    pub fn targets(&self) -> Vec<PollTarget> {
        if self.channels.is_empty() {
            PollTarget::ALL.to_vec()
        } else {
            let mut targets: Vec<PollTarget> =
                self.channels.iter().copied().map(PollTarget::from).collect();
            targets.dedup();
            targets
        }
    }
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Escalation trigger argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TriggerArg {
    /// Driver-initiated SOS
    Manual,
    /// Drowsiness escalation
    Drowsiness,
    /// Road hazard
    Hazard,
}

impl From<TriggerArg> for Trigger {
    fn from(arg: TriggerArg) -> Self {
        match arg {
            TriggerArg::Manual => Self::Manual,
            TriggerArg::Drowsiness => Self::Drowsiness,
            TriggerArg::Hazard => Self::Hazard,
        }
    }
}

/// Channel argument for `watch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WatchChannel {
    /// GPS location
    Location,
    /// Vibration and pothole flag
    Vibration,
    /// Latest radar ping
    Radar,
    /// Alcohol level
    Alcohol,
    /// Drowsiness state and history
    Drowsiness,
}

impl From<WatchChannel> for PollTarget {
    fn from(arg: WatchChannel) -> Self {
        match arg {
            WatchChannel::Location => Self::Location,
            WatchChannel::Vibration => Self::Vibration,
            WatchChannel::Radar => Self::Radar,
            WatchChannel::Alcohol => Self::Alcohol,
            WatchChannel::Drowsiness => Self::Drowsiness,
        }
    }
}
