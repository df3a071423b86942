//! External notification action.
//!
//! The SMS/cellular side of an escalation lives out of process. roadwatch
//! only knows how to hand it a message and learn whether the hand-off
//! succeeded; there is no delivery confirmation.

use std::sync::Arc;

use tokio::process::Command;
use tracing::{debug, info};

use crate::config::EscalationConfig;
use crate::error::{Error, Result};

/// Something that can transmit an emergency message.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync + std::fmt::Debug {
    /// Short name for logs and status output.
    fn name(&self) -> &str;

    /// Whether a real channel is behind this notifier.
    fn is_configured(&self) -> bool;

    /// Hand `message` to the external channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is absent or reports a failure.
    async fn send(&self, message: &str) -> Result<()>;
}

/// Runs a configured program once per message, without a shell.
///
/// The program receives the configured arguments, then the message, then the
/// emergency contact when one is set. Exit status 0 means accepted.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    program: String,
    args: Vec<String>,
    contact: Option<String>,
}

impl CommandNotifier {
    /// Create a notifier for `program`.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>, contact: Option<String>) -> Self {
        Self {
            program: program.into(),
            args,
            contact,
        }
    }
}

#[async_trait::async_trait]
impl Notifier for CommandNotifier {
    fn name(&self) -> &str {
        &self.program
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn send(&self, message: &str) -> Result<()> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).arg(message);
        if let Some(contact) = &self.contact {
            command.arg(contact);
        }
        command.kill_on_drop(true);

        debug!(program = %self.program, "Running notification command");
        let output = command
            .output()
            .await
            .map_err(|e| Error::notification(format!("failed to run {}: {e}", self.program)))?;

        if output.status.success() {
            info!(program = %self.program, "Notification accepted");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(Error::notification(if stderr.is_empty() {
                format!("{} exited with {}", self.program, output.status)
            } else {
                format!("{} exited with {}: {stderr}", self.program, output.status)
            }))
        }
    }
}

/// Stand-in used when no notification command is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredNotifier;

#[async_trait::async_trait]
impl Notifier for UnconfiguredNotifier {
    fn name(&self) -> &str {
        "none"
    }

    fn is_configured(&self) -> bool {
        false
    }

    async fn send(&self, _message: &str) -> Result<()> {
        Err(Error::NotifierUnconfigured)
    }
}

/// Build the notifier described by the escalation config.
#[must_use]
pub fn from_config(config: &EscalationConfig) -> Arc<dyn Notifier> {
    match config.command.as_deref().map(str::trim) {
        Some(program) if !program.is_empty() => Arc::new(CommandNotifier::new(
            program,
            config.args.clone(),
            config.emergency_contact.clone(),
        )),
        _ => Arc::new(UnconfiguredNotifier),
    }
}
