//! Local side effects triggered by broker commands.

use std::process::Stdio;

use qiko_proto::Command;
use tracing::info;

use crate::config::ActionConfig;
use crate::error::NodeError;

/// Receiver of commands parsed by the inbound loop.
///
/// Called inline from the inbound loop, so implementations should return
/// quickly. Errors are logged by the caller and never stop the loop.
pub trait CommandHandler: Send + Sync {
    /// Apply `msg=on`.
    fn on_command_on(&self) -> Result<(), NodeError>;

    /// Apply `msg=off`.
    fn on_command_off(&self) -> Result<(), NodeError>;

    /// Dispatch a parsed command to the matching callback.
    fn apply(&self, command: Command) -> Result<(), NodeError> {
        match command {
            Command::On => self.on_command_on(),
            Command::Off => self.on_command_off(),
        }
    }
}

/// Runs a configured shell command for each command, without waiting for it.
#[derive(Debug, Clone, Default)]
pub struct ShellActions {
    on_command: Option<String>,
    off_command: Option<String>,
}

impl ShellActions {
    /// Create from the action configuration.
    #[must_use]
    pub fn new(config: &ActionConfig) -> Self {
        Self {
            on_command: config.on_command.clone(),
            off_command: config.off_command.clone(),
        }
    }

    fn run(&self, command: Command, command_line: Option<&str>) -> Result<(), NodeError> {
        let Some(command_line) = command_line else {
            info!(%command, "no action configured for command");
            return Ok(());
        };

        let child = shell(command_line)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| NodeError::Action(format!("failed to start '{command_line}': {e}")))?;

        info!(%command, pid = child.id(), command_line, "started action");
        Ok(())
    }
}

impl CommandHandler for ShellActions {
    fn on_command_on(&self) -> Result<(), NodeError> {
        self.run(Command::On, self.on_command.as_deref())
    }

    fn on_command_off(&self) -> Result<(), NodeError> {
        self.run(Command::Off, self.off_command.as_deref())
    }
}

#[cfg(unix)]
fn shell(command_line: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(command_line);
    cmd
}

#[cfg(windows)]
fn shell(command_line: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new("cmd");
    cmd.arg("/C").arg(command_line);
    cmd
}
