//! Privileged power-off action

use std::process::Command;
use tracing::{error, info, warn};

use crate::config::PowerConfig;

/// Executes a shutdown request; fire-and-forget
pub trait PowerControl: Send + Sync {
    fn request_shutdown(&self);
}

/// Runs the platform power-off command
#[derive(Debug, Clone)]
pub struct SystemPower {
    command: Vec<String>,
    dry_run: bool,
}

impl SystemPower {
    pub fn new(config: &PowerConfig) -> Self {
        let command = config
            .command
            .clone()
            .filter(|command| !command.is_empty())
            .unwrap_or_else(default_command);

        Self {
            command,
            dry_run: config.dry_run,
        }
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }
}

impl PowerControl for SystemPower {
    fn request_shutdown(&self) {
        if self.dry_run {
            warn!(command = ?self.command, "Shutdown requested (dry run, not executing)");
            return;
        }

        let Some((program, args)) = self.command.split_first() else {
            error!("No power-off command configured");
            return;
        };

        warn!(command = ?self.command, "Executing power-off command");
        match Command::new(program).args(args).spawn() {
            Ok(child) => info!(pid = child.id(), "Power-off command started"),
            Err(e) => error!(error = %e, %program, "Failed to start power-off command"),
        }
    }
}

#[cfg(windows)]
fn default_command() -> Vec<String> {
    ["shutdown", "/s", "/f", "/t", "0"].map(String::from).to_vec()
}

#[cfg(target_os = "macos")]
fn default_command() -> Vec<String> {
    ["shutdown", "-h", "now"].map(String::from).to_vec()
}

#[cfg(not(any(windows, target_os = "macos")))]
fn default_command() -> Vec<String> {
    ["systemctl", "poweroff"].map(String::from).to_vec()
}
