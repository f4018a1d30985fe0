mod cli;
mod platform;

// Re-export the trait and common types
pub use cli::CliPlatform;
pub use platform::{LaunchSpec, OutputChannel, RunningSandbox, SandboxPlatform, TerminalState};

use std::sync::Arc;

use crate::config::SandboxConfig;

/// Creates the sandbox platform shared by all requests
///
/// Probes PATH for the configured launcher binary up front so a missing
/// vendor CLI shows up at startup instead of on the first request. The probe
/// only warns: tests and development setups swap in their own platform.
pub fn create_platform(config: &SandboxConfig) -> Arc<dyn SandboxPlatform> {
    match config.command.first() {
        Some(launcher) => {
            let found = std::process::Command::new("which")
                .arg(launcher)
                .output()
                .map(|output| output.status.success())
                .unwrap_or(false);

            if found {
                log::info!("Creating CliPlatform, launcher `{launcher}` found on PATH");
            } else {
                log::warn!(
                    "Creating CliPlatform, but launcher `{launcher}` is not on PATH; launches will fail"
                );
            }
        }
        None => log::warn!("Sandbox launcher command is empty; launches will fail"),
    }

    Arc::new(CliPlatform)
}
