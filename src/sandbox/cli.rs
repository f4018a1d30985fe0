use std::process::Stdio;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::process::{Child, Command};

use super::{LaunchSpec, OutputChannel, RunningSandbox, SandboxPlatform, TerminalState};

/// Launches sandboxes through the platform vendor's CLI
///
/// CliPlatform spawns the configured launcher command as a child process for
/// every request. The launcher talks to the managed platform; this process
/// only feeds it the staged artifact and credentials and reads back the two
/// output pipes. No isolation happens on this host.
pub struct CliPlatform;

#[async_trait]
impl SandboxPlatform for CliPlatform {
    async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn RunningSandbox>> {
        let Some((program, args)) = spec.command.split_first() else {
            bail!("Empty launcher command");
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(spec.secrets.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&spec.staging_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        log::debug!("Spawning launcher `{program}` with {} args", args.len());
        let mut child = cmd.spawn()?;

        let stdout = child.stdout.take().map(|s| Box::new(s) as OutputChannel);
        let stderr = child.stderr.take().map(|s| Box::new(s) as OutputChannel);

        Ok(Box::new(CliSandbox {
            child,
            stdout,
            stderr,
        }))
    }
}

/// One launcher child process standing in for the remote sandbox
struct CliSandbox {
    child: Child,
    stdout: Option<OutputChannel>,
    stderr: Option<OutputChannel>,
}

#[async_trait]
impl RunningSandbox for CliSandbox {
    fn take_stdout(&mut self) -> Option<OutputChannel> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<OutputChannel> {
        self.stderr.take()
    }

    async fn wait(self: Box<Self>) -> Result<TerminalState> {
        let mut child = self.child;
        let status = child.wait().await?;
        let exit_code = match status.code() {
            Some(code) => code,
            None => {
                // Killed by a signal on the launcher side
                log::warn!("Launcher terminated without an exit code: {status}");
                -1
            }
        };
        Ok(TerminalState { exit_code })
    }
}
