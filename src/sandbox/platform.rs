use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncRead;

/// Byte stream carrying one of the sandbox's output channels
pub type OutputChannel = Box<dyn AsyncRead + Send + Unpin>;

/// Everything the platform needs to start one sandbox
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Fully substituted launcher argv
    pub command: Vec<String>,
    /// Named secret values injected into the sandbox environment
    pub secrets: Vec<(String, String)>,
    /// Directory holding the staged artifact; the launcher runs with this
    /// as its working directory
    pub staging_dir: PathBuf,
}

/// Terminal state of a finished sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalState {
    pub exit_code: i32,
}

/// Trait for backends that launch ephemeral sandboxes
///
/// This trait abstracts the managed platform the relay hands code to.
/// Isolation, image boot and credential validation all happen behind it;
/// the relay only stages an artifact, launches, reads the two output
/// channels and waits for the terminal state.
#[async_trait]
pub trait SandboxPlatform: Send + Sync {
    /// Starts one sandbox and returns a handle to the live execution
    async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn RunningSandbox>>;
}

/// Handle to one live sandbox execution
///
/// Each output channel can be taken exactly once; the terminal wait
/// consumes the handle.
#[async_trait]
pub trait RunningSandbox: Send {
    /// Takes the standard-output channel, `None` after the first call
    fn take_stdout(&mut self) -> Option<OutputChannel>;

    /// Takes the standard-error channel, `None` after the first call
    fn take_stderr(&mut self) -> Option<OutputChannel>;

    /// Waits until the sandbox reaches a terminal state
    async fn wait(self: Box<Self>) -> Result<TerminalState>;
}
