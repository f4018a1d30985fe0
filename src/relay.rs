use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, bail};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::SandboxConfig;
use crate::sandbox::{LaunchSpec, OutputChannel, RunningSandbox, SandboxPlatform, TerminalState};

/// One inbound execution request
///
/// `Debug` is written by hand so the session secret renders redacted and
/// cannot reach a log line through formatting.
#[derive(Deserialize, Clone)]
pub struct ExecutionRequest {
    /// Source text to execute, materialized verbatim into the staging dir
    pub code: String,
    pub session_id: String,
    pub session_secret: String,
    pub workspace_name: String,
    #[serde(rename = "modal_environment")]
    pub environment_name: String,
}

impl ExecutionRequest {
    /// Secret bundle injected into the sandbox environment, one entry per
    /// credential field
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        vec![
            ("MODAL_SESSION_ID".to_string(), self.session_id.clone()),
            (
                "MODAL_SESSION_SECRET".to_string(),
                self.session_secret.clone(),
            ),
            ("MODAL_WORKSPACE".to_string(), self.workspace_name.clone()),
            (
                "MODAL_ENVIRONMENT".to_string(),
                self.environment_name.clone(),
            ),
        ]
    }
}

impl fmt::Debug for ExecutionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionRequest")
            .field("code", &format_args!("<{} bytes>", self.code.len()))
            .field("session_id", &self.session_id)
            .field("session_secret", &"<redacted>")
            .field("workspace_name", &self.workspace_name)
            .field("environment_name", &self.environment_name)
            .finish()
    }
}

/// One externally visible event on the execution stream
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum StreamEvent {
    /// One line of sandbox output; the channel it came from is not retained
    Line { text: String },
    /// Clean terminal state, exactly once after the last line
    Done { done: bool, exit_code: i32 },
    /// Relay fault after the stream started; the stream ends right after
    Error { error: String },
}

impl StreamEvent {
    pub fn line(text: impl Into<String>) -> Self {
        Self::Line { text: text.into() }
    }

    pub fn done(exit_code: i32) -> Self {
        Self::Done {
            done: true,
            exit_code,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }
}

/// Ordered, finite stream of events produced by one execution
pub type ExecutionStream = ReceiverStream<StreamEvent>;

/// Capacity of the fan-in channel; a backpressure bound, not an output buffer
const CHANNEL_CAPACITY: usize = 64;

/// Counter distinguishing staging directories created within the same second
static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Runs one request against the platform and returns its event stream
///
/// The returned stream yields every output line of both channels in arrival
/// order (per-channel order preserved), then one terminal event once the
/// sandbox is done. An `Err` return means the launch itself failed and no
/// stream was started.
pub async fn execute(
    platform: &dyn SandboxPlatform,
    config: &SandboxConfig,
    request: ExecutionRequest,
) -> Result<ExecutionStream> {
    let staging_dir = create_staging_dir().await?;

    // Anything that fails before the stream starts must not leave the
    // staged code behind
    let mut sandbox = match stage_and_launch(platform, config, &request, &staging_dir).await {
        Ok(sandbox) => sandbox,
        Err(e) => {
            cleanup_staging_dir(&staging_dir).await;
            return Err(e);
        }
    };

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let stdout_task = spawn_line_forwarder(sandbox.take_stdout(), tx.clone());
    let stderr_task = spawn_line_forwarder(sandbox.take_stderr(), tx.clone());

    let session_id = request.session_id.clone();
    tokio::spawn(async move {
        // Both channels must be drained before the terminal wait, otherwise
        // the wait could resolve while lines are still in flight
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        let event = match sandbox.wait().await {
            Ok(TerminalState { exit_code }) => {
                log::info!("Session {session_id} finished with exit code {exit_code}");
                StreamEvent::done(exit_code)
            }
            Err(e) => {
                log::error!("Session {session_id}: terminal wait failed: {e}");
                StreamEvent::error(format!("sandbox wait failed: {e}"))
            }
        };
        let _ = tx.send(event).await;

        cleanup_staging_dir(&staging_dir).await;
    });

    Ok(ReceiverStream::new(rx))
}

/// Materializes the artifact in the staging directory and asks the platform
/// for a sandbox
async fn stage_and_launch(
    platform: &dyn SandboxPlatform,
    config: &SandboxConfig,
    request: &ExecutionRequest,
    staging_dir: &Path,
) -> Result<Box<dyn RunningSandbox>> {
    let artifact_path = staging_dir.join(&config.file_name);
    tokio::fs::write(&artifact_path, &request.code).await?;
    log::debug!("Staged artifact at {}", artifact_path.display());

    let command = build_command(config, &artifact_path)?;
    let spec = LaunchSpec {
        command,
        secrets: request.env_pairs(),
        staging_dir: staging_dir.to_path_buf(),
    };

    log::info!("Launching sandbox for session {}", request.session_id);
    platform.launch(spec).await
}

/// Forwards one output channel into the fan-in, line by line
///
/// Send errors are ignored on purpose: when the receiving side is gone the
/// channel still has to be drained so the sandbox never blocks on a full
/// pipe and runs to completion. A read fault is reported as an in-stream
/// error event and the rest of the channel is discarded unread.
fn spawn_line_forwarder(
    channel: Option<OutputChannel>,
    tx: mpsc::Sender<StreamEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(channel) = channel else {
            return;
        };
        let mut lines = BufReader::new(channel).lines();
        let outcome = loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let _ = tx.send(StreamEvent::line(line)).await;
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        // A read fault (typically user code emitting bytes that are not
        // valid UTF-8) ends line delivery for this channel, but the
        // remaining bytes still have to be consumed so the sandbox never
        // blocks on a full pipe
        if let Err(e) = outcome {
            log::warn!("Output channel read failed: {e}");
            let _ = tx
                .send(StreamEvent::error(format!("output channel failed: {e}")))
                .await;
            let mut rest = lines.into_inner();
            let _ = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await;
        }
    })
}

/// Creates a fresh per-request staging directory under the OS temp dir
async fn create_staging_dir() -> Result<PathBuf> {
    let serial = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join("playground").join(format!(
        "{}-{serial}",
        Local::now().format("%y%m%d-%H-%M-%S")
    ));
    tokio::fs::create_dir_all(&dir).await?;
    Ok(dir)
}

async fn cleanup_staging_dir(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        log::warn!("Failed to remove staging dir {}: {e}", dir.display());
    }
}

/// Generates the launcher command by applying template substitutions
fn build_command(config: &SandboxConfig, artifact_path: &Path) -> Result<Vec<String>> {
    if config.command.is_empty() {
        bail!("Empty launcher command");
    }

    let artifact = artifact_path.to_string_lossy();
    let mut mapping = HashMap::<&str, &str>::new();
    mapping.insert("%ARTIFACT%", artifact.as_ref());
    mapping.insert("%IMAGE%", &config.image);

    let command: Vec<String> = config
        .command
        .iter()
        .map(|s| {
            let mut t = s.clone();
            for (k, v) in mapping.iter() {
                t = t.replace(k, v);
            }
            t
        })
        .collect();

    Ok(command)
}
