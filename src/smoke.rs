use anyhow::Result;
use futures::StreamExt;

use crate::config::SandboxConfig;
use crate::relay::{self, ExecutionRequest};
use crate::sandbox::SandboxPlatform;

/// Code sample submitted by the smoke run; prints the wall-clock time so
/// repeated runs visibly differ
const SAMPLE_CODE: &str = r#"import time

print(f"The time is {time.time()}")
"#;

/// Runs one fixed execution against the configured platform, no HTTP involved
///
/// The credentials are placeholders in the platform's issued shapes; a run
/// against the hosted platform needs real ones in their place.
pub async fn run(platform: &dyn SandboxPlatform, config: &SandboxConfig) -> Result<()> {
    let request = ExecutionRequest {
        code: SAMPLE_CODE.to_string(),
        session_id: "se-0000000000000000000000".to_string(),
        session_secret: "xx-0000000000000000000000".to_string(),
        workspace_name: "smoke".to_string(),
        environment_name: "main".to_string(),
    };

    let mut events = relay::execute(platform, config, request).await?;
    while let Some(event) = events.next().await {
        println!("{}", serde_json::to_string(&event)?);
    }

    Ok(())
}
