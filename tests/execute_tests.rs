use std::sync::Arc;

use actix_web::{App, test, web};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::json;
use tokio::io::AsyncWriteExt;

use playground::config::SandboxConfig;
use playground::routes::{execute_handler, json_error_handler};
use playground::sandbox::{
    LaunchSpec, OutputChannel, RunningSandbox, SandboxPlatform, TerminalState,
};

// Platform stand-in that plays the same script for every launch
struct ScriptedPlatform {
    stdout_lines: Vec<&'static str>,
    stderr_lines: Vec<&'static str>,
    exit_code: i32,
    fail: Option<&'static str>,
}

impl ScriptedPlatform {
    fn succeeding(stdout_lines: Vec<&'static str>, exit_code: i32) -> Arc<dyn SandboxPlatform> {
        Arc::new(Self {
            stdout_lines,
            stderr_lines: vec![],
            exit_code,
            fail: None,
        })
    }

    fn failing(message: &'static str) -> Arc<dyn SandboxPlatform> {
        Arc::new(Self {
            stdout_lines: vec![],
            stderr_lines: vec![],
            exit_code: 0,
            fail: Some(message),
        })
    }
}

#[async_trait]
impl SandboxPlatform for ScriptedPlatform {
    async fn launch(&self, _spec: LaunchSpec) -> Result<Box<dyn RunningSandbox>> {
        if let Some(message) = self.fail {
            return Err(anyhow!(message));
        }
        Ok(Box::new(ScriptedSandbox {
            stdout: Some(lines_channel(&self.stdout_lines)),
            stderr: Some(lines_channel(&self.stderr_lines)),
            exit_code: self.exit_code,
        }))
    }
}

struct ScriptedSandbox {
    stdout: Option<OutputChannel>,
    stderr: Option<OutputChannel>,
    exit_code: i32,
}

#[async_trait]
impl RunningSandbox for ScriptedSandbox {
    fn take_stdout(&mut self) -> Option<OutputChannel> {
        self.stdout.take()
    }

    fn take_stderr(&mut self) -> Option<OutputChannel> {
        self.stderr.take()
    }

    async fn wait(self: Box<Self>) -> Result<TerminalState> {
        Ok(TerminalState {
            exit_code: self.exit_code,
        })
    }
}

fn lines_channel(lines: &[&'static str]) -> OutputChannel {
    let (mut tx, rx) = tokio::io::duplex(4096);
    let lines = lines.to_vec();
    tokio::spawn(async move {
        for line in lines {
            let _ = tx.write_all(format!("{line}\n").as_bytes()).await;
        }
    });
    Box::new(rx)
}

fn test_sandbox_config() -> SandboxConfig {
    SandboxConfig {
        image: "img-test".to_string(),
        file_name: "user_code.py".to_string(),
        command: vec![
            "launcher".to_string(),
            "--image".to_string(),
            "%IMAGE%".to_string(),
            "%ARTIFACT%".to_string(),
        ],
    }
}

fn valid_body() -> serde_json::Value {
    json!({
        "code": "print('hello')",
        "session_id": "se-0000000000000000000000",
        "session_secret": "xx-0000000000000000000000",
        "workspace_name": "tester",
        "modal_environment": "main"
    })
}

// Helper function to split an event-stream body into parsed JSON events
fn parse_sse_body(body: &[u8]) -> Vec<serde_json::Value> {
    let text = String::from_utf8(body.to_vec()).unwrap();
    text.split("\n\n")
        .filter(|frame| !frame.is_empty())
        .map(|frame| {
            let json = frame
                .strip_prefix("data: ")
                .unwrap_or_else(|| panic!("frame without data prefix: {frame:?}"));
            serde_json::from_str(json).unwrap()
        })
        .collect()
}

#[actix_web::test]
async fn test_execute_streams_lines_and_terminal_event() {
    let platform = ScriptedPlatform::succeeding(vec!["hello"], 0);

    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(platform))
            .app_data(web::Data::new(test_sandbox_config()))
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .service(execute_handler),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/execute")
        .set_json(valid_body())
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let body = test::read_body(resp).await;
    let events = parse_sse_body(&body);
    assert_eq!(
        events,
        vec![
            json!({"text": "hello"}),
            json!({"done": true, "exit_code": 0}),
        ]
    );
}

#[actix_web::test]
async fn test_execute_streams_failure_output() {
    let platform: Arc<dyn SandboxPlatform> = Arc::new(ScriptedPlatform {
        stdout_lines: vec!["start"],
        stderr_lines: vec!["Traceback (most recent call last):", "RuntimeError: boom"],
        exit_code: 1,
        fail: None,
    });

    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(platform))
            .app_data(web::Data::new(test_sandbox_config()))
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .service(execute_handler),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/execute")
        .set_json(valid_body())
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body = test::read_body(resp).await;
    let events = parse_sse_body(&body);

    // All lines from both channels arrive, the terminal event comes last
    // with the sandbox's exit code
    assert_eq!(events.len(), 4);
    assert_eq!(events[3], json!({"done": true, "exit_code": 1}));
    for line in [
        "start",
        "Traceback (most recent call last):",
        "RuntimeError: boom",
    ] {
        assert!(events.contains(&json!({"text": line})), "missing {line:?}");
    }
}

#[actix_web::test]
async fn test_execute_rejects_missing_field() {
    let platform = ScriptedPlatform::succeeding(vec![], 0);

    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(platform))
            .app_data(web::Data::new(test_sandbox_config()))
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .service(execute_handler),
    )
    .await;

    let mut body = valid_body();
    body.as_object_mut().unwrap().remove("code");

    let req = test::TestRequest::post()
        .uri("/execute")
        .set_json(body)
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400); // Bad Request

    let response_body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(response_body["reason"], "ERR_INVALID_ARGUMENT");
    assert_eq!(response_body["code"], 1);
}

#[actix_web::test]
async fn test_execute_requires_wire_field_name() {
    let platform = ScriptedPlatform::succeeding(vec![], 0);

    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(platform))
            .app_data(web::Data::new(test_sandbox_config()))
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .service(execute_handler),
    )
    .await;

    // The environment field is spelled `modal_environment` on the wire;
    // the internal name is not accepted
    let mut body = valid_body();
    let fields = body.as_object_mut().unwrap();
    fields.remove("modal_environment");
    fields.insert("environment_name".to_string(), json!("main"));

    let req = test::TestRequest::post()
        .uri("/execute")
        .set_json(body)
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn test_execute_rejects_invalid_json() {
    let platform = ScriptedPlatform::succeeding(vec![], 0);

    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(platform))
            .app_data(web::Data::new(test_sandbox_config()))
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .service(execute_handler),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/execute")
        .set_payload("not json")
        .insert_header(("content-type", "application/json"))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let response_body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(response_body["reason"], "ERR_INVALID_ARGUMENT");
    assert_eq!(response_body["code"], 1);
}

#[actix_web::test]
async fn test_execute_reports_launch_failure() {
    let platform = ScriptedPlatform::failing("no sandbox capacity");

    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(platform))
            .app_data(web::Data::new(test_sandbox_config()))
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .service(execute_handler),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/execute")
        .set_json(valid_body())
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 500);

    let response_body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(response_body["reason"], "ERR_EXTERNAL");
    assert_eq!(response_body["code"], 5);
    assert!(
        response_body["message"]
            .as_str()
            .unwrap()
            .contains("no sandbox capacity")
    );
}
