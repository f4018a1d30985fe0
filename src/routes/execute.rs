use super::*;

use std::convert::Infallible;

use actix_web::{HttpResponse, Responder, post, web};
use futures::StreamExt;

use crate::config::SandboxConfig;
use crate::relay::{self, ExecutionRequest, StreamEvent};
use crate::sandbox::SandboxPlatform;

#[post("/execute")]
pub async fn execute_handler(
    platform: web::Data<dyn SandboxPlatform>,
    config: web::Data<SandboxConfig>,
    body: web::Json<ExecutionRequest>,
) -> impl Responder {
    let request = body.into_inner();
    log::info!(
        "Execution request for session {} (workspace {}, environment {}, {} bytes of code)",
        request.session_id,
        request.workspace_name,
        request.environment_name,
        request.code.len()
    );
    log::debug!("{request:?}");

    match relay::execute(platform.get_ref(), config.get_ref(), request).await {
        Ok(events) => HttpResponse::Ok()
            .content_type("text/event-stream")
            .streaming(events.map(|event| Ok::<_, Infallible>(sse_frame(&event)))),
        Err(e) => {
            log::error!("Failed to launch sandbox: {e:#}");
            HttpResponse::InternalServerError().json(ErrorResponseWithMessage {
                reason: "ERR_EXTERNAL",
                code: 5,
                message: format!("{e:#}"),
            })
        }
    }
}

/// Renders one event as a server-sent-event frame
fn sse_frame(event: &StreamEvent) -> web::Bytes {
    match serde_json::to_string(event) {
        Ok(json) => web::Bytes::from(format!("data: {json}\n\n")),
        Err(e) => {
            log::error!("Failed to serialize stream event: {e}");
            web::Bytes::new()
        }
    }
}
