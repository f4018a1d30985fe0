use std::sync::Arc;

use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::config::Config;
use crate::routes::{execute_handler, json_error_handler};
use crate::sandbox::SandboxPlatform;

pub fn build_server(config: Config, platform: Arc<dyn SandboxPlatform>) -> std::io::Result<Server> {
    let Config {
        server: server_config,
        sandbox: sandbox_config,
    } = config;
    let sandbox_config = web::Data::new(sandbox_config);
    let platform = web::Data::from(platform);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(sandbox_config.clone())
            .app_data(platform.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .wrap(middleware::Logger::default())
            .service(execute_handler)
    })
    .bind((
        server_config
            .bind_address
            .unwrap_or("127.0.0.1".to_string()),
        server_config.bind_port.unwrap_or(12345),
    ))?
    .run();

    Ok(server)
}
