use clap::Parser;

use playground::config::CliArgs;
use playground::sandbox::create_platform;
use playground::smoke;
use playground::web_server::build_server;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let config = cli.to_config().expect("Failed to load configuration");
    let platform = create_platform(&config.sandbox);

    if cli.smoke {
        smoke::run(platform.as_ref(), &config.sandbox)
            .await
            .expect("Smoke run failed");
        return Ok(());
    }

    // ======= PREPARATION END, EXECUTION START =======

    let server = build_server(config, platform).expect("Failed to build server");
    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
    }

    // Let in-flight streams finish before the process exits
    server_handle.stop(true).await;

    log::info!("Shutdown complete");
    Ok(())
}
