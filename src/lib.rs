pub mod config;
pub mod relay;
pub mod routes;
pub mod sandbox;
pub mod smoke;
pub mod web_server;
