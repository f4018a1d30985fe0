use clap::Parser;
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "playground", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: String,

    /// Run one local execution against the configured platform and exit
    #[arg(long = "smoke", short = 's', default_value_t = false)]
    pub smoke: bool,
}

impl CliArgs {
    /// Load the configuration from the specified file
    pub fn to_config(&self) -> std::io::Result<Config> {
        let file = std::fs::File::open(&self.config_path)?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| e.into())
    }
}

#[derive(Deserialize, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub sandbox: SandboxConfig,
}

#[derive(Deserialize, Debug)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SandboxConfig {
    /// Prebuilt image the platform boots, with the interpreter and the
    /// platform client library already installed
    pub image: String,
    /// Name the submitted code is written under in the staging directory
    pub file_name: String,
    /// Launcher argv template; `%ARTIFACT%` and `%IMAGE%` are substituted
    /// before the platform is invoked
    pub command: Vec<String>,
}
