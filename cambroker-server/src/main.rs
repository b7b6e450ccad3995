//! Standalone cambroker MQTT broker
//!
//! You can test it with any MQTT 3.1.1 client, e.g.:
//!
//! ```text
//! mosquitto_sub -h localhost -t cam/motion
//! mosquitto_pub -h localhost -t cam/motion -m detected
//! ```

mod config;

use cambroker_core::StaticCredentials;
use cambroker_tokio::MqttServer;
use clap::Parser;
use config::FileConfig;
use log::info;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cambroker")]
#[command(version)]
#[command(about = "Minimal MQTT 3.1.1 broker")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "cambroker.toml")]
    config: PathBuf,

    /// Listen address, overrides `broker.bind`
    #[arg(short, long)]
    bind: Option<String>,

    /// Required username, overrides `auth.username`
    #[arg(long)]
    username: Option<String>,

    /// Password for `--username`, in plain text
    #[arg(long, requires = "username")]
    password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = FileConfig::load(&cli.config)?;
    if let Some(bind) = cli.bind {
        config.broker.bind = bind;
    }

    if !config.broker.enabled {
        info!("Broker disabled in {}, exiting", cli.config.display());
        return Ok(());
    }

    let credentials = match cli.username {
        Some(username) => {
            let password = cli.password.unwrap_or_default();
            StaticCredentials::new(username, password.as_bytes())
        }
        None => config.auth.credentials(),
    };
    if credentials.is_open() {
        info!("Authentication disabled, accepting every client");
    }

    let server = MqttServer::with_config(config.broker.server).with_authenticator(credentials);
    server.run(config.broker.bind.as_str()).await?;

    Ok(())
}
