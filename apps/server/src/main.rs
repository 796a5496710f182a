use anyhow::Context;
use payflow_logger::Logger;
use payflow_server::Server;
use payflow_server::config::{AppConfig, load_config};

const CONFIG_PATH_VAR: &str = "PAYFLOW_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::var_os(CONFIG_PATH_VAR);
    let cfg: AppConfig = load_config(path).context("Critical: Configuration is malformed")?;

    let _log = Logger::from_config(env!("CARGO_PKG_NAME"), &cfg.log)?;

    Server::builder().config(cfg).build().await?.run().await
}
