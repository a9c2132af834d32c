//! Stratus node binary.

use anyhow::Context;
use stratus_node::NodeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stratus_node::init_tracing();
    let config = NodeConfig::from_env().context("failed to load configuration")?;
    stratus_node::run_server(config).await
}
