// MCP server binary: Git tools over stdio.
//
// Typically spawned by an MCP client; configuration comes entirely from
// the environment (see config.rs for the variable table).

use std::sync::Arc;

use anyhow::Result;
use rmcp::{ServiceExt, transport::stdio};

use git_mcp_server::{GitToolServer, ServiceConfig, ServiceContext};

#[tokio::main]
async fn main() -> Result<()> {
    // LOG_LEVEL drives verbosity; logs go to stderr so stdout stays
    // clean for the MCP framing.
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("LOG_LEVEL", "info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = ServiceConfig::from_env();
    log::info!(
        "starting git-mcp-server: root={}, workers={}, queue={}",
        config.workspace_root.display(),
        config.worker_count,
        config.queue_capacity
    );

    let ctx = ServiceContext::init(config).await?;
    let service = GitToolServer::new(Arc::new(ctx)).serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}
