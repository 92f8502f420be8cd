//! 消息中继服务端
//!
//! 基于 Tokio 的异步 TCP 服务器，每个连接一个任务

mod config;
mod dispatcher;
mod error;
mod registry;
mod server;

use anyhow::Result;
use clap::Parser;
use config::Args;
use server::RelayServer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("relay_server={}", level).parse()?)
                .add_directive(format!("protocol={}", level).parse()?),
        )
        .init();

    let config = args.server_config();
    info!("Relay Server starting on {}", config.addr);

    let server = RelayServer::new(config);
    server.run().await?;

    Ok(())
}
