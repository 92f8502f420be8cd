//! 消息中继客户端
//!
//! 终端客户端：标准输入读取 `<to> <text>`，后台任务打印收到的消息

mod config;
mod input;
mod peer;

use anyhow::Result;
use clap::Parser;
use config::Args;
use input::parse_input;
use peer::{PeerEvent, PeerSession};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("relay_client={}", level).parse()?)
                .add_directive(format!("protocol={}", level).parse()?),
        )
        .init();

    // 登录失败直接退出，不进入消息循环
    let session =
        PeerSession::connect(&args.addr(), &args.username, &args.transport_config()).await?;
    let (mut sender, receiver) = session.authenticate().await?;
    info!("Logged in as {}", sender.username());

    let (event_tx, mut event_rx) = mpsc::channel::<PeerEvent>(32);
    let reader_task = receiver.spawn(event_tx);

    println!("Type your message (format: <to> <text>)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut connected = true;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_input(&line) {
                    Ok((to, text)) => {
                        match sender.send(to, text).await {
                            Ok(()) => {}
                            Err(e) if e.is_fatal() => {
                                warn!("Failed to send message: {}", e);
                                connected = false;
                                break;
                            }
                            Err(e) => eprintln!("{}", e),
                        }
                    }
                    Err(e) => eprintln!("{}", e),
                }
            }

            event = event_rx.recv() => {
                let Some(event) = event else {
                    connected = false;
                    break;
                };
                println!("{}", event.render());
                if matches!(event, PeerEvent::Disconnected { .. }) {
                    connected = false;
                    break;
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("disconnecting...");
                break;
            }
        }
    }

    if connected {
        if let Err(e) = sender.close().await {
            warn!("Failed to close session: {}", e);
        }
    }
    reader_task.abort();

    Ok(())
}
