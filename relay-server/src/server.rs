//! 中继服务器：接受连接并为每个连接启动一个分发任务

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use protocol::{Connection, TcpListener, TcpTransport};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::dispatcher::ConnectionDispatcher;
use crate::error::RelayError;
use crate::registry::SessionRegistry;

/// 中继服务器
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    /// 当前连接数
    connection_count: Arc<AtomicUsize>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = SessionRegistry::new().with_write_timeout(config.write_timeout);
        Self {
            config,
            registry: Arc::new(registry),
            connection_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[cfg(test)]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// 绑定配置的地址并运行，收到 Ctrl+C 后停止接受新连接
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.config.addr).await?;
        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// 在给定监听器上运行，直到 `shutdown` 完成
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Server listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((transport, peer)) => self.accept(transport, peer),
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }

                _ = &mut shutdown => {
                    info!("Received shutdown signal, no longer accepting connections");
                    if !self.registry.is_empty() {
                        info!(online = ?self.registry.online(), "sessions still online");
                    }
                    break;
                }
            }
        }

        Ok(())
    }

    fn accept(&self, transport: TcpTransport, peer: SocketAddr) {
        if !self.try_add_connection() {
            warn!(peer = %peer, "Connection limit reached, rejecting new connection");
            tokio::spawn(async move {
                let mut conn = Connection::new(transport);
                let _ = conn.send(&RelayError::ServerBusy.to_packet()).await;
            });
            return;
        }

        info!(peer = %peer, "connection accepted");

        let (reader, writer) = transport.split();
        let dispatcher =
            ConnectionDispatcher::new(reader, Box::new(writer), Arc::clone(&self.registry), peer)
                .with_idle_timeout(self.config.idle_timeout);
        let connection_count = Arc::clone(&self.connection_count);

        tokio::spawn(async move {
            if let Err(e) = dispatcher.run().await {
                debug!(peer = %peer, "Connection handler error: {}", e);
            }
            connection_count.fetch_sub(1, Ordering::SeqCst);
            info!(peer = %peer, "connection closed");
        });
    }

    /// 增加连接数，如果超过限制则返回 false
    fn try_add_connection(&self) -> bool {
        self.connection_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < self.config.max_connections).then_some(current + 1)
            })
            .is_ok()
    }
}
