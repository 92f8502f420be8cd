//! 客户端会话
//!
//! 启动时发送一次 `Auth` 并等待 `Ok`/`Error`；成功后拆成发送端
//! [`PeerSender`] 和后台读取端 [`PeerReceiver`]。

use protocol::{
    validate_username, Connection, FrameReader, FrameWriter, Packet, PacketKind, ProtocolError,
    TcpTransport, TransportConfig, UsernameError,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 客户端错误类型
#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("invalid username: {0}")]
    InvalidUsername(#[from] UsernameError),

    /// 服务端拒绝登录
    #[error("authentication failed: {0}")]
    AuthRejected(String),

    #[error("unexpected {0:?} packet in reply to Auth")]
    UnexpectedReply(PacketKind),
}

impl ClientError {
    /// 连接是否已不可用；其他错误只影响当前这次操作
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::Protocol(e) if e.is_transport())
    }
}

/// 读取端发给终端的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// 收到转发的消息
    Message { from: String, text: String },
    /// 服务端返回的错误
    Error { message: String },
    /// 连接断开
    Disconnected { reason: String },
}

impl PeerEvent {
    /// 渲染为终端显示的一行
    pub fn render(&self) -> String {
        match self {
            PeerEvent::Message { from, text } => format!("{}: {}", from, text),
            PeerEvent::Error { message } => format!("ERROR: {}", message),
            PeerEvent::Disconnected { reason } => format!("disconnected: {}", reason),
        }
    }
}

/// 尚未登录的客户端会话
pub struct PeerSession<R, W> {
    connection: Connection<R, W>,
    username: String,
}

impl PeerSession<OwnedReadHalf, OwnedWriteHalf> {
    /// 连接服务器
    pub async fn connect(
        addr: &str,
        username: &str,
        config: &TransportConfig,
    ) -> Result<Self, ClientError> {
        let transport = TcpTransport::connect(addr, config).await?;
        info!("Connected to {}", addr);
        Ok(Self::new(Connection::new(transport), username))
    }
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> PeerSession<R, W> {
    pub fn new(connection: Connection<R, W>, username: &str) -> Self {
        Self {
            connection,
            username: username.to_string(),
        }
    }

    /// 登录并拆分读写端
    ///
    /// 登录失败时不会返回发送端，调用方无法在失败后继续发消息。
    pub async fn authenticate(mut self) -> Result<(PeerSender<W>, PeerReceiver<R>), ClientError> {
        validate_username(&self.username)?;

        self.connection
            .send(&Packet::Auth {
                username: self.username.clone(),
            })
            .await?;

        match self.connection.recv().await? {
            Packet::Ok => {
                info!(username = %self.username, "authenticated");
                let (reader, writer) = self.connection.split();
                Ok((
                    PeerSender {
                        username: self.username,
                        writer,
                    },
                    PeerReceiver { reader },
                ))
            }
            Packet::Error { message } => Err(ClientError::AuthRejected(message)),
            other => Err(ClientError::UnexpectedReply(other.kind())),
        }
    }
}

/// 已登录会话的发送端
pub struct PeerSender<W> {
    username: String,
    writer: FrameWriter<W>,
}

impl<W: AsyncWrite + Unpin> PeerSender<W> {
    pub fn username(&self) -> &str {
        &self.username
    }

    /// 发送一条定向消息
    pub async fn send(&mut self, to: &str, text: &str) -> Result<(), ClientError> {
        let packet = Packet::Send {
            from: self.username.clone(),
            to: to.to_string(),
            text: text.to_string(),
        };
        self.writer.write_packet(&packet).await?;
        debug!(to, "message sent");
        Ok(())
    }

    /// 发送 `Close` 并关闭写端
    pub async fn close(mut self) -> Result<(), ClientError> {
        info!("Closing connection for {}", self.username);
        self.writer
            .write_packet(&Packet::Close {
                username: self.username.clone(),
            })
            .await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// 已登录会话的读取端
pub struct PeerReceiver<R> {
    reader: FrameReader<R>,
}

impl<R: AsyncRead + Unpin> PeerReceiver<R> {
    /// 读取下一个需要展示的事件
    ///
    /// 连接结束后返回 `Disconnected`，之后不应再调用。
    pub async fn next_event(&mut self) -> PeerEvent {
        loop {
            match self.reader.read_packet().await {
                Ok(Packet::Deliver { from, text }) => return PeerEvent::Message { from, text },
                Ok(Packet::Error { message }) => return PeerEvent::Error { message },
                Ok(other) => debug!(kind = ?other.kind(), "ignoring packet"),
                Err(ProtocolError::ConnectionClosed) => {
                    info!("Server closed connection");
                    return PeerEvent::Disconnected {
                        reason: "server closed connection".to_string(),
                    };
                }
                Err(e) => {
                    warn!("Receive error: {}", e);
                    return PeerEvent::Disconnected {
                        reason: e.to_string(),
                    };
                }
            }
        }
    }
}

impl<R: AsyncRead + Unpin + Send + 'static> PeerReceiver<R> {
    /// 在后台持续读取，把事件发到 `event_tx`
    pub fn spawn(mut self, event_tx: mpsc::Sender<PeerEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let event = self.next_event().await;
                let done = matches!(event, PeerEvent::Disconnected { .. });
                if event_tx.send(event).await.is_err() || done {
                    break;
                }
            }
        })
    }
}
