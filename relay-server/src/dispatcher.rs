//! 单连接分发器
//!
//! 每个已接受的连接对应一个分发器：独占读端，按序解码帧并交给对应的
//! 处理函数。状态机: `Unauthenticated -> Authenticated -> Closed`。
//!
//! 请求级错误 ([`RelayError`]) 回一个 `Error` 包后继续读；帧格式错误和
//! 传输错误结束本连接，并清理注册表中属于它的会话。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use protocol::{validate_username, FrameReader, Message, Packet, ProtocolError, Result};
use tokio::io::AsyncRead;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::registry::{
    shared_writer, write_bounded, Session, SessionRegistry, SessionWriter, SharedWriter,
};

enum State {
    Unauthenticated,
    Authenticated(Session),
    Closed,
}

pub struct ConnectionDispatcher<R> {
    reader: FrameReader<R>,
    writer: SharedWriter,
    registry: Arc<SessionRegistry>,
    peer: SocketAddr,
    idle_timeout: Option<Duration>,
    state: State,
}

impl<R: AsyncRead + Unpin> ConnectionDispatcher<R> {
    pub fn new(
        reader: R,
        writer: SessionWriter,
        registry: Arc<SessionRegistry>,
        peer: SocketAddr,
    ) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: shared_writer(writer),
            registry,
            peer,
            idle_timeout: None,
            state: State::Unauthenticated,
        }
    }

    /// 设置空闲超时：超过该时间没有收到完整帧即视为断开
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// 运行读循环直到连接结束
    ///
    /// 对端正常关闭返回 `Ok(())`。无论以何种方式结束，本连接登录的会话
    /// 都会被注销。
    pub async fn run(mut self) -> Result<()> {
        let result = self.read_loop().await;

        match &result {
            Err(e) if e.is_transport() => {
                debug!(peer = %self.peer, error = %e, "transport error, treating as disconnect");
            }
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "protocol violation, dropping connection");
            }
            Ok(()) => {}
        }

        self.cleanup().await;
        result
    }

    async fn read_loop(&mut self) -> Result<()> {
        while !matches!(self.state, State::Closed) {
            let packet = match self.next_packet().await {
                Ok(packet) => packet,
                Err(ProtocolError::ConnectionClosed) => {
                    info!(peer = %self.peer, "connection closed by peer");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            self.dispatch(packet).await?;
        }
        Ok(())
    }

    async fn next_packet(&mut self) -> Result<Packet> {
        match self.idle_timeout {
            Some(limit) => timeout(limit, self.reader.read_packet())
                .await
                .map_err(|_| ProtocolError::ConnectionTimeout)?,
            None => self.reader.read_packet().await,
        }
    }

    async fn dispatch(&mut self, packet: Packet) -> Result<()> {
        debug!(peer = %self.peer, kind = ?packet.kind(), "packet received");

        match packet {
            Packet::Auth { username } => self.handle_auth(username).await,
            Packet::Send { from, to, text } => {
                match self.handle_send(Message::new(to, from, text)) {
                    Ok(()) => Ok(()),
                    Err(e) => self.reject(e).await,
                }
            }
            Packet::Close { username } => {
                self.handle_close(&username);
                Ok(())
            }
            other => self.reject(RelayError::UnexpectedPacket(other.kind())).await,
        }
    }

    /// 把请求级错误回给本连接
    async fn reject(&mut self, err: RelayError) -> Result<()> {
        warn!(peer = %self.peer, error = %err, "request rejected");
        write_bounded(&self.writer, &err.to_packet(), self.registry.write_timeout()).await
    }

    async fn handle_auth(&mut self, username: String) -> Result<()> {
        if let State::Authenticated(session) = &self.state {
            let err = RelayError::AlreadyAuthenticated(session.username().to_string());
            return self.reject(err).await;
        }
        if let Err(e) = validate_username(&username) {
            return self.reject(e.into()).await;
        }

        // 先锁住写端：注册成功后别人转发进来的 Deliver 必须排在 Ok 之后
        let writer = Arc::clone(&self.writer);
        let mut guard = writer.lock().await;

        match self.registry.register(&username, Arc::clone(&self.writer)) {
            Ok(session) => {
                self.state = State::Authenticated(session);
                timeout(self.registry.write_timeout(), guard.write_packet(&Packet::Ok))
                    .await
                    .map_err(|_| ProtocolError::ConnectionTimeout)??;
                info!(
                    peer = %self.peer,
                    username = %username,
                    online = self.registry.len(),
                    "authenticated"
                );
                Ok(())
            }
            Err(e) => {
                drop(guard);
                self.reject(e).await
            }
        }
    }

    fn handle_send(&self, message: Message) -> std::result::Result<(), RelayError> {
        let State::Authenticated(session) = &self.state else {
            return Err(RelayError::NotAuthenticated);
        };
        if message.from != session.username() {
            return Err(RelayError::SenderMismatch {
                claimed: message.from,
                actual: session.username().to_string(),
            });
        }

        let recipient = self.registry.lookup(&message.to)?;

        let from = message.from.clone();
        let to = message.to.clone();
        let deliver = message.into_deliver();

        // 写接收方不能阻塞本连接的读循环；多个发送方之间不保证顺序
        tokio::spawn(async move {
            match recipient.deliver(&deliver).await {
                Ok(()) => debug!(from = %from, to = %to, "message delivered"),
                Err(e) => warn!(from = %from, to = %to, error = %e, "delivery failed"),
            }
        });

        Ok(())
    }

    fn handle_close(&mut self, username: &str) {
        if let State::Authenticated(session) = &self.state {
            if session.username() != username {
                warn!(
                    peer = %self.peer,
                    claimed = %username,
                    actual = %session.username(),
                    "close for another user ignored, closing own session"
                );
            }
            self.registry.deregister(session.username());
            info!(peer = %self.peer, username = %session.username(), "logged out");
        }
        self.state = State::Closed;
    }

    async fn cleanup(&mut self) {
        if let State::Authenticated(session) =
            std::mem::replace(&mut self.state, State::Closed)
        {
            if self.registry.deregister(session.username()) {
                let age = session.created_at().elapsed().unwrap_or_default();
                info!(
                    peer = %self.peer,
                    username = %session.username(),
                    age = ?age,
                    "session dropped on disconnect"
                );
            }
        }
        // 写端可能正被卡住的投递占用，不等它；投递超时后写端随最后一个句柄释放
        match self.writer.try_lock() {
            Ok(sink) if sink.is_broken() => {}
            Ok(mut sink) => {
                if let Err(e) = sink.shutdown().await {
                    debug!(peer = %self.peer, error = %e, "writer shutdown failed");
                }
            }
            Err(_) => debug!(peer = %self.peer, "writer busy, skipping shutdown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{Connection, MalformedPacket};
    use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;

    type Client = Connection<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    fn peer() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn spawn_dispatcher(
        registry: &Arc<SessionRegistry>,
        capacity: usize,
        idle_timeout: Option<Duration>,
    ) -> (Client, JoinHandle<Result<()>>) {
        let (client, server) = tokio::io::duplex(capacity);
        let (sr, sw) = tokio::io::split(server);
        let dispatcher = ConnectionDispatcher::new(sr, Box::new(sw), Arc::clone(registry), peer())
            .with_idle_timeout(idle_timeout);
        let handle = tokio::spawn(dispatcher.run());
        let (cr, cw) = tokio::io::split(client);
        (Connection::from_parts(cr, cw), handle)
    }

    fn connect(registry: &Arc<SessionRegistry>) -> (Client, JoinHandle<Result<()>>) {
        spawn_dispatcher(registry, 4096, None)
    }

    async fn login(
        registry: &Arc<SessionRegistry>,
        username: &str,
    ) -> (Client, JoinHandle<Result<()>>) {
        let (mut conn, handle) = connect(registry);
        auth(&mut conn, username).await;
        (conn, handle)
    }

    async fn auth(conn: &mut Client, username: &str) {
        conn.send(&Packet::Auth {
            username: username.to_string(),
        })
        .await
        .unwrap();
        assert_eq!(conn.recv().await.unwrap(), Packet::Ok);
    }

    async fn expect_error(conn: &mut Client) -> String {
        match conn.recv().await.unwrap() {
            Packet::Error { message } => message,
            other => panic!("expected Error, got {:?}", other),
        }
    }

    async fn assert_silent(conn: &mut Client) {
        let res = timeout(Duration::from_millis(100), conn.recv()).await;
        assert!(res.is_err(), "unexpected packet: {:?}", res);
    }

    #[tokio::test]
    async fn test_auth_registers_session() {
        let registry = Arc::new(SessionRegistry::new());
        let (_alice, _h) = login(&registry, "alice").await;
        assert!(registry.lookup("alice").is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_auth_rejected_first_session_kept() {
        let registry = Arc::new(SessionRegistry::new());
        let (mut alice, _h1) = login(&registry, "alice").await;

        let (mut imposter, _h2) = connect(&registry);
        imposter
            .send(&Packet::Auth {
                username: "alice".to_string(),
            })
            .await
            .unwrap();
        let message = expect_error(&mut imposter).await;
        assert!(message.contains("already online"));

        // 原会话仍能收到消息
        let (mut bob, _h3) = login(&registry, "bob").await;
        bob.send(&Packet::Send {
            from: "bob".to_string(),
            to: "alice".to_string(),
            text: "still there?".to_string(),
        })
        .await
        .unwrap();
        assert_eq!(
            alice.recv().await.unwrap(),
            Packet::Deliver {
                from: "bob".to_string(),
                text: "still there?".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_invalid_username_then_retry() {
        let registry = Arc::new(SessionRegistry::new());
        let (mut conn, _h) = connect(&registry);

        conn.send(&Packet::Auth {
            username: String::new(),
        })
        .await
        .unwrap();
        expect_error(&mut conn).await;
        assert!(registry.is_empty());

        conn.send(&Packet::Auth {
            username: "alice".to_string(),
        })
        .await
        .unwrap();
        assert_eq!(conn.recv().await.unwrap(), Packet::Ok);
    }

    #[tokio::test]
    async fn test_auth_twice_on_same_connection() {
        let registry = Arc::new(SessionRegistry::new());
        let (mut alice, _h) = login(&registry, "alice").await;

        alice
            .send(&Packet::Auth {
                username: "alice2".to_string(),
            })
            .await
            .unwrap();
        expect_error(&mut alice).await;
        assert_eq!(registry.online().len(), 1);
    }

    #[tokio::test]
    async fn test_send_before_auth_is_recoverable() {
        let registry = Arc::new(SessionRegistry::new());
        let (mut conn, _h) = connect(&registry);

        conn.send(&Packet::Send {
            from: "alice".to_string(),
            to: "bob".to_string(),
            text: "hi".to_string(),
        })
        .await
        .unwrap();
        assert_eq!(
            expect_error(&mut conn).await,
            RelayError::NotAuthenticated.to_string()
        );

        conn.send(&Packet::Auth {
            username: "alice".to_string(),
        })
        .await
        .unwrap();
        assert_eq!(conn.recv().await.unwrap(), Packet::Ok);
    }

    #[tokio::test]
    async fn test_routing_delivers_exactly_once() {
        let registry = Arc::new(SessionRegistry::new());
        let (mut alice, _h1) = login(&registry, "alice").await;
        let (mut bob, _h2) = login(&registry, "bob").await;

        alice
            .send(&Packet::Send {
                from: "alice".to_string(),
                to: "bob".to_string(),
                text: "hi".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            bob.recv().await.unwrap(),
            Packet::Deliver {
                from: "alice".to_string(),
                text: "hi".to_string(),
            }
        );
        assert_silent(&mut bob).await;
        assert_silent(&mut alice).await;
    }

    #[tokio::test]
    async fn test_unknown_recipient() {
        let registry = Arc::new(SessionRegistry::new());
        let (mut alice, _h) = login(&registry, "alice").await;

        alice
            .send(&Packet::Send {
                from: "alice".to_string(),
                to: "ghost".to_string(),
                text: "hi".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            expect_error(&mut alice).await,
            RelayError::NotFound("ghost".to_string()).to_string()
        );
        assert_silent(&mut alice).await;
        let online: Vec<_> = registry.online().into_iter().collect();
        assert_eq!(online, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_sender_mismatch_rejected() {
        let registry = Arc::new(SessionRegistry::new());
        let (mut alice, _h1) = login(&registry, "alice").await;
        let (mut bob, _h2) = login(&registry, "bob").await;

        alice
            .send(&Packet::Send {
                from: "carol".to_string(),
                to: "bob".to_string(),
                text: "spoofed".to_string(),
            })
            .await
            .unwrap();

        expect_error(&mut alice).await;
        assert_silent(&mut bob).await;
    }

    #[tokio::test]
    async fn test_server_only_packet_is_rejected() {
        let registry = Arc::new(SessionRegistry::new());
        let (mut alice, _h) = login(&registry, "alice").await;

        alice.send(&Packet::Ok).await.unwrap();
        expect_error(&mut alice).await;
        assert!(registry.lookup("alice").is_ok());
    }

    #[tokio::test]
    async fn test_close_deregisters() {
        let registry = Arc::new(SessionRegistry::new());
        let (mut alice, handle) = login(&registry, "alice").await;

        alice
            .send(&Packet::Close {
                username: "alice".to_string(),
            })
            .await
            .unwrap();

        handle.await.unwrap().unwrap();
        assert!(registry.lookup("alice").is_err());
        assert!(matches!(
            alice.recv().await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_cannot_log_out_someone_else() {
        let registry = Arc::new(SessionRegistry::new());
        let (_alice, _h1) = login(&registry, "alice").await;
        let (mut bob, h2) = login(&registry, "bob").await;

        bob.send(&Packet::Close {
            username: "alice".to_string(),
        })
        .await
        .unwrap();
        h2.await.unwrap().unwrap();

        assert!(registry.lookup("alice").is_ok());
        assert!(registry.lookup("bob").is_err());
    }

    #[tokio::test]
    async fn test_disconnect_cleans_up() {
        let registry = Arc::new(SessionRegistry::new());
        let (alice, handle) = login(&registry, "alice").await;

        drop(alice);
        handle.await.unwrap().unwrap();

        assert_eq!(
            registry.lookup("alice").unwrap_err(),
            RelayError::NotFound("alice".to_string())
        );
    }

    #[tokio::test]
    async fn test_unknown_kind_is_fatal() {
        let registry = Arc::new(SessionRegistry::new());
        let (client, server) = tokio::io::duplex(4096);
        let (sr, sw) = tokio::io::split(server);
        let handle = tokio::spawn(
            ConnectionDispatcher::new(sr, Box::new(sw), Arc::clone(&registry), peer()).run(),
        );

        let (cr, mut cw) = tokio::io::split(client);
        let mut reader = FrameReader::new(cr);
        cw.write_all(&Packet::Auth {
            username: "alice".to_string(),
        }
        .encode()
        .unwrap())
        .await
        .unwrap();
        assert_eq!(reader.read_packet().await.unwrap(), Packet::Ok);

        cw.write_all(&[0x7f, 0, 0, 0, 0]).await.unwrap();
        let result = handle.await.unwrap();
        assert!(matches!(
            result,
            Err(ProtocolError::Malformed(MalformedPacket::UnknownKind(0x7f)))
        ));
        assert!(registry.lookup("alice").is_err());
    }

    #[tokio::test]
    async fn test_idle_timeout_drops_session() {
        let registry = Arc::new(SessionRegistry::new());
        let (mut conn, handle) =
            spawn_dispatcher(&registry, 4096, Some(Duration::from_millis(50)));
        auth(&mut conn, "sleepy").await;

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(ProtocolError::ConnectionTimeout)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_stalled_reader_does_not_block_cleanup() {
        let registry = Arc::new(
            SessionRegistry::new().with_write_timeout(Duration::from_millis(200)),
        );
        let (mut alice, _h1) = login(&registry, "alice").await;

        // bob 登录后不再读；64 字节的管道装不下一帧 Deliver
        let (mut bob, bob_handle) =
            spawn_dispatcher(&registry, 64, Some(Duration::from_millis(100)));
        auth(&mut bob, "bob").await;

        for _ in 0..5 {
            alice
                .send(&Packet::Send {
                    from: "alice".to_string(),
                    to: "bob".to_string(),
                    text: "x".repeat(100),
                })
                .await
                .unwrap();
        }

        let result = timeout(Duration::from_secs(2), bob_handle)
            .await
            .expect("cleanup blocked by a stalled delivery")
            .unwrap();
        assert!(matches!(result, Err(ProtocolError::ConnectionTimeout)));
        assert!(registry.lookup("bob").is_err());
        assert!(registry.lookup("alice").is_ok());

        // 名字空出来后可以重新登录
        let (_again, _h3) = login(&registry, "bob").await;
        drop(bob);
    }
}
