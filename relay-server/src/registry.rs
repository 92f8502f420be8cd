//! 在线会话注册表
//!
//! 用户名 -> 会话 的唯一目录，所有连接任务共享。所有操作都在同一把
//! 互斥锁下完成，持锁期间不做任何 IO：写连接前先把会话句柄克隆出来。

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use protocol::{FrameWriter, Packet, ProtocolError, WRITE_TIMEOUT};
use tokio::io::AsyncWrite;
use tokio::time::timeout;
use tracing::debug;

use crate::error::RelayError;

/// 会话写端的类型擦除
pub type SessionWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// 会话写端
///
/// 写入中途出错或被超时取消后，对端可能只收到半帧，此后所有写入都直接
/// 返回 `ConnectionClosed`。
pub struct FrameSink {
    writer: FrameWriter<SessionWriter>,
    broken: bool,
}

impl FrameSink {
    pub fn new(writer: SessionWriter) -> Self {
        Self {
            writer: FrameWriter::new(writer),
            broken: false,
        }
    }

    pub async fn write_packet(&mut self, packet: &Packet) -> protocol::Result<()> {
        if self.broken {
            return Err(ProtocolError::ConnectionClosed);
        }
        // 先置位：future 在写到一半时被丢弃也会保持 broken
        self.broken = true;
        let result = self.writer.write_packet(packet).await;
        self.broken = matches!(&result, Err(e) if e.is_transport());
        result
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub async fn shutdown(&mut self) -> protocol::Result<()> {
        self.writer.shutdown().await
    }
}

/// 帧级互斥的共享写端，每次写入一个完整帧
pub type SharedWriter = Arc<tokio::sync::Mutex<FrameSink>>;

pub fn shared_writer(writer: SessionWriter) -> SharedWriter {
    Arc::new(tokio::sync::Mutex::new(FrameSink::new(writer)))
}

/// 在 `limit` 内拿到写端并写完一帧，超时返回 `ConnectionTimeout`
pub async fn write_bounded(
    writer: &SharedWriter,
    packet: &Packet,
    limit: Duration,
) -> protocol::Result<()> {
    timeout(limit, async { writer.lock().await.write_packet(packet).await })
        .await
        .map_err(|_| ProtocolError::ConnectionTimeout)?
}

/// 一个已登录的连接
#[derive(Clone)]
pub struct Session {
    username: String,
    created_at: SystemTime,
    writer: SharedWriter,
    write_timeout: Duration,
}

impl Session {
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// 向该会话写入一个包
    ///
    /// 连接已断开时返回传输错误，而不是 panic；对端长时间不读时返回
    /// `ConnectionTimeout`，不会无限期占住写端。
    pub async fn deliver(&self, packet: &Packet) -> protocol::Result<()> {
        write_bounded(&self.writer, packet, self.write_timeout).await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// 会话注册表
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
    write_timeout: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            write_timeout: WRITE_TIMEOUT,
        }
    }

    /// 设置向会话写入单帧的超时
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        // 持锁期间只做 map 操作，不会留下半更新的状态
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 注册新会话；用户名已在线时失败，已有会话不受影响
    pub fn register(&self, username: &str, writer: SharedWriter) -> Result<Session, RelayError> {
        match self.sessions().entry(username.to_string()) {
            Entry::Occupied(_) => Err(RelayError::AlreadyExists(username.to_string())),
            Entry::Vacant(slot) => {
                let session = Session {
                    username: username.to_string(),
                    created_at: SystemTime::now(),
                    writer,
                    write_timeout: self.write_timeout,
                };
                slot.insert(session.clone());
                debug!(username, "session registered");
                Ok(session)
            }
        }
    }

    /// 查找在线会话，返回可独立使用的句柄
    pub fn lookup(&self, username: &str) -> Result<Session, RelayError> {
        self.sessions()
            .get(username)
            .cloned()
            .ok_or_else(|| RelayError::NotFound(username.to_string()))
    }

    /// 移除会话，不存在时什么也不做；返回是否真的移除了
    pub fn deregister(&self, username: &str) -> bool {
        let removed = self.sessions().remove(username).is_some();
        if removed {
            debug!(username, "session deregistered");
        }
        removed
    }

    /// 在线用户快照
    pub fn online(&self) -> BTreeSet<String> {
        self.sessions().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }
}
