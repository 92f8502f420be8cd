//! 服务端请求级错误
//!
//! 这些错误只影响单个请求：转换成 `Error` 包回给发起方，连接继续。

use protocol::{Packet, PacketKind, UsernameError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// 用户名已被在线会话占用
    #[error("user '{0}' is already online")]
    AlreadyExists(String),

    /// 接收方不在线
    #[error("user '{0}' not found")]
    NotFound(String),

    /// 未登录就发送消息
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("already authenticated as '{0}'")]
    AlreadyAuthenticated(String),

    #[error("invalid username: {0}")]
    InvalidUsername(#[from] UsernameError),

    /// `Send.from` 与本连接登录的用户不一致
    #[error("sender '{claimed}' does not match session user '{actual}'")]
    SenderMismatch { claimed: String, actual: String },

    /// 只应由服务端发出的包类型
    #[error("unexpected {0:?} packet from client")]
    UnexpectedPacket(PacketKind),

    #[error("server busy, try again later")]
    ServerBusy,
}

impl RelayError {
    pub fn to_packet(&self) -> Packet {
        Packet::Error {
            message: self.to_string(),
        }
    }
}
