//! 错误类型定义

use thiserror::Error;

use crate::packet::PacketKind;

/// 帧格式错误，对连接是致命的
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedPacket {
    /// 未知的包类型
    #[error("unknown packet kind: {0}")]
    UnknownKind(u8),

    /// 声明的负载长度超限
    #[error("frame too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    /// 字段数量与包类型不符
    #[error("{kind:?} packet expects {expected} fields, got {actual}")]
    FieldCount {
        kind: PacketKind,
        expected: usize,
        actual: usize,
    },

    /// 字段不是合法的 UTF-8
    #[error("field is not valid UTF-8")]
    InvalidUtf8,
}

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 帧解码失败
    #[error("malformed packet: {0}")]
    Malformed(#[from] MalformedPacket),

    /// 字段中包含 NUL，无法编码
    #[error("field `{field}` contains a NUL byte")]
    InvalidField { field: &'static str },

    /// 编码后的负载超限
    #[error("payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// 连接超时
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,
}

impl ProtocolError {
    /// 是否属于传输层故障（按断开处理）
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(_)
                | ProtocolError::ConnectionClosed
                | ProtocolError::ConnectionTimeout
        )
    }
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
