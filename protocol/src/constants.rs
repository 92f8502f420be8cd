//! 协议常量定义

use std::time::Duration;

/// 默认服务端口
pub const DEFAULT_PORT: u16 = 5222;

/// 帧头大小: 1 字节类型 + 4 字节长度
pub const HEADER_SIZE: usize = 5;

/// 单帧负载最大长度 (64 KiB)
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024;

/// 用户名最大长度（字节）
pub const MAX_USERNAME_LEN: usize = 32;

/// 字段分隔符
pub const FIELD_SEPARATOR: u8 = 0x00;

/// 服务端默认最大连接数
pub const MAX_CONNECTIONS: usize = 100;

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);

/// 服务端单帧写超时（秒）
pub const WRITE_TIMEOUT_SECS: u64 = 10;

/// 服务端单帧写超时 Duration
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(WRITE_TIMEOUT_SECS);
