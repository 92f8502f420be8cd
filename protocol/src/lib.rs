//! 消息中继共享协议库
//!
//! 包含:
//! - 包类型定义与编解码 (Packet, PacketKind)
//! - 异步帧读写 (FrameReader, FrameWriter)
//! - 连接封装 (Connection)
//! - TCP 传输 (TcpTransport, TcpListener)
//! - 路由用的消息值对象 (Message)

mod codec;
mod connection;
mod constants;
mod error;
mod message;
mod packet;
mod transport;

pub use codec::{FrameReader, FrameWriter};
pub use connection::Connection;
pub use constants::*;
pub use error::{MalformedPacket, ProtocolError, Result};
pub use message::{validate_username, Message, UsernameError};
pub use packet::{Packet, PacketKind};
pub use transport::{TcpListener, TcpTransport, TransportConfig};
