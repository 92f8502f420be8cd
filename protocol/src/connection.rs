//! 连接封装
//!
//! 把一对读写端和帧编解码绑在一起，提供按包收发的接口。

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::codec::{FrameReader, FrameWriter};
use crate::error::Result;
use crate::packet::Packet;
use crate::transport::TcpTransport;

/// 连接封装
///
/// # Type Parameters
/// * `R` - 读取端类型
/// * `W` - 写入端类型
pub struct Connection<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
}

impl Connection<OwnedReadHalf, OwnedWriteHalf> {
    /// 从 TCP 传输创建连接
    pub fn new(transport: TcpTransport) -> Self {
        let (reader, writer) = transport.split();
        Self::from_parts(reader, writer)
    }
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Connection<R, W> {
    /// 从读写端直接创建连接
    pub fn from_parts(reader: R, writer: W) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        }
    }

    /// 分离为读取端和写入端，用于并发读写
    pub fn split(self) -> (FrameReader<R>, FrameWriter<W>) {
        (self.reader, self.writer)
    }

    /// 接收一个包
    pub async fn recv(&mut self) -> Result<Packet> {
        self.reader.read_packet().await
    }

    /// 发送一个包
    pub async fn send(&mut self, packet: &Packet) -> Result<()> {
        self.writer.write_packet(packet).await
    }
}
