//! 异步帧读写
//!
//! TCP 不保留消息边界：一次 read 可能只拿到半帧，也可能拿到多帧。
//! `FrameReader` 先读满 5 字节帧头，再按长度读满负载，才交给
//! [`Packet::from_payload`] 解析。

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, Result};
use crate::packet::{check_length, payload_length, Packet, PacketKind};
use crate::HEADER_SIZE;

fn map_eof(e: std::io::Error) -> ProtocolError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ProtocolError::ConnectionClosed
    } else {
        ProtocolError::Io(e)
    }
}

/// 帧读取器
pub struct FrameReader<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// 创建新的帧读取器
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
        }
    }

    /// 读取并解码一帧
    pub async fn read_packet(&mut self) -> Result<Packet> {
        let mut header = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut header).await.map_err(map_eof)?;

        let kind = PacketKind::try_from(header[0])?;
        let length = payload_length(&header);
        check_length(length)?;

        // 仅在需要时扩容
        if self.buffer.len() < length {
            self.buffer.resize(length, 0);
        }
        self.reader
            .read_exact(&mut self.buffer[..length])
            .await
            .map_err(map_eof)?;

        let packet = Packet::from_payload(kind, &self.buffer[..length])?;
        Ok(packet)
    }
}

/// 帧写入器
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// 创建新的帧写入器
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// 编码并写入一帧
    ///
    /// 编码失败时不会写出任何字节。帧头和负载合并为一次 `write_all`。
    pub async fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let frame = packet.encode()?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// 关闭写端
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
