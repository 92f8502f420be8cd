//! 包类型定义与编解码
//!
//! 帧格式:
//! ```text
//! ┌──────────┬────────────────┬──────────────────────────────────┐
//! │ Kind(1B) │  Length (4B)   │  Payload: UTF-8 字段，NUL 分隔     │
//! │    u8    │    u32 BE      │  字段数由 Kind 决定                │
//! └──────────┴────────────────┴──────────────────────────────────┘
//! ```

use crate::error::{MalformedPacket, ProtocolError, Result};
use crate::{FIELD_SEPARATOR, HEADER_SIZE, MAX_PAYLOAD_LEN};

/// 包类型，即帧的第一个字节
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    Auth = 0,
    Send = 1,
    Deliver = 2,
    Close = 3,
    Error = 4,
    Ok = 5,
}

impl PacketKind {
    /// 该类型负载中的字段个数
    pub fn field_count(self) -> usize {
        match self {
            PacketKind::Auth | PacketKind::Close | PacketKind::Error => 1,
            PacketKind::Deliver => 2,
            PacketKind::Send => 3,
            PacketKind::Ok => 0,
        }
    }
}

impl TryFrom<u8> for PacketKind {
    type Error = MalformedPacket;

    fn try_from(byte: u8) -> std::result::Result<Self, MalformedPacket> {
        match byte {
            0 => Ok(PacketKind::Auth),
            1 => Ok(PacketKind::Send),
            2 => Ok(PacketKind::Deliver),
            3 => Ok(PacketKind::Close),
            4 => Ok(PacketKind::Error),
            5 => Ok(PacketKind::Ok),
            other => Err(MalformedPacket::UnknownKind(other)),
        }
    }
}

impl From<PacketKind> for u8 {
    fn from(kind: PacketKind) -> u8 {
        kind as u8
    }
}

/// 线上传输的包
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// 登录请求
    Auth { username: String },
    /// 客户端发出的定向消息
    Send {
        from: String,
        to: String,
        text: String,
    },
    /// 服务端转发给接收方的消息
    Deliver { from: String, text: String },
    /// 登出 / 断开通知
    Close { username: String },
    /// 错误通知
    Error { message: String },
    /// 确认
    Ok,
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Auth { .. } => PacketKind::Auth,
            Packet::Send { .. } => PacketKind::Send,
            Packet::Deliver { .. } => PacketKind::Deliver,
            Packet::Close { .. } => PacketKind::Close,
            Packet::Error { .. } => PacketKind::Error,
            Packet::Ok => PacketKind::Ok,
        }
    }

    /// 按线上顺序列出字段（字段名用于报错）
    fn fields(&self) -> Vec<(&'static str, &str)> {
        match self {
            Packet::Auth { username } | Packet::Close { username } => {
                vec![("username", username.as_str())]
            }
            Packet::Send { from, to, text } => {
                vec![("from", from.as_str()), ("to", to.as_str()), ("text", text.as_str())]
            }
            Packet::Deliver { from, text } => {
                vec![("from", from.as_str()), ("text", text.as_str())]
            }
            Packet::Error { message } => vec![("message", message.as_str())],
            Packet::Ok => Vec::new(),
        }
    }

    /// 编码为一个完整的帧
    pub fn encode(&self) -> Result<Vec<u8>> {
        let fields = self.fields();

        for (name, value) in &fields {
            if value.as_bytes().contains(&FIELD_SEPARATOR) {
                return Err(ProtocolError::InvalidField { field: *name });
            }
        }

        let payload_len = fields.iter().map(|(_, v)| v.len()).sum::<usize>()
            + fields.len().saturating_sub(1);
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_LEN,
            });
        }

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload_len);
        frame.push(u8::from(self.kind()));
        frame.extend_from_slice(&(payload_len as u32).to_be_bytes());
        for (i, (_, value)) in fields.iter().enumerate() {
            if i > 0 {
                frame.push(FIELD_SEPARATOR);
            }
            frame.extend_from_slice(value.as_bytes());
        }

        Ok(frame)
    }

    /// 从累积缓冲区的开头解码一帧
    ///
    /// 返回 `Ok(None)` 表示数据还不完整；成功时同时返回消耗的字节数，
    /// 调用方据此丢弃已处理的前缀。
    pub fn decode(buf: &[u8]) -> Result<Option<(Packet, usize)>> {
        let Some(&kind) = buf.first() else {
            return Ok(None);
        };
        let kind = PacketKind::try_from(kind)?;

        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }
        let length = payload_length(&buf[..HEADER_SIZE]);
        check_length(length)?;

        let end = HEADER_SIZE + length;
        if buf.len() < end {
            return Ok(None);
        }

        let packet = Packet::from_payload(kind, &buf[HEADER_SIZE..end])?;
        Ok(Some((packet, end)))
    }

    /// 按类型拆分负载
    pub fn from_payload(
        kind: PacketKind,
        payload: &[u8],
    ) -> std::result::Result<Packet, MalformedPacket> {
        let expected = kind.field_count();

        // 空负载对零字段类型是 0 个字段，对其他类型是 1 个空字段
        let raw: Vec<&[u8]> = if expected == 0 && payload.is_empty() {
            Vec::new()
        } else {
            payload.split(|b| *b == FIELD_SEPARATOR).collect()
        };

        if raw.len() != expected {
            return Err(MalformedPacket::FieldCount {
                kind,
                expected,
                actual: raw.len(),
            });
        }

        let mut fields = raw
            .into_iter()
            .map(|f| String::from_utf8(f.to_vec()).map_err(|_| MalformedPacket::InvalidUtf8))
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter();
        let mut next = || fields.next().unwrap_or_default();

        let packet = match kind {
            PacketKind::Auth => Packet::Auth { username: next() },
            PacketKind::Send => Packet::Send {
                from: next(),
                to: next(),
                text: next(),
            },
            PacketKind::Deliver => Packet::Deliver {
                from: next(),
                text: next(),
            },
            PacketKind::Close => Packet::Close { username: next() },
            PacketKind::Error => Packet::Error { message: next() },
            PacketKind::Ok => Packet::Ok,
        };
        Ok(packet)
    }
}

/// 从 5 字节帧头中取出负载长度（大端序）
pub(crate) fn payload_length(header: &[u8]) -> usize {
    u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize
}

pub(crate) fn check_length(length: usize) -> std::result::Result<(), MalformedPacket> {
    if length > MAX_PAYLOAD_LEN {
        return Err(MalformedPacket::TooLarge {
            size: length,
            max: MAX_PAYLOAD_LEN,
        });
    }
    Ok(())
}
