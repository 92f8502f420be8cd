//! 消息值对象与用户名规则

use thiserror::Error;

use crate::packet::Packet;
use crate::{FIELD_SEPARATOR, MAX_USERNAME_LEN};

/// 一次路由中的消息，只用于把 `Send` 转换为 `Deliver`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub to: String,
    pub from: String,
    pub text: String,
}

impl Message {
    pub fn new(to: impl Into<String>, from: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            from: from.into(),
            text: text.into(),
        }
    }

    /// 转换为发给接收方的 `Deliver` 包
    pub fn into_deliver(self) -> Packet {
        Packet::Deliver {
            from: self.from,
            text: self.text,
        }
    }
}

/// 用户名不合法的原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsernameError {
    #[error("username must not be empty")]
    Empty,

    #[error("username too long: {len} bytes (max: {max})")]
    TooLong { len: usize, max: usize },

    #[error("username must not contain whitespace or NUL")]
    InvalidChar,
}

/// 校验用户名，客户端和服务端共用
pub fn validate_username(username: &str) -> Result<(), UsernameError> {
    if username.is_empty() {
        return Err(UsernameError::Empty);
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(UsernameError::TooLong {
            len: username.len(),
            max: MAX_USERNAME_LEN,
        });
    }
    if username.as_bytes().contains(&FIELD_SEPARATOR) || username.chars().any(char::is_whitespace) {
        return Err(UsernameError::InvalidChar);
    }
    Ok(())
}
