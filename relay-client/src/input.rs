//! 终端输入解析，格式: `<to> <text>`

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("invalid message format, expected: <to> <text>")]
    MissingText,

    #[error("recipient must not be empty")]
    MissingRecipient,
}

/// 把一行输入拆成接收方和正文
pub fn parse_input(line: &str) -> Result<(&str, &str), InputError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (to, text) = line.split_once(' ').ok_or(InputError::MissingText)?;
    if to.is_empty() {
        return Err(InputError::MissingRecipient);
    }
    if text.is_empty() {
        return Err(InputError::MissingText);
    }
    Ok((to, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_recipient_and_text() {
        assert_eq!(parse_input("bob hello there"), Ok(("bob", "hello there")));
    }

    #[test]
    fn test_parse_keeps_inner_spacing() {
        assert_eq!(parse_input("bob  two  spaces\n"), Ok(("bob", " two  spaces")));
    }

    #[test]
    fn test_parse_missing_text() {
        assert_eq!(parse_input("bob"), Err(InputError::MissingText));
        assert_eq!(parse_input("bob "), Err(InputError::MissingText));
    }

    #[test]
    fn test_parse_missing_recipient() {
        assert_eq!(parse_input(" hello"), Err(InputError::MissingRecipient));
    }
}
