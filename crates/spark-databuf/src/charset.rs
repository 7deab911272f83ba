use std::{borrow::Cow, fmt, str::FromStr};

use serde::Deserialize;

use crate::error::{BufferError, Result};

/// 文本与字节互转时使用的字符集。
///
/// 仅覆盖传输层最常见的三种单/变长编码；更复杂的编码应由上层编组库自行处理。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
pub enum Charset {
    /// UTF-8（默认）。
    #[default]
    #[serde(rename = "UTF-8", alias = "utf-8", alias = "utf8")]
    Utf8,
    /// ISO-8859-1 / Latin-1：码点 `0..=0xFF` 一一映射为单字节。
    #[serde(rename = "ISO-8859-1", alias = "iso-8859-1", alias = "latin1")]
    Iso8859_1,
    /// US-ASCII：仅允许 `0..=0x7F`。
    #[serde(rename = "US-ASCII", alias = "us-ascii", alias = "ascii")]
    UsAscii,
}

impl Charset {
    /// 规范名称。
    pub fn name(&self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Iso8859_1 => "ISO-8859-1",
            Self::UsAscii => "US-ASCII",
        }
    }

    /// 单个字符编码后的最大字节数，用于预估缓冲容量。
    pub fn max_bytes_per_char(&self) -> usize {
        match self {
            Self::Utf8 => 4,
            Self::Iso8859_1 | Self::UsAscii => 1,
        }
    }

    /// 将文本编码为字节；UTF-8 直接借用原始字节。
    pub fn encode<'a>(&self, text: &'a str) -> Result<Cow<'a, [u8]>> {
        match self {
            Self::Utf8 => Ok(Cow::Borrowed(text.as_bytes())),
            Self::UsAscii if text.is_ascii() => Ok(Cow::Borrowed(text.as_bytes())),
            Self::UsAscii => Err(unmappable(self, text)),
            Self::Iso8859_1 => text
                .chars()
                .map(|ch| u8::try_from(u32::from(ch)).map_err(|_| unmappable(self, text)))
                .collect::<Result<Vec<u8>>>()
                .map(Cow::Owned),
        }
    }

    /// 将字节解码为文本，遇到非法序列返回 [`BufferError::Decoding`]。
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        match self {
            Self::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|err| BufferError::decoding(format!("invalid UTF-8: {err}"))),
            Self::UsAscii => match bytes.iter().position(|b| !b.is_ascii()) {
                Some(pos) => Err(BufferError::decoding(format!(
                    "byte 0x{:02x} at offset {pos} is not US-ASCII",
                    bytes[pos]
                ))),
                None => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            },
            Self::Iso8859_1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

fn unmappable(charset: &Charset, text: &str) -> BufferError {
    BufferError::encoding(format!(
        "text of {} chars contains characters not representable in {}",
        text.chars().count(),
        charset.name()
    ))
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Charset {
    type Err = BufferError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "iso-8859-1" | "latin1" => Ok(Self::Iso8859_1),
            "us-ascii" | "ascii" => Ok(Self::UsAscii),
            other => Err(BufferError::illegal_state(
                "Charset::from_str",
                format!("unsupported charset `{other}`"),
            )),
        }
    }
}
