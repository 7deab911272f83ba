use std::borrow::Cow;

use spark_databuf::{BufferGuard, DataBuffer, DataBufferExt, DataBufferFactory, Result};

use crate::{CodecHints, ContentType, Encoder};

/// 字符集感知的文本编码器：每个字符串编码为一个缓冲。
///
/// - 字符集取自 [`CodecHints::charset`]，无法映射的字符产出 `Encoding` 错误；
/// - [`lines`](Self::lines) 变体在每个值之后追加 `\n`，与 [`LineDecoder`](crate::LineDecoder) 的默认配置对称。
#[derive(Debug, Clone, Default)]
pub struct StringEncoder {
    line_separator: Option<Cow<'static, str>>,
}

impl StringEncoder {
    /// 原样编码，不追加分隔符。
    pub fn new() -> Self {
        Self::default()
    }

    /// 每个值后追加 `\n`。
    pub fn lines() -> Self {
        Self::with_line_separator("\n")
    }

    /// 每个值后追加指定分隔符。
    pub fn with_line_separator(separator: impl Into<Cow<'static, str>>) -> Self {
        Self {
            line_separator: Some(separator.into()),
        }
    }
}

impl Encoder<String> for StringEncoder {
    fn encodable_content_types(&self) -> Vec<ContentType> {
        vec![ContentType::TEXT_PLAIN]
    }

    fn encode_value(
        &self,
        value: String,
        factory: &dyn DataBufferFactory,
        hints: &CodecHints,
    ) -> Result<Box<dyn DataBuffer>> {
        let separator = self.line_separator.as_deref().unwrap_or_default();
        // 三种受支持字符集下，编码后的字节数都不超过 UTF-8 字节数。
        let hint = value.len() + separator.len();
        let mut buffer = BufferGuard::new(factory.allocate_buffer(Some(hint))?);
        buffer.write_str(&value, hints.charset)?;
        buffer.write_str(separator, hints.charset)?;
        Ok(buffer.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{StreamExt, executor::block_on, stream};
    use spark_databuf::{BufferError, Charset, PooledDataBufferFactory};
    use std::sync::Arc;

    #[test]
    fn unmappable_text_fails_without_leaking() {
        let factory = Arc::new(PooledDataBufferFactory::new());
        let values = stream::iter(vec![Ok("plain".to_owned()), Ok("ünïcode".to_owned())]).boxed();
        let encoder = StringEncoder::lines();
        let hints = CodecHints::with_charset(Charset::UsAscii);
        let encoded: Vec<_> = block_on(encoder.encode(values, factory.clone(), hints).collect());
        assert_eq!(encoded.len(), 2);
        let first = encoded[0].as_ref().expect("ASCII 文本可编码");
        assert_eq!(&first.to_bytes().unwrap()[..], b"plain\n");
        assert!(matches!(encoded[1], Err(BufferError::Encoding(_))));
        encoded.iter().flatten().for_each(|buffer| {
            spark_databuf::utils::release(&**buffer).unwrap();
        });
        assert_eq!(factory.pool().statistics().active_leases, 0);
    }
}
