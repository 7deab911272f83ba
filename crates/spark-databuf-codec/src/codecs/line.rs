use std::borrow::Cow;

use futures::StreamExt;
use serde::Deserialize;
use spark_databuf::{
    BufferError, BufferGuard, BufferStream, Charset, DataBuffer, DataBufferExt, Result,
};

use crate::{
    CodecHints, ContentType, DEFAULT_MAX_IN_MEMORY_SIZE, DecodeOutcome, DecodeStream, Decoder,
    FrameDecoder, ValueStream,
};

/// 行解码器配置。
///
/// # 契约说明（What）
/// - `delimiters`：行分隔符集合，默认 `["\r\n", "\n"]`；同一位置同时匹配多个分隔符时取最长者；
/// - `strip_delimiter`：产出的行是否去除分隔符，默认 `true`；
/// - `emit_trailing`：输入结束时未以分隔符结尾的残余是否作为最后一行产出，默认 `true`，
///   为 `false` 时视为 `Decoding` 错误；
/// - `max_in_memory_size`：单行（含尚未收到分隔符的部分）允许聚合的字节上限。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LineDecoderConfig {
    /// 行分隔符。
    pub delimiters: Vec<String>,
    /// 是否去除分隔符。
    pub strip_delimiter: bool,
    /// 是否产出未终结的尾行。
    pub emit_trailing: bool,
    /// 单行聚合上限。
    pub max_in_memory_size: usize,
}

impl Default for LineDecoderConfig {
    fn default() -> Self {
        Self {
            delimiters: vec!["\r\n".to_owned(), "\n".to_owned()],
            strip_delimiter: true,
            emit_trailing: true,
            max_in_memory_size: DEFAULT_MAX_IN_MEMORY_SIZE,
        }
    }
}

impl LineDecoderConfig {
    /// 校验配置自洽性：至少一个分隔符，且分隔符均非空。
    pub fn validate(&self) -> Result<()> {
        if self.delimiters.is_empty() {
            return Err(BufferError::illegal_state(
                "LineDecoderConfig::validate",
                "at least one delimiter is required",
            ));
        }
        if self.delimiters.iter().any(String::is_empty) {
            return Err(BufferError::illegal_state(
                "LineDecoderConfig::validate",
                "delimiters must not be empty",
            ));
        }
        Ok(())
    }
}

/// 按分隔符切分文本行的解码器，实现 [`Decoder<String>`]。
///
/// # 设计动机（Why）
/// - 行分隔文本常见于日志流与逐行协议；一行可能跨越多个传输缓冲，也可能一个缓冲携带多行，
///   解码器需要在两种情况下都按输入顺序产出完整的行。
///
/// # 行为概览（How）
/// - `decode`：以 [`LineFrames`] 驱动 [`DecodeStream`]，每个输入缓冲复制进累加器后立即释放；
/// - `decode_buffer`：把整个缓冲按字符集解码为一个字符串，不做切分，供 `decode_to_single` 使用。
///
/// # 权衡与风险（Trade-offs）
/// - 分隔符按字符集编码后做字节匹配，只适用于 ASCII 兼容的字符集；
/// - 每次分帧都从累加器起点重新扫描，极长的单行会带来二次方开销，依赖 `max_in_memory_size` 限制规模。
#[derive(Debug, Clone, Default)]
pub struct LineDecoder {
    config: LineDecoderConfig,
}

impl LineDecoder {
    /// 以默认配置构建。
    pub fn new() -> Self {
        Self::default()
    }

    /// 以给定配置构建；配置不自洽时返回 `IllegalState`。
    pub fn with_config(config: LineDecoderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// 当前配置。
    pub fn config(&self) -> &LineDecoderConfig {
        &self.config
    }

    /// 返回具体类型的解码状态机，便于观察 [`DecodeStream::state`]。
    pub fn decode_stream<'a>(
        &self,
        input: BufferStream<'a>,
        hints: &CodecHints,
    ) -> DecodeStream<'a, LineFrames> {
        DecodeStream::new(
            input,
            LineFrames::new(&self.config, hints.charset),
            self.config.max_in_memory_size,
        )
    }
}

impl Decoder<String> for LineDecoder {
    fn decodable_content_types(&self) -> Vec<ContentType> {
        vec![ContentType::TEXT_PLAIN]
    }

    fn decode<'a>(&self, input: BufferStream<'a>, hints: &CodecHints) -> ValueStream<'a, String> {
        self.decode_stream(input, hints).boxed()
    }

    fn decode_buffer(&self, buffer: Box<dyn DataBuffer>, hints: &CodecHints) -> Result<String> {
        let mut buffer = BufferGuard::new(buffer);
        buffer.read_to_string(hints.charset)
    }

    fn max_in_memory_size(&self) -> usize {
        self.config.max_in_memory_size
    }
}

/// 行分帧器。
#[derive(Debug, Clone)]
pub struct LineFrames {
    delimiters: Vec<Vec<u8>>,
    longest_delimiter: usize,
    /// 可读区间内已确认不存在分隔符起点的前缀长度，跨输入增量扫描。
    scanned: usize,
    strip_delimiter: bool,
    emit_trailing: bool,
    charset: Charset,
}

impl LineFrames {
    /// 依据配置与字符集构建；空分隔符被忽略，无法以该字符集编码的分隔符退回其 UTF-8 字节。
    pub fn new(config: &LineDecoderConfig, charset: Charset) -> Self {
        let delimiters = config
            .delimiters
            .iter()
            .filter(|delimiter| !delimiter.is_empty())
            .map(|delimiter| {
                charset
                    .encode(delimiter)
                    .map(Cow::into_owned)
                    .unwrap_or_else(|_| delimiter.as_bytes().to_vec())
            })
            .collect::<Vec<_>>();
        let longest_delimiter = delimiters.iter().map(Vec::len).max().unwrap_or(0);
        Self {
            delimiters,
            longest_delimiter,
            scanned: 0,
            strip_delimiter: config.strip_delimiter,
            emit_trailing: config.emit_trailing,
            charset,
        }
    }

    /// 自 `from` 起最早出现的分隔符 `(位置, 长度)`；同一位置取最长者。
    fn find_delimiter(&self, haystack: &[u8], from: usize) -> Option<(usize, usize)> {
        let tail = haystack.get(from..)?;
        self.delimiters
            .iter()
            .filter_map(|delimiter| {
                tail.windows(delimiter.len())
                    .position(|window| window == delimiter.as_slice())
                    .map(|index| (from + index, delimiter.len()))
            })
            .min_by(|(a_index, a_len), (b_index, b_len)| {
                a_index.cmp(b_index).then(b_len.cmp(a_len))
            })
    }
}

impl FrameDecoder for LineFrames {
    type Item = String;

    fn decode_frame(&mut self, accumulator: &mut dyn DataBuffer) -> Result<DecodeOutcome<String>> {
        let (line, consumed) = {
            let view = accumulator.readable_view()?;
            let Some((index, len)) = self.find_delimiter(&view, self.scanned) else {
                // 末尾不足最长分隔符的字节可能是被拆开的分隔符前缀，下次从那里重扫。
                let carry = self.longest_delimiter.saturating_sub(1);
                self.scanned = view.len().saturating_sub(carry);
                return Ok(DecodeOutcome::Incomplete);
            };
            self.scanned = 0;
            let end = if self.strip_delimiter { index } else { index + len };
            (self.charset.decode(&view[..end])?, index + len)
        };
        let position = accumulator.read_position() + consumed;
        accumulator.set_read_position(position)?;
        Ok(DecodeOutcome::Complete(line))
    }

    fn decode_eof(&mut self, accumulator: &mut dyn DataBuffer) -> Result<Option<String>> {
        self.scanned = 0;
        if !self.emit_trailing {
            return Err(BufferError::decoding(format!(
                "input ended inside an unterminated line of {} bytes",
                accumulator.readable_byte_count()
            )));
        }
        accumulator.read_to_string(self.charset).map(Some)
    }
}
