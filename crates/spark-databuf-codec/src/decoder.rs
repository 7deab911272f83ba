use std::{
    pin::Pin,
    task::{Context, Poll, ready},
};

use futures::{FutureExt, Stream, StreamExt, future::BoxFuture};
use spark_databuf::{
    BufferError, BufferGuard, BufferStream, DataBuffer, DataBufferExt, DefaultDataBuffer,
    DefaultDataBufferFactory, Result, utils,
};
use tracing::{debug, trace};

use crate::{CodecHints, ContentType, ValueStream};

/// 解码器在内存中聚合的默认字节上限（256 KiB）。
pub const DEFAULT_MAX_IN_MEMORY_SIZE: usize = 256 * 1024;

/// `Decoder` 定义将缓冲流还原为类型化值流的契约。
///
/// # 设计背景（Why）
/// - 解码器是缓冲的两类终端所有者之一：它从传输层接过缓冲，提取所需字节后负责释放；
/// - 流式解码与一次性解码共用同一契约，后者通过 [`decode_to_single`](Self::decode_to_single)
///   先聚合再调用 [`decode_buffer`](Self::decode_buffer)。
///
/// # 契约说明（What）
/// - 每个输入缓冲在其字节被完整消费、或被判定不再需要（包括出错后）时释放；
/// - 值按输入顺序产出；失败时产出 `Decoding`（或 `LimitExceeded`）错误后流即结束；
/// - `decode_buffer` 接管缓冲所有权，返回前释放它（透传解码器除外，所有权随值转交）。
pub trait Decoder<T: Send + 'static>: Send + Sync + 'static {
    /// 本解码器能识别的内容类型。
    fn decodable_content_types(&self) -> Vec<ContentType>;

    /// 是否能解码给定内容类型；`None` 表示来源未声明内容类型。
    fn can_decode(&self, content_type: Option<&ContentType>) -> bool {
        match content_type {
            None => true,
            Some(source) => self
                .decodable_content_types()
                .iter()
                .any(|supported| supported.includes(source)),
        }
    }

    /// 惰性地把缓冲流解码为值流。
    fn decode<'a>(&self, input: BufferStream<'a>, hints: &CodecHints) -> ValueStream<'a, T>;

    /// 将单个（通常已聚合的）缓冲整体解码为一个值。
    fn decode_buffer(&self, buffer: Box<dyn DataBuffer>, hints: &CodecHints) -> Result<T>;

    /// 单个值允许在内存中聚合的字节上限。
    fn max_in_memory_size(&self) -> usize {
        DEFAULT_MAX_IN_MEMORY_SIZE
    }

    /// 聚合整条缓冲流（不超过 [`max_in_memory_size`](Self::max_in_memory_size)）后解码为一个值。
    ///
    /// 聚合使用非池化缓冲；超限时返回 `LimitExceeded`，所有输入均已释放。
    fn decode_to_single<'a>(
        &'a self,
        input: BufferStream<'a>,
        hints: &'a CodecHints,
    ) -> BoxFuture<'a, Result<T>> {
        async move {
            let factory = DefaultDataBufferFactory::new();
            let joined = utils::join(input, &factory, Some(self.max_in_memory_size())).await?;
            self.decode_buffer(joined, hints)
        }
        .boxed()
    }
}

/// 单次分帧尝试的结果。
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeOutcome<T> {
    /// 成功切出一个完整值，对应字节已从累加器消费。
    Complete(T),
    /// 数据不足，等待更多输入；累加器的读指针不得移动。
    Incomplete,
}

/// 分帧器：从累加器中切出完整值。
///
/// # 契约说明（What）
/// - [`decode_frame`](Self::decode_frame) 在返回 `Complete` 时推进累加器读指针越过该帧，
///   返回 `Incomplete` 时保持读指针不动；
/// - [`decode_eof`](Self::decode_eof) 仅在输入结束且仍有未消费字节时调用，
///   决定尾部不完整数据的处理策略（产出最后一个值，或视为 `Decoding` 错误）。
pub trait FrameDecoder: Send + 'static {
    /// 分帧产出的值类型。
    type Item: Send + 'static;

    /// 尝试切出一帧。
    fn decode_frame(
        &mut self,
        accumulator: &mut dyn DataBuffer,
    ) -> Result<DecodeOutcome<Self::Item>>;

    /// 处理输入结束时的剩余字节。
    fn decode_eof(&mut self, accumulator: &mut dyn DataBuffer) -> Result<Option<Self::Item>>;
}

/// [`DecodeStream`] 的状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// 等待更多输入以凑出完整值。
    Accumulating,
    /// 累加器中可能存在完整值，正在逐个切出。
    Emitting,
    /// 输入非法或上游失败（终态）。
    Failed,
    /// 输入耗尽且已按尾部策略处理剩余字节（终态）。
    Completed,
}

/// 基于 [`FrameDecoder`] 的缓冲到值解码状态机。
///
/// # 逻辑解析（How）
/// - `Accumulating`：拉取一个输入缓冲，复制其可读字节到非池化累加器后立即释放输入，转入 `Emitting`；
/// - `Emitting`：反复调用分帧器，每切出一个值就产出一次；数据不足时压缩累加器并回到 `Accumulating`，
///   此时若残留的不完整帧已超过内存上限，转入 `Failed` 并产出 `LimitExceeded`；
/// - 上游结束：累加器为空则 `Completed`；否则交给 `decode_eof` 处理尾部后 `Completed`，
///   或转入 `Failed`；
/// - `Failed`：丢弃上游流（其在途缓冲随之释放）并清空累加器，产出错误后结束。
///
/// # 契约说明（What）
/// - 任意时刻至多有一个输入缓冲处于“已拉取未释放”状态，且只存在于单次 `poll` 内部；
/// - 流被丢弃即视为取消：上游流与累加器一并销毁，不遗留未释放的输入。
pub struct DecodeStream<'a, F> {
    input: Option<BufferStream<'a>>,
    frames: F,
    accumulator: DefaultDataBuffer,
    max_in_memory_size: usize,
    state: DecodeState,
}

impl<'a, F: FrameDecoder> DecodeStream<'a, F> {
    /// 以分帧器与内存上限构造状态机。
    pub fn new(input: BufferStream<'a>, frames: F, max_in_memory_size: usize) -> Self {
        Self {
            input: Some(input),
            frames,
            accumulator: DefaultDataBuffer::default(),
            max_in_memory_size,
            state: DecodeState::Accumulating,
        }
    }

    /// 当前状态。
    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// 累加器中尚未消费的字节数。
    pub fn pending_bytes(&self) -> usize {
        self.accumulator.readable_byte_count()
    }

    fn fail(&mut self, err: BufferError) -> Poll<Option<Result<F::Item>>> {
        debug!(error = %err, code = err.code(), "decode stream failed");
        self.state = DecodeState::Failed;
        self.input = None;
        self.accumulator.clear();
        Poll::Ready(Some(Err(err)))
    }

    fn append(&mut self, input: Box<dyn DataBuffer>) -> Result<()> {
        let mut input = BufferGuard::new(input);
        let copied = self.accumulator.write_buffer(&mut *input)?;
        trace!(copied, pending = self.pending_bytes(), "decode stream accumulated input");
        Ok(())
    }

    fn finish(&mut self) -> Poll<Option<Result<F::Item>>> {
        self.input = None;
        if self.pending_bytes() == 0 {
            self.state = DecodeState::Completed;
            return Poll::Ready(None);
        }
        match self.frames.decode_eof(&mut self.accumulator) {
            Ok(last) => {
                self.state = DecodeState::Completed;
                self.accumulator.clear();
                Poll::Ready(last.map(Ok))
            }
            Err(err) => self.fail(err),
        }
    }
}

impl<F: FrameDecoder + Unpin> Stream for DecodeStream<'_, F> {
    type Item = Result<F::Item>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.state {
                DecodeState::Failed | DecodeState::Completed => return Poll::Ready(None),
                DecodeState::Emitting => match this.frames.decode_frame(&mut this.accumulator) {
                    Ok(DecodeOutcome::Complete(value)) => return Poll::Ready(Some(Ok(value))),
                    Ok(DecodeOutcome::Incomplete) => {
                        this.accumulator.discard_read_bytes();
                        if this.pending_bytes() > this.max_in_memory_size {
                            let limit = this.max_in_memory_size;
                            return this.fail(BufferError::LimitExceeded { limit });
                        }
                        this.state = DecodeState::Accumulating;
                    }
                    Err(err) => return this.fail(err),
                },
                DecodeState::Accumulating => {
                    let Some(input) = this.input.as_mut() else {
                        return this.finish();
                    };
                    match ready!(input.poll_next_unpin(cx)) {
                        Some(Ok(buffer)) => match this.append(buffer) {
                            Ok(()) => this.state = DecodeState::Emitting,
                            Err(err) => return this.fail(err),
                        },
                        Some(Err(err)) => return this.fail(err),
                        None => return this.finish(),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{executor::block_on, stream};
    use spark_databuf::{DataBufferFactory, PooledDataBufferFactory};

    /// 两字节一帧的分帧器，尾部残留视为错误。
    struct Pairs;

    impl FrameDecoder for Pairs {
        type Item = [u8; 2];

        fn decode_frame(
            &mut self,
            accumulator: &mut dyn DataBuffer,
        ) -> Result<DecodeOutcome<[u8; 2]>> {
            if accumulator.readable_byte_count() < 2 {
                return Ok(DecodeOutcome::Incomplete);
            }
            Ok(DecodeOutcome::Complete([
                accumulator.read_byte()?,
                accumulator.read_byte()?,
            ]))
        }

        fn decode_eof(&mut self, accumulator: &mut dyn DataBuffer) -> Result<Option<[u8; 2]>> {
            Err(BufferError::decoding(format!(
                "{} trailing bytes",
                accumulator.readable_byte_count()
            )))
        }
    }

    fn pooled_input(factory: &PooledDataBufferFactory, parts: &[&[u8]]) -> BufferStream<'static> {
        let items: Vec<Result<Box<dyn DataBuffer>>> = parts
            .iter()
            .map(|part| -> Result<Box<dyn DataBuffer>> {
                let mut buffer = factory.allocate_buffer(Some(part.len().max(1)))?;
                buffer.write(part)?;
                Ok(buffer)
            })
            .collect();
        stream::iter(items).boxed()
    }

    #[test]
    fn frames_spanning_inputs_are_reassembled() {
        let factory = PooledDataBufferFactory::new();
        let mut decoded = DecodeStream::new(
            pooled_input(&factory, &[b"a", b"bcd", b"ef"]),
            Pairs,
            DEFAULT_MAX_IN_MEMORY_SIZE,
        );
        let frames: Vec<_> = block_on((&mut decoded).map(|item| item.unwrap()).collect());
        assert_eq!(frames, [*b"ab", *b"cd", *b"ef"]);
        assert_eq!(decoded.state(), DecodeState::Completed);
        assert_eq!(factory.pool().statistics().active_leases, 0);
    }

    #[test]
    fn trailing_bytes_fail_and_release() {
        let factory = PooledDataBufferFactory::new();
        let mut decoded = DecodeStream::new(
            pooled_input(&factory, &[b"abc"]),
            Pairs,
            DEFAULT_MAX_IN_MEMORY_SIZE,
        );
        let items: Vec<_> = block_on((&mut decoded).collect());
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(BufferError::Decoding(_))));
        assert_eq!(decoded.state(), DecodeState::Failed);
        assert_eq!(decoded.pending_bytes(), 0);
        assert_eq!(factory.pool().statistics().active_leases, 0);
    }

    #[test]
    fn pending_frame_beyond_limit_is_rejected() {
        let factory = PooledDataBufferFactory::new();
        let mut decoded = DecodeStream::new(pooled_input(&factory, &[b"a"]), Pairs, 0);
        let first = block_on(decoded.next()).expect("一个元素");
        assert!(matches!(first, Err(BufferError::LimitExceeded { limit: 0 })));
        assert!(block_on(decoded.next()).is_none());
        assert_eq!(factory.pool().statistics().active_leases, 0);
    }
}
