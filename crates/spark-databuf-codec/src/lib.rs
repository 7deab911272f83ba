#![warn(missing_docs)]

//! `spark-databuf-codec` 在 `spark-databuf` 的缓冲流之上提供流式编解码契约与常用编解码器。
//!
//! # 模块定位（Why）
//! - 传输层交付的是惰性缓冲流，业务层需要的是惰性值流；编解码器负责在两者之间转换，
//!   并承担缓冲的终端释放义务；
//! - 契约与具体编解码器分层：[`Encoder`]/[`Decoder`] 只描述流的形状与所有权规则，
//!   分帧细节交给 [`FrameDecoder`] 与 [`DecodeStream`] 状态机。
//!
//! # 使用概览（How）
//! - 编码：`encoder.encode(values, factory, hints)` 得到可直接交给
//!   `spark_databuf::utils::write_stream` 的缓冲流；
//! - 解码：`decoder.decode(buffers, &hints)` 得到按输入顺序产出的值流；
//!   `decode_to_single` 先在内存上限内聚合，再整体解码一次。
//!
//! # 契约说明（What）
//! - 编码器不在产出对应缓冲后继续持有输入值；单个元素编码失败时产出 `Encoding` 错误并终止流；
//! - 解码器在复制完每个输入缓冲的字节后立即释放它，失败、完成与取消路径上都不遗留未释放的输入；
//! - 错误统一使用 [`spark_databuf::BufferError`]，错误码沿用 `protocol.*` 命名空间。

mod codecs;
mod decoder;
mod encoder;
mod hints;

pub use codecs::{
    ByteArrayDecoder, ByteArrayEncoder, ByteOrder, DataBufferDecoder, DataBufferEncoder,
    FixedWidthInt, FixedWidthIntDecoder, FixedWidthIntEncoder, IntFrames, LineDecoder,
    LineDecoderConfig, LineFrames, StringEncoder,
};
pub use decoder::{
    DEFAULT_MAX_IN_MEMORY_SIZE, DecodeOutcome, DecodeState, DecodeStream, Decoder, FrameDecoder,
};
pub use encoder::Encoder;
pub use hints::{CodecHints, ContentType};

use futures::stream::BoxStream;
use spark_databuf::Result;

/// 类型化值的惰性序列；既是编码器的输入，也是解码器的输出。
pub type ValueStream<'a, T> = BoxStream<'a, Result<T>>;

/// 产出首个错误后即结束的流。
///
/// 错误产出的同时丢弃上游，上游不会再被拉取，其在途缓冲随之释放。
pub(crate) fn fuse_on_error<'a, T, S>(input: S) -> ValueStream<'a, T>
where
    T: Send + 'a,
    S: futures::Stream<Item = Result<T>> + Send + 'a,
{
    use futures::{StreamExt, stream};

    stream::unfold(Some(input.boxed()), |upstream| async move {
        let mut upstream = upstream?;
        let item = upstream.next().await?;
        let rest = item.is_ok().then_some(upstream);
        Some((item, rest))
    })
    .boxed()
}
