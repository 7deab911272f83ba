use std::sync::Arc;

use futures::StreamExt;
use spark_databuf::{BufferStream, DataBuffer, DataBufferFactory, Result};
use tracing::debug;

use crate::{CodecHints, ContentType, ValueStream, fuse_on_error};

/// `Encoder` 定义将类型化值流转换为缓冲流的契约。
///
/// # 设计背景（Why）
/// - 编码端只关心“单个值如何写成字节”，流的惰性、顺序与失败终止由默认的
///   [`encode`](Self::encode) 统一实现，具体编码器只需实现 [`encode_value`](Self::encode_value)；
/// - 缓冲一律经调用方提供的工厂分配，编码器不决定池化策略。
///
/// # 契约说明（What）
/// - `encode_value` 接管值的所有权并在返回前放弃它，不得在产出缓冲之后继续持有；
/// - `encode_value` 失败时必须已释放为该值分配的缓冲，且不得产出部分写入的缓冲；
/// - `encode` 按输入顺序逐个产出缓冲；首个错误（上游错误或编码失败）产出后流即结束；
/// - 产出的缓冲归下游所有，通常由传输层在写出后释放。
pub trait Encoder<T: Send + 'static>: Send + Sync + 'static {
    /// 本编码器能产出的内容类型。
    fn encodable_content_types(&self) -> Vec<ContentType>;

    /// 是否能编码为给定内容类型；`None` 表示调用方不限定内容类型。
    fn can_encode(&self, content_type: Option<&ContentType>) -> bool {
        match content_type {
            None => true,
            Some(target) => self
                .encodable_content_types()
                .iter()
                .any(|supported| supported.includes(target)),
        }
    }

    /// 将单个值编码为一个缓冲。
    fn encode_value(
        &self,
        value: T,
        factory: &dyn DataBufferFactory,
        hints: &CodecHints,
    ) -> Result<Box<dyn DataBuffer>>;

    /// 惰性地把值流编码为缓冲流。
    fn encode<'a>(
        &'a self,
        values: ValueStream<'a, T>,
        factory: Arc<dyn DataBufferFactory>,
        hints: CodecHints,
    ) -> BufferStream<'a> {
        let encoded = values.map(move |item| {
            item.and_then(|value| self.encode_value(value, &*factory, &hints))
                .inspect_err(|err| debug!(error = %err, code = err.code(), "encode stream terminated"))
        });
        fuse_on_error(encoded)
    }
}
