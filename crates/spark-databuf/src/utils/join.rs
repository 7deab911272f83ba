use futures::{StreamExt, stream};
use tracing::trace;

use super::{BufferGuard, BufferStream};
use crate::{
    buffer::{DataBuffer, DataBufferExt},
    error::{BufferError, Result},
    factory::DataBufferFactory,
};

/// 聚合过程中的累加器：持有目标缓冲并执行容量上限检查。
struct Joiner {
    joined: BufferGuard,
    max_bytes: Option<usize>,
}

impl Joiner {
    fn new(factory: &dyn DataBufferFactory, max_bytes: Option<usize>) -> Result<Self> {
        Ok(Self {
            joined: BufferGuard::new(factory.allocate_buffer(None)?),
            max_bytes,
        })
    }

    /// 追加输入的可读字节；输入随守卫销毁而释放，无论成功与否。
    fn append(&mut self, input: Box<dyn DataBuffer>) -> Result<()> {
        let mut input = BufferGuard::new(input);
        if let Some(limit) = self.max_bytes {
            let total = self.joined.readable_byte_count() + input.readable_byte_count();
            if total > limit {
                return Err(BufferError::LimitExceeded { limit });
            }
        }
        self.joined.write_buffer(&mut *input)?;
        Ok(())
    }

    fn finish(self) -> Box<dyn DataBuffer> {
        trace!(bytes = self.joined.readable_byte_count(), "joined buffer stream");
        self.joined.into_inner()
    }
}

/// 将缓冲流聚合为单个缓冲。
///
/// # 契约说明（What）
/// - 按顺序复制每个输入的可读字节到工厂新分配的缓冲中，每个输入复制后立即释放；
/// - `max_bytes` 为 `Some(limit)` 时，累计字节数超过上限即返回 `LimitExceeded`；
/// - 任一失败（上游错误、超限、分配失败）都会释放已持有的全部缓冲后再返回；
/// - Future 被丢弃时，已聚合的部分随守卫释放。
pub async fn join(
    mut buffers: BufferStream<'_>,
    factory: &dyn DataBufferFactory,
    max_bytes: Option<usize>,
) -> Result<Box<dyn DataBuffer>> {
    let mut joiner = Joiner::new(factory, max_bytes)?;
    while let Some(item) = buffers.next().await {
        joiner.append(item?)?;
    }
    Ok(joiner.finish())
}

/// 不设上限的 [`join`]。
pub async fn compose(
    buffers: BufferStream<'_>,
    factory: &dyn DataBufferFactory,
) -> Result<Box<dyn DataBuffer>> {
    join(buffers, factory, None).await
}

/// [`join`] 的阻塞版本。
pub fn join_blocking<I>(
    buffers: I,
    factory: &dyn DataBufferFactory,
    max_bytes: Option<usize>,
) -> Result<Box<dyn DataBuffer>>
where
    I: IntoIterator<Item = Result<Box<dyn DataBuffer>>>,
{
    let mut joiner = Joiner::new(factory, max_bytes)?;
    for item in buffers {
        joiner.append(item?)?;
    }
    Ok(joiner.finish())
}

/// [`compose`] 的阻塞版本。
pub fn compose_blocking<I>(buffers: I, factory: &dyn DataBufferFactory) -> Result<Box<dyn DataBuffer>>
where
    I: IntoIterator<Item = Result<Box<dyn DataBuffer>>>,
{
    join_blocking(buffers, factory, None)
}

/// 仅转发前 `max_bytes` 个可读字节。
///
/// 跨越边界的缓冲被复制截断为前缀后释放原缓冲；达到上限后不再拉取上游，
/// 上游在途缓冲随流的丢弃而释放。
pub fn take_until_byte_count(buffers: BufferStream<'_>, max_bytes: usize) -> BufferStream<'_> {
    stream::unfold(Some((buffers, max_bytes)), |state| async move {
        let (mut buffers, remaining) = state?;
        if remaining == 0 {
            return None;
        }
        let buffer = match buffers.next().await? {
            Ok(buffer) => buffer,
            Err(err) => return Some((Err(err), None)),
        };
        let len = buffer.readable_byte_count();
        if len <= remaining {
            return Some((Ok(buffer), Some((buffers, remaining - len))));
        }
        let guard = BufferGuard::new(buffer);
        let start = guard.read_position();
        Some((guard.slice(start, start + remaining), None))
    })
    .boxed()
}

/// 丢弃并释放前 `skip_bytes` 个可读字节，其后的数据原样转发。
pub fn skip_until_byte_count(buffers: BufferStream<'_>, skip_bytes: usize) -> BufferStream<'_> {
    stream::unfold(Some((buffers, skip_bytes)), |state| async move {
        let (mut buffers, mut remaining) = state?;
        loop {
            let buffer = match buffers.next().await? {
                Ok(buffer) => buffer,
                Err(err) => return Some((Err(err), None)),
            };
            if remaining == 0 {
                return Some((Ok(buffer), Some((buffers, 0))));
            }
            let mut guard = BufferGuard::new(buffer);
            let len = guard.readable_byte_count();
            if len <= remaining {
                remaining -= len;
                continue;
            }
            let position = guard.read_position() + remaining;
            return match guard.set_read_position(position) {
                Ok(()) => Some((Ok(guard.into_inner()), Some((buffers, 0)))),
                Err(err) => Some((Err(err), None)),
            };
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DefaultDataBufferFactory, PooledDataBufferFactory, charset::Charset};
    use futures::executor::block_on;

    fn chunks<'a>(factory: &dyn DataBufferFactory, parts: &[&str]) -> BufferStream<'a> {
        let items: Vec<Result<Box<dyn DataBuffer>>> = parts
            .iter()
            .map(|part| -> Result<Box<dyn DataBuffer>> {
                let mut buffer = factory.allocate_buffer(Some(part.len()))?;
                buffer.write(part.as_bytes())?;
                Ok(buffer)
            })
            .collect();
        stream::iter(items).boxed()
    }

    #[test]
    fn join_limit_releases_everything() {
        let factory = PooledDataBufferFactory::new();
        let err = block_on(join(chunks(&factory, &["abc", "def"]), &factory, Some(4)))
            .expect_err("超出上限应失败");
        assert!(matches!(err, BufferError::LimitExceeded { limit: 4 }));
        assert_eq!(factory.pool().statistics().active_leases, 0);
    }

    #[test]
    fn take_until_slices_the_boundary_buffer() {
        let factory = DefaultDataBufferFactory::new();
        let taken: Vec<String> = block_on(
            take_until_byte_count(chunks(&factory, &["ab", "cd", "ef"]), 3)
                .map(|item| {
                    let mut buffer = item.expect("截取");
                    assert!(buffer.as_pooled().is_none());
                    buffer.read_to_string(Charset::Utf8).unwrap()
                })
                .collect(),
        );
        assert_eq!(taken, ["ab", "c"]);
    }

    #[test]
    fn skip_until_advances_into_the_boundary_buffer() {
        let factory = DefaultDataBufferFactory::new();
        let joined = block_on(compose(
            skip_until_byte_count(chunks(&factory, &["ab", "cd", "ef"]), 3),
            &factory,
        ))
        .unwrap();
        assert_eq!(joined.readable_to_string(Charset::Utf8).unwrap(), "def");
    }
}
