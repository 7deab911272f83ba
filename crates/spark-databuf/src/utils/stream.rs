use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
};

use futures::{Stream, StreamExt, future::poll_fn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::debug;

use super::{BufferGuard, BufferStream};
use crate::{
    buffer::DataBuffer,
    error::{BufferError, Result},
    factory::DataBufferFactory,
};

/// 将 `AsyncRead` 数据源转换为惰性缓冲流。
///
/// # 契约说明（What）
/// - 每个元素至多承载一次底层读取的结果，容量提示为 `chunk_size`；
/// - 读到 EOF 时流结束，为该次读取分配的空缓冲会先行释放；
/// - 读取失败时先释放本次分配的缓冲，再产出 `Io` 错误，之后流保持终止；
/// - 流被丢弃时，尚未交付的缓冲随 [`BufferGuard`] 一并释放。
///
/// # 执行逻辑（How）
/// - 缓冲的可写视图直接包装为 Tokio 的 `ReadBuf`，读取在一次同步 `poll` 内完成，
///   不会跨挂起点持有池化缓冲的内部锁。
pub fn read_stream<'a, R>(
    source: R,
    factory: Arc<dyn DataBufferFactory>,
    chunk_size: usize,
) -> BufferStream<'a>
where
    R: AsyncRead + Send + Unpin + 'a,
{
    ReadStream {
        source: Some(source),
        factory,
        chunk_size: chunk_size.max(1),
        pending: None,
    }
    .boxed()
}

struct ReadStream<R> {
    source: Option<R>,
    factory: Arc<dyn DataBufferFactory>,
    chunk_size: usize,
    pending: Option<BufferGuard>,
}

impl<R: AsyncRead + Unpin> Stream for ReadStream<R> {
    type Item = Result<Box<dyn DataBuffer>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.source.is_none() {
            return Poll::Ready(None);
        }
        if this.pending.is_none() {
            match this.factory.allocate_buffer(Some(this.chunk_size)) {
                Ok(buffer) => this.pending = Some(BufferGuard::new(buffer)),
                Err(err) => {
                    this.source = None;
                    return Poll::Ready(Some(Err(err)));
                }
            }
        }
        let (Some(source), Some(pending)) = (this.source.as_mut(), this.pending.as_mut()) else {
            return Poll::Ready(None);
        };
        match ready!(poll_fill(Pin::new(source), &mut **pending, cx)) {
            Ok(0) => {
                this.pending = None;
                this.source = None;
                debug!("read_stream reached end of input");
                Poll::Ready(None)
            }
            Ok(_) => Poll::Ready(this.pending.take().map(|guard| Ok(guard.into_inner()))),
            Err(err) => {
                this.pending = None;
                this.source = None;
                Poll::Ready(Some(Err(err)))
            }
        }
    }
}

fn poll_fill<R: AsyncRead + ?Sized>(
    source: Pin<&mut R>,
    buffer: &mut dyn DataBuffer,
    cx: &mut Context<'_>,
) -> Poll<Result<usize>> {
    let filled = {
        let mut view = match buffer.writable_view() {
            Ok(view) => view,
            Err(err) => return Poll::Ready(Err(err)),
        };
        let mut read_buf = ReadBuf::new(&mut view[..]);
        match source.poll_read(cx, &mut read_buf) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(err)) => return Poll::Ready(Err(BufferError::io("read_stream", err))),
            Poll::Ready(Ok(())) => read_buf.filled().len(),
        }
    };
    Poll::Ready(buffer.advance_write_position(filled).map(|()| filled))
}

/// 将缓冲流按顺序写入 `AsyncWrite` 数据汇。
///
/// # 契约说明（What）
/// - 每个缓冲的全部可读字节写完后立即释放；写入失败时同样先释放在途缓冲；
/// - 任一写入失败即停止拉取上游（丢弃上游流即向其传达取消信号），返回 `Io` 错误；
/// - 上游产出错误时原样返回；
/// - 全部写完后执行一次 `flush`。
pub async fn write_stream<W>(mut buffers: BufferStream<'_>, mut sink: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = buffers.next().await {
        let mut guard = BufferGuard::new(item?);
        drain_into(&mut sink, &mut *guard).await?;
    }
    sink.flush()
        .await
        .map_err(|err| BufferError::io("write_stream", err))
}

async fn drain_into<W>(sink: &mut W, buffer: &mut dyn DataBuffer) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    while buffer.readable_byte_count() > 0 {
        let written = poll_fn(|cx| poll_write_readable(Pin::new(&mut *sink), &mut *buffer, cx)).await?;
        if written == 0 {
            return Err(BufferError::io(
                "write_stream",
                io::Error::from(io::ErrorKind::WriteZero),
            ));
        }
    }
    Ok(())
}

fn poll_write_readable<W: AsyncWrite + ?Sized>(
    sink: Pin<&mut W>,
    buffer: &mut dyn DataBuffer,
    cx: &mut Context<'_>,
) -> Poll<Result<usize>> {
    let written = {
        let view = match buffer.readable_view() {
            Ok(view) => view,
            Err(err) => return Poll::Ready(Err(err)),
        };
        match sink.poll_write(cx, &view) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(err)) => return Poll::Ready(Err(BufferError::io("write_stream", err))),
            Poll::Ready(Ok(written)) => written,
        }
    };
    let position = buffer.read_position() + written;
    Poll::Ready(buffer.set_read_position(position).map(|()| written))
}
