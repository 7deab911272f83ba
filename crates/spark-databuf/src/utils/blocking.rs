use std::{io, sync::Arc};

use tracing::debug;

use super::BufferGuard;
use crate::{
    buffer::DataBuffer,
    error::{BufferError, Result},
    factory::DataBufferFactory,
};

/// 将阻塞式 `std::io::Read` 数据源转换为缓冲迭代器，契约与 [`read_stream`](super::read_stream) 一致。
pub fn read_blocking<R: io::Read>(
    source: R,
    factory: Arc<dyn DataBufferFactory>,
    chunk_size: usize,
) -> ReadBlocking<R> {
    ReadBlocking {
        source: Some(source),
        factory,
        chunk_size: chunk_size.max(1),
    }
}

/// [`read_blocking`] 返回的迭代器；EOF 或错误之后恒返回 `None`。
pub struct ReadBlocking<R> {
    source: Option<R>,
    factory: Arc<dyn DataBufferFactory>,
    chunk_size: usize,
}

impl<R: io::Read> ReadBlocking<R> {
    fn fill(source: &mut R, buffer: &mut dyn DataBuffer) -> Result<usize> {
        let filled = {
            let mut view = buffer.writable_view()?;
            loop {
                match source.read(&mut view) {
                    Ok(filled) => break filled,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => return Err(BufferError::io("read_blocking", err)),
                }
            }
        };
        buffer.advance_write_position(filled)?;
        Ok(filled)
    }
}

impl<R: io::Read> Iterator for ReadBlocking<R> {
    type Item = Result<Box<dyn DataBuffer>>;

    fn next(&mut self) -> Option<Self::Item> {
        let source = self.source.as_mut()?;
        let mut guard = match self.factory.allocate_buffer(Some(self.chunk_size)) {
            Ok(buffer) => BufferGuard::new(buffer),
            Err(err) => {
                self.source = None;
                return Some(Err(err));
            }
        };
        match Self::fill(source, &mut *guard) {
            Ok(0) => {
                self.source = None;
                debug!("read_blocking reached end of input");
                None
            }
            Ok(_) => Some(Ok(guard.into_inner())),
            Err(err) => {
                self.source = None;
                Some(Err(err))
            }
        }
    }
}

/// 将缓冲序列按顺序写入阻塞式数据汇，契约与 [`write_stream`](super::write_stream) 一致。
pub fn write_blocking<I, W>(buffers: I, mut sink: W) -> Result<()>
where
    I: IntoIterator<Item = Result<Box<dyn DataBuffer>>>,
    W: io::Write,
{
    for item in buffers {
        let mut guard = BufferGuard::new(item?);
        {
            let view = guard.readable_view()?;
            sink.write_all(&view)
                .map_err(|err| BufferError::io("write_blocking", err))?;
        }
        let end = guard.write_position();
        guard.set_read_position(end)?;
    }
    sink.flush()
        .map_err(|err| BufferError::io("write_blocking", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DataBufferFactory, PooledDataBufferFactory};

    struct FailingSink;

    impl io::Write for FailingSink {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn read_blocking_chunks_input() {
        let factory = Arc::new(PooledDataBufferFactory::new());
        let chunks: Vec<_> = read_blocking(&b"abcdefg"[..], factory.clone(), 3)
            .map(|item| {
                let buffer = item.expect("读取分块");
                let bytes = buffer.to_bytes().unwrap();
                super::super::release(&*buffer).unwrap();
                bytes
            })
            .collect();
        assert_eq!(chunks, vec![&b"abc"[..], &b"def"[..], &b"g"[..]]);
        assert_eq!(factory.pool().statistics().active_leases, 0);
    }

    #[test]
    fn write_blocking_releases_on_failure_and_stops() {
        let factory = PooledDataBufferFactory::new();
        let mut pulled = 0;
        let buffers = (0..3).map(|_| {
            pulled += 1;
            Ok(factory.wrap_slice(b"x"))
        });
        let mut pooled = factory.allocate_buffer(None).unwrap();
        pooled.write(b"payload").unwrap();
        let first = std::iter::once(Ok(pooled));
        let err = write_blocking(first.chain(buffers), FailingSink).unwrap_err();
        assert!(matches!(err, BufferError::Io { .. }));
        assert_eq!(pulled, 0, "失败后不得继续拉取上游");
        assert_eq!(factory.pool().statistics().active_leases, 0);
    }
}
