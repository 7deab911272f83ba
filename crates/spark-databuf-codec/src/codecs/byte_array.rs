use bytes::Bytes;
use futures::StreamExt;
use spark_databuf::{BufferGuard, BufferStream, DataBuffer, DataBufferFactory, Result};

use crate::{
    CodecHints, ContentType, DEFAULT_MAX_IN_MEMORY_SIZE, Decoder, Encoder, ValueStream,
    fuse_on_error,
};

/// 字节数组编码器：`Vec<u8>` 与 `Bytes` 经工厂零拷贝包装为非池化缓冲。
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteArrayEncoder;

impl Encoder<Vec<u8>> for ByteArrayEncoder {
    fn encodable_content_types(&self) -> Vec<ContentType> {
        vec![ContentType::ALL]
    }

    fn encode_value(
        &self,
        value: Vec<u8>,
        factory: &dyn DataBufferFactory,
        _hints: &CodecHints,
    ) -> Result<Box<dyn DataBuffer>> {
        Ok(factory.wrap(Bytes::from(value)))
    }
}

impl Encoder<Bytes> for ByteArrayEncoder {
    fn encodable_content_types(&self) -> Vec<ContentType> {
        vec![ContentType::ALL]
    }

    fn encode_value(
        &self,
        value: Bytes,
        factory: &dyn DataBufferFactory,
        _hints: &CodecHints,
    ) -> Result<Box<dyn DataBuffer>> {
        Ok(factory.wrap(value))
    }
}

/// 字节数组解码器：每个输入缓冲复制为一个值后立即释放。
#[derive(Debug, Clone, Copy)]
pub struct ByteArrayDecoder {
    max_in_memory_size: usize,
}

impl Default for ByteArrayDecoder {
    fn default() -> Self {
        Self {
            max_in_memory_size: DEFAULT_MAX_IN_MEMORY_SIZE,
        }
    }
}

impl ByteArrayDecoder {
    /// 以默认内存上限构建。
    pub fn new() -> Self {
        Self::default()
    }

    /// 调整 `decode_to_single` 的聚合上限。
    pub fn with_max_in_memory_size(max_in_memory_size: usize) -> Self {
        Self { max_in_memory_size }
    }
}

fn copy_out(buffer: Box<dyn DataBuffer>) -> Result<Vec<u8>> {
    let buffer = BufferGuard::new(buffer);
    let view = buffer.readable_view()?;
    Ok(view.to_vec())
}

fn freeze(buffer: Box<dyn DataBuffer>) -> Result<Bytes> {
    BufferGuard::new(buffer).to_bytes()
}

impl Decoder<Vec<u8>> for ByteArrayDecoder {
    fn decodable_content_types(&self) -> Vec<ContentType> {
        vec![ContentType::ALL]
    }

    fn decode<'a>(&self, input: BufferStream<'a>, _hints: &CodecHints) -> ValueStream<'a, Vec<u8>> {
        fuse_on_error(input.map(|item| item.and_then(copy_out)))
    }

    fn decode_buffer(&self, buffer: Box<dyn DataBuffer>, _hints: &CodecHints) -> Result<Vec<u8>> {
        copy_out(buffer)
    }

    fn max_in_memory_size(&self) -> usize {
        self.max_in_memory_size
    }
}

impl Decoder<Bytes> for ByteArrayDecoder {
    fn decodable_content_types(&self) -> Vec<ContentType> {
        vec![ContentType::ALL]
    }

    fn decode<'a>(&self, input: BufferStream<'a>, _hints: &CodecHints) -> ValueStream<'a, Bytes> {
        fuse_on_error(input.map(|item| item.and_then(freeze)))
    }

    fn decode_buffer(&self, buffer: Box<dyn DataBuffer>, _hints: &CodecHints) -> Result<Bytes> {
        freeze(buffer)
    }

    fn max_in_memory_size(&self) -> usize {
        self.max_in_memory_size
    }
}

/// 缓冲透传编码器：值本身即缓冲，所有权原样交给下游。
#[derive(Debug, Clone, Copy, Default)]
pub struct DataBufferEncoder;

impl Encoder<Box<dyn DataBuffer>> for DataBufferEncoder {
    fn encodable_content_types(&self) -> Vec<ContentType> {
        vec![ContentType::ALL]
    }

    fn encode_value(
        &self,
        value: Box<dyn DataBuffer>,
        _factory: &dyn DataBufferFactory,
        _hints: &CodecHints,
    ) -> Result<Box<dyn DataBuffer>> {
        Ok(value)
    }
}

/// 缓冲透传解码器：不复制、不释放，释放义务随缓冲转交给值的消费者。
#[derive(Debug, Clone, Copy)]
pub struct DataBufferDecoder {
    max_in_memory_size: usize,
}

impl Default for DataBufferDecoder {
    fn default() -> Self {
        Self {
            max_in_memory_size: DEFAULT_MAX_IN_MEMORY_SIZE,
        }
    }
}

impl DataBufferDecoder {
    /// 以默认内存上限构建。
    pub fn new() -> Self {
        Self::default()
    }

    /// 调整 `decode_to_single` 的聚合上限。
    pub fn with_max_in_memory_size(max_in_memory_size: usize) -> Self {
        Self { max_in_memory_size }
    }
}

impl Decoder<Box<dyn DataBuffer>> for DataBufferDecoder {
    fn decodable_content_types(&self) -> Vec<ContentType> {
        vec![ContentType::ALL]
    }

    fn decode<'a>(
        &self,
        input: BufferStream<'a>,
        _hints: &CodecHints,
    ) -> ValueStream<'a, Box<dyn DataBuffer>> {
        fuse_on_error(input)
    }

    fn decode_buffer(
        &self,
        buffer: Box<dyn DataBuffer>,
        _hints: &CodecHints,
    ) -> Result<Box<dyn DataBuffer>> {
        Ok(buffer)
    }

    fn max_in_memory_size(&self) -> usize {
        self.max_in_memory_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{executor::block_on, stream};
    use spark_databuf::{DataBufferExt, PooledDataBufferFactory};

    fn pooled(factory: &PooledDataBufferFactory, parts: &[&[u8]]) -> BufferStream<'static> {
        let items: Vec<Result<Box<dyn DataBuffer>>> = parts
            .iter()
            .map(|part| -> Result<Box<dyn DataBuffer>> {
                let mut buffer = factory.allocate_buffer(Some(part.len()))?;
                buffer.write(part)?;
                Ok(buffer)
            })
            .collect();
        stream::iter(items).boxed()
    }

    #[test]
    fn byte_arrays_are_decoded_per_buffer_and_released() {
        let factory = PooledDataBufferFactory::new();
        let decoded: Vec<Result<Vec<u8>>> = block_on(
            Decoder::<Vec<u8>>::decode(
                &ByteArrayDecoder::new(),
                pooled(&factory, &[b"ab", b"c"]),
                &CodecHints::default(),
            )
            .collect(),
        );
        let decoded: Vec<Vec<u8>> = decoded.into_iter().map(Result::unwrap).collect();
        assert_eq!(decoded, [b"ab".to_vec(), b"c".to_vec()]);
        assert_eq!(factory.pool().statistics().active_leases, 0);
    }

    #[test]
    fn decode_to_single_joins_then_decodes() {
        let factory = PooledDataBufferFactory::new();
        let hints = CodecHints::default();
        let joined = block_on(Decoder::<Bytes>::decode_to_single(
            &ByteArrayDecoder::new(),
            pooled(&factory, &[b"ab", b"cd"]),
            &hints,
        ))
        .unwrap();
        assert_eq!(&joined[..], b"abcd");
        assert_eq!(factory.pool().statistics().active_leases, 0);
    }

    #[test]
    fn passthrough_hands_ownership_downstream() {
        let factory = PooledDataBufferFactory::new();
        let mut decoded: Vec<_> = block_on(
            DataBufferDecoder::new()
                .decode(pooled(&factory, &[b"xy"]), &CodecHints::default())
                .collect(),
        );
        assert_eq!(factory.pool().statistics().active_leases, 1);
        let mut buffer = decoded.remove(0).unwrap();
        assert_eq!(buffer.read_to_string(Default::default()).unwrap(), "xy");
        spark_databuf::utils::release(&*buffer).unwrap();
        assert_eq!(factory.pool().statistics().active_leases, 0);
    }
}
