use std::{fmt, marker::PhantomData, mem};

use futures::StreamExt;
use serde::Deserialize;
use spark_databuf::{
    BufferError, BufferGuard, BufferStream, DataBuffer, DataBufferFactory, Result,
};

use crate::{
    CodecHints, ContentType, DEFAULT_MAX_IN_MEMORY_SIZE, DecodeOutcome, DecodeStream, Decoder,
    Encoder, FrameDecoder, ValueStream,
};

/// 多字节整数的字节序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// 网络字节序（默认）。
    #[default]
    BigEndian,
    /// 小端序。
    LittleEndian,
}

/// 可按固定宽度编解码的整数类型。
pub trait FixedWidthInt: Copy + Send + Sync + fmt::Debug + 'static {
    /// 编码后的字节宽度。
    const WIDTH: usize;

    /// 按字节序写入 `dst`。
    fn write_to(self, order: ByteOrder, dst: &mut dyn DataBuffer) -> Result<()>;

    /// 从 `src` 读出 `WIDTH` 个字节；可读字节不足时返回 `Decoding`。
    fn read_from(order: ByteOrder, src: &mut dyn DataBuffer) -> Result<Self>;
}

macro_rules! impl_fixed_width_int {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FixedWidthInt for $ty {
                const WIDTH: usize = mem::size_of::<$ty>();

                fn write_to(self, order: ByteOrder, dst: &mut dyn DataBuffer) -> Result<()> {
                    let raw = match order {
                        ByteOrder::BigEndian => self.to_be_bytes(),
                        ByteOrder::LittleEndian => self.to_le_bytes(),
                    };
                    dst.write(&raw).map(|_| ())
                }

                fn read_from(order: ByteOrder, src: &mut dyn DataBuffer) -> Result<Self> {
                    let mut raw = [0u8; mem::size_of::<$ty>()];
                    let read = src.read(&mut raw)?;
                    if read != raw.len() {
                        return Err(BufferError::decoding(format!(
                            "expected {} bytes for {}, got {read}",
                            raw.len(),
                            stringify!($ty),
                        )));
                    }
                    Ok(match order {
                        ByteOrder::BigEndian => <$ty>::from_be_bytes(raw),
                        ByteOrder::LittleEndian => <$ty>::from_le_bytes(raw),
                    })
                }
            }
        )*
    };
}

impl_fixed_width_int!(u16, u32, u64, i16, i32, i64);

/// 定宽整数编码器：每个值编码为一个恰好 `WIDTH` 字节的缓冲，分配时以 `WIDTH` 为容量提示。
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedWidthIntEncoder {
    order: ByteOrder,
}

impl FixedWidthIntEncoder {
    /// 以指定字节序构建。
    pub fn new(order: ByteOrder) -> Self {
        Self { order }
    }

    /// 当前字节序。
    pub fn order(&self) -> ByteOrder {
        self.order
    }
}

impl<I: FixedWidthInt> Encoder<I> for FixedWidthIntEncoder {
    fn encodable_content_types(&self) -> Vec<ContentType> {
        vec![ContentType::APPLICATION_OCTET_STREAM]
    }

    fn encode_value(
        &self,
        value: I,
        factory: &dyn DataBufferFactory,
        _hints: &CodecHints,
    ) -> Result<Box<dyn DataBuffer>> {
        let mut buffer = BufferGuard::new(factory.allocate_buffer(Some(I::WIDTH))?);
        value.write_to(self.order, &mut *buffer)?;
        Ok(buffer.into_inner())
    }
}

/// 定宽整数分帧器；输入结束时的残余字节视为 `Decoding` 错误。
#[derive(Debug)]
pub struct IntFrames<I> {
    order: ByteOrder,
    _marker: PhantomData<fn() -> I>,
}

impl<I> IntFrames<I> {
    /// 以指定字节序构建。
    pub fn new(order: ByteOrder) -> Self {
        Self {
            order,
            _marker: PhantomData,
        }
    }
}

impl<I: FixedWidthInt> FrameDecoder for IntFrames<I> {
    type Item = I;

    fn decode_frame(&mut self, accumulator: &mut dyn DataBuffer) -> Result<DecodeOutcome<I>> {
        if accumulator.readable_byte_count() < I::WIDTH {
            return Ok(DecodeOutcome::Incomplete);
        }
        I::read_from(self.order, accumulator).map(DecodeOutcome::Complete)
    }

    fn decode_eof(&mut self, accumulator: &mut dyn DataBuffer) -> Result<Option<I>> {
        Err(BufferError::decoding(format!(
            "input ended with {} trailing bytes, not a multiple of {}",
            accumulator.readable_byte_count(),
            I::WIDTH
        )))
    }
}

/// 定宽整数解码器。
#[derive(Debug, Clone, Copy)]
pub struct FixedWidthIntDecoder {
    order: ByteOrder,
    max_in_memory_size: usize,
}

impl Default for FixedWidthIntDecoder {
    fn default() -> Self {
        Self::new(ByteOrder::default())
    }
}

impl FixedWidthIntDecoder {
    /// 以指定字节序构建。
    pub fn new(order: ByteOrder) -> Self {
        Self {
            order,
            max_in_memory_size: DEFAULT_MAX_IN_MEMORY_SIZE,
        }
    }

    /// 调整内存聚合上限。
    pub fn with_max_in_memory_size(mut self, max_in_memory_size: usize) -> Self {
        self.max_in_memory_size = max_in_memory_size;
        self
    }

    /// 返回具体类型的解码状态机。
    pub fn decode_stream<'a, I: FixedWidthInt>(
        &self,
        input: BufferStream<'a>,
    ) -> DecodeStream<'a, IntFrames<I>> {
        DecodeStream::new(input, IntFrames::new(self.order), self.max_in_memory_size)
    }
}

impl<I: FixedWidthInt> Decoder<I> for FixedWidthIntDecoder {
    fn decodable_content_types(&self) -> Vec<ContentType> {
        vec![ContentType::APPLICATION_OCTET_STREAM]
    }

    fn decode<'a>(&self, input: BufferStream<'a>, _hints: &CodecHints) -> ValueStream<'a, I> {
        self.decode_stream::<I>(input).boxed()
    }

    fn decode_buffer(&self, buffer: Box<dyn DataBuffer>, _hints: &CodecHints) -> Result<I> {
        let mut buffer = BufferGuard::new(buffer);
        if buffer.readable_byte_count() != I::WIDTH {
            return Err(BufferError::decoding(format!(
                "expected exactly {} bytes, got {}",
                I::WIDTH,
                buffer.readable_byte_count()
            )));
        }
        I::read_from(self.order, &mut *buffer)
    }

    fn max_in_memory_size(&self) -> usize {
        self.max_in_memory_size
    }
}
