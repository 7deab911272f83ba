//! 常用编解码器实现。
//!
//! - [`line`]：按分隔符切分文本行的解码器；
//! - [`string`]：字符集感知的文本编码器；
//! - [`byte_array`]：字节数组与缓冲透传编解码器；
//! - [`fixed_int`]：定宽整数编解码器。

mod byte_array;
mod fixed_int;
mod line;
mod string;

pub use self::byte_array::{ByteArrayDecoder, ByteArrayEncoder, DataBufferDecoder, DataBufferEncoder};
pub use self::fixed_int::{
    ByteOrder, FixedWidthInt, FixedWidthIntDecoder, FixedWidthIntEncoder, IntFrames,
};
pub use self::line::{LineDecoder, LineDecoderConfig, LineFrames};
pub use self::string::StringEncoder;
