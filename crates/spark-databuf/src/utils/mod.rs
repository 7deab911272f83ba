//! 缓冲生命周期与流式搬运工具。
//!
//! # 模块定位（Why）
//! - 传输层与编解码层之间以“缓冲流”交接数据，所有权沿流向下游转移；
//!   本模块集中提供引用计数辅助、释放守卫以及流的读取、写出、截取与合并，
//!   保证每个阶段在正常结束、失败或取消时都恰好释放一次手中的缓冲。
//!
//! # 结构概览（How）
//! - 引用计数辅助：[`retain`]、[`release`]、[`safe_release`]，对非池化缓冲恒为空操作；
//! - [`BufferGuard`]：阶段边界上的释放守卫，`Drop` 即释放；
//! - `stream`（`runtime-tokio` 特性）：[`read_stream`] / [`write_stream`] 桥接 Tokio I/O；
//! - `blocking`：[`read_blocking`] / [`write_blocking`] 面向 `std::io`；
//! - `join`：[`join`]、[`compose`]、[`take_until_byte_count`]、[`skip_until_byte_count`] 及其阻塞版本。

mod blocking;
mod guard;
mod join;
#[cfg(feature = "runtime-tokio")]
mod stream;

use futures::stream::BoxStream;
use tracing::debug;

use crate::{buffer::DataBuffer, error::Result};

pub use blocking::{ReadBlocking, read_blocking, write_blocking};
pub use guard::{BufferGuard, release_on_drop};
pub use join::{
    compose, compose_blocking, join, join_blocking, skip_until_byte_count, take_until_byte_count,
};
#[cfg(feature = "runtime-tokio")]
pub use stream::{read_stream, write_stream};

/// 惰性缓冲流：每个元素的所有权归消费者，消费者负责最终释放。
pub type BufferStream<'a> = BoxStream<'a, Result<Box<dyn DataBuffer>>>;

/// 池化缓冲引用计数加一；非池化缓冲为空操作。
pub fn retain<B: DataBuffer + ?Sized>(buffer: &B) -> Result<()> {
    match buffer.as_pooled() {
        Some(pooled) => pooled.retain(),
        None => Ok(()),
    }
}

/// 池化缓冲引用计数减一，返回本次调用是否归还了存储；非池化缓冲恒返回 `Ok(false)`。
pub fn release<B: DataBuffer + ?Sized>(buffer: &B) -> Result<bool> {
    match buffer.as_pooled() {
        Some(pooled) => pooled.release(),
        None => Ok(false),
    }
}

/// 与 [`release`] 相同，但吞掉错误（记录 `debug!` 事件后返回 `false`）。
///
/// 用于清理路径：失败的释放不应掩盖正在传播的原始错误。
pub fn safe_release<B: DataBuffer + ?Sized>(buffer: &B) -> bool {
    match release(buffer) {
        Ok(deallocated) => deallocated,
        Err(err) => {
            debug!(code = err.code(), error = %err, "ignoring failed buffer release");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DataBufferFactory, DefaultDataBufferFactory, PooledDataBufferFactory};

    #[test]
    fn release_of_unpooled_buffer_is_noop() {
        let buffer = DefaultDataBufferFactory::new().wrap_slice(b"abc");
        assert!(retain(&*buffer).is_ok());
        assert!(!release(&*buffer).unwrap());
        assert!(!release(&*buffer).unwrap());
        assert_eq!(buffer.readable_byte_count(), 3);
    }

    #[test]
    fn safe_release_swallows_double_release() {
        let buffer = PooledDataBufferFactory::new().allocate_buffer(None).unwrap();
        assert!(safe_release(&*buffer));
        assert!(!safe_release(&*buffer));
    }
}
