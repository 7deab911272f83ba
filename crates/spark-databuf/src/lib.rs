//! `spark-databuf` 提供引用计数的可增长数据缓冲、缓冲工厂与流式读写工具。
//!
//! # 模块定位（Why）
//! - 网络传输与类型化的应用值之间需要一层统一的字节缓冲抽象：
//!   传输层产出缓冲流，编解码层消费缓冲流，二者通过本 crate 的契约交接所有权；
//! - 池化缓冲以显式引用计数决定回收时机，使“最后一个使用者释放”的规则在正常、失败与取消路径上一致。
//!
//! # 设计概要（How）
//! - [`DataBuffer`]：对象安全的双游标缓冲契约；[`DefaultDataBuffer`] 为堆实现，
//!   [`PooledDataBuffer`] 为 [`SlabBufferPool`] 支撑的引用计数实现；
//! - [`DataBufferFactory`]：唯一创建入口，提供池化与非池化两种实现；
//! - [`utils`]：引用计数辅助、释放守卫，以及缓冲流的读取、写出、截取与合并；
//! - [`DataBufferConfig`]：可经 `serde` 从 TOML 等配置源加载的分配策略。
//!
//! # 错误约定（What）
//! - 所有可失败操作返回 [`Result`]，错误统一为 [`BufferError`]，并可通过
//!   [`BufferError::code`] 获取稳定错误码；
//! - 任何返回错误的路径都已先行释放本地持有的缓冲。

pub mod buffer;
pub mod charset;
pub mod config;
mod default_buffer;
pub mod error;
mod factory;
mod pool;
mod pooled_buffer;
mod store;
pub mod utils;

pub use buffer::{
    BufferReader, BufferWriter, ByteView, ByteViewMut, DataBuffer, DataBufferExt, PooledBuffer,
};
pub use charset::Charset;
pub use config::{DataBufferConfig, GrowthPolicy, PoolConfig};
pub use default_buffer::DefaultDataBuffer;
pub use error::{BufferError, Result, codes};
pub use factory::{DataBufferFactory, DefaultDataBufferFactory, PooledDataBufferFactory};
pub use pool::{BufferRecycler, PoolStatistics, ReclaimedBuffer, SlabBufferPool};
pub use pooled_buffer::PooledDataBuffer;
pub use utils::{BufferGuard, BufferStream};
