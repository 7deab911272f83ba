use std::fmt;

use bytes::Bytes;
use tracing::debug;

use crate::{
    buffer::{DataBuffer, DataBufferExt},
    config::DataBufferConfig,
    default_buffer::DefaultDataBuffer,
    error::{BufferError, Result},
    pool::SlabBufferPool,
    pooled_buffer::PooledDataBuffer,
    utils,
};

/// `DataBufferFactory` 是缓冲的唯一创建入口。
///
/// # 设计背景（Why）
/// - 传输与编解码组件只依赖工厂 trait，就能在池化与非池化内存策略之间切换；
/// - 工厂只承载分配配置（默认容量、扩容策略、池配置），不持有业务运行态。
///
/// # 契约说明（What）
/// - [`allocate_buffer`](Self::allocate_buffer)：容量提示仅为建议值，`None` 使用配置的默认容量；
///   返回的缓冲 `read = write = 0`；提示超过容量上限或池配额耗尽时返回 `Allocation`；
/// - [`wrap`](Self::wrap)：零拷贝装饰 `Bytes`，返回非池化缓冲，`read = 0`、`write = len`，永不失败；
/// - [`join`](Self::join)：把多个缓冲的可读字节按顺序合并为一个缓冲，并释放每个输入。
pub trait DataBufferFactory: Send + Sync + fmt::Debug + 'static {
    /// 分配一个空缓冲。
    fn allocate_buffer(&self, capacity_hint: Option<usize>) -> Result<Box<dyn DataBuffer>>;

    /// 零拷贝包装现有字节。
    fn wrap(&self, bytes: Bytes) -> Box<dyn DataBuffer>;

    /// 复制切片后包装。
    fn wrap_slice(&self, bytes: &[u8]) -> Box<dyn DataBuffer> {
        self.wrap(Bytes::copy_from_slice(bytes))
    }

    /// 合并多个缓冲；无论成功与否，所有输入都会被释放。
    fn join(&self, buffers: Vec<Box<dyn DataBuffer>>) -> Result<Box<dyn DataBuffer>> {
        let total = buffers.iter().map(|b| b.readable_byte_count()).sum();
        let mut joined = match self.allocate_buffer(Some(total)) {
            Ok(joined) => joined,
            Err(err) => {
                buffers.iter().for_each(|b| {
                    utils::safe_release(&**b);
                });
                return Err(err);
            }
        };
        let mut failure = None;
        for mut buffer in buffers {
            if failure.is_none() {
                if let Err(err) = joined.write_buffer(buffer.as_mut()) {
                    failure = Some(err);
                }
            }
            utils::safe_release(&*buffer);
        }
        match failure {
            Some(err) => {
                utils::safe_release(&*joined);
                Err(err)
            }
            None => Ok(joined),
        }
    }

    /// 本工厂产出的缓冲是否参与引用计数。
    fn is_pooled(&self) -> bool;
}

fn check_hint(config: &DataBufferConfig, capacity_hint: Option<usize>) -> Result<usize> {
    let capacity = capacity_hint.unwrap_or(config.default_capacity);
    if capacity > config.growth.max_capacity {
        return Err(BufferError::allocation(
            capacity,
            format!("exceeds max capacity {}", config.growth.max_capacity),
        ));
    }
    Ok(capacity)
}

/// 堆分配工厂，产出 [`DefaultDataBuffer`]。
#[derive(Debug, Clone, Default)]
pub struct DefaultDataBufferFactory {
    config: DataBufferConfig,
}

impl DefaultDataBufferFactory {
    /// 以默认配置创建工厂。
    pub fn new() -> Self {
        Self::default()
    }

    /// 以给定配置创建工厂；配置不自洽时返回 `IllegalState`。
    pub fn with_config(config: DataBufferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// 当前配置。
    pub fn config(&self) -> &DataBufferConfig {
        &self.config
    }
}

impl DataBufferFactory for DefaultDataBufferFactory {
    fn allocate_buffer(&self, capacity_hint: Option<usize>) -> Result<Box<dyn DataBuffer>> {
        let capacity = check_hint(&self.config, capacity_hint)?;
        Ok(Box::new(DefaultDataBuffer::with_policy(
            capacity,
            self.config.growth,
        )))
    }

    fn wrap(&self, bytes: Bytes) -> Box<dyn DataBuffer> {
        Box::new(DefaultDataBuffer::wrap_with_policy(bytes, self.config.growth))
    }

    fn is_pooled(&self) -> bool {
        false
    }
}

/// 池化工厂，产出由 [`SlabBufferPool`] 支撑的 [`PooledDataBuffer`]。
///
/// # 契约说明（What）
/// - `allocate_buffer` 返回 `ref_count == 1` 的池化缓冲，调用方（或其下游的终端所有者）负责释放；
/// - `wrap` 仍返回非池化缓冲：被包装的字节并非池所有，无需也无法归还。
#[derive(Debug, Clone)]
pub struct PooledDataBufferFactory {
    config: DataBufferConfig,
    pool: SlabBufferPool,
}

impl Default for PooledDataBufferFactory {
    fn default() -> Self {
        let config = DataBufferConfig::default();
        Self {
            pool: SlabBufferPool::new(config.pool),
            config,
        }
    }
}

impl PooledDataBufferFactory {
    /// 以默认配置创建工厂与专属缓冲池。
    pub fn new() -> Self {
        Self::default()
    }

    /// 以给定配置创建工厂；配置不自洽时返回 `IllegalState`。
    pub fn with_config(config: DataBufferConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            pool: SlabBufferPool::new(config.pool),
            config,
        })
    }

    /// 与其他工厂共享同一缓冲池。
    pub fn with_pool(config: DataBufferConfig, pool: SlabBufferPool) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, pool })
    }

    /// 背后的缓冲池句柄，可用于读取统计或收缩自由链表。
    pub fn pool(&self) -> &SlabBufferPool {
        &self.pool
    }

    /// 分配具体类型的池化缓冲，便于调用 [`PooledDataBuffer::retained`] 等专有方法。
    pub fn allocate_pooled(&self, capacity_hint: Option<usize>) -> Result<PooledDataBuffer> {
        let capacity = check_hint(&self.config, capacity_hint)?;
        let block = self.pool.acquire(capacity).inspect_err(|err| {
            debug!(capacity, error = %err, "pooled allocation rejected");
        })?;
        Ok(PooledDataBuffer::new(
            block,
            capacity,
            self.pool.recycler(),
            self.config.growth,
        ))
    }
}

impl DataBufferFactory for PooledDataBufferFactory {
    fn allocate_buffer(&self, capacity_hint: Option<usize>) -> Result<Box<dyn DataBuffer>> {
        Ok(Box::new(self.allocate_pooled(capacity_hint)?))
    }

    fn wrap(&self, bytes: Bytes) -> Box<dyn DataBuffer> {
        Box::new(DefaultDataBuffer::wrap_with_policy(bytes, self.config.growth))
    }

    fn is_pooled(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GrowthPolicy;

    #[test]
    fn hint_defaults_to_configured_capacity() {
        let factory = DefaultDataBufferFactory::new();
        let buffer = factory.allocate_buffer(None).unwrap();
        assert_eq!(buffer.capacity(), 256);
        assert_eq!((buffer.read_position(), buffer.write_position()), (0, 0));
    }

    #[test]
    fn hint_above_max_capacity_is_rejected() {
        let config = DataBufferConfig {
            default_capacity: 16,
            growth: GrowthPolicy {
                max_capacity: 1024,
                ..GrowthPolicy::default()
            },
            ..DataBufferConfig::default()
        };
        let factory = PooledDataBufferFactory::with_config(config).unwrap();
        let err = factory.allocate_buffer(Some(4096)).unwrap_err();
        assert!(matches!(err, BufferError::Allocation { requested: 4096, .. }));
    }

    #[test]
    fn pooled_factory_wraps_without_pooling() {
        let factory = PooledDataBufferFactory::new();
        let wrapped = factory.wrap(Bytes::from_static(b"abc"));
        assert!(wrapped.as_pooled().is_none());
        assert_eq!((wrapped.read_position(), wrapped.write_position()), (0, 3));
        assert_eq!(factory.pool().statistics().total_allocations, 0);
    }
}
