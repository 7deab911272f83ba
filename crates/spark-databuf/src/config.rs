//! 缓冲工厂、扩容策略与缓冲池的配置模型。
//!
//! # 模块定位（Why）
//! - 工厂本身不持有运行态，只有“分配策略配置”；集中在此处声明，方便宿主从 TOML 等配置源加载；
//! - 所有结构均带 `#[serde(default)]`，缺省字段回落到与主流框架一致的默认值。
//!
//! # 默认值（What）
//! - 默认初始容量 256 字节；
//! - 扩容从 64 字节起倍增，达到 4 MiB 阈值后改为按阈值线性增长；
//! - 单个缓冲容量上限为 `i32::MAX`，与跨语言传输栈的长度字段保持兼容。

use serde::Deserialize;
use tracing::trace;

use crate::error::{BufferError, Result};

/// 未显式给出容量提示时的默认初始容量。
pub const DEFAULT_INITIAL_CAPACITY: usize = 256;
/// 倍增阶段的起点。
pub const DEFAULT_MIN_GROWTH: usize = 64;
/// 倍增与线性增长的分界阈值。
pub const DEFAULT_GROWTH_THRESHOLD: usize = 4 * 1024 * 1024;
/// 单个缓冲的容量上限。
pub const DEFAULT_MAX_CAPACITY: usize = i32::MAX as usize;
/// 自由链表默认缓存的块数。
pub const DEFAULT_MAX_FREE_BUFFERS: usize = 64;

/// 缓冲扩容策略：阈值以下倍增，阈值以上按阈值步长线性增长。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GrowthPolicy {
    /// 倍增阶段的起始容量。
    pub min_growth: usize,
    /// 切换为线性增长的阈值。
    pub growth_threshold: usize,
    /// 容量硬上限，超过即返回 [`BufferError::Allocation`]。
    pub max_capacity: usize,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self {
            min_growth: DEFAULT_MIN_GROWTH,
            growth_threshold: DEFAULT_GROWTH_THRESHOLD,
            max_capacity: DEFAULT_MAX_CAPACITY,
        }
    }
}

impl GrowthPolicy {
    /// 计算容纳 `needed` 字节所需的新容量。
    ///
    /// # 契约说明（What）
    /// - **前置条件**：`needed` 为扩容后至少需要的总容量（而非增量）；
    /// - **返回值**：`>= needed` 且 `<= max_capacity` 的新容量；
    /// - **错误**：`needed > max_capacity` 时返回 `Allocation`。
    ///
    /// # 执行逻辑（How）
    /// 1. 恰好等于阈值时直接返回阈值；
    /// 2. 超过阈值时向下取整到阈值倍数后再追加一个阈值步长，避免大缓冲成倍膨胀；
    /// 3. 否则从 `min_growth` 起倍增，直到不小于 `needed`。
    pub fn next_capacity(&self, needed: usize) -> Result<usize> {
        if needed > self.max_capacity {
            return Err(BufferError::allocation(
                needed,
                format!("exceeds max capacity {}", self.max_capacity),
            ));
        }
        let threshold = self.growth_threshold.max(1);
        let capacity = if needed == threshold {
            threshold
        } else if needed > threshold {
            let base = needed / threshold * threshold;
            if base > self.max_capacity.saturating_sub(threshold) {
                self.max_capacity
            } else {
                base + threshold
            }
        } else {
            let mut capacity = self.min_growth.max(1);
            while capacity < needed {
                capacity <<= 1;
            }
            capacity.min(threshold).min(self.max_capacity)
        };
        trace!(needed, capacity, "computed buffer growth");
        Ok(capacity)
    }

    /// 校验配置自洽性。
    pub fn validate(&self) -> Result<()> {
        if self.min_growth == 0 {
            return Err(BufferError::illegal_state(
                "GrowthPolicy::validate",
                "min_growth must be positive",
            ));
        }
        if self.growth_threshold < self.min_growth {
            return Err(BufferError::illegal_state(
                "GrowthPolicy::validate",
                "growth_threshold must not be smaller than min_growth",
            ));
        }
        if self.max_capacity == 0 {
            return Err(BufferError::illegal_state(
                "GrowthPolicy::validate",
                "max_capacity must be positive",
            ));
        }
        Ok(())
    }
}

/// 缓冲池配置。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// 自由链表最多缓存的块数；超出部分在回收时直接归还系统。
    pub max_free_buffers: usize,
    /// 同时租出的字节总量上限；`None` 表示不限制。
    pub max_active_bytes: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_free_buffers: DEFAULT_MAX_FREE_BUFFERS,
            max_active_bytes: None,
        }
    }
}

/// 缓冲工厂的完整配置。
///
/// ```rust
/// use spark_databuf::DataBufferConfig;
///
/// let config = DataBufferConfig::default();
/// assert_eq!(config.default_capacity, 256);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataBufferConfig {
    /// 未提供容量提示时的初始容量。
    pub default_capacity: usize,
    /// 扩容策略。
    pub growth: GrowthPolicy,
    /// 池化工厂使用的缓冲池配置。
    pub pool: PoolConfig,
}

impl DataBufferConfig {
    /// 校验配置；工厂构造时调用。
    pub fn validate(&self) -> Result<()> {
        self.growth.validate()?;
        if self.default_capacity > self.growth.max_capacity {
            return Err(BufferError::illegal_state(
                "DataBufferConfig::validate",
                "default_capacity exceeds growth.max_capacity",
            ));
        }
        Ok(())
    }
}

impl Default for DataBufferConfig {
    fn default() -> Self {
        Self {
            default_capacity: DEFAULT_INITIAL_CAPACITY,
            growth: GrowthPolicy::default(),
            pool: PoolConfig::default(),
        }
    }
}
