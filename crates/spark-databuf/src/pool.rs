use std::sync::Arc;

// 配额预留与计数在模型检查构建下改用 loom 原子类型，与 `pooled_buffer` 保持一致。
#[cfg(any(loom, spark_loom))]
use loom::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
#[cfg(not(any(loom, spark_loom)))]
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::BytesMut;
use spin::Mutex;
use tracing::trace;

use crate::{
    config::PoolConfig,
    error::{BufferError, Result},
};

/// `BufferRecycler` 描述缓冲池在引用计数归零时的回收入口。
///
/// # 设计初衷（Why）
/// - 池化缓冲的后备块由池租出，但释放时机由引用计数决定；
///   通过该接口把“归还”动作显式化，缓冲实现无需知道池的内部结构；
/// - 泄漏兜底（所有句柄被丢弃但计数未归零）同样经由此入口归还，并计入 `leaked_buffers`。
///
/// # 契约定义（What）
/// - 每次租约恰好调用一次 [`reclaim`](Self::reclaim)；
/// - 实现必须线程安全且不得 panic：该方法可能在 `Drop` 路径上执行。
pub trait BufferRecycler: Send + Sync + 'static {
    /// 归还一次租约。
    fn reclaim(&self, reclaimed: ReclaimedBuffer);
}

/// 一次回收动作携带的上下文。
///
/// - `leased`：租出时记录的块容量，用于池侧统计对账；
/// - `block`：若成功夺回底层 `BytesMut` 则为 `Some`，
///   底层内存仍被 `split` 出的前缀共享时可能为 `None`；
/// - `leaked`：是否由泄漏兜底路径触发。
#[derive(Debug)]
pub struct ReclaimedBuffer {
    leased: usize,
    block: Option<BytesMut>,
    leaked: bool,
}

impl ReclaimedBuffer {
    /// 构造回收上下文。
    pub fn new(leased: usize, block: Option<BytesMut>, leaked: bool) -> Self {
        Self {
            leased,
            block,
            leaked,
        }
    }

    /// 租出时的块容量。
    pub fn leased_capacity(&self) -> usize {
        self.leased
    }

    /// 是否来自泄漏兜底。
    pub fn is_leak(&self) -> bool {
        self.leaked
    }

    /// 消耗结构并返回可复用的内存块。
    pub fn into_block(self) -> Option<BytesMut> {
        self.block
    }
}

/// 缓冲池统计快照。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatistics {
    /// 池当前持有的全部块容量（租出 + 空闲）。
    pub allocated_bytes: usize,
    /// 自由链表中可立即复用的容量。
    pub available_bytes: usize,
    /// 当前租出的块数。
    pub active_leases: usize,
    /// 当前租出的块容量之和。
    pub active_bytes: usize,
    /// 自由链表中的块数。
    pub free_buffers: usize,
    /// 累计租借次数。
    pub total_allocations: u64,
    /// 累计放回自由链表的次数。
    pub total_recycled: u64,
    /// 自由链表未命中、需要新分配的次数。
    pub pool_misses: u64,
    /// 因 `max_active_bytes` 限制而失败的租借次数。
    pub failed_acquisitions: u64,
    /// 未经 `release` 即被丢弃、由兜底路径回收的缓冲数。
    pub leaked_buffers: u64,
}

/// `SlabBufferPool` 基于自由链表复用 `BytesMut`，为池化缓冲工厂提供后备块。
///
/// # 模块角色（Why）
/// - 高频短生命周期的网络缓冲若每次都向系统申请，会放大分配器抖动；
///   通过复用已归还的块，稳态下的租借只需一次链表查找；
/// - 配合 [`PooledDataBuffer`](crate::PooledDataBuffer) 的引用计数，
///   在计数归零的瞬间把块放回链表。
///
/// # 核心机制（How）
/// - 内部维护 `spin::Mutex<Vec<BytesMut>>` 作为自由链表，租借时取容量足够的最小块（best-fit）；
/// - 自由链表长度受 `max_free_buffers` 约束，超出部分直接归还系统；
/// - `PoolMetrics` 以原子计数跟踪字节量与次数，支撑 [`statistics`](Self::statistics) 快照。
///
/// # 契约说明（What）
/// - **线程安全**：共享状态均由 `spin::Mutex` 与原子计数保护，句柄可廉价克隆并跨线程共享；
/// - **配额**：配置了 `max_active_bytes` 时，租借前以 `fetch_update` 原子预留字节额度，
///   预留失败的请求返回 [`BufferError::Allocation`]；复用块放不进剩余额度时退而新建
///   `min_capacity` 大小的块；
/// - 配额只在租借时计量：租约期间的扩容不计入 `active_bytes`，
///   归还时容量超过 `max_active_bytes` 的块直接交还系统，不进入自由链表。
///
/// # 设计权衡（Trade-offs）
/// - 最佳适配以线性扫描实现：链表长度受 `max_free_buffers` 约束，扫描代价可忽略；
/// - `shrink_to_fit` 直接清空自由链表，便于压测后快速归还峰值内存。
#[derive(Clone)]
pub struct SlabBufferPool {
    inner: Arc<PoolInner>,
}

impl Default for SlabBufferPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl std::fmt::Debug for SlabBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlabBufferPool")
            .field("config", &self.inner.config)
            .field("statistics", &self.statistics())
            .finish()
    }
}

impl SlabBufferPool {
    /// 以给定配置创建空池。
    pub fn new(config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner::new(config)),
        }
    }

    /// 租借一块容量不小于 `min_capacity` 的空内存块；租约容量即返回块的 `capacity()`。
    pub fn acquire(&self, min_capacity: usize) -> Result<BytesMut> {
        self.inner.acquire_block(min_capacity)
    }

    /// 以 trait 对象形式返回回收句柄，注入到池化缓冲中。
    pub fn recycler(&self) -> Arc<dyn BufferRecycler> {
        self.inner.clone()
    }

    /// 清空自由链表，返回归还给系统的字节数。
    pub fn shrink_to_fit(&self) -> usize {
        self.inner.shrink_free_list()
    }

    /// 读取统计快照。
    pub fn statistics(&self) -> PoolStatistics {
        self.inner.snapshot()
    }
}

struct PoolInner {
    config: PoolConfig,
    free_list: Mutex<Vec<BytesMut>>,
    metrics: PoolMetrics,
}

impl PoolInner {
    fn new(config: PoolConfig) -> Self {
        Self {
            config,
            free_list: Mutex::new(Vec::new()),
            metrics: PoolMetrics::new(),
        }
    }

    fn acquire_block(&self, min_capacity: usize) -> Result<BytesMut> {
        if let Some(mut block) = self.take_best_fit(min_capacity) {
            let capacity = block.capacity();
            if self.reserve(capacity).is_ok() {
                self.metrics.decrease_available(capacity);
                trace!(min_capacity, capacity, "pool hit");
                block.clear();
                return Ok(self.lease(block));
            }
            self.restore_or_evict(block);
        }

        if let Err(active) = self.reserve(min_capacity) {
            self.metrics.failed_acquisitions.fetch_add(1, Ordering::Relaxed);
            let limit = self.config.max_active_bytes.unwrap_or(usize::MAX);
            return Err(BufferError::allocation(
                min_capacity,
                format!("pool exhausted: {active} of {limit} active bytes in use"),
            ));
        }
        let block = BytesMut::with_capacity(min_capacity);
        let capacity = block.capacity();
        // 分配器可能多给容量，差额按实际容量补记。
        if capacity > min_capacity {
            self.metrics
                .active_bytes
                .fetch_add(capacity - min_capacity, Ordering::AcqRel);
        }
        self.metrics.increase_allocated(capacity);
        self.metrics.pool_misses.fetch_add(1, Ordering::Relaxed);
        trace!(min_capacity, capacity, "pool miss");
        Ok(self.lease(block))
    }

    fn take_best_fit(&self, min_capacity: usize) -> Option<BytesMut> {
        let mut list = self.free_list.lock();
        let index = list
            .iter()
            .enumerate()
            .filter(|(_, block)| block.capacity() >= min_capacity)
            .min_by_key(|(_, block)| block.capacity())
            .map(|(index, _)| index)?;
        Some(list.swap_remove(index))
    }

    /// 原子预留 `bytes` 字节额度；超出 `max_active_bytes` 时返回当前已用额度。
    fn reserve(&self, bytes: usize) -> std::result::Result<(), usize> {
        let active = &self.metrics.active_bytes;
        match self.config.max_active_bytes {
            None => {
                active.fetch_add(bytes, Ordering::AcqRel);
                Ok(())
            }
            Some(limit) => active
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    current.checked_add(bytes).filter(|next| *next <= limit)
                })
                .map(drop),
        }
    }

    /// 预留失败的复用块：单块即超出配额时交还系统，否则放回自由链表。
    fn restore_or_evict(&self, block: BytesMut) {
        let capacity = block.capacity();
        if self.exceeds_quota(capacity) {
            self.metrics.decrease_available(capacity);
            self.metrics.decrease_allocated(capacity);
            trace!(capacity, "evicting pooled block larger than the quota");
        } else {
            self.free_list.lock().push(block);
        }
    }

    fn exceeds_quota(&self, capacity: usize) -> bool {
        self.config
            .max_active_bytes
            .is_some_and(|limit| capacity > limit)
    }

    fn lease(&self, block: BytesMut) -> BytesMut {
        self.metrics.active_leases.fetch_add(1, Ordering::Relaxed);
        self.metrics.total_allocations.fetch_add(1, Ordering::Relaxed);
        block
    }

    fn shrink_free_list(&self) -> usize {
        let mut list = self.free_list.lock();
        let reclaimed: usize = list.iter().map(BytesMut::capacity).sum();
        list.clear();
        self.metrics.decrease_available(reclaimed);
        self.metrics.decrease_allocated(reclaimed);
        reclaimed
    }

    fn snapshot(&self) -> PoolStatistics {
        let free_buffers = self.free_list.lock().len();
        let m = &self.metrics;
        PoolStatistics {
            allocated_bytes: m.allocated_bytes.load(Ordering::Relaxed),
            available_bytes: m.available_bytes.load(Ordering::Relaxed),
            active_leases: m.active_leases.load(Ordering::Relaxed),
            active_bytes: m.active_bytes.load(Ordering::Relaxed),
            free_buffers,
            total_allocations: m.total_allocations.load(Ordering::Relaxed),
            total_recycled: m.total_recycled.load(Ordering::Relaxed),
            pool_misses: m.pool_misses.load(Ordering::Relaxed),
            failed_acquisitions: m.failed_acquisitions.load(Ordering::Relaxed),
            leaked_buffers: m.leaked_buffers.load(Ordering::Relaxed),
        }
    }
}

impl BufferRecycler for PoolInner {
    fn reclaim(&self, reclaimed: ReclaimedBuffer) {
        let leased = reclaimed.leased_capacity();
        self.metrics.decrease_active(leased);
        if reclaimed.is_leak() {
            self.metrics.leaked_buffers.fetch_add(1, Ordering::Relaxed);
        }
        match reclaimed.into_block() {
            Some(mut block) => {
                block.clear();
                let capacity = block.capacity();
                // 扩容后块可能比租出时更大，按实际容量对账。
                self.metrics.decrease_allocated(leased);
                if self.exceeds_quota(capacity) {
                    trace!(capacity, "dropping reclaimed block larger than the quota");
                    return;
                }
                let mut list = self.free_list.lock();
                if list.len() < self.config.max_free_buffers {
                    self.metrics.increase_allocated(capacity);
                    self.metrics.increase_available(capacity);
                    self.metrics.total_recycled.fetch_add(1, Ordering::Relaxed);
                    list.push(block);
                }
            }
            None => self.metrics.decrease_allocated(leased),
        }
    }
}

struct PoolMetrics {
    allocated_bytes: AtomicUsize,
    available_bytes: AtomicUsize,
    active_leases: AtomicUsize,
    active_bytes: AtomicUsize,
    total_allocations: AtomicU64,
    total_recycled: AtomicU64,
    pool_misses: AtomicU64,
    failed_acquisitions: AtomicU64,
    leaked_buffers: AtomicU64,
}

impl PoolMetrics {
    fn new() -> Self {
        Self {
            allocated_bytes: AtomicUsize::new(0),
            available_bytes: AtomicUsize::new(0),
            active_leases: AtomicUsize::new(0),
            active_bytes: AtomicUsize::new(0),
            total_allocations: AtomicU64::new(0),
            total_recycled: AtomicU64::new(0),
            pool_misses: AtomicU64::new(0),
            failed_acquisitions: AtomicU64::new(0),
            leaked_buffers: AtomicU64::new(0),
        }
    }

    fn increase_allocated(&self, capacity: usize) {
        self.allocated_bytes.fetch_add(capacity, Ordering::Relaxed);
    }

    fn decrease_allocated(&self, capacity: usize) {
        saturating_sub(&self.allocated_bytes, capacity);
    }

    fn increase_available(&self, capacity: usize) {
        self.available_bytes.fetch_add(capacity, Ordering::Relaxed);
    }

    fn decrease_available(&self, capacity: usize) {
        saturating_sub(&self.available_bytes, capacity);
    }

    fn decrease_active(&self, capacity: usize) {
        saturating_sub(&self.active_leases, 1);
        saturating_sub(&self.active_bytes, capacity);
    }
}

fn saturating_sub(target: &AtomicUsize, value: usize) {
    let _ = target.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(value))
    });
}
