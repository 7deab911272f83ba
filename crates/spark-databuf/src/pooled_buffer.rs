use std::{fmt, sync::Arc};

// 模型检查构建（`--cfg loom`）下切换到 loom 的原子类型，以便穷举 retain/release 的调度交错；
// `Arc` 保持标准实现，回收句柄的类型签名不随构建配置变化。
#[cfg(any(loom, spark_loom))]
use loom::sync::atomic::{AtomicUsize, Ordering};
#[cfg(not(any(loom, spark_loom)))]
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::{Bytes, BytesMut};
use spin::Mutex;
use tracing::{trace, warn};

use crate::{
    buffer::{ByteView, ByteViewMut, DataBuffer, PooledBuffer, released_error},
    config::GrowthPolicy,
    default_buffer::DefaultDataBuffer,
    error::Result,
    pool::{BufferRecycler, ReclaimedBuffer},
    store::ByteStore,
};

/// `PooledShared` 是同一逻辑缓冲所有句柄共享的租约状态。
///
/// # 结构设计（How）
/// - `ref_count`：显式引用计数，由 `retain`/`release` 以 CAS 循环维护；
/// - `store`：后备存储；计数归零时被取走并归还池，之后恒为 `None`；
/// - `recycler`：池级回收句柄，租约结束时恰好通知一次；
/// - `leased`：租出时的块容量，用于池侧对账。
///
/// # 泄漏兜底（What）
/// - 若所有句柄被丢弃而计数仍大于 0，`Drop` 仍会归还存储并以 `leaked = true` 通知池，
///   同时输出 `warn!` 级别的泄漏事件，保证池统计不会永久失衡。
struct PooledShared {
    ref_count: AtomicUsize,
    store: Mutex<Option<ByteStore>>,
    recycler: Arc<dyn BufferRecycler>,
    growth: GrowthPolicy,
    leased: usize,
}

impl Drop for PooledShared {
    fn drop(&mut self) {
        if let Some(store) = self.store.get_mut().take() {
            let ref_count = self.ref_count.load(Ordering::Acquire);
            warn!(
                ref_count,
                capacity = store.capacity(),
                "pooled buffer dropped without release; reclaiming leaked storage"
            );
            self.recycler
                .reclaim(ReclaimedBuffer::new(self.leased, store.into_block(), true));
        }
    }
}

/// `PooledDataBuffer` 是由 [`SlabBufferPool`](crate::SlabBufferPool) 租出的引用计数缓冲。
///
/// # 设计背景（Why）
/// - 网络缓冲常被多个组件共享（例如同时交给日志旁路与下游写出），
///   以显式引用计数决定“最后一个使用者”，计数归零时立即把后备块放回池中；
/// - 与 `Drop` 驱动的自动回收相比，显式 `release` 让回收时刻可预测，
///   便于流水线在错误路径上“先释放、后传播”。
///
/// # 逻辑解析（How）
/// - 句柄只持有 `Arc<PooledShared>`；[`retained`](Self::retained) 在计数加一后返回共享同一游标与内容的新句柄；
/// - 内容访问经由 `spin::Mutex` 串行化，视图类型持有锁守卫，生命周期结束即解锁；
/// - `release` 将计数减到 0 时取走存储并调用 `BufferRecycler::reclaim`。
///
/// # 契约说明（What）
/// - 计数归零后：读写、切片、视图等操作返回 `IllegalState`，游标与容量查询返回 0，
///   `index_of` 系列返回 `None`；
/// - 切片与 `split` 得到的前缀为非池化缓冲，不受本缓冲释放影响；
/// - 持有 [`ByteView`]/[`ByteViewMut`] 时不得经由另一句柄访问同一缓冲，否则将在自旋锁上等待。
pub struct PooledDataBuffer {
    shared: Arc<PooledShared>,
}

impl PooledDataBuffer {
    /// 以租出的内存块构造缓冲，`ref_count == 1`。
    ///
    /// # 参数
    /// - `block`：池租出的内存块，租约容量按其 `capacity()` 记录；
    /// - `capacity`：缓冲的初始逻辑容量，游标均为 0；
    /// - `recycler`：计数归零（或泄漏兜底）时接收归还的回收句柄。
    pub fn new(
        block: BytesMut,
        capacity: usize,
        recycler: Arc<dyn BufferRecycler>,
        growth: GrowthPolicy,
    ) -> Self {
        let leased = block.capacity();
        trace!(capacity, leased, "pooled buffer leased");
        Self {
            shared: Arc::new(PooledShared {
                ref_count: AtomicUsize::new(1),
                store: Mutex::new(Some(ByteStore::with_block(block, capacity))),
                recycler,
                growth,
                leased,
            }),
        }
    }

    /// 计数加一并返回指向同一逻辑缓冲的新句柄。
    ///
    /// 两个句柄各自需要一次 `release`。
    pub fn retained(&self) -> Result<Self> {
        PooledBuffer::retain(self)?;
        Ok(Self {
            shared: Arc::clone(&self.shared),
        })
    }

    fn with_store<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&ByteStore) -> Result<R>,
    ) -> Result<R> {
        let guard = self.shared.store.lock();
        let store = guard.as_ref().ok_or_else(|| released_error(operation))?;
        f(store)
    }

    fn with_store_mut<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut ByteStore, &GrowthPolicy) -> Result<R>,
    ) -> Result<R> {
        let mut guard = self.shared.store.lock();
        let store = guard.as_mut().ok_or_else(|| released_error(operation))?;
        f(store, &self.shared.growth)
    }

    fn query(&self, f: impl FnOnce(&ByteStore) -> usize) -> usize {
        self.shared.store.lock().as_ref().map_or(0, f)
    }
}

impl fmt::Debug for PooledDataBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledDataBuffer")
            .field("ref_count", &self.ref_count())
            .field("read_position", &self.read_position())
            .field("write_position", &self.write_position())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl DataBuffer for PooledDataBuffer {
    fn read_position(&self) -> usize {
        self.query(ByteStore::read_position)
    }

    fn set_read_position(&mut self, position: usize) -> Result<()> {
        self.with_store_mut("set_read_position", |store, _| {
            store.set_read_position(position)
        })
    }

    fn write_position(&self) -> usize {
        self.query(ByteStore::write_position)
    }

    fn set_write_position(&mut self, position: usize) -> Result<()> {
        self.with_store_mut("set_write_position", |store, _| {
            store.set_write_position(position)
        })
    }

    fn capacity(&self) -> usize {
        self.query(ByteStore::capacity)
    }

    fn set_capacity(&mut self, capacity: usize) -> Result<()> {
        self.with_store_mut("set_capacity", |store, growth| {
            store.set_capacity(capacity, growth)
        })
    }

    fn ensure_writable(&mut self, additional: usize) -> Result<()> {
        self.with_store_mut("ensure_writable", |store, growth| {
            store.ensure_writable(additional, growth).map(drop)
        })
    }

    fn get_byte(&self, index: usize) -> Result<u8> {
        self.with_store("get_byte", |store| store.get_byte(index))
    }

    fn read_byte(&mut self) -> Result<u8> {
        self.with_store_mut("read_byte", |store, _| store.read_byte())
    }

    fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        self.with_store_mut("read", |store, _| Ok(store.read(dst)))
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.with_store_mut("write_byte", |store, growth| {
            store.write(&[byte], growth).map(drop)
        })
    }

    fn write(&mut self, src: &[u8]) -> Result<usize> {
        self.with_store_mut("write", |store, growth| {
            let (written, grew) = store.write(src, growth)?;
            if grew {
                trace!(capacity = store.capacity(), "pooled buffer grew");
            }
            Ok(written)
        })
    }

    fn index_of_where(&self, predicate: &dyn Fn(u8) -> bool, from_index: usize) -> Option<usize> {
        self.shared
            .store
            .lock()
            .as_ref()
            .and_then(|store| store.index_of_where(predicate, from_index))
    }

    fn last_index_of(&self, byte: u8, from_index: usize) -> Option<usize> {
        self.shared
            .store
            .lock()
            .as_ref()
            .and_then(|store| store.last_index_of(byte, from_index))
    }

    fn slice(&self, start: usize, end: usize) -> Result<Box<dyn DataBuffer>> {
        let bytes = self.with_store("slice", |store| store.slice_copy(start, end))?;
        Ok(Box::new(DefaultDataBuffer::wrap_with_policy(
            bytes,
            self.shared.growth,
        )))
    }

    fn split(&mut self, index: usize) -> Result<Box<dyn DataBuffer>> {
        let prefix = self.with_store_mut("split", |store, _| store.split(index))?;
        Ok(Box::new(DefaultDataBuffer::from_store(
            prefix,
            self.shared.growth,
        )))
    }

    fn readable_view(&self) -> Result<ByteView<'_>> {
        let guard = self.shared.store.lock();
        if guard.is_none() {
            return Err(released_error("readable_view"));
        }
        Ok(ByteView::locked(guard))
    }

    fn writable_view(&mut self) -> Result<ByteViewMut<'_>> {
        let mut guard = self.shared.store.lock();
        match guard.as_mut() {
            // 先转换为独占存储，守卫解引用时才能拿到可变切片。
            Some(store) => {
                let _ = store.writable_mut();
            }
            None => return Err(released_error("writable_view")),
        }
        Ok(ByteViewMut::locked(guard))
    }

    fn advance_write_position(&mut self, len: usize) -> Result<()> {
        self.with_store_mut("advance_write_position", |store, _| {
            store.advance_write_position(len)
        })
    }

    fn to_bytes(&self) -> Result<Bytes> {
        self.with_store("to_bytes", |store| Ok(store.to_bytes()))
    }

    fn as_pooled(&self) -> Option<&dyn PooledBuffer> {
        Some(self)
    }
}

impl PooledBuffer for PooledDataBuffer {
    fn ref_count(&self) -> usize {
        self.shared.ref_count.load(Ordering::Acquire)
    }

    fn retain(&self) -> Result<()> {
        let mut current = self.shared.ref_count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err(released_error("retain"));
            }
            match self.shared.ref_count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    fn release(&self) -> Result<bool> {
        let mut current = self.shared.ref_count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err(released_error("release"));
            }
            match self.shared.ref_count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        if current > 1 {
            return Ok(false);
        }
        let store = self.shared.store.lock().take();
        if let Some(store) = store {
            trace!(capacity = store.capacity(), "pooled buffer released to pool");
            self.shared.recycler.reclaim(ReclaimedBuffer::new(
                self.shared.leased,
                store.into_block(),
                false,
            ));
        }
        Ok(true)
    }
}
