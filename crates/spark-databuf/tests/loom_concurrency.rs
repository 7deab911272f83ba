#![cfg(any(loom, spark_loom))]
//! `loom_concurrency` 模型检查：穷举引用计数与配额预留的线程交错。
//!
//! 运行方式：`RUSTFLAGS="--cfg loom" cargo test -p spark-databuf --features loom-model --test loom_concurrency`。
//!
//! # 测试目标（Why）
//! - `retain`/`release` 的 CAS 循环在任意交错下都只让一个线程观察到计数归零；
//! - 归零后的存储恰好归还一次，且不会落入泄漏兜底；
//! - 配额的原子预留不会让两个并发租借同时越过 `max_active_bytes`。

use std::sync::Arc;

use bytes::BytesMut;
use loom::{
    model,
    sync::atomic::{AtomicUsize, Ordering},
    thread,
};
use spark_databuf::{
    BufferRecycler, GrowthPolicy, PoolConfig, PooledBuffer, PooledDataBuffer, ReclaimedBuffer,
    SlabBufferPool,
};

struct CountingRecycler {
    reclaimed: AtomicUsize,
    leaked: AtomicUsize,
}

impl BufferRecycler for CountingRecycler {
    fn reclaim(&self, reclaimed: ReclaimedBuffer) {
        if reclaimed.is_leak() {
            self.leaked.fetch_add(1, Ordering::AcqRel);
        }
        self.reclaimed.fetch_add(1, Ordering::AcqRel);
    }
}

fn counting_recycler() -> Arc<CountingRecycler> {
    Arc::new(CountingRecycler {
        reclaimed: AtomicUsize::new(0),
        leaked: AtomicUsize::new(0),
    })
}

#[test]
fn concurrent_retain_release_reclaims_exactly_once() {
    //
    // - **How**：两个句柄分属两个线程，子线程额外 retain/release 一轮后释放自己的引用，
    //   主线程同时释放另一份引用；
    // - **What**：恰好一次 `release` 返回 `true`，回收入口恰好被调用一次且不是泄漏路径。
    model(|| {
        let recycler = counting_recycler();
        let buffer = PooledDataBuffer::new(
            BytesMut::with_capacity(8),
            8,
            recycler.clone(),
            GrowthPolicy::default(),
        );
        let other = buffer.retained().expect("retained 应成功");

        let worker = thread::spawn(move || {
            other.retain().expect("持有引用时 retain 应成功");
            assert!(!other.release().expect("额外引用释放"));
            other.release().expect("释放子线程引用")
        });

        let main_released = buffer.release().expect("释放主线程引用");
        let worker_released = worker.join().expect("子线程不应 panic");

        assert!(
            main_released ^ worker_released,
            "恰好一个线程观察到计数归零"
        );
        assert_eq!(buffer.ref_count(), 0);
        drop(buffer);
        assert_eq!(recycler.reclaimed.load(Ordering::Acquire), 1);
        assert_eq!(recycler.leaked.load(Ordering::Acquire), 0);
    });
}

#[test]
fn racing_retain_against_last_release_never_resurrects() {
    //
    // - **How**：子线程尝试对共享句柄 retain，主线程释放唯一引用；
    // - **What**：retain 要么先于归零成功（随后由子线程负责最后一次释放），要么观察到 0 而失败；
    //   两种交错下存储都只归还一次。
    model(|| {
        let recycler = counting_recycler();
        let buffer = Arc::new(PooledDataBuffer::new(
            BytesMut::with_capacity(8),
            8,
            recycler.clone(),
            GrowthPolicy::default(),
        ));

        let contender = {
            let buffer = buffer.clone();
            thread::spawn(move || match buffer.retain() {
                Ok(()) => buffer.release().expect("释放抢到的引用"),
                Err(_) => false,
            })
        };

        let main_released = buffer.release().expect("释放唯一引用");
        let contender_released = contender.join().expect("子线程不应 panic");

        assert!(main_released ^ contender_released);
        assert_eq!(recycler.reclaimed.load(Ordering::Acquire), 1);
        assert_eq!(recycler.leaked.load(Ordering::Acquire), 0);
    });
}

#[test]
fn quota_reservation_admits_one_of_two_oversized_acquisitions() {
    //
    // - **What**：配额 100 字节下两个线程各请求 64 字节，任意交错都恰好一个成功，
    //   在用额度不越过上限。
    model(|| {
        let pool = SlabBufferPool::new(PoolConfig {
            max_active_bytes: Some(100),
            ..PoolConfig::default()
        });

        let contender = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire(64).is_ok())
        };
        let main_granted = pool.acquire(64).is_ok();
        let contender_granted = contender.join().expect("子线程不应 panic");

        assert!(main_granted ^ contender_granted);
        let stats = pool.statistics();
        assert!(stats.active_bytes <= 100);
        assert_eq!(stats.failed_acquisitions, 1);
    });
}
