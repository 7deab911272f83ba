use std::{
    fmt,
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
};

use crate::buffer::DataBuffer;

/// 阶段边界上的释放守卫。
///
/// # 契约说明（What）
/// - 守卫销毁时对所持缓冲调用 [`safe_release`](super::safe_release)，
///   覆盖正常结束、错误提前返回与 Future/Stream 被取消三种路径；
/// - [`into_inner`](Self::into_inner) 将所有权连同释放责任交还调用方，不触发释放。
pub struct BufferGuard {
    buffer: ManuallyDrop<Box<dyn DataBuffer>>,
}

impl BufferGuard {
    /// 接管缓冲的释放责任。
    pub fn new(buffer: Box<dyn DataBuffer>) -> Self {
        Self {
            buffer: ManuallyDrop::new(buffer),
        }
    }

    /// 解除守卫，取回缓冲。
    pub fn into_inner(self) -> Box<dyn DataBuffer> {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` 被 `ManuallyDrop` 包裹，守卫的 `Drop` 不会再运行，
        // 字段在此处恰好被取出一次。
        unsafe { ManuallyDrop::take(&mut this.buffer) }
    }

    /// 立即释放并消耗守卫，返回是否归还了存储。
    pub fn release(self) -> bool {
        let buffer = self.into_inner();
        super::safe_release(&*buffer)
    }
}

/// [`BufferGuard::new`] 的函数式别名。
pub fn release_on_drop(buffer: Box<dyn DataBuffer>) -> BufferGuard {
    BufferGuard::new(buffer)
}

impl Deref for BufferGuard {
    type Target = dyn DataBuffer;

    fn deref(&self) -> &Self::Target {
        &**self.buffer
    }
}

impl DerefMut for BufferGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.buffer
    }
}

impl Drop for BufferGuard {
    fn drop(&mut self) {
        super::safe_release(&**self.buffer);
        // SAFETY: `drop` 之后字段不再被访问。
        unsafe { ManuallyDrop::drop(&mut self.buffer) }
    }
}

impl fmt::Debug for BufferGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BufferGuard").field(&*self.buffer).finish()
    }
}
