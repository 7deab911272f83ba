use std::{
    fmt, io,
    ops::{Deref, DerefMut},
};

use bytes::Bytes;
use spin::MutexGuard;

use crate::{
    charset::Charset,
    error::{BufferError, Result},
    store::ByteStore,
};

/// `DataBuffer` 定义对象安全的双游标可增长字节缓冲契约。
///
/// # 设计背景（Why）
/// - 传输层与编解码层之间需要统一的缓冲视图；通过 trait 对象擦除池化与非池化实现的差异，
///   流式工具与编解码器只需面对 `Box<dyn DataBuffer>`；
/// - 读写游标相互独立，写入可触发扩容，对齐 Netty `ByteBuf` 与 Spring `DataBuffer` 的心智模型。
///
/// # 逻辑解析（How）
/// - 读取推进 `read_position`，写入推进 `write_position` 并在容量不足时按
///   [`GrowthPolicy`](crate::GrowthPolicy) 扩容；
/// - 视图转换（[`readable_view`](Self::readable_view)、[`writable_view`](Self::writable_view)、
///   [`DataBufferExt::reader`]、[`DataBufferExt::writer`]）均直接作用于同一组游标。
///
/// # 契约说明（What）
/// - **不变式**：任意操作（无论成功或失败）之后都满足
///   `0 <= read_position <= write_position <= capacity`；
/// - **池化能力**：实现可通过 [`as_pooled`](Self::as_pooled) 声明引用计数能力，
///   通用代码据此决定是否执行真实的 retain/release；
/// - **失效缓冲**：池化缓冲在引用计数归零后，所有读写操作返回
///   [`BufferError::IllegalState`]，游标查询返回 0。
pub trait DataBuffer: Send + Sync + fmt::Debug + 'static {
    /// 当前读指针。
    fn read_position(&self) -> usize;

    /// 设置读指针，要求 `position <= write_position`。
    fn set_read_position(&mut self, position: usize) -> Result<()>;

    /// 当前写指针。
    fn write_position(&self) -> usize;

    /// 设置写指针，要求 `read_position <= position <= capacity`。
    fn set_write_position(&mut self, position: usize) -> Result<()>;

    /// 当前容量。
    fn capacity(&self) -> usize;

    /// 调整容量；目标容量小于 `write_position` 时返回 `IndexOutOfRange`，已写内容不被截断。
    fn set_capacity(&mut self, capacity: usize) -> Result<()>;

    /// 可读字节数：`write_position - read_position`。
    fn readable_byte_count(&self) -> usize {
        self.write_position().saturating_sub(self.read_position())
    }

    /// 可写字节数：`capacity - write_position`。
    fn writable_byte_count(&self) -> usize {
        self.capacity().saturating_sub(self.write_position())
    }

    /// 确保至少还有 `additional` 字节可写，不足时扩容。
    fn ensure_writable(&mut self, additional: usize) -> Result<()>;

    /// 随机读取 `index` 处的字节，要求 `index < write_position`，不移动游标。
    fn get_byte(&self, index: usize) -> Result<u8>;

    /// 读取单个字节；无可读数据时返回 `IndexOutOfRange`。
    fn read_byte(&mut self) -> Result<u8>;

    /// 最多读取 `dst.len()` 字节，返回实际读取数；无可读数据时返回 `Ok(0)`。
    fn read(&mut self, dst: &mut [u8]) -> Result<usize>;

    /// 写入单个字节。
    fn write_byte(&mut self, byte: u8) -> Result<()>;

    /// 写入全部 `src`，必要时扩容，返回写入字节数。
    fn write(&mut self, src: &[u8]) -> Result<usize>;

    /// 查找 `[from_index, write_position)` 内首个满足谓词的下标。
    fn index_of_where(&self, predicate: &dyn Fn(u8) -> bool, from_index: usize) -> Option<usize>;

    /// 查找 `[from_index, write_position)` 内首个等于 `byte` 的下标。
    fn index_of(&self, byte: u8, from_index: usize) -> Option<usize> {
        self.index_of_where(&|candidate| candidate == byte, from_index)
    }

    /// 自 `min(from_index, write_position - 1)` 向前查找最后一个等于 `byte` 的下标。
    fn last_index_of(&self, byte: u8, from_index: usize) -> Option<usize>;

    /// 复制 `[start, end)` 区间为新的非池化缓冲，要求 `start <= end <= write_position`。
    ///
    /// 切片与父缓冲的生命周期完全独立，释放父缓冲不会影响切片内容。
    fn slice(&self, start: usize, end: usize) -> Result<Box<dyn DataBuffer>>;

    /// 拆出 `[0, index)` 前缀作为新的非池化缓冲，本缓冲保留剩余部分且游标相应左移。
    fn split(&mut self, index: usize) -> Result<Box<dyn DataBuffer>>;

    /// 可读区间 `[read_position, write_position)` 的只读视图。
    ///
    /// 视图存活期间池化实现持有内部锁，调用方不得跨 `.await` 或在持有期间访问同一缓冲。
    fn readable_view(&self) -> Result<ByteView<'_>>;

    /// 可写区间 `[write_position, capacity)` 的可变视图，写入后需调用
    /// [`advance_write_position`](Self::advance_write_position) 宣告写入量。
    fn writable_view(&mut self) -> Result<ByteViewMut<'_>>;

    /// 宣告通过 [`writable_view`](Self::writable_view) 写入的字节数。
    fn advance_write_position(&mut self, len: usize) -> Result<()>;

    /// 复制可读区间为 [`Bytes`]，不移动游标。
    fn to_bytes(&self) -> Result<Bytes>;

    /// 引用计数能力探测；非池化实现返回 `None`。
    fn as_pooled(&self) -> Option<&dyn PooledBuffer> {
        None
    }
}

/// 池化缓冲的引用计数能力。
///
/// # 契约说明（What）
/// - 新建缓冲 `ref_count == 1`；
/// - [`retain`](Self::retain) 在计数为 0 时返回 `IllegalState`，否则递增；
/// - [`release`](Self::release) 递减计数；归零时后备存储恰好归还池一次，并返回 `Ok(true)`；
///   计数已为 0 时返回 `IllegalState`；
/// - 多线程并发 retain/release 对计数是原子的。
pub trait PooledBuffer: DataBuffer {
    /// 当前引用计数。
    fn ref_count(&self) -> usize;

    /// 缓冲是否仍然有效。
    fn is_allocated(&self) -> bool {
        self.ref_count() > 0
    }

    /// 引用计数加一。
    fn retain(&self) -> Result<()>;

    /// 引用计数减一；归零时回收后备存储并返回 `true`。
    fn release(&self) -> Result<bool>;
}

/// 可读区间的只读视图。
pub struct ByteView<'a> {
    inner: ViewInner<'a>,
}

enum ViewInner<'a> {
    Slice(&'a [u8]),
    Locked(MutexGuard<'a, Option<ByteStore>>),
}

impl<'a> ByteView<'a> {
    /// 以借用切片构造视图，供自定义实现使用。
    pub fn from_slice(slice: &'a [u8]) -> Self {
        Self {
            inner: ViewInner::Slice(slice),
        }
    }

    pub(crate) fn locked(guard: MutexGuard<'a, Option<ByteStore>>) -> Self {
        Self {
            inner: ViewInner::Locked(guard),
        }
    }
}

impl Deref for ByteView<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.inner {
            ViewInner::Slice(slice) => slice,
            ViewInner::Locked(guard) => (**guard)
                .as_ref()
                .map(ByteStore::readable)
                .unwrap_or_default(),
        }
    }
}

impl fmt::Debug for ByteView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteView").field("len", &self.len()).finish()
    }
}

/// 可写区间的可变视图。
pub struct ByteViewMut<'a> {
    inner: ViewMutInner<'a>,
}

enum ViewMutInner<'a> {
    Slice(&'a mut [u8]),
    Locked(MutexGuard<'a, Option<ByteStore>>),
}

impl<'a> ByteViewMut<'a> {
    /// 以可变切片构造视图，供自定义实现使用。
    pub fn from_slice(slice: &'a mut [u8]) -> Self {
        Self {
            inner: ViewMutInner::Slice(slice),
        }
    }

    pub(crate) fn locked(guard: MutexGuard<'a, Option<ByteStore>>) -> Self {
        Self {
            inner: ViewMutInner::Locked(guard),
        }
    }
}

impl Deref for ByteViewMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.inner {
            ViewMutInner::Slice(slice) => slice,
            ViewMutInner::Locked(guard) => (**guard)
                .as_ref()
                .map(ByteStore::writable)
                .unwrap_or_default(),
        }
    }
}

impl DerefMut for ByteViewMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match &mut self.inner {
            ViewMutInner::Slice(slice) => slice,
            ViewMutInner::Locked(guard) => (**guard)
                .as_mut()
                .map(ByteStore::writable_mut)
                .unwrap_or_default(),
        }
    }
}

impl fmt::Debug for ByteViewMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteViewMut").field("len", &self.len()).finish()
    }
}

/// `DataBuffer` 的便捷扩展：文本读写、缓冲间搬运与 `std::io` 适配。
pub trait DataBufferExt: DataBuffer {
    /// 以 `charset` 编码文本后写入。
    fn write_str(&mut self, text: &str, charset: Charset) -> Result<usize> {
        let encoded = charset.encode(text)?;
        self.write(&encoded)
    }

    /// 以 `charset` 解码可读区间，不移动游标。
    fn readable_to_string(&self, charset: Charset) -> Result<String> {
        let view = self.readable_view()?;
        charset.decode(&view)
    }

    /// 解码全部可读字节并推进读指针至写指针。
    fn read_to_string(&mut self, charset: Charset) -> Result<String> {
        let text = self.readable_to_string(charset)?;
        let end = self.write_position();
        self.set_read_position(end)?;
        Ok(text)
    }

    /// 将 `src` 的全部可读字节追加到本缓冲，并推进 `src` 的读指针。
    fn write_buffer(&mut self, src: &mut dyn DataBuffer) -> Result<usize> {
        let written = if self.as_pooled().is_some() && src.as_pooled().is_some() {
            // 两个句柄可能指向同一逻辑缓冲，先拷出以免在同一把锁上自旋。
            let bytes = src.to_bytes()?;
            self.write(&bytes)?
        } else {
            let view = src.readable_view()?;
            self.write(&view)?
        };
        let position = src.read_position() + written;
        src.set_read_position(position)?;
        Ok(written)
    }

    /// 返回推进读指针的 [`io::Read`] 适配器。
    fn reader(&mut self) -> BufferReader<'_, Self> {
        BufferReader { buffer: self }
    }

    /// 返回推进写指针的 [`io::Write`] 适配器。
    fn writer(&mut self) -> BufferWriter<'_, Self> {
        BufferWriter { buffer: self }
    }
}

impl<B: DataBuffer + ?Sized> DataBufferExt for B {}

/// [`io::Read`] 适配器，读取即推进缓冲读指针。
#[derive(Debug)]
pub struct BufferReader<'a, B: ?Sized> {
    buffer: &'a mut B,
}

impl<B: DataBuffer + ?Sized> io::Read for BufferReader<'_, B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.buffer.read(buf).map_err(io::Error::from)
    }
}

/// [`io::Write`] 适配器，写入即推进缓冲写指针。
#[derive(Debug)]
pub struct BufferWriter<'a, B: ?Sized> {
    buffer: &'a mut B,
}

impl<B: DataBuffer + ?Sized> io::Write for BufferWriter<'_, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.write(buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 池化缓冲失效时的统一错误。
pub(crate) fn released_error(operation: &'static str) -> BufferError {
    BufferError::illegal_state(operation, "buffer has been released (refCnt: 0)")
}
