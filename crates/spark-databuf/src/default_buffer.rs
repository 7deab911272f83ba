use bytes::Bytes;

use crate::{
    buffer::{ByteView, ByteViewMut, DataBuffer},
    config::{DEFAULT_INITIAL_CAPACITY, GrowthPolicy},
    error::Result,
    store::ByteStore,
};

/// 堆上分配的非池化缓冲。
///
/// # 契约说明（What）
/// - 不参与引用计数：[`as_pooled`](DataBuffer::as_pooled) 返回 `None`，
///   因而 [`utils::release`](crate::utils::release) 对其恒为空操作，内存随值一同释放；
/// - [`wrap`](Self::wrap) 零拷贝装饰 `Bytes`，仅在后续写入且字节仍被共享时才复制。
#[derive(Debug)]
pub struct DefaultDataBuffer {
    store: ByteStore,
    growth: GrowthPolicy,
}

impl Default for DefaultDataBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_INITIAL_CAPACITY)
    }
}

impl DefaultDataBuffer {
    /// 以默认扩容策略分配 `capacity` 字节的空缓冲。
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_store(ByteStore::with_capacity(capacity), GrowthPolicy::default())
    }

    /// 以指定扩容策略分配空缓冲。
    pub fn with_policy(capacity: usize, growth: GrowthPolicy) -> Self {
        Self::from_store(ByteStore::with_capacity(capacity), growth)
    }

    /// 零拷贝包装：`read = 0`，`write = capacity = bytes.len()`。
    pub fn wrap(bytes: Bytes) -> Self {
        Self::from_store(ByteStore::wrap(bytes), GrowthPolicy::default())
    }

    pub(crate) fn wrap_with_policy(bytes: Bytes, growth: GrowthPolicy) -> Self {
        Self::from_store(ByteStore::wrap(bytes), growth)
    }

    pub(crate) fn from_store(store: ByteStore, growth: GrowthPolicy) -> Self {
        Self { store, growth }
    }

    /// 丢弃已读字节并把剩余可读区间搬移到起点，回收前部空间。
    pub fn discard_read_bytes(&mut self) {
        self.store.discard_read_bytes();
    }

    /// 清空内容，游标归零，容量不变。
    pub fn clear(&mut self) {
        self.store.clear();
    }
}

impl DataBuffer for DefaultDataBuffer {
    fn read_position(&self) -> usize {
        self.store.read_position()
    }

    fn set_read_position(&mut self, position: usize) -> Result<()> {
        self.store.set_read_position(position)
    }

    fn write_position(&self) -> usize {
        self.store.write_position()
    }

    fn set_write_position(&mut self, position: usize) -> Result<()> {
        self.store.set_write_position(position)
    }

    fn capacity(&self) -> usize {
        self.store.capacity()
    }

    fn set_capacity(&mut self, capacity: usize) -> Result<()> {
        self.store.set_capacity(capacity, &self.growth)
    }

    fn ensure_writable(&mut self, additional: usize) -> Result<()> {
        self.store.ensure_writable(additional, &self.growth).map(drop)
    }

    fn get_byte(&self, index: usize) -> Result<u8> {
        self.store.get_byte(index)
    }

    fn read_byte(&mut self) -> Result<u8> {
        self.store.read_byte()
    }

    fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        Ok(self.store.read(dst))
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.store.write(&[byte], &self.growth).map(drop)
    }

    fn write(&mut self, src: &[u8]) -> Result<usize> {
        self.store.write(src, &self.growth).map(|(written, _)| written)
    }

    fn index_of_where(&self, predicate: &dyn Fn(u8) -> bool, from_index: usize) -> Option<usize> {
        self.store.index_of_where(predicate, from_index)
    }

    fn last_index_of(&self, byte: u8, from_index: usize) -> Option<usize> {
        self.store.last_index_of(byte, from_index)
    }

    fn slice(&self, start: usize, end: usize) -> Result<Box<dyn DataBuffer>> {
        let bytes = self.store.slice_copy(start, end)?;
        Ok(Box::new(Self::wrap_with_policy(bytes, self.growth)))
    }

    fn split(&mut self, index: usize) -> Result<Box<dyn DataBuffer>> {
        let prefix = self.store.split(index)?;
        Ok(Box::new(Self::from_store(prefix, self.growth)))
    }

    fn readable_view(&self) -> Result<ByteView<'_>> {
        Ok(ByteView::from_slice(self.store.readable()))
    }

    fn writable_view(&mut self) -> Result<ByteViewMut<'_>> {
        Ok(ByteViewMut::from_slice(self.store.writable_mut()))
    }

    fn advance_write_position(&mut self, len: usize) -> Result<()> {
        self.store.advance_write_position(len)
    }

    fn to_bytes(&self) -> Result<Bytes> {
        Ok(self.store.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DataBufferExt;
    use crate::charset::Charset;
    use std::io::{Read, Write};

    #[test]
    fn write_grows_and_preserves_existing_bytes() {
        let mut buffer = DefaultDataBuffer::with_capacity(4);
        buffer.write(b"abcd").expect("写入初始数据");
        buffer.write(b"efgh").expect("写入触发扩容");
        assert_eq!(buffer.capacity(), 64);
        assert_eq!(buffer.to_bytes().unwrap(), Bytes::from_static(b"abcdefgh"));
    }

    #[test]
    fn slice_is_independent_of_parent() {
        let mut parent = DefaultDataBuffer::with_capacity(8);
        parent.write(b"hello").unwrap();
        let slice = parent.slice(1, 4).expect("切片");
        parent.set_write_position(0).unwrap();
        parent.write(b"XXXXX").unwrap();
        assert_eq!(slice.readable_to_string(Charset::Utf8).unwrap(), "ell");
        assert!(slice.as_pooled().is_none());
    }

    #[test]
    fn io_adapters_share_cursors() {
        let mut buffer = DefaultDataBuffer::with_capacity(4);
        write!(buffer.writer(), "ping-{}", 42).expect("io::Write 适配器写入");
        assert_eq!(buffer.write_position(), 7);

        let mut head = [0u8; 4];
        buffer.reader().read_exact(&mut head).expect("io::Read 适配器读取");
        assert_eq!(&head, b"ping");
        assert_eq!(buffer.read_position(), 4);
    }

    #[test]
    fn writable_view_then_advance() {
        let mut buffer = DefaultDataBuffer::with_capacity(8);
        {
            let mut view = buffer.writable_view().unwrap();
            view[..3].copy_from_slice(b"xyz");
        }
        buffer.advance_write_position(3).unwrap();
        assert!(buffer.advance_write_position(6).is_err());
        assert_eq!(&*buffer.readable_view().unwrap(), b"xyz");
    }

    #[test]
    fn discard_read_bytes_reclaims_front() {
        let mut buffer = DefaultDataBuffer::with_capacity(8);
        buffer.write(b"abcdef").unwrap();
        buffer.set_read_position(4).unwrap();
        buffer.discard_read_bytes();
        assert_eq!(buffer.read_position(), 0);
        assert_eq!(buffer.writable_byte_count(), 6);
    }
}
