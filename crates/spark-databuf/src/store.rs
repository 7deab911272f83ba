//! 双游标字节存储：`DefaultDataBuffer` 与 `PooledDataBuffer` 共享的底层实现。
//!
//! 存储始终满足 `len == capacity`：新增容量以零填充，使 `[write, capacity)` 区间
//! 可以安全地以 `&mut [u8]` 形式暴露给零拷贝读取路径。

use bytes::{Bytes, BytesMut};

use crate::{
    config::GrowthPolicy,
    error::{BufferError, Result},
};

/// 底层字节存储。
///
/// `shared` 为 `Some` 时内容来自 `wrap` 得到的只读字节，`owned` 此时为空；
/// 首次写入把共享字节转换为独占的 `owned` 并清空 `shared`。
#[derive(Debug)]
pub(crate) struct ByteStore {
    owned: BytesMut,
    shared: Option<Bytes>,
    read: usize,
    write: usize,
}

impl ByteStore {
    /// 以给定内存块构造空存储，容量为 `capacity`。
    pub(crate) fn with_block(mut block: BytesMut, capacity: usize) -> Self {
        block.clear();
        block.resize(capacity, 0);
        Self {
            owned: block,
            shared: None,
            read: 0,
            write: 0,
        }
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self::with_block(BytesMut::with_capacity(capacity), capacity)
    }

    /// 零拷贝包装：`read = 0`，`write = capacity = len`。
    pub(crate) fn wrap(bytes: Bytes) -> Self {
        let len = bytes.len();
        Self {
            owned: BytesMut::new(),
            shared: Some(bytes),
            read: 0,
            write: len,
        }
    }

    fn raw(&self) -> &[u8] {
        match &self.shared {
            Some(bytes) => &bytes[..],
            None => &self.owned[..],
        }
    }

    fn owned_mut(&mut self) -> &mut BytesMut {
        if let Some(shared) = self.shared.take() {
            self.owned = shared
                .try_into_mut()
                .unwrap_or_else(|still_shared| BytesMut::from(&still_shared[..]));
        }
        &mut self.owned
    }

    pub(crate) fn read_position(&self) -> usize {
        self.read
    }

    pub(crate) fn write_position(&self) -> usize {
        self.write
    }

    pub(crate) fn capacity(&self) -> usize {
        self.raw().len()
    }

    pub(crate) fn readable(&self) -> &[u8] {
        &self.raw()[self.read..self.write]
    }

    pub(crate) fn writable(&self) -> &[u8] {
        &self.raw()[self.write..]
    }

    pub(crate) fn writable_mut(&mut self) -> &mut [u8] {
        let write = self.write;
        &mut self.owned_mut()[write..]
    }

    pub(crate) fn set_read_position(&mut self, position: usize) -> Result<()> {
        if position > self.write {
            return Err(BufferError::index_out_of_range(
                "set_read_position",
                format!("{position} > write position {}", self.write),
            ));
        }
        self.read = position;
        Ok(())
    }

    pub(crate) fn set_write_position(&mut self, position: usize) -> Result<()> {
        if position < self.read || position > self.capacity() {
            return Err(BufferError::index_out_of_range(
                "set_write_position",
                format!(
                    "{position} outside [{}, {}]",
                    self.read,
                    self.capacity()
                ),
            ));
        }
        self.write = position;
        Ok(())
    }

    /// 保证至少还有 `additional` 字节可写；发生扩容时返回 `true`。
    pub(crate) fn ensure_writable(
        &mut self,
        additional: usize,
        policy: &GrowthPolicy,
    ) -> Result<bool> {
        let needed = self
            .write
            .checked_add(additional)
            .ok_or_else(|| BufferError::allocation(usize::MAX, "requested size overflows"))?;
        if needed <= self.capacity() {
            return Ok(false);
        }
        let new_capacity = policy.next_capacity(needed)?;
        self.owned_mut().resize(new_capacity, 0);
        Ok(true)
    }

    pub(crate) fn set_capacity(&mut self, capacity: usize, policy: &GrowthPolicy) -> Result<()> {
        if capacity > policy.max_capacity {
            return Err(BufferError::allocation(
                capacity,
                format!("exceeds max capacity {}", policy.max_capacity),
            ));
        }
        if capacity < self.write {
            return Err(BufferError::index_out_of_range(
                "set_capacity",
                format!("{capacity} < write position {}", self.write),
            ));
        }
        if capacity < self.capacity() {
            self.owned_mut().truncate(capacity);
        } else {
            self.owned_mut().resize(capacity, 0);
        }
        Ok(())
    }

    pub(crate) fn get_byte(&self, index: usize) -> Result<u8> {
        if index >= self.write {
            return Err(BufferError::index_out_of_range(
                "get_byte",
                format!("index {index} >= write position {}", self.write),
            ));
        }
        Ok(self.raw()[index])
    }

    pub(crate) fn read_byte(&mut self) -> Result<u8> {
        if self.read >= self.write {
            return Err(BufferError::index_out_of_range(
                "read_byte",
                "no readable bytes".to_owned(),
            ));
        }
        let byte = self.raw()[self.read];
        self.read += 1;
        Ok(byte)
    }

    pub(crate) fn read(&mut self, dst: &mut [u8]) -> usize {
        let len = dst.len().min(self.write - self.read);
        dst[..len].copy_from_slice(&self.raw()[self.read..self.read + len]);
        self.read += len;
        len
    }

    /// 写入 `src`，返回 `(写入字节数, 是否扩容)`。
    pub(crate) fn write(&mut self, src: &[u8], policy: &GrowthPolicy) -> Result<(usize, bool)> {
        let grew = self.ensure_writable(src.len(), policy)?;
        if !src.is_empty() {
            let start = self.write;
            self.owned_mut()[start..start + src.len()].copy_from_slice(src);
            self.write += src.len();
        }
        Ok((src.len(), grew))
    }

    pub(crate) fn index_of_where(&self, predicate: &dyn Fn(u8) -> bool, from: usize) -> Option<usize> {
        if from >= self.write {
            return None;
        }
        self.raw()[from..self.write]
            .iter()
            .position(|&b| predicate(b))
            .map(|offset| offset + from)
    }

    pub(crate) fn last_index_of(&self, byte: u8, from: usize) -> Option<usize> {
        if self.write == 0 {
            return None;
        }
        let end = from.min(self.write - 1);
        self.raw()[..=end].iter().rposition(|&b| b == byte)
    }

    pub(crate) fn slice_copy(&self, start: usize, end: usize) -> Result<Bytes> {
        if start > end || end > self.write {
            return Err(BufferError::index_out_of_range(
                "slice",
                format!("[{start}, {end}) not within [0, {}]", self.write),
            ));
        }
        Ok(Bytes::copy_from_slice(&self.raw()[start..end]))
    }

    /// 拆出 `[0, index)` 前缀；本存储保留 `[index, capacity)`，游标整体左移。
    pub(crate) fn split(&mut self, index: usize) -> Result<ByteStore> {
        if index > self.capacity() {
            return Err(BufferError::index_out_of_range(
                "split",
                format!("index {index} > capacity {}", self.capacity()),
            ));
        }
        let (owned, shared) = match &mut self.shared {
            Some(bytes) => (BytesMut::new(), Some(bytes.split_to(index))),
            None => (self.owned.split_to(index), None),
        };
        let prefix = ByteStore {
            owned,
            shared,
            read: self.read.min(index),
            write: self.write.min(index),
        };
        self.read = self.read.saturating_sub(index);
        self.write = self.write.saturating_sub(index);
        Ok(prefix)
    }

    pub(crate) fn advance_write_position(&mut self, len: usize) -> Result<()> {
        let writable = self.capacity() - self.write;
        if len > writable {
            return Err(BufferError::index_out_of_range(
                "advance_write_position",
                format!("{len} > writable byte count {writable}"),
            ));
        }
        self.write += len;
        Ok(())
    }

    /// 丢弃已读字节，将剩余可读区间搬移到起点。
    pub(crate) fn discard_read_bytes(&mut self) {
        if self.read == 0 {
            return;
        }
        let (read, write) = (self.read, self.write);
        self.owned_mut().copy_within(read..write, 0);
        self.write = write - read;
        self.read = 0;
    }

    pub(crate) fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.readable())
    }

    /// 交出底层内存块供池复用；仍被共享的块无法夺回时返回 `None`。
    pub(crate) fn into_block(self) -> Option<BytesMut> {
        match self.shared {
            Some(bytes) => bytes.try_into_mut().ok(),
            None => Some(self.owned),
        }
    }

    /// 清空内容：两个游标归零，容量与内容字节不变。
    pub(crate) fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
    }
}
