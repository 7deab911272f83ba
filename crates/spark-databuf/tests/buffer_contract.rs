//! `buffer_contract` 集成测试：`DataBuffer` 游标不变式、扩容、包装与查找语义。
//!
//! # 测试总览（Why）
//! - 以 Proptest 生成任意操作序列，断言每一步之后（无论成功或失败）都满足
//!   `0 <= read_position <= write_position <= capacity`；
//! - 同一组断言同时作用于堆实现与池化实现，保证两者契约一致；
//! - 其余用例覆盖 `wrap` 零拷贝包装、扩容保留内容、切片越界与文本编解码。

use bytes::Bytes;
use proptest::prelude::*;
use spark_databuf::{
    BufferError, Charset, DataBuffer, DataBufferExt, DataBufferFactory, DefaultDataBufferFactory,
    PooledDataBufferFactory, utils,
};

#[derive(Debug, Clone)]
enum Op {
    Write(Vec<u8>),
    WriteByte(u8),
    Read(usize),
    ReadByte,
    SetRead(usize),
    SetWrite(usize),
    SetCapacity(usize),
    Ensure(usize),
    Split(usize),
    Slice(usize, usize),
    Advance(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..96).prop_map(Op::Write),
        any::<u8>().prop_map(Op::WriteByte),
        (0usize..64).prop_map(Op::Read),
        Just(Op::ReadByte),
        (0usize..160).prop_map(Op::SetRead),
        (0usize..160).prop_map(Op::SetWrite),
        (0usize..256).prop_map(Op::SetCapacity),
        (0usize..128).prop_map(Op::Ensure),
        (0usize..160).prop_map(Op::Split),
        ((0usize..160), (0usize..160)).prop_map(|(a, b)| Op::Slice(a, b)),
        (0usize..32).prop_map(Op::Advance),
    ]
}

fn apply(buffer: &mut dyn DataBuffer, op: &Op) {
    // 结果可能成功也可能失败，这里只关心失败不会破坏不变式。
    let _ = match op {
        Op::Write(bytes) => buffer.write(bytes).map(drop),
        Op::WriteByte(byte) => buffer.write_byte(*byte),
        Op::Read(len) => buffer.read(&mut vec![0; *len]).map(drop),
        Op::ReadByte => buffer.read_byte().map(drop),
        Op::SetRead(pos) => buffer.set_read_position(*pos),
        Op::SetWrite(pos) => buffer.set_write_position(*pos),
        Op::SetCapacity(cap) => buffer.set_capacity(*cap),
        Op::Ensure(len) => buffer.ensure_writable(*len),
        Op::Split(index) => buffer.split(*index).map(drop),
        Op::Slice(start, end) => buffer.slice(*start, *end).map(drop),
        Op::Advance(len) => buffer.advance_write_position(*len),
    };
}

fn assert_invariant(buffer: &dyn DataBuffer) -> Result<(), TestCaseError> {
    let (read, write, capacity) = (
        buffer.read_position(),
        buffer.write_position(),
        buffer.capacity(),
    );
    prop_assert!(read <= write, "read {} > write {}", read, write);
    prop_assert!(write <= capacity, "write {} > capacity {}", write, capacity);
    prop_assert_eq!(buffer.readable_byte_count(), write - read);
    prop_assert_eq!(buffer.writable_byte_count(), capacity - write);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// 任意操作序列之后，堆缓冲与池化缓冲都满足游标不变式。
    #[test]
    fn cursor_invariant_holds_after_any_sequence(
        initial in 0usize..64,
        ops in prop::collection::vec(arb_op(), 0..48),
    ) {
        let heap = DefaultDataBufferFactory::new();
        let pooled = PooledDataBufferFactory::new();
        for factory in [&heap as &dyn DataBufferFactory, &pooled] {
            let mut buffer = factory.allocate_buffer(Some(initial)).expect("分配");
            for op in &ops {
                apply(buffer.as_mut(), op);
                assert_invariant(buffer.as_ref())?;
            }
            utils::release(&*buffer).expect("释放");
        }
        prop_assert_eq!(pooled.pool().statistics().active_leases, 0);
    }

    /// 无论分几次写入、触发多少次扩容，可读内容都等于写入内容的拼接。
    #[test]
    fn growth_preserves_written_bytes(
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..300), 0..16),
    ) {
        let factory = PooledDataBufferFactory::new();
        let mut buffer = factory.allocate_buffer(Some(1)).expect("分配");
        let mut expected = Vec::new();
        for chunk in &chunks {
            prop_assert_eq!(buffer.write(chunk).expect("写入"), chunk.len());
            expected.extend_from_slice(chunk);
        }
        let copied = buffer.to_bytes().expect("复制");
        prop_assert_eq!(copied.as_ref(), expected.as_slice());
        utils::release(&*buffer).expect("释放");
    }
}

/// `wrap` 零拷贝包装：`read = 0`、`write = len`，读出即原字节。
#[test]
fn wrap_round_trip() {
    let factory = DefaultDataBufferFactory::new();
    let source = Bytes::from_static(b"zero-copy");
    let mut buffer = factory.wrap(source.clone());
    assert_eq!(buffer.read_position(), 0);
    assert_eq!(buffer.write_position(), source.len());
    assert_eq!(buffer.capacity(), source.len());
    let mut out = vec![0; source.len()];
    assert_eq!(buffer.read(&mut out).unwrap(), source.len());
    assert_eq!(out, source);
    assert_eq!(buffer.read(&mut out).unwrap(), 0, "无可读数据时返回 0 而非错误");
}

/// 写入 `wrap` 得到的缓冲不会改动被包装的原始字节。
#[test]
fn writing_into_wrapped_buffer_copies_on_write() {
    let factory = PooledDataBufferFactory::new();
    let source = Bytes::from_static(b"abc");
    let mut buffer = factory.wrap(source.clone());
    buffer.write(b"def").expect("写入触发扩容");
    assert_eq!(buffer.to_bytes().unwrap().as_ref(), b"abcdef");
    assert_eq!(source.as_ref(), b"abc");
}

/// 切片区间越界返回 `IndexOutOfRange`，且不改变任何游标。
#[test]
fn slice_bounds_are_checked() {
    let factory = DefaultDataBufferFactory::new();
    let buffer = factory.wrap_slice(b"abcd");
    for (start, end) in [(0, 5), (3, 2), (5, 5)] {
        let err = buffer.slice(start, end).expect_err("越界切片");
        assert!(matches!(err, BufferError::IndexOutOfRange { .. }), "{err}");
    }
    let empty = buffer.slice(4, 4).expect("空切片合法");
    assert_eq!(empty.readable_byte_count(), 0);
    assert_eq!((buffer.read_position(), buffer.write_position()), (0, 4));
}

/// 查找只覆盖 `[from, write_position)`。
#[test]
fn index_of_searches_written_region_only() {
    let factory = DefaultDataBufferFactory::new();
    let mut buffer = factory.allocate_buffer(Some(32)).unwrap();
    buffer.write(b"a,b,c").unwrap();
    assert_eq!(buffer.index_of(b',', 0), Some(1));
    assert_eq!(buffer.index_of(b',', 2), Some(3));
    assert_eq!(buffer.index_of(b',', 4), None);
    assert_eq!(buffer.index_of(0, 0), None, "未写入区域的零字节不可见");
    assert_eq!(buffer.last_index_of(b',', usize::MAX), Some(3));
    assert_eq!(buffer.index_of_where(&|b| b.is_ascii_alphabetic(), 1), Some(2));
    assert!(buffer.get_byte(5).is_err());
    assert_eq!(buffer.get_byte(4).unwrap(), b'c');
}

/// 文本读写遵循字符集，读取推进读指针。
#[test]
fn text_round_trip_honours_charset() {
    let factory = DefaultDataBufferFactory::new();
    let mut buffer = factory.allocate_buffer(None).unwrap();
    buffer.write_str("naïve", Charset::Iso8859_1).unwrap();
    assert_eq!(buffer.readable_byte_count(), 5);
    assert_eq!(buffer.read_to_string(Charset::Iso8859_1).unwrap(), "naïve");
    assert_eq!(buffer.readable_byte_count(), 0);

    buffer.write(&[0xFF]).unwrap();
    let err = buffer.readable_to_string(Charset::Utf8).unwrap_err();
    assert_eq!(err.code(), spark_databuf::codes::PROTOCOL_DECODE);
}

/// 单块池租借：超过配额的分配以 `Allocation` 失败，释放后恢复。
#[test]
fn pool_quota_recovers_after_release() {
    let config = spark_databuf::DataBufferConfig {
        pool: spark_databuf::PoolConfig {
            max_active_bytes: Some(128),
            ..Default::default()
        },
        ..Default::default()
    };
    let factory = PooledDataBufferFactory::with_config(config).unwrap();
    let first = factory.allocate_buffer(Some(100)).unwrap();
    assert!(matches!(
        factory.allocate_buffer(Some(100)),
        Err(BufferError::Allocation { .. })
    ));
    utils::release(&*first).unwrap();
    let second = factory.allocate_buffer(Some(100)).expect("释放后应可复用");
    utils::release(&*second).unwrap();
    let stats = factory.pool().statistics();
    assert_eq!(stats.failed_acquisitions, 1);
    assert_eq!(stats.pool_misses, 1);
}
