use std::{borrow::Cow, io};

use thiserror::Error;

/// 稳定错误码集合，遵循 `<领域>.<语义>` 命名约定，便于日志与指标侧统一聚合。
pub mod codes {
    /// 池化缓冲在引用计数归零后仍被访问、保留或释放。
    pub const BUFFER_ILLEGAL_STATE: &str = "buffer.illegal_state";
    /// 读写指针、切片或随机访问越界。
    pub const BUFFER_INDEX_OUT_OF_RANGE: &str = "buffer.index_out_of_range";
    /// 后备存储分配或扩容失败（资源耗尽）。
    pub const BUFFER_ALLOCATION: &str = "buffer.allocation";
    /// 数据源或数据汇读写失败。
    pub const TRANSPORT_IO: &str = "transport.io";
    /// 值无法编码为字节。
    pub const PROTOCOL_ENCODE: &str = "protocol.encode";
    /// 字节无法解码为值。
    pub const PROTOCOL_DECODE: &str = "protocol.decode";
    /// 聚合字节数超出配置上限。
    pub const PROTOCOL_BUDGET_EXCEEDED: &str = "protocol.budget_exceeded";
}

/// 缓冲与编解码流水线共享的统一错误域。
///
/// # 设计背景（Why）
/// - 缓冲误用、越界、分配失败、I/O 故障与编解码失败会沿同一条流式链路向上传播，
///   合流为单一枚举后，调用方只需匹配一次即可决定降级策略；
/// - 每个变体映射到稳定错误码（见 [`codes`]），与日志、告警的检索口径保持一致。
///
/// # 契约说明（What）
/// - 任何返回本错误的路径都已在本地完成缓冲释放，调用方无需再为“失败元素”补做回收；
/// - `Io` 变体通过 `source()` 暴露原始 [`io::Error`]。
#[derive(Debug, Error)]
pub enum BufferError {
    /// 池化缓冲已失效或引用计数不满足操作前提。
    #[error("illegal buffer state in `{operation}`: {detail}")]
    IllegalState {
        /// 触发错误的操作名。
        operation: &'static str,
        /// 面向排障人员的描述。
        detail: Cow<'static, str>,
    },
    /// 指针、切片或索引越界。
    #[error("index out of range in `{operation}`: {detail}")]
    IndexOutOfRange {
        /// 触发错误的操作名。
        operation: &'static str,
        /// 越界的具体数值描述。
        detail: String,
    },
    /// 后备存储无法分配或扩容。
    #[error("cannot allocate {requested} bytes: {detail}")]
    Allocation {
        /// 请求的容量。
        requested: usize,
        /// 失败原因。
        detail: Cow<'static, str>,
    },
    /// 数据源 / 数据汇 I/O 失败。
    #[error("I/O failure in `{operation}`: {source}")]
    Io {
        /// 触发错误的操作名。
        operation: &'static str,
        /// 底层 I/O 错误。
        #[source]
        source: io::Error,
    },
    /// 编码失败。
    #[error("encoding failed: {0}")]
    Encoding(Cow<'static, str>),
    /// 解码失败。
    #[error("decoding failed: {0}")]
    Decoding(Cow<'static, str>),
    /// 聚合数据超过内存上限。
    #[error("exceeded limit of {limit} bytes to buffer")]
    LimitExceeded {
        /// 配置的上限字节数。
        limit: usize,
    },
}

impl BufferError {
    /// 构造 `IllegalState` 错误。
    pub fn illegal_state(operation: &'static str, detail: impl Into<Cow<'static, str>>) -> Self {
        Self::IllegalState {
            operation,
            detail: detail.into(),
        }
    }

    /// 构造 `IndexOutOfRange` 错误。
    pub fn index_out_of_range(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::IndexOutOfRange {
            operation,
            detail: detail.into(),
        }
    }

    /// 构造 `Allocation` 错误。
    pub fn allocation(requested: usize, detail: impl Into<Cow<'static, str>>) -> Self {
        Self::Allocation {
            requested,
            detail: detail.into(),
        }
    }

    /// 包装底层 I/O 错误。
    pub fn io(operation: &'static str, source: io::Error) -> Self {
        Self::Io { operation, source }
    }

    /// 构造 `Encoding` 错误。
    pub fn encoding(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Encoding(message.into())
    }

    /// 构造 `Decoding` 错误。
    pub fn decoding(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Decoding(message.into())
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::IllegalState { .. } => codes::BUFFER_ILLEGAL_STATE,
            Self::IndexOutOfRange { .. } => codes::BUFFER_INDEX_OUT_OF_RANGE,
            Self::Allocation { .. } => codes::BUFFER_ALLOCATION,
            Self::Io { .. } => codes::TRANSPORT_IO,
            Self::Encoding(_) => codes::PROTOCOL_ENCODE,
            Self::Decoding(_) => codes::PROTOCOL_DECODE,
            Self::LimitExceeded { .. } => codes::PROTOCOL_BUDGET_EXCEEDED,
        }
    }
}

/// 供 `std::io::Read`/`Write` 适配器回传错误；`Io` 变体还原为原始错误。
impl From<BufferError> for io::Error {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::Io { source, .. } => source,
            other => io::Error::other(other),
        }
    }
}

/// 框架统一的结果别名。
pub type Result<T, E = BufferError> = core::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_domain_reason_convention() {
        let errors = [
            BufferError::illegal_state("release", "refCnt: 0"),
            BufferError::index_out_of_range("slice", "end 9 > write position 4"),
            BufferError::allocation(usize::MAX, "exceeds max capacity"),
            BufferError::io("read_stream", io::Error::other("boom")),
            BufferError::encoding("unmappable"),
            BufferError::decoding("truncated"),
            BufferError::LimitExceeded { limit: 8 },
        ];
        for err in &errors {
            let (domain, reason) = err.code().split_once('.').expect("code has a dot");
            assert!(!domain.is_empty() && !reason.is_empty());
        }
    }

    #[test]
    fn io_variant_round_trips_into_io_error() {
        let err = BufferError::io("write_stream", io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::BrokenPipe);
    }
}
