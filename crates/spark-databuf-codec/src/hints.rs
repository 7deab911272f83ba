use std::{borrow::Cow, collections::BTreeMap, fmt};

use serde::Deserialize;
use spark_databuf::Charset;

/// 内容类型（MIME 媒体类型），例如 `text/plain; charset=utf-8`。
///
/// # 契约说明（What）
/// - 只做轻量解析：`essence` 为 `;` 之前的 `type/subtype`，参数按 `name=value` 读取；
/// - 匹配不区分大小写，`*/*` 与 `type/*` 作为通配处理；
/// - 不校验语法合法性，非法字符串只会在匹配时失配。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct ContentType(Cow<'static, str>);

impl ContentType {
    /// 任意内容类型。
    pub const ALL: ContentType = ContentType::from_static("*/*");
    /// 纯文本。
    pub const TEXT_PLAIN: ContentType = ContentType::from_static("text/plain");
    /// 任意二进制。
    pub const APPLICATION_OCTET_STREAM: ContentType =
        ContentType::from_static("application/octet-stream");

    /// 以静态字符串构造，不分配。
    pub const fn from_static(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }

    /// 以任意字符串构造。
    pub fn new(value: impl Into<Cow<'static, str>>) -> Self {
        Self(value.into())
    }

    /// 原始字符串。
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 去除参数后的 `type/subtype`。
    pub fn essence(&self) -> &str {
        match self.0.split_once(';') {
            Some((essence, _)) => essence.trim(),
            None => self.0.trim(),
        }
    }

    /// 读取参数值（参数名不区分大小写，值去除首尾引号）。
    pub fn parameter(&self, name: &str) -> Option<&str> {
        let (_, params) = self.0.split_once(';')?;
        params.split(';').find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().trim_matches('"'))
        })
    }

    /// `charset` 参数对应的字符集；缺失或无法识别时返回 `None`。
    pub fn charset(&self) -> Option<Charset> {
        self.parameter("charset")?.parse().ok()
    }

    /// 本类型（可能含通配）是否覆盖 `other`。
    pub fn includes(&self, other: &ContentType) -> bool {
        let (Some((ty, sub)), Some((other_ty, other_sub))) =
            (self.essence().split_once('/'), other.essence().split_once('/'))
        else {
            return false;
        };
        if ty == "*" {
            return true;
        }
        ty.eq_ignore_ascii_case(other_ty)
            && (sub == "*" || sub.eq_ignore_ascii_case(other_sub))
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 调用方随编解码请求附带的编组提示。
///
/// # 设计背景（Why）
/// - 编解码器不依赖具体编组库，协作者只能通过一组公认选项影响输出，
///   例如字符集与是否美化输出；未知选项放入 `extra`，由具体编解码器自行解读。
///
/// # 契约说明（What）
/// - 所有字段均可缺省，缺省时字符集为 UTF-8、不美化输出；
/// - 可经 `serde` 从 TOML 等配置源加载，未知字段会被拒绝。
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodecHints {
    /// 文本编解码使用的字符集。
    pub charset: Charset,
    /// 是否以易读格式输出。
    pub pretty_print: bool,
    /// 其余自由选项。
    pub extra: BTreeMap<String, String>,
}

impl CodecHints {
    /// 指定字符集的提示。
    pub fn with_charset(charset: Charset) -> Self {
        Self {
            charset,
            ..Self::default()
        }
    }

    /// 从内容类型的 `charset` 参数推导提示，缺失时回落到 UTF-8。
    pub fn for_content_type(content_type: &ContentType) -> Self {
        Self::with_charset(content_type.charset().unwrap_or_default())
    }

    /// 读取自由选项。
    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }
}
