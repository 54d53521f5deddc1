//! 凭证相关类型定义
//!
//! 定义凭证和凭证池状态等核心类型

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// 指纹保留的尾部字符数
const FINGERPRINT_TAIL: usize = 4;

/// 凭证 - 表示单个上游 API Key
///
/// 凭证本身即身份（作为 map key 使用），不可变。
/// `Debug`/`Display` 只输出指纹，避免密钥出现在日志中。
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    /// 创建新凭证
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// 获取原始密钥（仅用于构造上游请求）
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    /// 不可逆的识别片段：`...` + 末尾 4 个字符
    pub fn fingerprint(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        let start = chars.len().saturating_sub(FINGERPRINT_TAIL);
        let tail: String = chars[start..].iter().collect();
        format!("...{tail}")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.fingerprint()).finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fingerprint())
    }
}

/// 凭证池状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// 总凭证数
    pub total: usize,
    /// 可用凭证数
    pub available: usize,
    /// 冷却中凭证数
    pub cooling_down: usize,
    /// 最早恢复时间（没有冷却中的凭证时为空）
    pub earliest_recovery: Option<DateTime<Utc>>,
}
