//! 上游失败分类
//!
//! 重试策略的核心：同一个函数决定失败是凭证级（限流）、
//! 模型级（模型不可用）还是普通的临时错误。

use serde::Serialize;

/// 视为限流/配额问题的关键词（小写匹配）
const RATE_LIMIT_MARKERS: &[&str] = &[
    "quota",
    "rate limit",
    "rate_limit",
    "resource exhausted",
    "quota exceeded",
    "billing",
    "permission denied",
];

/// 视为模型不可用的关键词（小写匹配）
const MODEL_UNAVAILABLE_MARKERS: &[&str] = &["not found", "not supported"];

/// 失败类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 凭证被限流 - 冷却该凭证并切换到下一个凭证
    RateLimited,
    /// 模型不存在或不支持 - 同一凭证切换到下一个模型
    ModelUnavailable,
    /// 其他错误 - 切换到下一个模型
    Transient,
}

/// 对非 2xx 的上游响应分类
///
/// - 429 / 403，或消息包含配额、限流、计费、权限相关关键词 -> `RateLimited`
/// - 消息包含 "not found" / "not supported" -> `ModelUnavailable`
/// - 其余 -> `Transient`
pub fn classify_failure(status: u16, message: &str) -> FailureKind {
    let msg = message.to_lowercase();

    if status == 429
        || status == 403
        || RATE_LIMIT_MARKERS.iter().any(|marker| msg.contains(marker))
    {
        return FailureKind::RateLimited;
    }

    if MODEL_UNAVAILABLE_MARKERS
        .iter()
        .any(|marker| msg.contains(marker))
    {
        return FailureKind::ModelUnavailable;
    }

    FailureKind::Transient
}
