//! 服务器工具函数
//!
//! 包含请求校验、HTML 转义和 JSON 错误响应构建。

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// 页面文本最小字符数（去除首尾空白后）
pub const PAGE_TEXT_MIN_CHARS: usize = 50;
/// 页面文本最大字符数（去除首尾空白后）
pub const PAGE_TEXT_MAX_CHARS: usize = 1500;

const PAGE_TEXT_MESSAGE: &str = "Page text must be between 50 and 1500 characters";

/// 单个字段校验错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub msg: &'static str,
    pub path: &'static str,
    pub location: &'static str,
}

impl FieldError {
    /// `pageText` 字段错误
    pub fn page_text() -> Self {
        Self {
            kind: "field",
            msg: PAGE_TEXT_MESSAGE,
            path: "pageText",
            location: "body",
        }
    }
}

/// 校验页面文本：去空白、检查字符数、HTML 转义
///
/// 返回可直接放入提示词的文本。
pub fn validate_page_text(raw: &str) -> Result<String, FieldError> {
    let trimmed = raw.trim();
    let chars = trimmed.chars().count();

    if !(PAGE_TEXT_MIN_CHARS..=PAGE_TEXT_MAX_CHARS).contains(&chars) {
        return Err(FieldError::page_text());
    }

    Ok(escape_html(trimmed))
}

/// 转义 HTML 特殊字符
pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            '/' => escaped.push_str("&#x2F;"),
            '\\' => escaped.push_str("&#x5C;"),
            '`' => escaped.push_str("&#96;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// 构建 400 校验失败响应
pub fn validation_error_response(errors: Vec<FieldError>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "error": "Validation failed",
            "details": errors
        })),
    )
        .into_response()
}

/// 构建 500 响应
pub fn internal_error_response(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "error": "Internal server error",
            "message": message
        })),
    )
        .into_response()
}

/// 构建 404 响应
pub fn not_found_response() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": "Not found",
            "message": "The requested endpoint does not exist"
        })),
    )
        .into_response()
}
