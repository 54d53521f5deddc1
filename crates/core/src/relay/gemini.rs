//! Gemini generateContent 协议
//!
//! 负责构造 URL、请求体和提示词，并从响应中取出文本或错误消息。

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::credential::Credential;

/// 默认上游地址
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// 默认 API 版本
pub const DEFAULT_API_VERSION: &str = "v1";

/// 默认候选模型（按优先级排列）
pub const DEFAULT_MODELS: &[&str] = &[
    "gemini-2.5-flash",
    "gemini-2.0-flash-exp",
    "gemini-1.5-flash",
    "gemini-1.5-pro",
    "gemini-pro",
];

/// 上游端点配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeminiEndpoint {
    pub base_url: String,
    pub api_version: String,
}

impl Default for GeminiEndpoint {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }
}

impl GeminiEndpoint {
    /// 构建 generateContent URL
    ///
    /// 结果中带有 API Key，不能写入日志。
    pub fn generate_content_url(&self, model: &str, credential: &Credential) -> String {
        format!(
            "{}/{}/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.api_version.trim_matches('/'),
            model,
            credential.expose_secret()
        )
    }
}

/// 根据页面文本构造提示词
pub fn build_prompt(page_text: &str) -> String {
    format!(
        "Generate 3 short, polite, professional LinkedIn reply suggestions (1-3 sentences each) \
         for this post content: {page_text}. Make them engaging and relevant. \
         Format each reply on a new line, numbered 1, 2, 3."
    )
}

/// 构造 generateContent 请求体
pub fn build_request_body(prompt: &str) -> Value {
    json!({
        "contents": [{
            "parts": [{
                "text": prompt
            }]
        }]
    })
}

/// 从成功响应中取出第一个候选的文本
pub fn extract_text(body: &Value) -> Option<String> {
    body.get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .get(0)?
        .get("text")?
        .as_str()
        .map(str::to_string)
}

/// 从错误响应中取出错误消息，缺失时回退为 `API error: {status}`
pub fn extract_error_message(status: u16, body: Option<&Value>) -> String {
    body.and_then(|b| b.get("error"))
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("API error: {status}"))
}
