//! HTTP 传输层
//!
//! 引擎只依赖 `HttpTransport`：POST 一个 JSON，拿回状态码和 JSON 响应体。

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// 单次上游调用的默认超时
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// 上游响应
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    /// HTTP 状态码
    pub status: u16,
    /// 响应体（不是合法 JSON 时为空）
    pub body: Option<Value>,
}

impl TransportResponse {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// 传输错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("upstream request timed out after {0}s")]
    Timeout(u64),
    #[error("network error: {0}")]
    Network(String),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// 上游 HTTP 客户端抽象
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// POST JSON 请求体
    async fn post_json(&self, url: &str, body: &Value) -> Result<TransportResponse, TransportError>;
}

/// 基于 reqwest 的实现
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// 创建带单次调用超时的传输层
    ///
    /// # Errors
    ///
    /// 客户端构建失败时返回 `TransportError::Client`。
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .user_agent(format!("replycast/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(&self, url: &str, body: &Value) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status().as_u16();
        // 错误响应体可能不是 JSON，按空处理
        let body = match response.bytes().await {
            Ok(bytes) => serde_json::from_slice(&bytes).ok(),
            Err(e) => return Err(self.map_error(e)),
        };

        Ok(TransportResponse { status, body })
    }
}

impl ReqwestTransport {
    /// URL 中带有 API Key，错误信息里必须去掉
    fn map_error(&self, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout(self.timeout.as_secs())
        } else {
            TransportError::Network(error.without_url().to_string())
        }
    }
}
