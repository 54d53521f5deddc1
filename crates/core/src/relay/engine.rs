//! 中转引擎
//!
//! 一次 `generate` 调用把请求转成一到多次上游尝试：
//! 按配置顺序遍历可用凭证，每个凭证内按优先级遍历候选模型，
//! 直到成功或所有组合耗尽。
//!
//! - 限流：冷却该凭证，跳过它剩余的模型，换下一个凭证
//! - 模型不可用 / 临时错误：同一凭证换下一个模型
//!
//! 单次调用内严格串行；凭证池的冷却状态在并发请求间共享。

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::gemini::{
    build_prompt, build_request_body, extract_error_message, extract_text, GeminiEndpoint,
};
use super::plan::AttemptPlan;
use super::transport::{HttpTransport, ReqwestTransport, TransportError};
use crate::clock::{Clock, SystemClock};
use crate::config::RelayConfig;
use crate::credential::{
    classify_failure, CooldownPolicy, Credential, CredentialPool, FailureKind, PoolError,
};

/// 生成结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Generated {
    /// 上游生成的文本
    pub text: String,
    /// 实际使用的模型
    pub model: String,
    /// 使用的凭证指纹（末尾 4 个字符）
    pub credential: String,
}

/// 单次尝试的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success(String),
    RateLimited(String),
    ModelUnavailable(String),
    Transient(String),
}

/// 中转失败（只有终态会离开引擎）
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// 所有凭证都在冷却中，调用方稍后重试
    #[error("All API keys are currently rate-limited. Please try again later.")]
    AllCredentialsCoolingDown {
        total: usize,
        earliest_recovery: Option<DateTime<Utc>>,
    },
    /// 所有凭证/模型组合都失败
    #[error(
        "Unable to connect to upstream API. Tried {credentials_tried} API key(s) and {attempts} model attempt(s). Error: {last_error}"
    )]
    Exhausted {
        credentials_tried: usize,
        attempts: usize,
        last_error: String,
    },
}

/// 引擎构建错误
#[derive(Debug, thiserror::Error)]
pub enum RelayBuildError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// 中转引擎
pub struct RelayEngine {
    pool: Arc<CredentialPool>,
    models: Vec<String>,
    endpoint: GeminiEndpoint,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
}

impl RelayEngine {
    /// 创建引擎（使用系统时钟）
    pub fn new(
        pool: Arc<CredentialPool>,
        models: Vec<String>,
        endpoint: GeminiEndpoint,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            pool,
            models,
            endpoint,
            transport,
            clock: Arc::new(SystemClock),
        }
    }

    /// 从配置创建引擎，使用 reqwest 传输层
    ///
    /// # Errors
    ///
    /// 凭证列表为空或 HTTP 客户端构建失败时返回错误。
    pub fn from_config(config: &RelayConfig) -> Result<Self, RelayBuildError> {
        let pool = CredentialPool::new(
            config.credentials.iter().map(Credential::new),
            CooldownPolicy::from_millis(config.cooldown_ms),
        )?;
        let transport = ReqwestTransport::new(Duration::from_millis(config.upstream_timeout_ms))?;

        Ok(Self::new(
            Arc::new(pool),
            config.models.clone(),
            config.endpoint.clone(),
            Arc::new(transport),
        ))
    }

    /// 替换时钟
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 获取凭证池
    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    /// 获取候选模型
    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// 根据页面文本生成回复建议
    ///
    /// # Errors
    ///
    /// - 没有可用凭证时返回 `RelayError::AllCredentialsCoolingDown`，不发起任何上游调用
    /// - 所有组合都失败时返回 `RelayError::Exhausted`
    pub async fn generate(&self, page_text: &str) -> Result<Generated, RelayError> {
        let credentials = self.pool.available_credentials(self.clock.now());

        if credentials.is_empty() {
            let earliest_recovery = self.pool.earliest_recovery();
            tracing::warn!(
                "[RELAY] 所有 API Key 都在冷却中: total={} earliest_recovery={:?}",
                self.pool.len(),
                earliest_recovery
            );
            return Err(RelayError::AllCredentialsCoolingDown {
                total: self.pool.len(),
                earliest_recovery,
            });
        }

        let body = build_request_body(&build_prompt(page_text));
        let mut plan = AttemptPlan::new(credentials.len(), self.models.len());
        let mut last_error: Option<String> = None;

        while let Some(attempt) = plan.next() {
            let credential = &credentials[attempt.credential];
            let model = &self.models[attempt.model];

            match self.attempt(credential, model, &body).await {
                AttemptOutcome::Success(text) => {
                    tracing::info!(
                        "[RELAY] 请求成功: key={} model={}",
                        credential.fingerprint(),
                        model
                    );
                    return Ok(Generated {
                        text,
                        model: model.clone(),
                        credential: credential.fingerprint(),
                    });
                }
                AttemptOutcome::RateLimited(message) => {
                    self.pool.mark_rate_limited(credential, self.clock.now());
                    last_error = Some(format!("API key rate limited: {message}"));
                    plan.skip_credential();
                }
                AttemptOutcome::ModelUnavailable(message) => {
                    tracing::warn!(
                        "[RELAY] 模型 {} 不可用 (key={})，尝试下一个模型: {}",
                        model,
                        credential.fingerprint(),
                        message
                    );
                    last_error = Some(format!("Model \"{model}\" is not available: {message}"));
                }
                AttemptOutcome::Transient(message) => {
                    tracing::warn!(
                        "[RELAY] 请求失败: key={} model={} error={}",
                        credential.fingerprint(),
                        model,
                        message
                    );
                    last_error = Some(message);
                }
            }
        }

        let error = RelayError::Exhausted {
            credentials_tried: plan.credentials_tried(),
            attempts: plan.attempts(),
            last_error: last_error.unwrap_or_else(|| "Unknown error".to_string()),
        };
        tracing::error!("[RELAY] {}", error);
        Err(error)
    }

    /// 发起一次上游调用并分类结果
    pub async fn attempt(&self, credential: &Credential, model: &str, body: &Value) -> AttemptOutcome {
        let url = self.endpoint.generate_content_url(model, credential);

        let response = match self.transport.post_json(&url, body).await {
            Ok(response) => response,
            Err(e) => return AttemptOutcome::Transient(e.to_string()),
        };

        if !response.is_success() {
            let message = extract_error_message(response.status, response.body.as_ref());
            return match classify_failure(response.status, &message) {
                FailureKind::RateLimited => AttemptOutcome::RateLimited(message),
                FailureKind::ModelUnavailable => AttemptOutcome::ModelUnavailable(message),
                FailureKind::Transient => AttemptOutcome::Transient(message),
            };
        }

        match response.body.as_ref().and_then(extract_text) {
            Some(text) => AttemptOutcome::Success(text),
            None => AttemptOutcome::Transient("Invalid API response format".to_string()),
        }
    }
}
