//! 配置管理
//!
//! 所有配置来自环境变量（`.env` 由启动层加载）。
//! 解析逻辑通过注入的查找函数实现，便于测试。

use serde::{Deserialize, Serialize};

use crate::credential::DEFAULT_COOLDOWN_MS;
use crate::relay::{GeminiEndpoint, DEFAULT_API_VERSION, DEFAULT_BASE_URL, DEFAULT_MODELS};

/// 默认监听地址
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// 默认端口
pub const DEFAULT_PORT: u16 = 3000;
/// 默认单次上游调用超时（毫秒）
pub const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 10_000;
/// 默认限速窗口（毫秒）- 15 分钟
pub const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 15 * 60 * 1000;
/// 默认每窗口最大请求数
pub const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 100;

/// 配置错误类型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "GEMINI_API_KEY or GEMINI_API_KEYS environment variable is required \
         (GEMINI_API_KEY=your_key for a single key, or GEMINI_API_KEYS=key1,key2,key3 for rotation)"
    )]
    MissingCredentials,
}

/// 运行环境
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment(String);

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 生产环境隐藏上游错误细节
    pub fn is_production(&self) -> bool {
        self.0.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.0.eq_ignore_ascii_case("development")
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new("development")
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 服务器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// 中转配置
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// API Key 列表（配置顺序）
    #[serde(skip_serializing)]
    pub credentials: Vec<String>,
    /// 冷却时间（毫秒）
    pub cooldown_ms: u64,
    /// 候选模型（按优先级）
    pub models: Vec<String>,
    /// 上游端点
    pub endpoint: GeminiEndpoint,
    /// 单次上游调用超时（毫秒）
    pub upstream_timeout_ms: u64,
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("credentials", &self.credentials.len())
            .field("cooldown_ms", &self.cooldown_ms)
            .field("models", &self.models)
            .field("endpoint", &self.endpoint)
            .field("upstream_timeout_ms", &self.upstream_timeout_ms)
            .finish()
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            credentials: Vec::new(),
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            models: default_models(),
            endpoint: GeminiEndpoint::default(),
            upstream_timeout_ms: DEFAULT_UPSTREAM_TIMEOUT_MS,
        }
    }
}

/// 跨域配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsConfig {
    /// 允许的来源，`*` 表示全部
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    pub fn allows_any(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }

    /// 没有 Origin 的请求（扩展、命令行工具）总是放行
    pub fn is_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(origin) => self.allows_any() || self.allowed_origins.iter().any(|o| o == origin),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
        }
    }
}

/// 客户端限速配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// 窗口长度（毫秒）
    pub window_ms: u64,
    /// 每窗口最大请求数
    pub max_requests: u32,
    /// 是否信任 `X-Forwarded-For`（仅部署在反向代理后开启）
    #[serde(default)]
    pub trust_proxy: bool,
}

impl RateLimitConfig {
    /// 窗口长度（分钟），用于提示信息
    pub fn window_minutes(&self) -> u64 {
        (self.window_ms / 60_000).max(1)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_RATE_LIMIT_WINDOW_MS,
            max_requests: DEFAULT_RATE_LIMIT_MAX_REQUESTS,
            trust_proxy: false,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub environment: Environment,
    pub server: ServerConfig,
    pub relay: RelayConfig,
    pub cors: CorsConfig,
    pub rate_limit: RateLimitConfig,
}

impl Config {
    /// 从进程环境变量加载
    ///
    /// # Errors
    ///
    /// 没有配置任何 API Key 时返回 `ConfigError::MissingCredentials`。
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意查找函数加载
    ///
    /// 数值无法解析时回退为默认值并记录警告。
    ///
    /// # Errors
    ///
    /// 没有配置任何 API Key 时返回 `ConfigError::MissingCredentials`。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let credentials = get("GEMINI_API_KEYS")
            .or_else(|| get("GEMINI_API_KEY"))
            .map(|raw| split_list(strip_quotes(&raw)))
            .unwrap_or_default();

        if credentials.is_empty() {
            return Err(ConfigError::MissingCredentials);
        }

        let models = get("GEMINI_MODELS")
            .map(|raw| split_list(&raw))
            .filter(|models| !models.is_empty())
            .unwrap_or_else(default_models);

        let environment = get("APP_ENV")
            .or_else(|| get("NODE_ENV"))
            .map(|env| Environment::new(env.trim()))
            .unwrap_or_default();

        let allowed_origins = get("ALLOWED_ORIGINS")
            .map(|raw| split_list(&raw))
            .filter(|origins| !origins.is_empty())
            .unwrap_or_else(|| CorsConfig::default().allowed_origins);

        Ok(Self {
            environment,
            server: ServerConfig {
                host: get("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: parse_or(&get, "PORT", DEFAULT_PORT),
            },
            relay: RelayConfig {
                credentials,
                cooldown_ms: parse_or(&get, "API_KEY_COOLDOWN_MS", DEFAULT_COOLDOWN_MS),
                models,
                endpoint: GeminiEndpoint {
                    base_url: get("GEMINI_API_BASE_URL")
                        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                    api_version: get("GEMINI_API_VERSION")
                        .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
                },
                upstream_timeout_ms: parse_or(
                    &get,
                    "UPSTREAM_TIMEOUT_MS",
                    DEFAULT_UPSTREAM_TIMEOUT_MS,
                ),
            },
            cors: CorsConfig { allowed_origins },
            rate_limit: RateLimitConfig {
                window_ms: parse_or(&get, "RATE_LIMIT_WINDOW_MS", DEFAULT_RATE_LIMIT_WINDOW_MS),
                max_requests: parse_or(
                    &get,
                    "RATE_LIMIT_MAX_REQUESTS",
                    DEFAULT_RATE_LIMIT_MAX_REQUESTS,
                ),
                trust_proxy: get("TRUST_PROXY").is_some_and(|raw| parse_flag("TRUST_PROXY", &raw)),
            },
        })
    }
}

fn default_models() -> Vec<String> {
    DEFAULT_MODELS.iter().map(|m| (*m).to_string()).collect()
}

/// 去掉部署平台可能添加的外层引号
fn strip_quotes(raw: &str) -> &str {
    let trimmed = raw.trim();
    let quoted = trimmed.len() >= 2
        && ((trimmed.starts_with('"') && trimmed.ends_with('"'))
            || (trimmed.starts_with('\'') && trimmed.ends_with('\'')));
    if quoted {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    }
}

/// 逗号分隔列表，去空白并丢弃空项
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// 解析布尔开关，无法识别时视为关闭
fn parse_flag(key: &str, raw: &str) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            tracing::warn!("[CONFIG] {}={:?} 无效，使用默认值 false", key, raw);
            false
        }
    }
}

/// 解析数值（0 也视为无效），失败时回退默认值
fn parse_or<T, G>(get: &G, key: &str, default: T) -> T
where
    T: std::str::FromStr + PartialEq + Default + std::fmt::Display + Copy,
    G: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return default;
    };

    match raw.trim().parse::<T>() {
        Ok(value) if value != T::default() => value,
        _ => {
            tracing::warn!(
                "[CONFIG] {}={:?} 无效，使用默认值 {}",
                key,
                raw,
                default
            );
            default
        }
    }
}
