//! 客户端请求限速
//!
//! 固定窗口计数：每个客户端（对端 IP；开启 `trust_proxy` 时取 X-Forwarded-For 第一跳）
//! 在一个窗口内最多 `max_requests` 次请求，只作用于 `/api/*`。

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use replycast_core::config::RateLimitConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 受限速保护的路径前缀
pub const RATE_LIMITED_PREFIX: &str = "/api/";

const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: Instant,
    count: u32,
}

/// 限速判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32, reset: Duration },
    Limited { reset: Duration },
}

/// 按客户端计数的固定窗口限速器
#[derive(Debug)]
pub struct ClientRateLimiter {
    window: Duration,
    max_requests: u32,
    retry_after_minutes: u64,
    trust_proxy: bool,
    windows: DashMap<String, Window>,
}

impl ClientRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            window: Duration::from_millis(config.window_ms),
            max_requests: config.max_requests,
            retry_after_minutes: config.window_minutes(),
            trust_proxy: config.trust_proxy,
            windows: DashMap::new(),
        }
    }

    /// 每窗口请求上限
    pub fn limit(&self) -> u32 {
        self.max_requests
    }

    /// 当前跟踪的客户端数
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    /// 记录一次请求并判定是否放行
    pub fn check(&self, client: &str, now: Instant) -> RateDecision {
        let mut entry = self.windows.entry(client.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
        });

        if now.saturating_duration_since(entry.started_at) >= self.window {
            *entry = Window {
                started_at: now,
                count: 0,
            };
        }

        let reset = self
            .window
            .saturating_sub(now.saturating_duration_since(entry.started_at));

        if entry.count >= self.max_requests {
            return RateDecision::Limited { reset };
        }

        entry.count += 1;
        RateDecision::Allowed {
            remaining: self.max_requests - entry.count,
            reset,
        }
    }

    /// 清理已过期的窗口，返回清理数量
    pub fn prune(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started_at) < self.window);
        before.saturating_sub(self.windows.len())
    }

    /// 启动后台清理任务，每个窗口周期执行一次
    pub fn spawn_pruner(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = self.window.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let pruned = self.prune(Instant::now());
                if pruned > 0 {
                    tracing::debug!("[RATE_LIMIT] 清理过期窗口: {}", pruned);
                }
            }
        })
    }

    fn apply_headers(&self, headers: &mut HeaderMap, remaining: u32, reset: Duration) {
        // 向上取整到秒
        let reset_secs = reset.as_millis().div_ceil(1000);
        headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(self.max_requests));
        headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
        headers.insert(
            RATE_LIMIT_RESET,
            HeaderValue::from(u64::try_from(reset_secs).unwrap_or(u64::MAX)),
        );
    }

    fn limited_response(&self, reset: Duration) -> Response {
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "Too many requests from this IP, please try again later.",
                "retryAfter": format!("{} minutes", self.retry_after_minutes)
            })),
        )
            .into_response();
        self.apply_headers(response.headers_mut(), 0, reset);
        response
    }
}

/// 提取客户端标识
///
/// 默认只使用对端地址；`X-Forwarded-For` 由客户端自行设置，
/// 只有部署在可信反向代理后（`trust_proxy`）才读取。
pub fn client_key(request: &Request, trust_proxy: bool) -> String {
    let forwarded = trust_proxy
        .then(|| {
            request
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
        .flatten();

    forwarded
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// 限速中间件
pub async fn rate_limit(
    State(limiter): State<Arc<ClientRateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if !request.uri().path().starts_with(RATE_LIMITED_PREFIX) {
        return next.run(request).await;
    }

    let client = client_key(&request, limiter.trust_proxy);
    match limiter.check(&client, Instant::now()) {
        RateDecision::Allowed { remaining, reset } => {
            let mut response = next.run(request).await;
            limiter.apply_headers(response.headers_mut(), remaining, reset);
            response
        }
        RateDecision::Limited { reset } => {
            tracing::warn!(
                "[RATE_LIMIT] 客户端 {} 超出限制 {} 次/窗口，{}s 后重置",
                client,
                limiter.limit(),
                reset.as_secs()
            );
            limiter.limited_response(reset)
        }
    }
}
