//! HTTP API 服务器
//!
//! 路由、请求限速、跨域、安全响应头和错误映射。

pub mod handlers;
pub mod middleware;
pub mod server_utils;

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{header, request::Parts, HeaderName, HeaderValue, Method, Response as HttpResponse},
    routing::{get, post},
    Router,
};
use replycast_core::config::{Config, CorsConfig, Environment};
use replycast_core::relay::RelayEngine;
use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::catch_panic::{CatchPanicLayer, ResponseForPanic};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use middleware::ClientRateLimiter;

/// 请求体上限（10 MiB）
pub const BODY_LIMIT: usize = 10 * 1024 * 1024;

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; style-src 'self' 'unsafe-inline'; \
     script-src 'self'; img-src 'self' data: https:";

/// 每个响应都附带的安全响应头
const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("content-security-policy", CONTENT_SECURITY_POLICY),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("origin-agent-cluster", "?1"),
    ("referrer-policy", "no-referrer"),
    ("strict-transport-security", "max-age=31536000; includeSubDomains"),
    ("x-content-type-options", "nosniff"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("x-frame-options", "SAMEORIGIN"),
    ("x-permitted-cross-domain-policies", "none"),
    ("x-xss-protection", "0"),
];

/// 服务器错误
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("无法绑定到 {addr}，错误: {source}。请检查地址是否有效或端口是否被占用。")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("服务器运行失败: {0}")]
    Serve(#[from] std::io::Error),
}

/// 处理器共享状态
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayEngine>,
    pub environment: Environment,
}

impl AppState {
    pub fn new(relay: Arc<RelayEngine>, environment: Environment) -> Self {
        Self { relay, environment }
    }
}

/// 处理器 panic 时返回 JSON 500
#[derive(Debug, Clone)]
struct PanicResponder {
    production: bool,
}

impl ResponseForPanic for PanicResponder {
    type ResponseBody = Body;

    fn response_for_panic(&mut self, err: Box<dyn Any + Send + 'static>) -> HttpResponse<Body> {
        let detail = if let Some(s) = err.downcast_ref::<String>() {
            s.clone()
        } else if let Some(s) = err.downcast_ref::<&str>() {
            (*s).to_string()
        } else {
            "Unknown panic message".to_string()
        };
        tracing::error!("[SERVER] 处理器 panic: {}", detail);

        let message = if self.production {
            "An unexpected error occurred".to_string()
        } else {
            detail
        };
        server_utils::internal_error_response(&message)
    }
}

fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let cors = cors.clone();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &Parts| {
                origin
                    .to_str()
                    .map(|origin| cors.is_allowed(Some(origin)))
                    .unwrap_or(false)
            },
        ))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

fn security_header(name: &'static str, value: &'static str) -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(
        HeaderName::from_static(name),
        HeaderValue::from_static(value),
    )
}

/// 构建路由
pub fn build_router(state: AppState, limiter: Arc<ClientRateLimiter>, cors: &CorsConfig) -> Router {
    let production = state.environment.is_production();

    let router = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/generate-reply", post(handlers::generate_reply))
        .fallback(handlers::not_found)
        .layer(CatchPanicLayer::custom(PanicResponder { production }))
        .layer(axum::middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit,
        ))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors_layer(cors));

    SECURITY_HEADERS
        .iter()
        .fold(router, |router, &(name, value)| {
            router.layer(security_header(name, value))
        })
        .with_state(state)
}

/// 启动服务器，直到 `shutdown` 完成
///
/// # Errors
///
/// 监听地址无法绑定或服务运行失败时返回错误。
pub async fn run_server<F>(
    config: &Config,
    relay: Arc<RelayEngine>,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let limiter = Arc::new(ClientRateLimiter::new(&config.rate_limit));
    let pruner = limiter.clone().spawn_pruner();

    let state = AppState::new(relay, config.environment.clone());
    let app = build_router(state, limiter, &config.cors);

    let host = config.server.host.as_str();
    let port = config.server.port;
    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .map_err(|source| ServerError::Bind {
            addr: format!("{host}:{port}"),
            source,
        })?;

    match listener.local_addr() {
        Ok(addr) => tracing::info!("[SERVER] 服务器监听于 {}", addr),
        Err(_) => tracing::info!("[SERVER] 服务器监听于 {}:{}", host, port),
    }

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await;

    pruner.abort();
    tracing::info!("[SERVER] 服务器已停止");
    result.map_err(ServerError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::{Request, StatusCode};
    use replycast_core::config::RateLimitConfig;
    use replycast_core::credential::{CooldownPolicy, Credential, CredentialPool};
    use replycast_core::relay::{GeminiEndpoint, HttpTransport, TransportError, TransportResponse};
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// 固定返回同一个响应，并记录请求体
    struct FixedTransport {
        response: TransportResponse,
        bodies: Mutex<Vec<Value>>,
    }

    impl FixedTransport {
        fn new(status: u16, body: Value) -> Arc<Self> {
            Arc::new(Self {
                response: TransportResponse::new(status, Some(body)),
                bodies: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.bodies.lock().unwrap().len()
        }

        fn last_prompt(&self) -> String {
            self.bodies.lock().unwrap().last().unwrap()["contents"][0]["parts"][0]["text"]
                .as_str()
                .unwrap()
                .to_string()
        }
    }

    #[async_trait]
    impl HttpTransport for FixedTransport {
        async fn post_json(
            &self,
            _url: &str,
            body: &Value,
        ) -> Result<TransportResponse, TransportError> {
            self.bodies.lock().unwrap().push(body.clone());
            Ok(self.response.clone())
        }
    }

    fn success_transport() -> Arc<FixedTransport> {
        FixedTransport::new(
            200,
            json!({"candidates": [{"content": {"parts": [{"text": "1. Nice\n2. Great\n3. Wow"}]}}]}),
        )
    }

    fn failing_transport() -> Arc<FixedTransport> {
        FixedTransport::new(500, json!({"error": {"message": "backend exploded"}}))
    }

    fn app_with(transport: Arc<FixedTransport>, environment: &str, max_requests: u32) -> Router {
        app_with_limit(
            transport,
            environment,
            RateLimitConfig {
                window_ms: 900_000,
                max_requests,
                trust_proxy: false,
            },
        )
    }

    fn app_with_limit(
        transport: Arc<FixedTransport>,
        environment: &str,
        rate_limit: RateLimitConfig,
    ) -> Router {
        let pool = CredentialPool::new(
            [Credential::new("test-key-0001")],
            CooldownPolicy::default(),
        )
        .unwrap();
        let relay = RelayEngine::new(
            Arc::new(pool),
            vec!["m1".to_string(), "m2".to_string()],
            GeminiEndpoint::default(),
            transport,
        );
        let limiter = Arc::new(ClientRateLimiter::new(&rate_limit));
        let cors = CorsConfig {
            allowed_origins: vec!["chrome-extension://abc".to_string()],
        };

        build_router(
            AppState::new(Arc::new(relay), Environment::new(environment)),
            limiter,
            &cors,
        )
    }

    fn app(transport: Arc<FixedTransport>) -> Router {
        app_with(transport, "development", 100)
    }

    fn generate_request(body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/generate-reply")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn page_text_request(text: &str) -> Request<Body> {
        generate_request(json!({ "pageText": text }).to_string())
    }

    /// 模拟来自指定对端地址、带任意 X-Forwarded-For 的请求
    fn request_from(peer: &str, forwarded_for: Option<&str>) -> Request<Body> {
        let mut request = page_text_request(&"a".repeat(80));
        let addr: SocketAddr = peer.parse().unwrap();
        request
            .extensions_mut()
            .insert(axum::extract::ConnectInfo(addr));
        if let Some(value) = forwarded_for {
            request
                .headers_mut()
                .insert("x-forwarded-for", HeaderValue::from_str(value).unwrap());
        }
        request
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn validation_body() -> Value {
        json!({
            "error": "Validation failed",
            "details": [{
                "type": "field",
                "msg": "Page text must be between 50 and 1500 characters",
                "path": "pageText",
                "location": "body"
            }]
        })
    }

    #[tokio::test]
    async fn test_short_text_rejected_without_upstream_call() {
        let transport = success_transport();
        let response = app(transport.clone())
            .oneshot(page_text_request(&"a".repeat(49)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await, validation_body());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_long_text_rejected() {
        let transport = success_transport();
        let response = app(transport.clone())
            .oneshot(page_text_request(&"a".repeat(1501)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_or_missing_body_rejected() {
        let transport = success_transport();
        let app = app(transport.clone());

        for body in ["not json", "{}", r#"{"pageText": 42}"#] {
            let response = app
                .clone()
                .oneshot(generate_request(body.to_string()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
            assert_eq!(body_json(response).await, validation_body());
        }
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_max_length_text_succeeds() {
        let transport = success_transport();
        let text = format!("  {}  ", "a".repeat(1500));
        let response = app(transport.clone())
            .oneshot(page_text_request(&text))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["text"], "1. Nice\n2. Great\n3. Wow");
        assert_eq!(json["model"], "m1");
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_page_text_is_escaped_in_prompt() {
        let transport = success_transport();
        let text = format!("<script>alert('x')</script> {}", "a".repeat(60));
        let response = app(transport.clone())
            .oneshot(page_text_request(&text))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let prompt = transport.last_prompt();
        assert!(prompt.contains("&lt;script&gt;alert(&#x27;x&#x27;)&lt;&#x2F;script&gt;"));
        assert!(!prompt.contains("<script>"));
    }

    #[tokio::test]
    async fn test_relay_failure_in_development_exposes_message() {
        let transport = failing_transport();
        let response = app(transport)
            .oneshot(page_text_request(&"a".repeat(80)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Internal server error");
        assert_eq!(
            json["message"],
            "Unable to connect to upstream API. Tried 1 API key(s) and 2 model attempt(s). Error: backend exploded"
        );
    }

    #[tokio::test]
    async fn test_relay_failure_in_production_is_sanitized() {
        let transport = failing_transport();
        let response = app_with(transport, "production", 100)
            .oneshot(page_text_request(&"a".repeat(80)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["message"], "Failed to generate replies. Please try again later.");
    }

    #[tokio::test]
    async fn test_health() {
        let response = app_with(success_transport(), "staging", 100)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        // 健康检查不受限速
        assert!(response.headers().get("ratelimit-limit").is_none());
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["environment"], "staging");
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_route_returns_404() {
        let response = app(success_transport())
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            json!({"error": "Not found", "message": "The requested endpoint does not exist"})
        );
    }

    #[tokio::test]
    async fn test_rate_limit_after_ceiling() {
        let transport = success_transport();
        let app = app_with(transport.clone(), "development", 2);

        for remaining in ["1", "0"] {
            let response = app
                .clone()
                .oneshot(page_text_request("too short"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(response.headers()["ratelimit-limit"], "2");
            assert_eq!(response.headers()["ratelimit-remaining"], remaining);
        }

        let response = app
            .clone()
            .oneshot(page_text_request(&"a".repeat(80)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("ratelimit-reset"));
        assert_eq!(
            body_json(response).await,
            json!({
                "error": "Too many requests from this IP, please try again later.",
                "retryAfter": "15 minutes"
            })
        );
        assert_eq!(transport.calls(), 0);

        // 另一个对端地址仍可访问
        let response = app
            .oneshot(request_from("198.51.100.4:40000", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rotating_forwarded_for_does_not_reset_ceiling() {
        let transport = success_transport();
        let app = app_with(transport.clone(), "development", 1);

        let mut ok = 0;
        let mut limited = 0;
        for i in 0..20 {
            let forwarded = format!("10.0.0.{i}");
            let response = app
                .clone()
                .oneshot(request_from("203.0.113.9:51000", Some(&forwarded)))
                .await
                .unwrap();
            match response.status() {
                StatusCode::OK => ok += 1,
                StatusCode::TOO_MANY_REQUESTS => limited += 1,
                other => panic!("unexpected status: {other}"),
            }
        }

        assert_eq!(ok, 1);
        assert_eq!(limited, 19);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_forwarded_for_is_used_behind_trusted_proxy() {
        let app = app_with_limit(
            success_transport(),
            "development",
            RateLimitConfig {
                window_ms: 900_000,
                max_requests: 1,
                trust_proxy: true,
            },
        );

        // 同一个代理地址转发两个不同客户端
        for client in ["10.0.0.1", "10.0.0.2"] {
            let response = app
                .clone()
                .oneshot(request_from("192.0.2.1:443", Some(client)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "client {client}");
        }

        let response = app
            .oneshot(request_from("192.0.2.1:443", Some("10.0.0.1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_security_headers() {
        let response = app(success_transport())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let headers = response.headers();
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "SAMEORIGIN");
        assert_eq!(headers["referrer-policy"], "no-referrer");
        assert_eq!(
            headers["strict-transport-security"],
            "max-age=31536000; includeSubDomains"
        );
        assert_eq!(headers["cross-origin-opener-policy"], "same-origin");
        assert_eq!(headers["cross-origin-resource-policy"], "same-origin");
        assert_eq!(headers["x-dns-prefetch-control"], "off");
        assert_eq!(headers["x-permitted-cross-domain-policies"], "none");
        assert_eq!(headers["x-xss-protection"], "0");
        assert!(headers.get("cross-origin-embedder-policy").is_none());
        assert!(headers["content-security-policy"]
            .to_str()
            .unwrap()
            .starts_with("default-src 'self'"));
    }

    #[tokio::test]
    async fn test_cors_origin_handling() {
        let app = app(success_transport());

        let allowed = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("origin", "chrome-extension://abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            allowed.headers()["access-control-allow-origin"],
            "chrome-extension://abc"
        );
        assert_eq!(allowed.headers()["access-control-allow-credentials"], "true");

        let denied = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("origin", "https://evil.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(denied
            .headers()
            .get("access-control-allow-origin")
            .is_none());
    }

    #[tokio::test]
    async fn test_panic_response() {
        let mut responder = PanicResponder { production: false };
        let response = responder.response_for_panic(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["message"], "boom");

        let mut responder = PanicResponder { production: true };
        let json = body_json(responder.response_for_panic(Box::new("boom".to_string()))).await;
        assert_eq!(
            json,
            json!({"error": "Internal server error", "message": "An unexpected error occurred"})
        );
    }
}
