//! API 端点处理器
//!
//! - `POST /api/generate-reply` 生成回复建议
//! - `GET /health` 健康检查
//! - 未知路由返回 404

use axum::{
    extract::{rejection::JsonRejection, State},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::server_utils::{
    internal_error_response, not_found_response, validate_page_text, validation_error_response,
    FieldError,
};
use crate::AppState;

/// 生产环境下中转失败的统一提示
pub const GENERATE_FAILED_MESSAGE: &str = "Failed to generate replies. Please try again later.";

/// 生成回复请求
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateReplyRequest {
    #[serde(rename = "pageText")]
    pub page_text: String,
}

/// 生成回复响应
#[derive(Debug, Clone, Serialize)]
pub struct GenerateReplyResponse {
    pub success: bool,
    pub text: String,
    pub model: String,
    pub timestamp: String,
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// 生成回复建议
pub async fn generate_reply(
    State(state): State<AppState>,
    payload: Result<Json<GenerateReplyRequest>, JsonRejection>,
) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!("generate_reply", request_id = %request_id);

    async move {
        let request = match payload {
            Ok(Json(request)) => request,
            Err(rejection) => {
                tracing::debug!("[SERVER] 请求体无法解析: {}", rejection.body_text());
                return validation_error_response(vec![FieldError::page_text()]);
            }
        };

        let page_text = match validate_page_text(&request.page_text) {
            Ok(text) => text,
            Err(error) => return validation_error_response(vec![error]),
        };

        match state.relay.generate(&page_text).await {
            Ok(generated) => Json(GenerateReplyResponse {
                success: true,
                text: generated.text,
                model: generated.model,
                timestamp: now_rfc3339(),
            })
            .into_response(),
            Err(e) => {
                tracing::error!("[SERVER] 生成回复失败: {}", e);
                let message = if state.environment.is_production() {
                    GENERATE_FAILED_MESSAGE.to_string()
                } else {
                    e.to_string()
                };
                internal_error_response(&message)
            }
        }
    }
    .instrument(span)
    .await
}

/// 健康检查
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": now_rfc3339(),
        "environment": state.environment.as_str()
    }))
}

/// 未知路由
pub async fn not_found() -> Response {
    not_found_response()
}
