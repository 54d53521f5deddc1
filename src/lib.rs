//! ReplyCast - 回复建议中转服务
//!
//! 接收页面文本，通过 API Key 轮换和模型降级调用 Gemini 生成回复建议。
//!
//! ## Workspace 结构
//! - `replycast-core`: 凭证池、冷却、中转引擎、配置
//! - `replycast-server`: HTTP 端点
//! - 主 crate: 启动引导和日志

pub mod app;

pub use app::run;
