//! 上游中转
//!
//! - `engine` - 凭证轮换 + 模型降级的中转引擎
//! - `plan` - (凭证 × 模型) 尝试计划
//! - `gemini` - Gemini generateContent 协议
//! - `transport` - HTTP 传输层抽象

pub mod engine;
pub mod gemini;
pub mod plan;
pub mod transport;

pub use engine::{AttemptOutcome, Generated, RelayBuildError, RelayEngine, RelayError};
pub use gemini::{GeminiEndpoint, DEFAULT_API_VERSION, DEFAULT_BASE_URL, DEFAULT_MODELS};
pub use plan::{Attempt, AttemptPlan};
pub use transport::{
    HttpTransport, ReqwestTransport, TransportError, TransportResponse, DEFAULT_UPSTREAM_TIMEOUT,
};
