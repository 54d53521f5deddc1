//! ReplyCast Core Crate
//!
//! 包含凭证池、冷却策略、上游中转引擎和配置，不依赖 HTTP 服务层。
//!
//! ## 模块结构
//! - `clock`: 可注入时钟
//! - `config`: 环境变量配置
//! - `credential`: 凭证池核心（types, pool, cooldown, classify）
//! - `relay`: 凭证轮换 + 模型降级的上游中转

pub mod clock;
pub mod config;
pub mod credential;
pub mod relay;

// 重新导出常用类型
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigError};
pub use credential::{Credential, CredentialPool, PoolStatus};
pub use relay::{Generated, RelayEngine, RelayError};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
