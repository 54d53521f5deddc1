//! 凭证池核心类型和独立逻辑
//!
//! 包含凭证类型定义、凭证池管理、冷却策略和失败分类。

pub mod classify;
pub mod cooldown;
pub mod pool;
pub mod types;

pub use classify::{classify_failure, FailureKind};
pub use cooldown::{is_eligible, CooldownPolicy, DEFAULT_COOLDOWN_MS};
pub use pool::{CredentialPool, PoolError};
pub use types::{Credential, PoolStatus};
