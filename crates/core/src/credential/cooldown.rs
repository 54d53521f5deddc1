//! 冷却策略
//!
//! 凭证被判定为限流后进入冷却期，冷却期内不参与选择。
//! 资格判断是 (当前时间, 上次限流时间, 冷却时长) 的纯函数。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 默认冷却时间（毫秒）- 1 小时
pub const DEFAULT_COOLDOWN_MS: u64 = 3_600_000;

/// 判断凭证当前是否可用
///
/// 从未限流，或距上次限流已满一个冷却期，即视为可用。
pub fn is_eligible(
    last_limited_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> bool {
    match last_limited_at {
        None => true,
        Some(at) => now - at >= cooldown,
    }
}

/// 冷却配置
///
/// 进程启动时确定，对所有凭证一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownPolicy {
    /// 冷却时长（毫秒）
    cooldown_ms: u64,
}

impl CooldownPolicy {
    /// 以毫秒创建冷却策略
    pub fn from_millis(cooldown_ms: u64) -> Self {
        Self { cooldown_ms }
    }

    /// 冷却时长（毫秒）
    pub fn cooldown_ms(&self) -> u64 {
        self.cooldown_ms
    }

    /// 冷却时长
    pub fn duration(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.cooldown_ms).unwrap_or(i64::MAX))
    }

    /// 冷却时长（分钟），用于日志
    pub fn minutes(&self) -> f64 {
        self.cooldown_ms as f64 / 60_000.0
    }

    /// 检查凭证是否可用
    pub fn is_eligible(&self, last_limited_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        is_eligible(last_limited_at, now, self.duration())
    }

    /// 计算恢复时间
    pub fn recovers_at(&self, last_limited_at: DateTime<Utc>) -> DateTime<Utc> {
        last_limited_at + self.duration()
    }
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self::from_millis(DEFAULT_COOLDOWN_MS)
    }
}
