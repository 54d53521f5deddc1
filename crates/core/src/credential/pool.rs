//! 凭证池实现
//!
//! 凭证列表在启动时加载且不可变；冷却记录使用 DashMap 保存，
//! 支持多个请求并发读取资格和写入限流标记。

use super::cooldown::CooldownPolicy;
use super::types::{Credential, PoolStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;

/// 凭证池错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// 没有配置任何凭证
    #[error("凭证池为空")]
    EmptyPool,
}

/// 凭证池 - 管理一组上游 API Key 及其冷却状态
#[derive(Debug)]
pub struct CredentialPool {
    /// 配置顺序的凭证列表
    credentials: Vec<Credential>,
    /// 冷却记录（凭证 -> 被限流的时间）
    cooldowns: DashMap<Credential, DateTime<Utc>>,
    /// 冷却策略
    policy: CooldownPolicy,
}

impl CredentialPool {
    /// 创建新的凭证池
    ///
    /// 重复的凭证只保留第一次出现的位置。
    ///
    /// # 错误
    /// - 如果凭证列表为空，返回 `PoolError::EmptyPool`
    pub fn new(
        credentials: impl IntoIterator<Item = Credential>,
        policy: CooldownPolicy,
    ) -> Result<Self, PoolError> {
        let mut seen = HashSet::new();
        let credentials: Vec<Credential> = credentials
            .into_iter()
            .filter(|cred| seen.insert(cred.clone()))
            .collect();

        if credentials.is_empty() {
            return Err(PoolError::EmptyPool);
        }

        Ok(Self {
            credentials,
            cooldowns: DashMap::new(),
            policy,
        })
    }

    /// 获取凭证池大小
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// 检查凭证池是否为空
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// 获取冷却策略
    pub fn policy(&self) -> CooldownPolicy {
        self.policy
    }

    /// 获取当前可用的凭证（保持配置顺序）
    ///
    /// 冷却期已过的记录会顺带清除。所有凭证都在冷却时返回空列表，
    /// 是否视为错误由调用方决定。
    pub fn available_credentials(&self, now: DateTime<Utc>) -> Vec<Credential> {
        self.credentials
            .iter()
            .filter(|cred| self.check_and_expire(cred, now))
            .cloned()
            .collect()
    }

    /// 标记凭证为限流状态
    ///
    /// 无条件覆盖已有记录，冷却窗口从最近一次标记开始计算。
    pub fn mark_rate_limited(&self, credential: &Credential, now: DateTime<Utc>) {
        self.cooldowns.insert(credential.clone(), now);
        tracing::warn!(
            "[POOL] API Key 触发限流 (key={})，{} 分钟后重试",
            credential.fingerprint(),
            self.policy.minutes()
        );
    }

    /// 检查凭证是否处于冷却中（不清除记录）
    pub fn is_cooling_down(&self, credential: &Credential, now: DateTime<Utc>) -> bool {
        let last = self.cooldowns.get(credential).map(|entry| *entry.value());
        !self.policy.is_eligible(last, now)
    }

    /// 获取最早恢复时间（当存在冷却中的凭证时）
    pub fn earliest_recovery(&self) -> Option<DateTime<Utc>> {
        self.cooldowns
            .iter()
            .map(|entry| self.policy.recovers_at(*entry.value()))
            .min()
    }

    /// 获取池状态
    pub fn status(&self, now: DateTime<Utc>) -> PoolStatus {
        let available = self.available_credentials(now).len();

        PoolStatus {
            total: self.credentials.len(),
            available,
            cooling_down: self.credentials.len() - available,
            earliest_recovery: self.earliest_recovery(),
        }
    }

    /// 检查资格，冷却期已过的记录顺带移除
    fn check_and_expire(&self, credential: &Credential, now: DateTime<Utc>) -> bool {
        let policy = self.policy;
        let expired = self
            .cooldowns
            .remove_if(credential, |_, limited_at| {
                policy.is_eligible(Some(*limited_at), now)
            })
            .is_some();

        if expired {
            tracing::info!(
                "[POOL] API Key 冷却结束，重新启用 (key={})",
                credential.fingerprint()
            );
            return true;
        }

        !self.cooldowns.contains_key(credential)
    }
}
