//! 尝试计划
//!
//! 把 (凭证 × 模型) 的两层重试展开成一个显式的小状态机：
//! 按凭证顺序、凭证内按模型顺序逐个产出尝试，
//! 某个凭证被限流后可以跳过它剩余的模型。

/// 单次尝试：凭证下标 + 模型下标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    pub credential: usize,
    pub model: usize,
}

/// 尝试计划
#[derive(Debug, Clone)]
pub struct AttemptPlan {
    credentials: usize,
    models: usize,
    /// 下一次尝试的位置
    cursor: Attempt,
    /// 已经开始尝试的凭证数
    credentials_started: usize,
    /// 已产出的尝试次数
    attempts: usize,
}

impl AttemptPlan {
    pub fn new(credentials: usize, models: usize) -> Self {
        Self {
            credentials,
            models,
            cursor: Attempt {
                credential: 0,
                model: 0,
            },
            credentials_started: 0,
            attempts: 0,
        }
    }

    /// 放弃当前凭证剩余的模型，从下一个凭证重新开始
    pub fn skip_credential(&mut self) {
        if self.cursor.model > 0 {
            self.cursor.credential += 1;
            self.cursor.model = 0;
        }
    }

    /// 已开始尝试的凭证数
    pub fn credentials_tried(&self) -> usize {
        self.credentials_started
    }

    /// 已产出的尝试次数
    pub fn attempts(&self) -> usize {
        self.attempts
    }
}

impl Iterator for AttemptPlan {
    type Item = Attempt;

    fn next(&mut self) -> Option<Attempt> {
        if self.models == 0 || self.cursor.credential >= self.credentials {
            return None;
        }

        let attempt = self.cursor;
        if attempt.model == 0 {
            self.credentials_started += 1;
        }
        self.attempts += 1;

        self.cursor.model += 1;
        if self.cursor.model >= self.models {
            self.cursor.credential += 1;
            self.cursor.model = 0;
        }

        Some(attempt)
    }
}
