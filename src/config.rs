//! 核心配置
//!
//! 默认值与产品约定一致；UI 层可以通过 JSON 覆盖部分字段，
//! 缺省字段回退到默认值。

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 配对码有效期：10 分钟
pub const DEFAULT_CODE_TTL_SECS: u64 = 600;
/// Nudge 冷却时间：5 分钟
pub const DEFAULT_NUDGE_COOLDOWN_SECS: u64 = 300;
/// 生成配对码时遇到冲突的最大重试次数
pub const DEFAULT_CODE_ISSUE_ATTEMPTS: u32 = 8;
/// Nudge 留言最大字符数
pub const DEFAULT_NUDGE_MESSAGE_MAX_CHARS: usize = 120;
/// 冷却倒计时刷新间隔
pub const DEFAULT_COOLDOWN_TICK_MILLIS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
    pub code_ttl_secs: u64,
    pub nudge_cooldown_secs: u64,
    pub code_issue_attempts: u32,
    pub nudge_message_max_chars: usize,
    pub cooldown_tick_millis: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            code_ttl_secs: DEFAULT_CODE_TTL_SECS,
            nudge_cooldown_secs: DEFAULT_NUDGE_COOLDOWN_SECS,
            code_issue_attempts: DEFAULT_CODE_ISSUE_ATTEMPTS,
            nudge_message_max_chars: DEFAULT_NUDGE_MESSAGE_MAX_CHARS,
            cooldown_tick_millis: DEFAULT_COOLDOWN_TICK_MILLIS,
        }
    }
}

impl CoreConfig {
    /// 从 JSON 解析配置，缺省字段使用默认值
    pub fn from_json(json: &str) -> crate::AppResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        tracing::debug!(?config, "Loaded core config");
        Ok(config)
    }

    pub fn with_code_ttl(mut self, ttl: Duration) -> Self {
        self.code_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_nudge_cooldown(mut self, cooldown: Duration) -> Self {
        self.nudge_cooldown_secs = cooldown.as_secs();
        self
    }

    pub fn with_code_issue_attempts(mut self, attempts: u32) -> Self {
        self.code_issue_attempts = attempts.max(1);
        self
    }

    pub fn with_nudge_message_max_chars(mut self, max: usize) -> Self {
        self.nudge_message_max_chars = max;
        self
    }

    pub fn with_cooldown_tick(mut self, tick: Duration) -> Self {
        self.cooldown_tick_millis = tick.as_millis() as u64;
        self
    }

    pub fn code_ttl(&self) -> Duration {
        Duration::from_secs(self.code_ttl_secs)
    }

    pub fn nudge_cooldown(&self) -> Duration {
        Duration::from_secs(self.nudge_cooldown_secs)
    }

    pub fn cooldown_tick(&self) -> Duration {
        // 0 会让 tokio interval panic
        Duration::from_millis(self.cooldown_tick_millis.max(1))
    }
}
