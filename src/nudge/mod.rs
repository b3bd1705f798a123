//! Nudge 模块
//!
//! 已配对用户之间的轻量提醒，每个发送方在每个配对内受冷却时间限制。
//! 冷却从发送方最近一次 nudge 的 `createdAt` 计算，存储中不保存额外状态。

mod limiter;
mod ticker;

pub use limiter::{cooldown_left, NudgeLimiter, NudgeSent};
pub use ticker::CooldownTicker;
