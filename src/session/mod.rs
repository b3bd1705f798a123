//! 会话模块
//!
//! 一个登录用户对应一个 [`SessionManager`]，整合
//! [`PairingManager`](crate::pairing::PairingManager)、
//! [`NudgeLimiter`](crate::nudge::NudgeLimiter) 和
//! [`NotificationCenter`](crate::notify::NotificationCenter)，
//! 对 [`commands`](crate::commands) 层提供统一的访问接口。

mod manager;

pub use manager::{SessionContext, SessionManager, SessionState};

use serde::Serialize;

use crate::pairing::PairingState;

/// 会话运行状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    Running,
    #[default]
    Stopped,
}

/// 会话状态快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub status: SessionPhase,
    pub uid: Option<String>,
    pub pairing: Option<PairingState>,
    /// 当前配对中自己的剩余冷却秒数（未配对时为 None）
    pub cooldown_remaining_secs: Option<u64>,
}
