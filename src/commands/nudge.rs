use std::time::Duration;

use crate::notify::Notifier;
use crate::nudge::{CooldownTicker, NudgeSent};
use crate::session::SessionState;
use crate::store::DocumentStore;
use crate::AppResult;

use super::not_started;

pub async fn can_send_nudge<S: DocumentStore, N: Notifier>(
    state: &SessionState<S, N>,
) -> AppResult<bool> {
    let guard = state.lock().await;
    let manager = guard.as_ref().ok_or_else(not_started)?;
    manager.can_send_nudge().await
}

pub async fn cooldown_remaining<S: DocumentStore, N: Notifier>(
    state: &SessionState<S, N>,
) -> AppResult<Duration> {
    let guard = state.lock().await;
    let manager = guard.as_ref().ok_or_else(not_started)?;
    manager.cooldown_remaining().await
}

/// 向配对的另一方发送 nudge，可附带一句留言
pub async fn send_nudge<S: DocumentStore, N: Notifier>(
    state: &SessionState<S, N>,
    message: Option<String>,
) -> AppResult<NudgeSent> {
    let guard = state.lock().await;
    let manager = guard.as_ref().ok_or_else(not_started)?;
    manager.send_nudge(message.as_deref()).await
}

/// 冷却倒计时，调用方 drop 返回值即停止
pub async fn watch_cooldown<S: DocumentStore, N: Notifier>(
    state: &SessionState<S, N>,
) -> AppResult<CooldownTicker> {
    let guard = state.lock().await;
    let manager = guard.as_ref().ok_or_else(not_started)?;
    manager.watch_cooldown().await
}
