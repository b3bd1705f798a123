//! UI 命令入口
//!
//! 薄层命令入口，仅负责读取会话状态和参数整理，
//! 所有业务逻辑委托给 [`session`](crate::session) 以及其下的
//! [`pairing`](crate::pairing)、[`nudge`](crate::nudge) 模块。

mod nudge;
mod pairing;
mod subscription;

pub use nudge::*;
pub use pairing::*;
pub use subscription::*;

use tracing::info;

use crate::notify::Notifier;
use crate::session::{SessionContext, SessionManager, SessionState, SessionStatus};
use crate::store::DocumentStore;
use crate::{AppError, AppResult};

/// 会话未启动时的统一错误
pub(super) fn not_started() -> AppError {
    AppError::SessionNotStarted
}

/// 为登录用户启动会话，已有会话时先关闭旧会话
pub async fn start<S: DocumentStore, N: Notifier>(
    state: &SessionState<S, N>,
    uid: String,
    ctx: SessionContext<S, N>,
) -> AppResult<()> {
    let manager = SessionManager::new(uid, ctx);
    let mut guard = state.lock().await;
    if let Some(previous) = guard.replace(manager) {
        previous.shutdown();
    }
    if let Some(manager) = guard.as_ref() {
        info!(uid = manager.uid(), "Session started");
    }
    Ok(())
}

/// 退出登录：关闭全部订阅并清空会话
pub async fn shutdown<S: DocumentStore, N: Notifier>(state: &SessionState<S, N>) -> AppResult<()> {
    if let Some(manager) = state.lock().await.take() {
        manager.shutdown();
    }
    Ok(())
}

pub async fn session_status<S: DocumentStore, N: Notifier>(
    state: &SessionState<S, N>,
) -> AppResult<SessionStatus> {
    let guard = state.lock().await;
    match guard.as_ref() {
        Some(manager) => manager.status().await,
        None => Ok(SessionStatus::default()),
    }
}
