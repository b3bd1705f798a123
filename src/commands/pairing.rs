use crate::notify::Notifier;
use crate::pairing::{Redemption, Unpaired};
use crate::records::PairCode;
use crate::session::SessionState;
use crate::store::DocumentStore;
use crate::AppResult;

use super::not_started;

/// 生成配对码（已有有效配对码时直接返回）
pub async fn issue_code<S: DocumentStore, N: Notifier>(
    state: &SessionState<S, N>,
) -> AppResult<PairCode> {
    let guard = state.lock().await;
    let manager = guard.as_ref().ok_or_else(not_started)?;
    manager.issue_code().await
}

/// 兑换对方的配对码，输入中的空白会被忽略
pub async fn redeem_code<S: DocumentStore, N: Notifier>(
    state: &SessionState<S, N>,
    input: String,
) -> AppResult<Redemption> {
    let guard = state.lock().await;
    let manager = guard.as_ref().ok_or_else(not_started)?;
    manager.redeem_code(&input).await
}

pub async fn unpair<S: DocumentStore, N: Notifier>(
    state: &SessionState<S, N>,
) -> AppResult<Unpaired> {
    let guard = state.lock().await;
    let manager = guard.as_ref().ok_or_else(not_started)?;
    manager.unpair().await
}

pub async fn get_active_code<S: DocumentStore, N: Notifier>(
    state: &SessionState<S, N>,
) -> AppResult<Option<PairCode>> {
    let guard = state.lock().await;
    let manager = guard.as_ref().ok_or_else(not_started)?;
    manager.get_active_code().await
}
