use crate::notify::Notifier;
use crate::session::SessionState;
use crate::store::DocumentStore;
use crate::subscription::Subscription;
use crate::AppResult;

use super::not_started;

pub async fn watch_notifications<S: DocumentStore, N: Notifier>(
    state: &SessionState<S, N>,
) -> AppResult<Subscription> {
    let guard = state.lock().await;
    let manager = guard.as_ref().ok_or_else(not_started)?;
    manager.watch_notifications()
}

pub async fn watch_pair<S: DocumentStore, N: Notifier>(
    state: &SessionState<S, N>,
) -> AppResult<Subscription> {
    let guard = state.lock().await;
    let manager = guard.as_ref().ok_or_else(not_started)?;
    manager.watch_pair()
}

pub async fn watch_nudges<S: DocumentStore, N: Notifier>(
    state: &SessionState<S, N>,
) -> AppResult<Subscription> {
    let guard = state.lock().await;
    let manager = guard.as_ref().ok_or_else(not_started)?;
    manager.watch_nudges().await
}

pub async fn mark_notification_read<S: DocumentStore, N: Notifier>(
    state: &SessionState<S, N>,
    notification_id: String,
) -> AppResult<()> {
    let guard = state.lock().await;
    let manager = guard.as_ref().ok_or_else(not_started)?;
    manager.mark_notification_read(&notification_id).await
}
