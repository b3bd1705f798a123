//! 实时订阅模块
//!
//! [`SubscriptionManager`] 按资源 key 去重底层订阅，推送写入 [`SharedCache`]，
//! 所有观察者共享同一份数据。本地修改通过 [`optimistic_update`] 先写缓存，
//! 以下一次订阅推送为准。

mod cache;
pub mod keys;
mod manager;
mod optimistic;

pub use cache::{CacheSink, CacheState, SharedCache};
pub use manager::{Subscription, SubscriptionManager, SubscriptionPhase, Teardown};
pub use optimistic::optimistic_update;

use std::sync::Arc;

use crate::store::{DocumentSnapshot, DocumentStore, Query, SnapshotCallback};
use crate::AppResult;

/// 基于存储查询的订阅建立函数，配合 [`SubscriptionManager::acquire`] 使用
pub fn query_opener<S: DocumentStore>(
    store: Arc<S>,
    collection: impl Into<String>,
    query: Query,
) -> impl FnOnce(CacheSink) -> AppResult<Teardown> {
    let collection = collection.into();
    move |sink| {
        let callback: SnapshotCallback =
            Arc::new(move |result: AppResult<Vec<DocumentSnapshot>>| sink.deliver(result));
        let registration = store.subscribe(&collection, query, callback)?;
        Ok(Box::new(move || registration.unsubscribe()) as Teardown)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn query_subscription_follows_store_changes() {
        let store = Arc::new(MemoryStore::new());
        let manager = SubscriptionManager::new();
        let query = Query::new().where_eq("recipientUid", "alice");

        let a = manager
            .acquire(
                "notifications:alice",
                "alice",
                query_opener(store.clone(), "notifications", query.clone()),
            )
            .unwrap();
        let b = manager
            .acquire(
                "notifications:alice",
                "alice",
                query_opener(store.clone(), "notifications", query),
            )
            .unwrap();
        assert_eq!(store.listener_count(), 1);
        assert_eq!(a.current().docs().map(<[_]>::len), Some(0));

        store
            .add(
                "notifications",
                json!({ "recipientUid": "alice", "kind": "nudge" })
                    .as_object()
                    .cloned()
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(b.current().docs().map(<[_]>::len), Some(1));

        drop(a);
        assert_eq!(store.listener_count(), 1);
        drop(b);
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn store_outage_marks_cache_failed() {
        let store = Arc::new(MemoryStore::new());
        let manager = SubscriptionManager::new();
        let subscription = manager
            .acquire(
                "pair:alice",
                "alice",
                query_opener(store.clone(), "pairs", Query::new()),
            )
            .unwrap();

        store.set_offline(true);
        assert!(subscription.current().is_failed());

        // 不自动重试；恢复后重新获取会重建订阅
        store.set_offline(false);
        assert!(subscription.current().is_failed());
        let retry = manager
            .acquire(
                "pair:alice",
                "alice",
                query_opener(store.clone(), "pairs", Query::new()),
            )
            .unwrap();
        assert!(!retry.current().is_failed());
        assert_eq!(store.listener_count(), 1);
    }
}
