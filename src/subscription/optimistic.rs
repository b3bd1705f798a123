use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use super::cache::{CacheState, SharedCache};
use crate::store::DocumentSnapshot;
use crate::AppResult;

/// 乐观更新：先修改缓存，再等待写入完成
///
/// 写入失败时回滚到修改前的数据，但如果期间已经收到新的订阅推送，
/// 以推送为准不再回滚。写入成功时不做处理，等待订阅推送覆盖本地修改。
/// 缓存不在 Ready 状态时只执行写入。
pub async fn optimistic_update<T, P, Fut>(
    cache: &SharedCache,
    key: &str,
    patch: P,
    commit: Fut,
) -> AppResult<T>
where
    P: FnOnce(&mut Vec<DocumentSnapshot>),
    Fut: Future<Output = AppResult<T>>,
{
    let previous = cache.get(key);
    let patched_revision = match &previous {
        CacheState::Ready(docs) => {
            let mut patched = docs.as_ref().clone();
            patch(&mut patched);
            Some(cache.replace(key, CacheState::Ready(Arc::new(patched))))
        }
        _ => None,
    };

    let result = commit.await;

    if let (Err(e), Some(revision)) = (&result, patched_revision) {
        if cache.replace_if_revision(key, revision, previous) {
            debug!(key, error = %e, "Optimistic update rolled back");
        } else {
            debug!(key, error = %e, "Optimistic update superseded by newer delivery");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::AppError;

    fn ready(read: bool) -> CacheState {
        let data = json!({ "read": read }).as_object().cloned().unwrap();
        CacheState::Ready(Arc::new(vec![DocumentSnapshot::new("n1", data)]))
    }

    fn mark_read(docs: &mut Vec<DocumentSnapshot>) {
        for doc in docs.iter_mut() {
            doc.data.insert("read".into(), json!(true));
        }
    }

    #[tokio::test]
    async fn rolls_back_on_failure() {
        let cache = SharedCache::new();
        cache.replace("k", ready(false));

        let result: AppResult<()> =
            optimistic_update(&cache, "k", mark_read, async { Err(AppError::Store("down".into())) })
                .await;
        assert!(result.is_err());
        assert_eq!(cache.get("k"), ready(false));
    }

    #[tokio::test]
    async fn keeps_patch_on_success() {
        let cache = SharedCache::new();
        cache.replace("k", ready(false));

        optimistic_update(&cache, "k", mark_read, async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(cache.get("k"), ready(true));
    }

    #[tokio::test]
    async fn newer_delivery_is_not_rolled_back() {
        let cache = SharedCache::new();
        cache.replace("k", ready(false));

        let result: AppResult<()> = optimistic_update(&cache, "k", mark_read, async {
            // 写入期间到达的推送
            cache.replace("k", CacheState::Ready(Arc::new(vec![])));
            Err(AppError::Store("down".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(cache.get("k"), CacheState::Ready(Arc::new(vec![])));
    }

    #[tokio::test]
    async fn non_ready_cache_is_left_alone() {
        let cache = SharedCache::new();
        let value = optimistic_update(&cache, "k", mark_read, async { Ok(5) })
            .await
            .unwrap();
        assert_eq!(value, 5);
        assert_eq!(cache.get("k"), CacheState::Idle);
    }
}
