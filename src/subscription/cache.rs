use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::warn;

use crate::records::{parse_all, Record};
use crate::store::DocumentSnapshot;
use crate::AppResult;

/// 某个资源 key 在共享缓存中的状态
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CacheState {
    #[default]
    Idle,
    /// 订阅已建立，等待首次推送
    Loading,
    Ready(Arc<Vec<DocumentSnapshot>>),
    /// 订阅出错，不会自动重试
    Failed(String),
}

impl CacheState {
    pub fn docs(&self) -> Option<&[DocumentSnapshot]> {
        match self {
            CacheState::Ready(docs) => Some(docs.as_slice()),
            _ => None,
        }
    }

    /// 解析为强类型记录，非 Ready 状态返回 None
    pub fn decode<R: Record>(&self) -> Option<AppResult<Vec<R>>> {
        self.docs().map(parse_all::<R>)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, CacheState::Failed(_))
    }
}

struct Slot {
    sender: watch::Sender<CacheState>,
    /// 当前订阅的 epoch，旧订阅的推送会被丢弃
    epoch: u64,
    /// 每次写入递增，用于乐观更新回滚判断
    revision: u64,
}

impl Slot {
    fn new() -> Self {
        let (sender, _) = watch::channel(CacheState::Idle);
        Self {
            sender,
            epoch: 0,
            revision: 0,
        }
    }

    fn publish(&mut self, state: CacheState) -> u64 {
        self.revision += 1;
        self.sender.send_replace(state);
        self.revision
    }
}

/// 进程内共享缓存：每个资源 key 一个 watch 通道
///
/// 所有观察者读取同一份数据，不需要各自查询存储。
#[derive(Default)]
pub struct SharedCache {
    slots: DashMap<String, Slot>,
}

impl SharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch(&self, key: &str) -> watch::Receiver<CacheState> {
        self.slots
            .entry(key.to_string())
            .or_insert_with(Slot::new)
            .sender
            .subscribe()
    }

    pub fn get(&self, key: &str) -> CacheState {
        self.slots
            .get(key)
            .map(|slot| slot.sender.borrow().clone())
            .unwrap_or_default()
    }

    pub fn revision(&self, key: &str) -> u64 {
        self.slots.get(key).map(|slot| slot.revision).unwrap_or(0)
    }

    pub fn is_failed(&self, key: &str) -> bool {
        self.slots
            .get(key)
            .is_some_and(|slot| slot.sender.borrow().is_failed())
    }

    /// 新订阅开始：切换 epoch 并进入 Loading
    pub(crate) fn begin(&self, key: &str, epoch: u64) {
        let mut slot = self.slots.entry(key.to_string()).or_insert_with(Slot::new);
        slot.epoch = epoch;
        slot.publish(CacheState::Loading);
    }

    /// 仅当 epoch 与当前订阅一致时写入
    pub(crate) fn publish_if_current(&self, key: &str, epoch: u64, state: CacheState) -> bool {
        match self.slots.get_mut(key) {
            Some(mut slot) if slot.epoch == epoch => {
                slot.publish(state);
                true
            }
            _ => false,
        }
    }

    /// 订阅关闭：回到 Idle
    pub(crate) fn reset(&self, key: &str) {
        if let Some(mut slot) = self.slots.get_mut(key) {
            slot.epoch = 0;
            slot.publish(CacheState::Idle);
        }
    }

    /// 本地写入（乐观更新），返回写入后的 revision
    pub(crate) fn replace(&self, key: &str, state: CacheState) -> u64 {
        self.slots
            .entry(key.to_string())
            .or_insert_with(Slot::new)
            .publish(state)
    }

    /// revision 未变化时写入，用于回滚
    pub(crate) fn replace_if_revision(&self, key: &str, expected: u64, state: CacheState) -> bool {
        match self.slots.get_mut(key) {
            Some(mut slot) if slot.revision == expected => {
                slot.publish(state);
                true
            }
            _ => false,
        }
    }
}

/// 订阅推送入口，绑定到某个 key 的某次订阅
#[derive(Clone)]
pub struct CacheSink {
    cache: Arc<SharedCache>,
    key: String,
    epoch: u64,
}

impl CacheSink {
    pub(crate) fn new(cache: Arc<SharedCache>, key: &str, epoch: u64) -> Self {
        Self {
            cache,
            key: key.to_string(),
            epoch,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// 写入一次推送结果；错误作为终止状态记录，不向外抛出
    pub fn deliver(&self, result: AppResult<Vec<DocumentSnapshot>>) {
        let state = match result {
            Ok(docs) => CacheState::Ready(Arc::new(docs)),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Subscription failed");
                CacheState::Failed(e.to_string())
            }
        };
        self.cache.publish_if_current(&self.key, self.epoch, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppError;

    #[test]
    fn stale_epoch_is_ignored() {
        let cache = Arc::new(SharedCache::new());
        cache.begin("k", 1);
        let old = CacheSink::new(cache.clone(), "k", 1);
        cache.begin("k", 2);
        let current = CacheSink::new(cache.clone(), "k", 2);

        old.deliver(Ok(vec![]));
        assert_eq!(cache.get("k"), CacheState::Loading);

        current.deliver(Ok(vec![]));
        assert_eq!(cache.get("k"), CacheState::Ready(Arc::new(vec![])));
    }

    #[test]
    fn errors_become_failed_state() {
        let cache = Arc::new(SharedCache::new());
        cache.begin("k", 1);
        CacheSink::new(cache.clone(), "k", 1).deliver(Err(AppError::Store("down".into())));
        assert!(cache.is_failed("k"));
    }

    #[tokio::test]
    async fn watchers_observe_updates() {
        let cache = Arc::new(SharedCache::new());
        let mut rx = cache.watch("k");
        cache.begin("k", 7);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), CacheState::Loading);

        cache.reset("k");
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), CacheState::Idle);
    }

    #[test]
    fn replace_if_revision_detects_newer_writes() {
        let cache = SharedCache::new();
        let rev = cache.replace("k", CacheState::Loading);
        cache.replace("k", CacheState::Ready(Arc::new(vec![])));
        assert!(!cache.replace_if_revision("k", rev, CacheState::Idle));
        let rev = cache.revision("k");
        assert!(cache.replace_if_revision("k", rev, CacheState::Idle));
    }
}
