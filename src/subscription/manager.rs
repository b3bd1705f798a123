use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info};

use super::cache::{CacheSink, CacheState, SharedCache};
use crate::AppResult;

/// 关闭底层订阅的回调
pub type Teardown = Box<dyn FnOnce() + Send>;

/// 某个资源 key 的订阅阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionPhase {
    Idle,
    Active,
}

/// 注册表中的订阅句柄
struct Handle {
    /// 建立订阅时的身份（用户 id、查询参数等）
    owner: String,
    /// 所有权代数：只有同一代的观察者可以关闭该订阅
    generation: u64,
    /// 底层订阅的 epoch，失败重连时变化
    epoch: u64,
    observers: usize,
    teardown: Option<Teardown>,
}

impl Handle {
    fn close(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

struct Inner {
    registry: Mutex<HashMap<String, Handle>>,
    cache: Arc<SharedCache>,
    counter: AtomicU64,
}

/// 实时订阅管理器
///
/// 保证每个资源 key 同一时刻最多一个底层订阅：
///
/// - 首个观察者建立订阅，同身份的后续观察者直接复用
/// - 身份变化（例如切换账号）时先关闭旧订阅再建立新订阅
/// - 当前代的最后一个观察者释放时关闭订阅，回到 Idle
/// - 订阅出错记录在共享缓存中，不自动重试；再次获取时重新建立
///
/// 所有状态迁移都在注册表锁内完成，同一 key 不会有两个迁移同时进行。
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

static GLOBAL: OnceLock<SubscriptionManager> = OnceLock::new();

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(HashMap::new()),
                cache: Arc::new(SharedCache::new()),
                counter: AtomicU64::new(1),
            }),
        }
    }

    /// 进程级单例
    pub fn global() -> SubscriptionManager {
        GLOBAL.get_or_init(SubscriptionManager::new).clone()
    }

    pub fn cache(&self) -> &SharedCache {
        &self.inner.cache
    }

    /// 获取某个资源 key 的订阅
    ///
    /// `open` 只在需要建立新底层订阅时调用，推送通过 [`CacheSink`] 写入共享缓存。
    /// `open` 在注册表锁内执行，不能重入本管理器。
    pub fn acquire<F>(&self, key: &str, owner: &str, open: F) -> AppResult<Subscription>
    where
        F: FnOnce(CacheSink) -> AppResult<Teardown>,
    {
        let mut registry = self.lock();

        if let Some(handle) = registry.get_mut(key) {
            if handle.owner == owner && !self.inner.cache.is_failed(key) {
                handle.observers += 1;
                debug!(key, observers = handle.observers, "Attached to existing subscription");
                return Ok(self.subscription(key, handle.generation));
            }
        }

        let (generation, observers) = match registry.remove(key) {
            // 同身份但上次失败：原地重建，保留已有观察者
            Some(mut failed) if failed.owner == owner => {
                debug!(key, "Re-establishing failed subscription");
                failed.close();
                (failed.generation, failed.observers + 1)
            }
            Some(mut previous) => {
                info!(
                    key,
                    previous_owner = %previous.owner,
                    owner,
                    "Subscription owner changed, tearing down"
                );
                previous.close();
                self.inner.cache.reset(key);
                (self.next_id(), 1)
            }
            None => (self.next_id(), 1),
        };

        let epoch = self.next_id();
        self.inner.cache.begin(key, epoch);
        let sink = CacheSink::new(self.inner.cache.clone(), key, epoch);

        match open(sink) {
            Ok(teardown) => {
                registry.insert(
                    key.to_string(),
                    Handle {
                        owner: owner.to_string(),
                        generation,
                        epoch,
                        observers,
                        teardown: Some(teardown),
                    },
                );
                info!(key, owner, "Subscription opened");
                Ok(self.subscription(key, generation))
            }
            Err(e) => {
                self.inner
                    .cache
                    .publish_if_current(key, epoch, CacheState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// 观察者释放；只有当前代的最后一个观察者会关闭订阅
    fn release(&self, key: &str, generation: u64) {
        let mut registry = self.lock();
        let Some(handle) = registry.get_mut(key) else {
            return;
        };
        if handle.generation != generation {
            debug!(key, "Ignoring release from superseded subscription");
            return;
        }

        handle.observers = handle.observers.saturating_sub(1);
        if handle.observers > 0 {
            return;
        }

        if let Some(mut handle) = registry.remove(key) {
            handle.close();
            self.inner.cache.reset(key);
            info!(key, epoch = handle.epoch, "Subscription closed");
        }
    }

    /// 前置条件失效时强制关闭某个 key 的订阅
    ///
    /// 现有观察者随后的释放属于旧代，会被忽略。返回该 key 是否处于 Active。
    pub fn teardown(&self, key: &str) -> bool {
        let Some(mut handle) = self.lock().remove(key) else {
            return false;
        };
        handle.close();
        self.inner.cache.reset(key);
        info!(key, observers = handle.observers, "Subscription torn down");
        true
    }

    /// 关闭所有订阅（退出登录时使用）
    pub fn teardown_all(&self) {
        let drained: Vec<_> = self.lock().drain().collect();
        for (key, mut handle) in drained {
            handle.close();
            self.inner.cache.reset(&key);
            info!(key, "Subscription closed");
        }
    }

    pub fn phase(&self, key: &str) -> SubscriptionPhase {
        if self.lock().contains_key(key) {
            SubscriptionPhase::Active
        } else {
            SubscriptionPhase::Idle
        }
    }

    pub fn observer_count(&self, key: &str) -> usize {
        self.lock().get(key).map_or(0, |h| h.observers)
    }

    pub fn owner(&self, key: &str) -> Option<String> {
        self.lock().get(key).map(|h| h.owner.clone())
    }

    fn subscription(&self, key: &str, generation: u64) -> Subscription {
        Subscription {
            manager: self.clone(),
            key: key.to_string(),
            generation,
            receiver: self.inner.cache.watch(key),
            released: false,
        }
    }

    fn next_id(&self) -> u64 {
        self.inner.counter.fetch_add(1, Ordering::SeqCst)
    }

    /// 注册表锁中毒时继续使用内部数据
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Handle>> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// 观察者持有的订阅
///
/// 调用 [`release`](Self::release) 或 drop 时释放。
pub struct Subscription {
    manager: SubscriptionManager,
    key: String,
    generation: u64,
    receiver: watch::Receiver<CacheState>,
    released: bool,
}

impl Subscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn current(&self) -> CacheState {
        self.receiver.borrow().clone()
    }

    pub fn receiver(&self) -> watch::Receiver<CacheState> {
        self.receiver.clone()
    }

    /// 等待下一次状态变化
    pub async fn changed(&mut self) -> Option<CacheState> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.manager.release(&self.key, self.generation);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    use super::*;
    use crate::AppError;

    #[derive(Default)]
    struct Counters {
        opens: AtomicUsize,
        closes: AtomicUsize,
    }

    fn opener(counters: Arc<Counters>) -> impl FnOnce(CacheSink) -> AppResult<Teardown> {
        move |sink| {
            counters.opens.fetch_add(1, Ordering::SeqCst);
            sink.deliver(Ok(vec![]));
            Ok(Box::new(move || {
                counters.closes.fetch_add(1, Ordering::SeqCst);
            }) as Teardown)
        }
    }

    #[test]
    fn concurrent_acquisitions_share_one_subscription() {
        const N: usize = 16;
        let manager = SubscriptionManager::new();
        let counters = Arc::new(Counters::default());
        let barrier = Arc::new(Barrier::new(N));

        let threads: Vec<_> = (0..N)
            .map(|_| {
                let manager = manager.clone();
                let counters = counters.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    manager
                        .acquire("notifications:alice", "alice", opener(counters))
                        .unwrap()
                })
            })
            .collect();
        let subscriptions: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
        assert_eq!(manager.observer_count("notifications:alice"), N);
        assert!(subscriptions
            .iter()
            .all(|s| s.current() == CacheState::Ready(Arc::new(vec![]))));

        let mut subscriptions = subscriptions;
        let last = subscriptions.pop().unwrap();
        drop(subscriptions);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 0);
        assert_eq!(manager.phase("notifications:alice"), SubscriptionPhase::Active);

        last.release();
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
        assert_eq!(manager.phase("notifications:alice"), SubscriptionPhase::Idle);
        assert_eq!(manager.cache().get("notifications:alice"), CacheState::Idle);
    }

    #[test]
    fn owner_change_tears_down_before_reopening() {
        let manager = SubscriptionManager::new();
        let alice = Arc::new(Counters::default());
        let bob = Arc::new(Counters::default());

        let old = manager.acquire("feed", "alice", opener(alice.clone())).unwrap();
        let new = manager
            .acquire("feed", "bob", |sink| {
                // 旧订阅必须已经关闭
                assert_eq!(alice.closes.load(Ordering::SeqCst), 1);
                opener(bob.clone())(sink)
            })
            .unwrap();
        assert_eq!(manager.owner("feed").as_deref(), Some("bob"));

        // 旧代的释放不能关闭新订阅
        drop(old);
        assert_eq!(bob.closes.load(Ordering::SeqCst), 0);
        assert_eq!(manager.phase("feed"), SubscriptionPhase::Active);

        drop(new);
        assert_eq!(bob.closes.load(Ordering::SeqCst), 1);
        assert_eq!(alice.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn open_failure_is_recorded_and_not_registered() {
        let manager = SubscriptionManager::new();
        let err = manager
            .acquire("feed", "alice", |_| Err(AppError::Store("offline".into())))
            .unwrap_err();
        assert!(err.is_transport());
        assert!(manager.cache().is_failed("feed"));
        assert_eq!(manager.phase("feed"), SubscriptionPhase::Idle);
    }

    #[test]
    fn failed_subscription_is_reopened_on_next_acquire() {
        let manager = SubscriptionManager::new();
        let counters = Arc::new(Counters::default());
        let sink_slot: Arc<Mutex<Option<CacheSink>>> = Arc::default();

        let slot = sink_slot.clone();
        let first_counters = counters.clone();
        let first = manager
            .acquire("feed", "alice", move |sink| {
                *slot.lock().unwrap() = Some(sink.clone());
                opener(first_counters)(sink)
            })
            .unwrap();

        // 运行中出错
        let failed_sink = sink_slot.lock().unwrap().clone().unwrap();
        failed_sink.deliver(Err(AppError::Store("connection lost".into())));
        assert!(first.current().is_failed());

        let second = manager.acquire("feed", "alice", opener(counters.clone())).unwrap();
        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
        assert_eq!(manager.observer_count("feed"), 2);
        assert_eq!(second.current(), CacheState::Ready(Arc::new(vec![])));

        // 旧订阅的迟到推送被丢弃
        failed_sink.deliver(Err(AppError::Store("late".into())));
        assert!(!second.current().is_failed());

        drop(first);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
        drop(second);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn teardown_all_closes_everything_once() {
        let manager = SubscriptionManager::new();
        let counters = Arc::new(Counters::default());
        let a = manager.acquire("a", "alice", opener(counters.clone())).unwrap();
        let b = manager.acquire("b", "alice", opener(counters.clone())).unwrap();

        manager.teardown_all();
        assert_eq!(counters.closes.load(Ordering::SeqCst), 2);

        drop(a);
        drop(b);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn forced_teardown_ignores_remaining_observers() {
        let manager = SubscriptionManager::new();
        let counters = Arc::new(Counters::default());
        let a = manager.acquire("log", "p1", opener(counters.clone())).unwrap();
        let b = manager.acquire("log", "p1", opener(counters.clone())).unwrap();

        assert!(manager.teardown("log"));
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
        assert_eq!(manager.phase("log"), SubscriptionPhase::Idle);
        assert_eq!(a.current(), CacheState::Idle);
        assert!(!manager.teardown("log"));

        // 重新获取后，旧观察者的释放不影响新订阅
        let c = manager.acquire("log", "p1", opener(counters.clone())).unwrap();
        drop(a);
        drop(b);
        assert_eq!(manager.phase("log"), SubscriptionPhase::Active);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);

        drop(c);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn global_is_a_singleton() {
        let a = SubscriptionManager::global();
        let b = SubscriptionManager::global();
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
    }

    #[tokio::test]
    async fn observers_see_pushed_updates() {
        let manager = SubscriptionManager::new();
        let sink_slot: Arc<Mutex<Option<CacheSink>>> = Arc::default();
        let slot = sink_slot.clone();
        let mut subscription = manager
            .acquire("feed", "alice", move |sink| {
                *slot.lock().unwrap() = Some(sink);
                Ok(Box::new(|| {}) as Teardown)
            })
            .unwrap();
        assert_eq!(subscription.current(), CacheState::Loading);

        let sink = sink_slot.lock().unwrap().clone().unwrap();
        sink.deliver(Ok(vec![]));
        assert_eq!(
            subscription.changed().await,
            Some(CacheState::Ready(Arc::new(vec![])))
        );
    }
}
