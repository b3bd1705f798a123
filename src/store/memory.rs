use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use tracing::{debug, warn};

use super::{
    Document, DocumentSnapshot, DocumentStore, ListenerRegistration, Query, SnapshotCallback,
    TransactionOps,
};
use crate::{AppError, AppResult};

type Collections = BTreeMap<String, BTreeMap<String, Document>>;

/// 已注册的实时监听
struct Listener {
    collection: String,
    query: Query,
    callback: SnapshotCallback,
    /// 上次推送的结果，结果不变时不重复推送
    last: Mutex<Option<Vec<DocumentSnapshot>>>,
}

struct Inner {
    data: Mutex<Collections>,
    listeners: DashMap<u64, Arc<Listener>>,
    next_listener_id: AtomicU64,
    offline: AtomicBool,
}

/// 进程内文档存储
///
/// 所有写入在同一把锁下完成，事务在工作副本上执行、成功后整体替换，
/// 因此事务要么全部生效要么完全不生效。
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                data: Mutex::new(BTreeMap::new()),
                listeners: DashMap::new(),
                next_listener_id: AtomicU64::new(1),
                offline: AtomicBool::new(false),
            }),
        }
    }

    /// 模拟存储不可达；切换为离线时向所有监听推送错误
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
        if offline {
            let listeners: Vec<_> = self
                .inner
                .listeners
                .iter()
                .map(|entry| entry.value().clone())
                .collect();
            for listener in listeners {
                if let Ok(mut last) = listener.last.lock() {
                    last.take();
                }
                (listener.callback)(Err(unavailable()));
            }
        }
    }

    /// 当前活跃的监听数量
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    fn ensure_online(&self) -> AppResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            Err(unavailable())
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Collections>> {
        self.inner
            .data
            .lock()
            .map_err(|_| AppError::Store("store lock poisoned".into()))
    }

    fn notify(&self, touched: &BTreeSet<String>) {
        if touched.is_empty() {
            return;
        }
        let listeners: Vec<_> = self
            .inner
            .listeners
            .iter()
            .filter(|entry| touched.contains(&entry.value().collection))
            .map(|entry| entry.value().clone())
            .collect();

        for listener in listeners {
            let results = match self.lock() {
                Ok(data) => evaluate(&data, &listener.collection, &listener.query),
                Err(e) => {
                    (listener.callback)(Err(e));
                    continue;
                }
            };
            deliver(&listener, results);
        }
    }
}

/// 比较并推送：结果未变化时跳过
fn deliver(listener: &Listener, results: Vec<DocumentSnapshot>) {
    let changed = match listener.last.lock() {
        Ok(mut last) => {
            if last.as_ref() == Some(&results) {
                false
            } else {
                *last = Some(results.clone());
                true
            }
        }
        Err(_) => true,
    };
    if changed {
        (listener.callback)(Ok(results));
    }
}

fn evaluate(data: &Collections, collection: &str, query: &Query) -> Vec<DocumentSnapshot> {
    data.get(collection)
        .map(|docs| query.apply(docs.iter()))
        .unwrap_or_default()
}

fn unavailable() -> AppError {
    AppError::Store("store unavailable".into())
}

fn missing(collection: &str, id: &str) -> AppError {
    AppError::Store(format!("document {collection}/{id} does not exist"))
}

/// 工作副本上的事务操作
struct MemoryTxn<'a> {
    working: &'a mut Collections,
    touched: BTreeSet<String>,
}

impl TransactionOps for MemoryTxn<'_> {
    fn get(&mut self, collection: &str, id: &str) -> AppResult<Option<DocumentSnapshot>> {
        Ok(self
            .working
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| DocumentSnapshot::new(id, data.clone())))
    }

    fn query(&mut self, collection: &str, query: &Query) -> AppResult<Vec<DocumentSnapshot>> {
        Ok(evaluate(self.working, collection, query))
    }

    fn set(&mut self, collection: &str, id: &str, data: Document) -> AppResult<()> {
        self.working
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);
        self.touched.insert(collection.to_string());
        Ok(())
    }

    fn update(&mut self, collection: &str, id: &str, patch: Document) -> AppResult<()> {
        let doc = self
            .working
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| missing(collection, id))?;
        for (key, value) in patch {
            doc.insert(key, value);
        }
        self.touched.insert(collection.to_string());
        Ok(())
    }
}

impl MemoryStore {
    /// 在工作副本上执行操作，成功后提交并通知
    fn run<T>(&self, f: impl FnOnce(&mut MemoryTxn<'_>) -> AppResult<T>) -> AppResult<T> {
        self.ensure_online()?;
        let (value, touched) = {
            let mut data = self.lock()?;
            let mut working = data.clone();
            let mut txn = MemoryTxn {
                working: &mut working,
                touched: BTreeSet::new(),
            };
            let value = f(&mut txn)?;
            let touched = std::mem::take(&mut txn.touched);
            *data = working;
            (value, touched)
        };
        self.notify(&touched);
        Ok(value)
    }

    fn read<T>(&self, f: impl FnOnce(&Collections) -> T) -> AppResult<T> {
        self.ensure_online()?;
        let data = self.lock()?;
        Ok(f(&data))
    }
}

impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<DocumentSnapshot>> {
        self.read(|data| {
            data.get(collection)
                .and_then(|docs| docs.get(id))
                .map(|doc| DocumentSnapshot::new(id, doc.clone()))
        })
    }

    async fn set(&self, collection: &str, id: &str, data: Document) -> AppResult<()> {
        self.run(|txn| txn.set(collection, id, data))
    }

    async fn update(&self, collection: &str, id: &str, patch: Document) -> AppResult<()> {
        self.run(|txn| txn.update(collection, id, patch))
    }

    async fn add(&self, collection: &str, data: Document) -> AppResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.run(|txn| txn.set(collection, &id, data))?;
        Ok(id)
    }

    async fn query(&self, collection: &str, query: &Query) -> AppResult<Vec<DocumentSnapshot>> {
        self.read(|data| evaluate(data, collection, query))
    }

    async fn transaction<T, F>(&self, f: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn TransactionOps) -> AppResult<T> + Send,
    {
        self.run(|txn| f(txn as &mut dyn TransactionOps))
    }

    fn subscribe(
        &self,
        collection: &str,
        query: Query,
        callback: SnapshotCallback,
    ) -> AppResult<ListenerRegistration> {
        self.ensure_online()?;
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        let listener = Arc::new(Listener {
            collection: collection.to_string(),
            query,
            callback,
            last: Mutex::new(None),
        });
        self.inner.listeners.insert(id, listener.clone());
        debug!(listener_id = id, collection, "Store listener registered");

        // 建立时推送一次初始结果
        let initial = self.read(|data| evaluate(data, collection, &listener.query))?;
        deliver(&listener, initial);

        let inner = Arc::downgrade(&self.inner);
        Ok(ListenerRegistration::new(move || match inner.upgrade() {
            Some(inner) => {
                inner.listeners.remove(&id);
                debug!(listener_id = id, "Store listener removed");
            }
            None => warn!(listener_id = id, "Store dropped before listener removal"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;
    use crate::store::Direction;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn failed_transaction_leaves_no_trace() {
        let store = MemoryStore::new();
        let result: AppResult<()> = store
            .transaction(|txn| {
                txn.set("things", "a", doc(json!({ "n": 1 })))?;
                Err(AppError::AlreadyUsed)
            })
            .await;
        assert!(matches!(result, Err(AppError::AlreadyUsed)));
        assert!(store.get("things", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transaction_reads_its_own_writes() {
        let store = MemoryStore::new();
        let seen = store
            .transaction(|txn| {
                txn.set("things", "a", doc(json!({ "n": 1 })))?;
                txn.update("things", "a", doc(json!({ "m": 2 })))?;
                Ok(txn.get("things", "a")?.map(|s| s.data))
            })
            .await
            .unwrap();
        assert_eq!(seen, Some(doc(json!({ "n": 1, "m": 2 }))));
    }

    #[tokio::test]
    async fn update_missing_document_fails() {
        let store = MemoryStore::new();
        let err = store
            .update("things", "nope", doc(json!({ "n": 1 })))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn listener_fires_on_change_only() {
        let store = MemoryStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let registration = store
            .subscribe(
                "things",
                Query::new().where_eq("owner", "u1").order_by("n", Direction::Asc),
                Arc::new(move |result: AppResult<Vec<DocumentSnapshot>>| {
                    assert!(result.is_ok());
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        // 初始推送
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        store
            .add("things", doc(json!({ "owner": "u1", "n": 1 })))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // 不匹配的写入不会触发
        store
            .add("things", doc(json!({ "owner": "u2", "n": 2 })))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        registration.unsubscribe();
        assert_eq!(store.listener_count(), 0);
        store
            .add("things", doc(json!({ "owner": "u1", "n": 3 })))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn offline_store_reports_transport_errors() {
        let store = MemoryStore::new();
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = errors.clone();
        let _registration = store
            .subscribe(
                "things",
                Query::new(),
                Arc::new(move |result: AppResult<Vec<DocumentSnapshot>>| {
                    if result.is_err() {
                        seen.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .unwrap();

        store.set_offline(true);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        let err = store.query("things", &Query::new()).await.unwrap_err();
        assert!(err.is_transport());

        store.set_offline(false);
        assert!(store.query("things", &Query::new()).await.unwrap().is_empty());
    }
}
