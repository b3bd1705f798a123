//! 文档存储边界
//!
//! 外部托管文档数据库的抽象：增删改查、查询组合、实时订阅和事务写入。
//! 核心逻辑只依赖 [`DocumentStore`] trait，[`MemoryStore`] 是进程内实现，
//! 用于测试和离线场景。
//!
//! 存储中的文档是弱类型 JSON，解析/校验统一在 [`records`](crate::records) 完成。

mod memory;
mod query;

pub use memory::MemoryStore;
pub use query::{Direction, Filter, FilterOp, Query};

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::AppResult;

/// 弱类型文档内容
pub type Document = serde_json::Map<String, Value>;

/// 带 id 的文档快照
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub id: String,
    pub data: Document,
}

impl DocumentSnapshot {
    pub fn new(id: impl Into<String>, data: Document) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}

/// 实时订阅回调：每次匹配集合变化时调用
pub type SnapshotCallback = Arc<dyn Fn(AppResult<Vec<DocumentSnapshot>>) + Send + Sync>;

/// 订阅注册句柄，只能通过 [`unsubscribe`](Self::unsubscribe) 显式取消
pub struct ListenerRegistration {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerRegistration {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// 事务内可执行的操作
///
/// 事务闭包返回 `Ok` 时所有写入一次性提交，返回 `Err` 时全部丢弃。
pub trait TransactionOps {
    fn get(&mut self, collection: &str, id: &str) -> AppResult<Option<DocumentSnapshot>>;

    fn query(&mut self, collection: &str, query: &Query) -> AppResult<Vec<DocumentSnapshot>>;

    fn set(&mut self, collection: &str, id: &str, data: Document) -> AppResult<()>;

    /// 合并顶层字段，文档不存在时报错
    fn update(&mut self, collection: &str, id: &str, patch: Document) -> AppResult<()>;
}

pub trait DocumentStore: Send + Sync + 'static {
    fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = AppResult<Option<DocumentSnapshot>>> + Send;

    fn set(
        &self,
        collection: &str,
        id: &str,
        data: Document,
    ) -> impl Future<Output = AppResult<()>> + Send;

    fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Document,
    ) -> impl Future<Output = AppResult<()>> + Send;

    /// 以自动生成的 id 追加文档，返回新 id
    fn add(&self, collection: &str, data: Document) -> impl Future<Output = AppResult<String>> + Send;

    fn query(
        &self,
        collection: &str,
        query: &Query,
    ) -> impl Future<Output = AppResult<Vec<DocumentSnapshot>>> + Send;

    /// 原子执行多文档读改写
    fn transaction<T, F>(&self, f: F) -> impl Future<Output = AppResult<T>> + Send
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn TransactionOps) -> AppResult<T> + Send;

    /// 建立实时订阅，回调在建立时以及每次匹配集合变化时触发
    fn subscribe(
        &self,
        collection: &str,
        query: Query,
        callback: SnapshotCallback,
    ) -> AppResult<ListenerRegistration>;
}

/// 集合名称
pub mod collections {
    pub const PAIRS: &str = "pairs";
    pub const PAIR_CODES: &str = "pairCodes";
    pub const NOTIFICATIONS: &str = "notifications";

    /// 每个配对关系下的 nudge 日志
    pub fn nudges(pair_id: &str) -> String {
        format!("{PAIRS}/{pair_id}/nudges")
    }
}
