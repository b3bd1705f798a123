//! 通知模块
//!
//! [`Notifier`] 是推送投递的外部边界；[`StoreNotifier`] 把通知写入
//! `notifications` 集合，由接收方的 `notifications:{uid}` 订阅读取。
//! [`NotificationCenter`] 管理通知列表订阅和已读状态。

use std::future::Future;
use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::records::{patch, Notification, NotificationKind, Record};
use crate::store::{collections, Direction, DocumentStore, Query};
use crate::subscription::{keys, optimistic_update, query_opener, Subscription, SubscriptionManager};
use crate::{AppError, AppResult};

/// 通知投递
pub trait Notifier: Send + Sync + 'static {
    /// 投递一条通知，返回通知 id
    fn dispatch(&self, notification: Notification) -> impl Future<Output = AppResult<String>> + Send;
}

/// 写入文档存储的通知投递
pub struct StoreNotifier<S> {
    store: Arc<S>,
}

impl<S: DocumentStore> StoreNotifier<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: DocumentStore> Notifier for StoreNotifier<S> {
    async fn dispatch(&self, notification: Notification) -> AppResult<String> {
        let id = self
            .store
            .add(collections::NOTIFICATIONS, notification.to_document()?)
            .await?;
        debug!(
            notification_id = %id,
            recipient = %notification.recipient_uid,
            kind = ?notification.kind,
            "Notification dispatched"
        );
        Ok(id)
    }
}

// ============ 通知内容 ============

fn notification(
    kind: NotificationKind,
    recipient_uid: &str,
    pair_id: &str,
    title: &str,
    body: String,
    now: i64,
) -> Notification {
    Notification {
        id: String::new(),
        recipient_uid: recipient_uid.to_string(),
        kind,
        title: title.to_string(),
        body,
        pair_id: Some(pair_id.to_string()),
        created_at: now,
        read: false,
    }
}

pub fn nudge_notification(
    recipient_uid: &str,
    pair_id: &str,
    message: Option<&str>,
    now: i64,
) -> Notification {
    let body = message.unwrap_or("想你了").to_string();
    notification(NotificationKind::Nudge, recipient_uid, pair_id, "收到一个 Nudge", body, now)
}

pub fn paired_notification(recipient_uid: &str, pair_id: &str, now: i64) -> Notification {
    notification(
        NotificationKind::Paired,
        recipient_uid,
        pair_id,
        "配对成功",
        "你们已经成功配对".to_string(),
        now,
    )
}

pub fn unpaired_notification(recipient_uid: &str, pair_id: &str, now: i64) -> Notification {
    notification(
        NotificationKind::Unpaired,
        recipient_uid,
        pair_id,
        "配对已解除",
        "对方解除了配对".to_string(),
        now,
    )
}

// ============ 通知列表 ============

pub struct NotificationCenter<S> {
    store: Arc<S>,
    subscriptions: SubscriptionManager,
}

impl<S: DocumentStore> NotificationCenter<S> {
    pub fn new(store: Arc<S>, subscriptions: SubscriptionManager) -> Self {
        Self {
            store,
            subscriptions,
        }
    }

    /// 订阅用户的通知列表（按时间倒序）
    pub fn watch(&self, uid: &str) -> AppResult<Subscription> {
        let query = Query::new()
            .where_eq("recipientUid", uid)
            .order_by("createdAt", Direction::Desc);
        self.subscriptions.acquire(
            &keys::notifications_key(uid),
            uid,
            query_opener(self.store.clone(), collections::NOTIFICATIONS, query),
        )
    }

    /// 标记已读：先更新共享缓存，写入失败时回滚
    pub async fn mark_read(&self, uid: &str, notification_id: &str) -> AppResult<()> {
        let snapshot = self
            .store
            .get(collections::NOTIFICATIONS, notification_id)
            .await?
            .ok_or(AppError::NotificationNotFound)?;
        let notification = Notification::from_snapshot(&snapshot)?;
        if notification.recipient_uid != uid {
            return Err(AppError::NotificationNotFound);
        }
        if notification.read {
            return Ok(());
        }

        let key = keys::notifications_key(uid);
        optimistic_update(
            self.subscriptions.cache(),
            &key,
            |docs| {
                for doc in docs.iter_mut().filter(|d| d.id == notification_id) {
                    doc.data.insert("read".into(), json!(true));
                }
            },
            self.store.update(
                collections::NOTIFICATIONS,
                notification_id,
                patch([("read", json!(true))]),
            ),
        )
        .await
    }

    /// 根据共享缓存计算未读数量，缓存未就绪时返回 None
    pub fn unread_count(&self, uid: &str) -> Option<AppResult<usize>> {
        let state = self.subscriptions.cache().get(&keys::notifications_key(uid));
        state
            .decode::<Notification>()
            .map(|parsed| parsed.map(|list| list.iter().filter(|n| !n.read).count()))
    }
}
