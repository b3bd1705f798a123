use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{SessionPhase, SessionStatus};
use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::notify::{paired_notification, unpaired_notification, NotificationCenter, Notifier};
use crate::nudge::{CooldownTicker, NudgeLimiter, NudgeSent};
use crate::pairing::manager::active_pair_of;
use crate::pairing::{PairingManager, Redemption, Unpaired};
use crate::records::{Notification, Pair, PairCode};
use crate::store::{collections, Direction, DocumentStore, Query};
use crate::subscription::{keys, query_opener, Subscription, SubscriptionManager};
use crate::{AppError, AppResult};

/// commands 层持有的会话状态
pub type SessionState<S, N> = Mutex<Option<SessionManager<S, N>>>;

/// 创建会话所需的共享依赖
pub struct SessionContext<S, N> {
    pub store: Arc<S>,
    pub notifier: Arc<N>,
    pub clock: Arc<dyn Clock>,
    pub config: CoreConfig,
    pub subscriptions: SubscriptionManager,
}

impl<S, N> Clone for SessionContext<S, N> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            notifier: self.notifier.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
            subscriptions: self.subscriptions.clone(),
        }
    }
}

/// 会话管理器
///
/// 以当前登录用户的身份调用各个模块：配对、nudge、通知和订阅。
/// 需要配对关系的操作在未配对时返回 [`AppError::NotPaired`]。
pub struct SessionManager<S, N> {
    uid: String,
    store: Arc<S>,
    notifier: Arc<N>,
    clock: Arc<dyn Clock>,
    pairing: Arc<PairingManager<S>>,
    nudges: Arc<NudgeLimiter<S, N>>,
    notifications: Arc<NotificationCenter<S>>,
    subscriptions: SubscriptionManager,
}

impl<S: DocumentStore, N: Notifier> SessionManager<S, N> {
    pub fn new(uid: impl Into<String>, ctx: SessionContext<S, N>) -> Self {
        let SessionContext {
            store,
            notifier,
            clock,
            config,
            subscriptions,
        } = ctx;

        let pairing = Arc::new(PairingManager::new(
            store.clone(),
            clock.clone(),
            config.clone(),
        ));
        let nudges = Arc::new(NudgeLimiter::new(
            store.clone(),
            notifier.clone(),
            clock.clone(),
            config,
        ));
        let notifications = Arc::new(NotificationCenter::new(
            store.clone(),
            subscriptions.clone(),
        ));
        Self {
            uid: uid.into(),
            store,
            notifier,
            clock,
            pairing,
            nudges,
            notifications,
            subscriptions,
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn pairing(&self) -> &PairingManager<S> {
        &self.pairing
    }

    pub fn nudges(&self) -> &NudgeLimiter<S, N> {
        &self.nudges
    }

    pub fn notifications(&self) -> &NotificationCenter<S> {
        &self.notifications
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// 获取当前会话状态快照
    pub async fn status(&self) -> AppResult<SessionStatus> {
        let pairing = self.pairing.state(&self.uid).await?;
        let cooldown = match self.pairing.active_pair(&self.uid).await? {
            Some(pair) => Some(
                self.nudges
                    .cooldown_remaining(&self.uid, &pair.id, self.clock.now_millis())
                    .await?
                    .as_secs(),
            ),
            None => None,
        };
        Ok(SessionStatus {
            status: SessionPhase::Running,
            uid: Some(self.uid.clone()),
            pairing: Some(pairing),
            cooldown_remaining_secs: cooldown,
        })
    }

    /// 当前 active 的配对关系
    pub async fn current_pair(&self) -> AppResult<Pair> {
        self.pairing
            .active_pair(&self.uid)
            .await?
            .ok_or(AppError::NotPaired)
    }

    // ============ 配对 ============

    pub async fn issue_code(&self) -> AppResult<PairCode> {
        self.pairing.issue_code(&self.uid).await
    }

    pub async fn get_active_code(&self) -> AppResult<Option<PairCode>> {
        self.pairing.get_active_code(&self.uid).await
    }

    /// 兑换配对码，成功后通知发布方
    pub async fn redeem_code(&self, input: &str) -> AppResult<Redemption> {
        let redemption = self.pairing.redeem_code(input, &self.uid).await?;
        self.notify(paired_notification(
            &redemption.partner_uid,
            &redemption.pair_id,
            self.clock.now_millis(),
        ))
        .await;
        Ok(redemption)
    }

    /// 解除当前配对，并通知对方
    pub async fn unpair(&self) -> AppResult<Unpaired> {
        let pair = self.current_pair().await?;
        let outcome = self.pairing.unpair(&pair.id).await?;
        if outcome.was_active {
            // nudge 日志只在配对期间有效
            self.subscriptions.teardown(&keys::nudges_key(&pair.id));
            if let Some(partner) = pair.partner_of(&self.uid) {
                self.notify(unpaired_notification(partner, &pair.id, self.clock.now_millis()))
                    .await;
            }
        }
        Ok(outcome)
    }

    // ============ Nudge ============

    pub async fn can_send_nudge(&self) -> AppResult<bool> {
        let pair = self.current_pair().await?;
        self.nudges
            .can_send(&self.uid, &pair.id, self.clock.now_millis())
            .await
    }

    pub async fn cooldown_remaining(&self) -> AppResult<Duration> {
        let pair = self.current_pair().await?;
        self.nudges
            .cooldown_remaining(&self.uid, &pair.id, self.clock.now_millis())
            .await
    }

    /// 向当前配对的另一方发送 nudge
    pub async fn send_nudge(&self, message: Option<&str>) -> AppResult<NudgeSent> {
        let pair = self.current_pair().await?;
        let partner = pair.partner_of(&self.uid).ok_or(AppError::NotPaired)?;
        self.nudges
            .send(&self.uid, partner, &pair.id, message)
            .await
    }

    pub async fn watch_cooldown(&self) -> AppResult<CooldownTicker> {
        let pair = self.current_pair().await?;
        self.nudges.cooldown_ticker(&self.uid, &pair.id).await
    }

    // ============ 订阅 ============

    pub fn watch_notifications(&self) -> AppResult<Subscription> {
        self.notifications.watch(&self.uid)
    }

    pub async fn mark_notification_read(&self, notification_id: &str) -> AppResult<()> {
        self.notifications
            .mark_read(&self.uid, notification_id)
            .await
    }

    /// 订阅自己的 active 配对（解除后结果变为空列表）
    pub fn watch_pair(&self) -> AppResult<Subscription> {
        self.subscriptions.acquire(
            &keys::pair_key(&self.uid),
            &self.uid,
            query_opener(self.store.clone(), collections::PAIRS, active_pair_of(&self.uid)),
        )
    }

    /// 订阅当前配对的 nudge 日志（按时间倒序）
    pub async fn watch_nudges(&self) -> AppResult<Subscription> {
        let pair = self.current_pair().await?;
        let query = Query::new().order_by("createdAt", Direction::Desc);
        self.subscriptions.acquire(
            &keys::nudges_key(&pair.id),
            &pair.id,
            query_opener(self.store.clone(), collections::nudges(&pair.id), query),
        )
    }

    /// 关闭会话持有的全部订阅
    pub fn shutdown(&self) {
        self.subscriptions.teardown_all();
        info!(uid = %self.uid, "Session closed");
    }

    /// 投递通知，失败只记录日志
    async fn notify(&self, notification: Notification) {
        let recipient = notification.recipient_uid.clone();
        if let Err(e) = self.notifier.dispatch(notification).await {
            warn!(recipient = %recipient, error = %e, "Failed to dispatch notification");
        }
    }
}
