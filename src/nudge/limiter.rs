use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use super::ticker::CooldownTicker;
use crate::clock::{duration_millis, Clock};
use crate::config::CoreConfig;
use crate::notify::{nudge_notification, Notifier};
use crate::records::{NudgeRecord, Pair, Record};
use crate::store::{collections, Direction, DocumentStore, Query};
use crate::{AppError, AppResult};

/// 发送成功的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NudgeSent {
    pub nudge_id: String,
    pub nudge: NudgeRecord,
    /// 通知是否投递成功（投递失败不影响 nudge 本身）
    pub notified: bool,
}

/// Nudge 冷却限制
///
/// 冷却由发送方在写入前检查，存储本身不做约束。检查和写入之间没有事务，
/// 两台设备几乎同时发送时可能都通过检查；冷却只是体验上的限制，
/// 这种情况可以接受。
pub struct NudgeLimiter<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    clock: Arc<dyn Clock>,
    config: CoreConfig,
}

impl<S: DocumentStore, N: Notifier> NudgeLimiter<S, N> {
    pub fn new(store: Arc<S>, notifier: Arc<N>, clock: Arc<dyn Clock>, config: CoreConfig) -> Self {
        Self {
            store,
            notifier,
            clock,
            config,
        }
    }

    /// 发送方在该配对中最近一次 nudge
    pub async fn last_nudge(&self, sender_uid: &str, pair_id: &str) -> AppResult<Option<NudgeRecord>> {
        let query = Query::new()
            .where_eq("senderUid", sender_uid)
            .order_by("createdAt", Direction::Desc)
            .limit(1);
        let snapshots = self
            .store
            .query(&collections::nudges(pair_id), &query)
            .await?;
        snapshots.first().map(NudgeRecord::from_snapshot).transpose()
    }

    pub async fn cooldown_remaining(
        &self,
        sender_uid: &str,
        pair_id: &str,
        now: i64,
    ) -> AppResult<Duration> {
        let last = self.last_nudge(sender_uid, pair_id).await?;
        Ok(cooldown_left(
            last.map(|r| r.created_at),
            now,
            self.config.nudge_cooldown(),
        ))
    }

    pub async fn can_send(&self, sender_uid: &str, pair_id: &str, now: i64) -> AppResult<bool> {
        Ok(self
            .cooldown_remaining(sender_uid, pair_id, now)
            .await?
            .is_zero())
    }

    /// 发送 nudge
    ///
    /// 写入前重新检查冷却，关闭 UI 读取到写入之间的窗口；
    /// 写入成功后向接收方投递通知。
    pub async fn send(
        &self,
        sender_uid: &str,
        recipient_uid: &str,
        pair_id: &str,
        message: Option<&str>,
    ) -> AppResult<NudgeSent> {
        let message = self.normalize_message(message)?;
        self.ensure_paired(sender_uid, recipient_uid, pair_id).await?;

        let now = self.clock.now_millis();
        let remaining = self.cooldown_remaining(sender_uid, pair_id, now).await?;
        if !remaining.is_zero() {
            return Err(AppError::CooldownActive { remaining });
        }

        let nudge = NudgeRecord {
            id: String::new(),
            sender_uid: sender_uid.to_string(),
            recipient_uid: recipient_uid.to_string(),
            pair_id: pair_id.to_string(),
            message,
            created_at: now,
        };
        let nudge_id = self
            .store
            .add(&collections::nudges(pair_id), nudge.to_document()?)
            .await?;
        info!(sender = sender_uid, pair_id, nudge_id = %nudge_id, "Nudge sent");

        let notified = match self
            .notifier
            .dispatch(nudge_notification(
                recipient_uid,
                pair_id,
                nudge.message.as_deref(),
                now,
            ))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(recipient = recipient_uid, error = %e, "Failed to dispatch nudge notification");
                false
            }
        };

        Ok(NudgeSent {
            nudge: NudgeRecord {
                id: nudge_id.clone(),
                ..nudge
            },
            nudge_id,
            notified,
        })
    }

    /// 冷却倒计时，UI 上下文销毁时 drop 即可停止
    pub async fn cooldown_ticker(&self, sender_uid: &str, pair_id: &str) -> AppResult<CooldownTicker> {
        let last = self.last_nudge(sender_uid, pair_id).await?;
        Ok(CooldownTicker::spawn(
            last.map(|r| r.created_at),
            self.clock.clone(),
            self.config.nudge_cooldown(),
            self.config.cooldown_tick(),
        ))
    }

    /// 去掉首尾空白，空字符串视为没有留言
    fn normalize_message(&self, message: Option<&str>) -> AppResult<Option<String>> {
        let Some(message) = message.map(str::trim).filter(|m| !m.is_empty()) else {
            return Ok(None);
        };
        let max = self.config.nudge_message_max_chars;
        if message.chars().count() > max {
            return Err(AppError::MessageTooLong { max });
        }
        Ok(Some(message.to_string()))
    }

    async fn ensure_paired(&self, sender_uid: &str, recipient_uid: &str, pair_id: &str) -> AppResult<Pair> {
        let snapshot = self
            .store
            .get(collections::PAIRS, pair_id)
            .await?
            .ok_or(AppError::PairNotFound)?;
        let pair = Pair::from_snapshot(&snapshot)?;
        if pair.is_active() && pair.partner_of(sender_uid) == Some(recipient_uid) {
            Ok(pair)
        } else {
            Err(AppError::NotPaired)
        }
    }
}

/// 剩余冷却时间：`max(0, cooldown - (now - last))`
///
/// 最近一次记录时间晚于 `now`（时钟偏差）时按刚发送处理。
pub fn cooldown_left(last_at: Option<i64>, now: i64, cooldown: Duration) -> Duration {
    let Some(last_at) = last_at else {
        return Duration::ZERO;
    };
    let elapsed = now.saturating_sub(last_at).max(0);
    let left = duration_millis(cooldown).saturating_sub(elapsed);
    Duration::from_millis(left.max(0) as u64)
}
