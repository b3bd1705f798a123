use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use super::code::{normalize_code, GeneratedCode};
use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::records::{patch, Pair, PairCode, PairStatus, Record};
use crate::store::{
    collections, Direction, DocumentSnapshot, DocumentStore, FilterOp, Query, TransactionOps,
};
use crate::{AppError, AppResult};

/// 配对码生成函数
pub type CodeGenerator = fn(i64, Duration) -> GeneratedCode;

/// 兑换成功的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Redemption {
    pub pair_id: String,
    /// 配对码的发布者
    pub partner_uid: String,
}

/// 解除配对的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unpaired {
    pub pair: Pair,
    /// 调用前是否处于 active 状态（重复解除时为 false）
    pub was_active: bool,
}

/// 用户当前的配对状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum PairingState {
    Unpaired,
    CodeIssued { code: PairCode },
    Paired { pair: Pair },
}

/// 配对协议引擎
///
/// - 生成配对码：已配对时拒绝；已有有效配对码时原样返回
/// - 兑换配对码：校验后在同一事务中标记已使用并创建 Pair
/// - 解除配对：只修改 Pair 状态，不删除历史配对码和 nudge 记录
pub struct PairingManager<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: CoreConfig,
    generator: CodeGenerator,
}

impl<S: DocumentStore> PairingManager<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: CoreConfig) -> Self {
        Self {
            store,
            clock,
            config,
            generator: GeneratedCode::generate,
        }
    }

    /// 替换配对码生成函数
    pub fn with_generator(mut self, generator: CodeGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub async fn issue_code(&self, uid: &str) -> AppResult<PairCode> {
        let now = self.clock.now_millis();
        let ttl = self.config.code_ttl();
        let attempts = self.config.code_issue_attempts.max(1);
        let generator = self.generator;
        let owner = uid.to_string();

        let (record, reused) = self
            .store
            .transaction(move |txn| {
                if find_active_pair(txn, &owner)?.is_some() {
                    return Err(AppError::AlreadyPaired);
                }
                if let Some(existing) =
                    first::<PairCode>(txn.query(collections::PAIR_CODES, &owned_live_code(&owner, now))?)?
                {
                    return Ok((existing, true));
                }

                for attempt in 1..=attempts {
                    let generated = generator(now, ttl);
                    let collides = !txn
                        .query(collections::PAIR_CODES, &unexpired_code_value(&generated.code, now))?
                        .is_empty();
                    if collides {
                        debug!(attempt, "Generated pairing code collides with an unexpired code");
                        continue;
                    }

                    let record = PairCode {
                        id: Uuid::new_v4().to_string(),
                        code: generated.code,
                        owner_uid: owner.clone(),
                        pair_id: None,
                        expires_at: generated.expires_at,
                        created_at: generated.created_at,
                        used: false,
                    };
                    txn.set(collections::PAIR_CODES, &record.id, record.to_document()?)?;
                    return Ok((record, false));
                }
                Err(AppError::CodeSpaceExhausted)
            })
            .await?;

        if reused {
            debug!(uid, code_id = %record.id, "Returning existing pairing code");
        } else {
            info!(uid, code_id = %record.id, expires_at = record.expires_at, "Issued pairing code");
        }
        Ok(record)
    }

    /// 兑换配对码
    ///
    /// 检查顺序（先命中先返回）：不存在 → 已过期 → 已使用 → 自己的码 →
    /// 兑换方已配对 → 发布方已配对。全部通过后在同一事务中
    /// 标记配对码已使用并创建 Pair，并发兑换同一个码只会有一个成功。
    pub async fn redeem_code(&self, input: &str, redeemer_uid: &str) -> AppResult<Redemption> {
        let code = normalize_code(input)?;
        let now = self.clock.now_millis();
        let redeemer = redeemer_uid.to_string();
        let pair_id = Uuid::new_v4().to_string();

        let result = self
            .store
            .transaction(move |txn| {
                let record: PairCode = first(txn.query(collections::PAIR_CODES, &code_lookup(&code))?)?
                    .ok_or(AppError::NotFound)?;

                if record.is_expired(now) {
                    return Err(AppError::Expired);
                }
                if record.used {
                    return Err(AppError::AlreadyUsed);
                }
                if record.owner_uid == redeemer {
                    return Err(AppError::SelfRedemption);
                }
                if find_active_pair(txn, &redeemer)?.is_some() {
                    return Err(AppError::AlreadyPaired);
                }
                // 发布方可能在发码之后兑换了别人的码
                if find_active_pair(txn, &record.owner_uid)?.is_some() {
                    return Err(AppError::AlreadyPaired);
                }

                let pair = Pair::new(pair_id, &record.owner_uid, &redeemer, now);
                txn.set(collections::PAIRS, &pair.id, pair.to_document()?)?;
                txn.update(
                    collections::PAIR_CODES,
                    &record.id,
                    patch([("used", json!(true)), ("pairId", json!(pair.id))]),
                )?;

                Ok(Redemption {
                    pair_id: pair.id,
                    partner_uid: record.owner_uid,
                })
            })
            .await;

        match &result {
            Ok(redemption) => info!(
                redeemer = redeemer_uid,
                partner = %redemption.partner_uid,
                pair_id = %redemption.pair_id,
                "Pairing code redeemed"
            ),
            Err(e) => debug!(redeemer = redeemer_uid, kind = e.kind(), "Pairing code refused"),
        }
        result
    }

    /// 解除配对：只将状态置为 inactive，重复调用幂等
    pub async fn unpair(&self, pair_id: &str) -> AppResult<Unpaired> {
        let now = self.clock.now_millis();
        let id = pair_id.to_string();

        let outcome = self
            .store
            .transaction(move |txn| {
                let snapshot = txn
                    .get(collections::PAIRS, &id)?
                    .ok_or(AppError::PairNotFound)?;
                let mut pair = Pair::from_snapshot(&snapshot)?;
                if !pair.is_active() {
                    return Ok(Unpaired {
                        pair,
                        was_active: false,
                    });
                }

                txn.update(
                    collections::PAIRS,
                    &id,
                    patch([("status", json!(PairStatus::Inactive)), ("endedAt", json!(now))]),
                )?;
                pair.status = PairStatus::Inactive;
                pair.ended_at = Some(now);
                Ok(Unpaired {
                    pair,
                    was_active: true,
                })
            })
            .await?;

        if outcome.was_active {
            info!(pair_id, "Pair deactivated");
        } else {
            debug!(pair_id, "Pair already inactive");
        }
        Ok(outcome)
    }

    /// 用户当前有效（未使用、未过期）的配对码
    pub async fn get_active_code(&self, uid: &str) -> AppResult<Option<PairCode>> {
        let now = self.clock.now_millis();
        let snapshots = self
            .store
            .query(collections::PAIR_CODES, &owned_live_code(uid, now))
            .await?;
        first(snapshots)
    }

    pub async fn active_pair(&self, uid: &str) -> AppResult<Option<Pair>> {
        let snapshots = self
            .store
            .query(collections::PAIRS, &active_pair_of(uid))
            .await?;
        first(snapshots)
    }

    pub async fn get_pair(&self, pair_id: &str) -> AppResult<Pair> {
        let snapshot = self
            .store
            .get(collections::PAIRS, pair_id)
            .await?
            .ok_or(AppError::PairNotFound)?;
        Pair::from_snapshot(&snapshot)
    }

    pub async fn state(&self, uid: &str) -> AppResult<PairingState> {
        if let Some(pair) = self.active_pair(uid).await? {
            return Ok(PairingState::Paired { pair });
        }
        Ok(match self.get_active_code(uid).await? {
            Some(code) => PairingState::CodeIssued { code },
            None => PairingState::Unpaired,
        })
    }
}

// ============ 查询 ============

pub(crate) fn active_pair_of(uid: &str) -> Query {
    Query::new()
        .array_contains("participants", uid)
        .where_eq("status", json!(PairStatus::Active))
}

fn owned_live_code(uid: &str, now: i64) -> Query {
    Query::new()
        .where_eq("ownerUid", uid)
        .where_eq("used", false)
        .filter("expiresAt", FilterOp::Gt, now)
        .order_by("createdAt", Direction::Desc)
        .limit(1)
}

/// 未过期的码值（无论是否已使用）都不能再次发放
fn unexpired_code_value(code: &str, now: i64) -> Query {
    Query::new()
        .where_eq("code", code)
        .filter("expiresAt", FilterOp::Gt, now)
        .limit(1)
}

/// 同一个码值可能被多次发放（前一次过期后），取最近一次
fn code_lookup(code: &str) -> Query {
    Query::new()
        .where_eq("code", code)
        .order_by("createdAt", Direction::Desc)
        .limit(1)
}

fn find_active_pair(txn: &mut dyn TransactionOps, uid: &str) -> AppResult<Option<Pair>> {
    first(txn.query(collections::PAIRS, &active_pair_of(uid))?)
}

fn first<R: Record>(snapshots: Vec<DocumentSnapshot>) -> AppResult<Option<R>> {
    snapshots.first().map(R::from_snapshot).transpose()
}
