//! 存储记录类型
//!
//! 存储边界的解析/校验集中在这里：从弱类型文档解析出强类型实体，
//! 缺省字段的回退规则统一由 serde 默认值定义：
//!
//! - `used` / `read` 缺失 → `false`
//! - `status` 缺失或未知 → `inactive`
//! - `message` / `pairId` / `endedAt` 缺失 → `None`
//! - 时间戳缺失 → `0`
//!
//! `participants` 必须恰好包含两个不同的用户，否则视为损坏记录。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{collections, Document, DocumentSnapshot};
use crate::{AppError, AppResult};

/// 可以从存储文档解析的记录
pub trait Record: Serialize + DeserializeOwned {
    const COLLECTION: &'static str;

    /// 写入文档 id（id 不存储在文档内容中）
    fn set_id(&mut self, id: String);

    /// 解析后的额外校验
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    fn from_snapshot(snapshot: &DocumentSnapshot) -> AppResult<Self> {
        let mut record: Self = serde_json::from_value(Value::Object(snapshot.data.clone()))
            .map_err(|e| AppError::malformed(Self::COLLECTION, &snapshot.id, e.to_string()))?;
        record
            .validate()
            .map_err(|reason| AppError::malformed(Self::COLLECTION, &snapshot.id, reason))?;
        record.set_id(snapshot.id.clone());
        Ok(record)
    }

    fn to_document(&self) -> AppResult<Document> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Err(AppError::malformed(
                Self::COLLECTION,
                "",
                "record must serialize to an object",
            )),
        }
    }
}

/// 批量解析快照
pub fn parse_all<R: Record>(snapshots: &[DocumentSnapshot]) -> AppResult<Vec<R>> {
    snapshots.iter().map(R::from_snapshot).collect()
}

/// 构造字段补丁
pub fn patch<const N: usize>(fields: [(&str, Value); N]) -> Document {
    fields
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

// ============ Pair ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PairStatus {
    Active,
    #[default]
    #[serde(other)]
    Inactive,
}

/// 两个用户之间的配对关系
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pair {
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub status: PairStatus,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
}

impl Pair {
    pub fn new(id: String, a: &str, b: &str, created_at: i64) -> Self {
        Self {
            id,
            participants: vec![a.to_string(), b.to_string()],
            status: PairStatus::Active,
            created_at,
            ended_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PairStatus::Active
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.participants.iter().any(|p| p == uid)
    }

    /// 配对中的另一方
    pub fn partner_of(&self, uid: &str) -> Option<&str> {
        if !self.contains(uid) {
            return None;
        }
        self.participants
            .iter()
            .find(|p| p.as_str() != uid)
            .map(String::as_str)
    }
}

impl Record for Pair {
    const COLLECTION: &'static str = collections::PAIRS;

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn validate(&self) -> Result<(), String> {
        match self.participants.as_slice() {
            [a, b] if a != b => Ok(()),
            _ => Err(format!(
                "expected two distinct participants, got {:?}",
                self.participants
            )),
        }
    }
}

// ============ PairCode ============

/// 一次性、限时的配对邀请
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairCode {
    #[serde(skip)]
    pub id: String,
    pub code: String,
    pub owner_uid: String,
    #[serde(default)]
    pub pair_id: Option<String>,
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub used: bool,
}

impl PairCode {
    /// `now >= expires_at` 即视为过期
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

impl Record for PairCode {
    const COLLECTION: &'static str = collections::PAIR_CODES;

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

// ============ NudgeRecord ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NudgeRecord {
    #[serde(skip)]
    pub id: String,
    pub sender_uid: String,
    pub recipient_uid: String,
    pub pair_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub created_at: i64,
}

impl Record for NudgeRecord {
    // 实际集合为 `pairs/{pairId}/nudges`，这里只用于错误信息
    const COLLECTION: &'static str = "nudges";

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

// ============ Notification ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    Nudge,
    Paired,
    Unpaired,
}

/// 应用内通知（`notifications:{uid}` 订阅的数据来源）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(skip)]
    pub id: String,
    pub recipient_uid: String,
    pub kind: NotificationKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair_id: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub read: bool,
}

impl Record for Notification {
    const COLLECTION: &'static str = collections::NOTIFICATIONS;

    fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn snapshot(id: &str, value: Value) -> DocumentSnapshot {
        DocumentSnapshot::new(id, value.as_object().cloned().unwrap())
    }

    #[test]
    fn pair_defaults_and_round_trip() {
        let pair = Pair::from_snapshot(&snapshot(
            "p1",
            json!({ "participants": ["a", "b"], "status": "active", "createdAt": 5 }),
        ))
        .unwrap();
        assert_eq!(pair.id, "p1");
        assert!(pair.is_active());
        assert_eq!(pair.partner_of("a"), Some("b"));
        assert_eq!(pair.partner_of("c"), None);

        let doc = pair.to_document().unwrap();
        assert!(!doc.contains_key("id"));
        assert!(!doc.contains_key("endedAt"));
        assert_eq!(doc["status"], "active");
    }

    #[test]
    fn unknown_status_is_inactive() {
        let pair = Pair::from_snapshot(&snapshot(
            "p1",
            json!({ "participants": ["a", "b"], "status": "archived" }),
        ))
        .unwrap();
        assert_eq!(pair.status, PairStatus::Inactive);
        assert_eq!(pair.created_at, 0);
    }

    #[test]
    fn pair_requires_two_distinct_participants() {
        for participants in [json!(["a"]), json!(["a", "a"]), json!(["a", "b", "c"])] {
            let err = Pair::from_snapshot(&snapshot("p1", json!({ "participants": participants })))
                .unwrap_err();
            assert_eq!(err.kind(), "MalformedRecord");
        }
    }

    #[test]
    fn pair_code_defaults() {
        let code = PairCode::from_snapshot(&snapshot(
            "c1",
            json!({ "code": "123456", "ownerUid": "a", "expiresAt": 100 }),
        ))
        .unwrap();
        assert!(!code.used);
        assert_eq!(code.pair_id, None);
        assert!(!code.is_expired(99));
        assert!(code.is_expired(100));
    }

    #[test]
    fn missing_required_field_is_malformed() {
        let err = PairCode::from_snapshot(&snapshot("c1", json!({ "ownerUid": "a" }))).unwrap_err();
        assert!(matches!(err, AppError::MalformedRecord { ref id, .. } if id == "c1"));
    }
}
