//! 应用错误处理模块
//!
//! 错误需要实现 Serialize 才能传递给 UI 层，
//! 统一转为 `{ kind, category, message }` 格式。

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// 错误分类
///
/// UI 根据分类决定展示方式：领域错误展示具体提示，
/// 传输类错误统一展示"请重试"。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    /// 输入格式错误
    Validation,
    /// 时间相关：配对码过期、冷却中
    Temporal,
    /// 状态冲突：已使用、已配对、自己兑换
    Conflict,
    /// 目标不存在
    NotFound,
    /// 外部存储不可达等传输错误
    Transport,
}

/// 应用统一错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 配对码格式错误（去除非数字字符后不是 6 位）
    #[error("配对码格式错误，请输入 6 位数字")]
    InvalidFormat,

    /// 无效的配对码
    #[error("配对码不存在")]
    NotFound,

    /// 配对码已过期
    #[error("配对码已过期")]
    Expired,

    /// 配对码已被使用
    #[error("配对码已被使用")]
    AlreadyUsed,

    /// 不能兑换自己生成的配对码
    #[error("不能使用自己的配对码")]
    SelfRedemption,

    /// 已经处于配对状态
    #[error("已经与其他人配对")]
    AlreadyPaired,

    /// 生成配对码过于频繁（预留）
    #[error("操作过于频繁，请稍后再试")]
    RateLimited,

    /// 多次生成均与有效配对码冲突
    #[error("暂时无法生成配对码，请稍后再试")]
    CodeSpaceExhausted,

    /// Nudge 冷却中
    #[error("请等待 {} 秒后再发送", remaining.as_secs().max(1))]
    CooldownActive { remaining: Duration },

    /// Nudge 留言过长
    #[error("留言不能超过 {max} 个字符")]
    MessageTooLong { max: usize },

    /// 配对关系不存在
    #[error("配对关系不存在")]
    PairNotFound,

    /// 当前用户不在该配对关系中
    #[error("尚未配对")]
    NotPaired,

    /// 通知不存在
    #[error("通知不存在")]
    NotificationNotFound,

    /// 会话未启动（尚未登录）
    #[error("Session not started")]
    SessionNotStarted,

    /// 外部存储错误
    #[error("Store error: {0}")]
    Store(String),

    /// 存储中的记录无法解析
    #[error("Malformed record {collection}/{id}: {reason}")]
    MalformedRecord {
        collection: String,
        id: String,
        reason: String,
    },

    /// 序列化/反序列化错误
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidFormat => "InvalidFormat",
            AppError::NotFound => "NotFound",
            AppError::Expired => "Expired",
            AppError::AlreadyUsed => "AlreadyUsed",
            AppError::SelfRedemption => "SelfRedemption",
            AppError::AlreadyPaired => "AlreadyPaired",
            AppError::RateLimited => "RateLimited",
            AppError::CodeSpaceExhausted => "CodeSpaceExhausted",
            AppError::CooldownActive { .. } => "CooldownActive",
            AppError::MessageTooLong { .. } => "MessageTooLong",
            AppError::PairNotFound => "PairNotFound",
            AppError::NotPaired => "NotPaired",
            AppError::NotificationNotFound => "NotificationNotFound",
            AppError::SessionNotStarted => "SessionNotStarted",
            AppError::Store(_) => "Store",
            AppError::MalformedRecord { .. } => "MalformedRecord",
            AppError::Serialization(_) => "Serialization",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::InvalidFormat | AppError::MessageTooLong { .. } => {
                ErrorCategory::Validation
            }
            AppError::Expired | AppError::CooldownActive { .. } | AppError::RateLimited => {
                ErrorCategory::Temporal
            }
            AppError::AlreadyUsed
            | AppError::SelfRedemption
            | AppError::AlreadyPaired
            | AppError::NotPaired
            | AppError::CodeSpaceExhausted => ErrorCategory::Conflict,
            AppError::NotFound | AppError::PairNotFound | AppError::NotificationNotFound => {
                ErrorCategory::NotFound
            }
            AppError::SessionNotStarted
            | AppError::Store(_)
            | AppError::MalformedRecord { .. }
            | AppError::Serialization(_) => ErrorCategory::Transport,
        }
    }

    /// 是否为传输类错误（由调用方决定是否重试）
    pub fn is_transport(&self) -> bool {
        self.category() == ErrorCategory::Transport
    }

    /// 面向用户的提示文案
    pub fn user_message(&self) -> String {
        if self.is_transport() {
            "网络异常，请稍后重试".to_string()
        } else {
            self.to_string()
        }
    }

    pub(crate) fn malformed(collection: &str, id: &str, reason: impl Into<String>) -> Self {
        AppError::MalformedRecord {
            collection: collection.to_string(),
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

/// 传递给 UI 的序列化错误格式
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("AppError", 3)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("category", &self.category())?;
        state.serialize_field("message", &self.user_message())?;
        state.end()
    }
}

// ============ 便捷类型别名 ============

/// Result 类型别名
pub type AppResult<T> = Result<T, AppError>;
