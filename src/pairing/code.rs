use std::time::Duration;

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use crate::clock::duration_millis;
use crate::{AppError, AppResult};

/// 首位不为 0，保证码值落在 [100000, 999999]
const LEADING_CHARSET: &[u8] = b"123456789";
const CHARSET: &[u8] = b"0123456789";
pub const CODE_LENGTH: usize = 6;

/// 新生成的配对码
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedCode {
    pub code: String,
    pub created_at: i64,
    pub expires_at: i64,
}

impl GeneratedCode {
    /// 生成 6 位数字配对码，`expires_at = now + ttl`
    ///
    /// 每一位独立均匀取值，整体在 [100000, 999999] 上均匀分布。
    /// 与其他有效配对码的唯一性由 [`PairingManager`](super::manager::PairingManager) 保证。
    pub fn generate(now: i64, ttl: Duration) -> Self {
        let mut rng = rand::rng();
        let code: String = std::iter::once(LEADING_CHARSET)
            .chain(std::iter::repeat_n(CHARSET, CODE_LENGTH - 1))
            .map(|charset| charset.choose(&mut rng).map_or('0', |b| *b as char))
            .collect();
        Self {
            code,
            created_at: now,
            expires_at: now.saturating_add(duration_millis(ttl)),
        }
    }
}

/// 规范化用户输入：去掉所有非数字字符后必须恰好 6 位
pub fn normalize_code(input: &str) -> AppResult<String> {
    let digits: String = input.chars().filter(char::is_ascii_digit).collect();
    if digits.len() == CODE_LENGTH {
        Ok(digits)
    } else {
        Err(AppError::InvalidFormat)
    }
}
