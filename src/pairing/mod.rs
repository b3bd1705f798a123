//! 配对模块
//!
//! 管理配对流程：6 位配对码生成、兑换、解除配对。
//! 核心逻辑在 [`PairingManager`](manager::PairingManager)。

pub mod code;
pub mod manager;

pub use code::{normalize_code, GeneratedCode};
pub use manager::{PairingManager, PairingState, Redemption, Unpaired};
