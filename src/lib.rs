//! 情侣应用的配对与实时协作核心
//!
//! - [`pairing`]：6 位配对码的生成、兑换和解除配对
//! - [`nudge`]：配对双方之间带冷却限制的提醒
//! - [`subscription`]：按资源 key 去重的实时订阅和共享缓存
//! - [`session`] / [`commands`]：面向 UI 的会话和命令入口

pub mod clock;
pub mod commands;
pub mod config;
pub mod error;
pub mod notify;
pub mod nudge;
pub mod pairing;
pub mod records;
pub mod session;
pub mod store;
pub mod subscription;

pub use error::{AppError, AppResult};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局 tracing subscriber，`RUST_LOG` 未设置时默认 `pairlink=debug`
///
/// 重复调用时保留已安装的 subscriber。
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pairlink=debug")),
        )
        .try_init();
}
