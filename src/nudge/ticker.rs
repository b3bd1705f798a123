use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use super::limiter::cooldown_left;
use crate::clock::Clock;

/// 冷却倒计时
///
/// 后台任务按固定间隔发布剩余冷却时间，归零后退出。
/// drop 或调用 [`cancel`](Self::cancel) 时任务立即停止。
/// 倒计时基于创建时读取的最近一次 nudge，之后再发送需要重新创建。
pub struct CooldownTicker {
    receiver: watch::Receiver<Duration>,
    token: CancellationToken,
    _guard: DropGuard,
}

impl CooldownTicker {
    pub(crate) fn spawn(
        last_at: Option<i64>,
        clock: Arc<dyn Clock>,
        cooldown: Duration,
        tick: Duration,
    ) -> Self {
        let initial = cooldown_left(last_at, clock.now_millis(), cooldown);
        let (sender, receiver) = watch::channel(initial);
        let token = CancellationToken::new();

        if !initial.is_zero() {
            let cancelled = token.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(tick);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = cancelled.cancelled() => {
                            debug!("Cooldown ticker cancelled");
                            break;
                        }
                        _ = interval.tick() => {
                            let remaining = cooldown_left(last_at, clock.now_millis(), cooldown);
                            sender.send_replace(remaining);
                            if remaining.is_zero() {
                                break;
                            }
                        }
                    }
                }
            });
        }

        Self {
            receiver,
            _guard: token.clone().drop_guard(),
            token,
        }
    }

    pub fn remaining(&self) -> Duration {
        *self.receiver.borrow()
    }

    pub fn receiver(&self) -> watch::Receiver<Duration> {
        self.receiver.clone()
    }

    /// 等待下一次更新，倒计时结束后返回 None
    pub async fn changed(&mut self) -> Option<Duration> {
        self.receiver.changed().await.ok()?;
        Some(*self.receiver.borrow_and_update())
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
