//! 通知通道
//!
//! 后台任务的结果、重试进度和持久化降级只通过这里上报，
//! 不影响调用方自身的返回值。

use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// 通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// 频率限制，正在等待重试（过程性）
    Retrying {
        unit: usize,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        reason: String,
    },
    /// 页面分析完成
    UnitCompleted { unit: usize, blank: bool },
    /// 页面分析终止失败
    UnitFailed { unit: usize, message: String },
    /// 批量分析在某页中断
    BatchHalted { unit: usize },
    /// 累积记录已创建
    RecordCreated { record_id: String },
    /// 累积记录已更新
    RecordUpdated { record_id: String, completed: usize },
    /// 持久化失败（非致命）
    PersistenceDegraded { message: String },
    /// 已替换会话的结果被丢弃
    StaleResultDiscarded { session_key: String },
}

impl Notification {
    /// 终止性失败，与过程性的重试通知区分
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            Notification::UnitFailed { .. } | Notification::BatchHalted { .. }
        )
    }
}

/// 通知发送端；接收端关闭后静默丢弃
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<UnboundedSender<Notification>>,
}

impl Notifier {
    pub fn channel() -> (Self, UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// 不接收任何通知
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, notification: Notification) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_vs_transient() {
        let retry = Notification::Retrying {
            unit: 1,
            attempt: 1,
            max_attempts: 3,
            delay: Duration::from_secs(2),
            reason: "429".into(),
        };
        assert!(!retry.is_terminal_failure());
        assert!(Notification::UnitFailed {
            unit: 1,
            message: "x".into()
        }
        .is_terminal_failure());
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (notifier, rx) = Notifier::channel();
        drop(rx);
        notifier.send(Notification::BatchHalted { unit: 2 });
        Notifier::disabled().send(Notification::BatchHalted { unit: 2 });
    }
}
