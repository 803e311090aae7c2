//! 重试工具
//!
//! 指数退避：首次等待 `initial_delay`，之后每次翻倍，最多请求 `max_attempts` 次。
//! 重试状态只存在于一次调用内部，不在页面或会话之间共享。

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// 退避重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    initial_delay: Duration,
    max_attempts: u32,
}

impl RetryPolicy {
    /// `max_attempts` 至少为 1
    pub fn new(initial_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 第 `attempt` 次（从 1 开始）请求失败后的等待时间
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(2000), 3)
    }
}

/// 重试最终失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: u32,
}

/// 按策略执行 `op`
///
/// - `op` 接收当前尝试次数（从 1 开始）
/// - 只有 `is_retryable` 返回 true 的错误才会重试，其他错误立即返回
/// - 每次等待前调用 `on_retry(已失败次数, 等待时间, 错误)`
///
/// 成功时返回 (结果, 实际请求次数)
pub async fn retry_with_backoff<T, E, Op, Fut, R, N>(
    policy: &RetryPolicy,
    mut op: Op,
    is_retryable: R,
    mut on_retry: N,
) -> Result<(T, u32), RetryFailure<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    N: FnMut(u32, Duration, &E),
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(error) => {
                if !is_retryable(&error) || attempt >= policy.max_attempts() {
                    return Err(RetryFailure {
                        error,
                        attempts: attempt,
                    });
                }
                let delay = policy.delay_for(attempt);
                on_retry(attempt, delay, &error);
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::new(Duration::from_millis(2000), 3);
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(8000));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(RetryPolicy::new(Duration::ZERO, 0).max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result = retry_with_backoff(
            &policy,
            |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("busy")
                    } else {
                        Ok("done")
                    }
                }
            },
            |_| true,
            |_, _, _| {},
        )
        .await;

        assert_eq!(result, Ok(("done", 3)));
        // 2000 + 4000
        assert!(started.elapsed() >= Duration::from_millis(6000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_stops_immediately() {
        let policy = RetryPolicy::default();
        let mut retries = 0;

        let result: Result<((), u32), _> = retry_with_backoff(
            &policy,
            |_| async { Err("fatal") },
            |e| *e != "fatal",
            |_, _, _| retries += 1,
        )
        .await;

        assert_eq!(
            result,
            Err(RetryFailure {
                error: "fatal",
                attempts: 1
            })
        );
        assert_eq!(retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts() {
        let policy = RetryPolicy::new(Duration::from_millis(10), 3);
        let mut delays = Vec::new();

        let result: Result<((), u32), _> = retry_with_backoff(
            &policy,
            |_| async { Err("busy") },
            |_| true,
            |_, delay, _| delays.push(delay),
        )
        .await;

        assert_eq!(result.unwrap_err().attempts, 3);
        assert_eq!(
            delays,
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
    }
}
