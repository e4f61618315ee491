//! 带错误分类的通用重试逻辑

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::ModelError;

/// 重试失败原因
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RetryError {
    /// 调用方已取消，不再重试
    #[error("cancelled")]
    Cancelled,

    /// 分类器判定为不可重试的错误
    #[error("{source}")]
    Aborted { attempts: usize, source: ModelError },

    #[error("Maximum retries exceeded")]
    Exhausted { attempts: usize, last: ModelError },
}

/// 重试结束时的状态与结果
#[derive(Debug)]
pub struct RetryOutcome<S, T> {
    /// 经过所有重试回调修改后的状态
    pub state: S,
    pub result: Result<T, RetryError>,
}

/// 重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 执行操作直到成功、遇到不可重试的错误、尝试次数耗尽或被取消。
    ///
    /// 每次尝试都以当前状态的副本调用 `operation`；失败且可重试时，
    /// `on_retry` 可以修改状态（例如截断内容），下一次尝试即使用修改后的状态。
    pub async fn run<S, T, Op, Fut, Classify, OnRetry>(
        &self,
        cancel: &CancellationToken,
        mut state: S,
        mut operation: Op,
        is_retryable: Classify,
        mut on_retry: OnRetry,
    ) -> RetryOutcome<S, T>
    where
        S: Clone,
        Op: FnMut(S) -> Fut,
        Fut: Future<Output = Result<T, ModelError>>,
        Classify: Fn(&ModelError) -> bool,
        OnRetry: FnMut(&mut S, &ModelError, usize),
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return RetryOutcome {
                    state,
                    result: Err(RetryError::Cancelled),
                };
            }
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(None),
                result = operation(state.clone()) => result.map_err(Some),
            };

            let error = match result {
                Ok(value) => {
                    return RetryOutcome {
                        state,
                        result: Ok(value),
                    };
                }
                Err(None) => {
                    return RetryOutcome {
                        state,
                        result: Err(RetryError::Cancelled),
                    };
                }
                Err(Some(error)) => error,
            };

            if !is_retryable(&error) {
                return RetryOutcome {
                    state,
                    result: Err(RetryError::Aborted {
                        attempts: attempt,
                        source: error,
                    }),
                };
            }
            if attempt >= max_attempts {
                return RetryOutcome {
                    state,
                    result: Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: error,
                    }),
                };
            }

            warn!(
                "❌ 调用模型服务出错，重试中 (第 {} / {} 次尝试): {}",
                attempt, max_attempts, error
            );
            on_retry(&mut state, &error, attempt);

            if !self.delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
        }
    }
}

/// 所有模型错误均可重试
pub fn always_retry(_error: &ModelError) -> bool {
    true
}

/// 重试前不做任何处理
pub fn no_adjustment<S>(_state: &mut S, _error: &ModelError, _attempt: usize) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_retry_until_success() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let outcome = RetryPolicy::new(3)
            .run(
                &CancellationToken::new(),
                (),
                move |_| async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(ModelError::InvalidResponse("empty".to_string()))
                    } else {
                        Ok(n)
                    }
                },
                always_retry,
                no_adjustment,
            )
            .await;

        assert_eq!(outcome.result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let outcome: RetryOutcome<(), ()> = RetryPolicy::new(3)
            .run(
                &CancellationToken::new(),
                (),
                move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ModelError::Provider("503".to_string()))
                },
                always_retry,
                no_adjustment,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match outcome.result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, ModelError::Provider("503".to_string()));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_error_aborts_immediately() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let outcome: RetryOutcome<(), ()> = RetryPolicy::new(5)
            .run(
                &CancellationToken::new(),
                (),
                move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ModelError::Provider("bad request".to_string()))
                },
                |error| error.is_context_window_exceeded(),
                no_adjustment,
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            outcome.result,
            Err(RetryError::Aborted { attempts: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_on_retry_adjusts_state_for_next_attempt() {
        let seen = std::sync::Mutex::new(Vec::new());
        let outcome = RetryPolicy::new(4)
            .run(
                &CancellationToken::new(),
                100usize,
                |budget| {
                    seen.lock().unwrap().push(budget);
                    async move {
                        if budget > 80 {
                            Err(ModelError::ContextWindowExceeded("too long".to_string()))
                        } else {
                            Ok(budget)
                        }
                    }
                },
                always_retry,
                |budget, error, _| {
                    if error.is_context_window_exceeded() {
                        *budget = *budget * 9 / 10;
                    }
                },
            )
            .await;

        assert_eq!(outcome.result, Ok(72));
        assert_eq!(outcome.state, 72);
        assert_eq!(*seen.lock().unwrap(), vec![100, 90, 81, 72]);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let outcome: RetryOutcome<(), ()> = RetryPolicy::new(3)
            .run(
                &cancel,
                (),
                move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                always_retry,
                no_adjustment,
            )
            .await;

        assert_eq!(outcome.result, Err(RetryError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_pending_attempt() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome: RetryOutcome<(), ()> = RetryPolicy::new(3)
            .run(
                &cancel,
                (),
                |_| async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                },
                always_retry,
                no_adjustment,
            )
            .await;

        assert_eq!(outcome.result, Err(RetryError::Cancelled));
    }
}
