//! Retry executor
//!
//! Runs an operation, consults the policy on failure, waits out the
//! backoff and loops. Attempts of one request never overlap, except for a
//! single fallback attempt that may race the primary while it backs off.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::decision::{RetryDecision, RetryPolicy};
use crate::errors::{RouterError, RouterResult};
use crate::observability::{log_event_with_fields, Event};

/// Sleep unless cancelled first.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> RouterResult<()> {
    if cancel.is_cancelled() {
        return Err(RouterError::Cancelled);
    }
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(RouterError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Run `operation` under `policy` until it succeeds or the policy gives up.
///
/// The first attempt receives `None`; retries receive the policy's args.
pub async fn execute_with_retry<P, T, F, Fut>(
    policy: &mut P,
    cancel: &CancellationToken,
    mut operation: F,
) -> RouterResult<T>
where
    P: RetryPolicy,
    F: FnMut(Option<P::Args>) -> Fut,
    Fut: Future<Output = RouterResult<T>>,
{
    let mut args = None;
    loop {
        if cancel.is_cancelled() {
            return Err(RouterError::Cancelled);
        }

        let error = match operation(args.take()).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        match policy.should_retry(&error) {
            RetryDecision::Retry { after, args: next } => {
                sleep_or_cancel(after, cancel).await?;
                args = Some(next);
            }
            RetryDecision::Fail(replacement) => return Err(replacement.unwrap_or(error)),
        }
    }
}

enum Race<T> {
    Primary(RouterResult<T>),
    Fallback(RouterResult<T>),
}

/// Like [`execute_with_retry`], but once a backoff reaches
/// `fallback_min_backoff`, `fallback` is started and raced against the
/// primary's next attempts. The first success wins.
///
/// `fallback` runs at most once per call. If it fails, the primary carries
/// on alone. If the primary gives up while the fallback is still running,
/// the fallback's result decides.
pub async fn execute_with_retry_and_fallback<P, T, F, Fut, G, GFut>(
    policy: &mut P,
    cancel: &CancellationToken,
    fallback_min_backoff: Duration,
    mut operation: F,
    fallback: Option<G>,
) -> RouterResult<T>
where
    P: RetryPolicy,
    F: FnMut(Option<P::Args>) -> Fut,
    Fut: Future<Output = RouterResult<T>>,
    G: FnOnce() -> GFut,
    GFut: Future<Output = RouterResult<T>>,
{
    let mut fallback = fallback;
    let mut in_flight: Option<Pin<Box<GFut>>> = None;
    let mut args = None;
    let mut delay = Duration::ZERO;

    loop {
        let result = {
            let primary = async {
                sleep_or_cancel(delay, cancel).await?;
                operation(args.take()).await
            };
            tokio::pin!(primary);

            loop {
                let race = match in_flight.as_mut() {
                    None => Race::Primary(primary.as_mut().await),
                    Some(secondary) => tokio::select! {
                        result = primary.as_mut() => Race::Primary(result),
                        result = secondary.as_mut() => Race::Fallback(result),
                    },
                };

                match race {
                    Race::Primary(result) => break result,
                    Race::Fallback(Ok(value)) => {
                        log_event_with_fields(Event::RegionFallbackWon, &[("winner", "fallback")]);
                        return Ok(value);
                    }
                    Race::Fallback(Err(error)) => {
                        log_event_with_fields(
                            Event::RetryExhausted,
                            &[("policy", "region_fallback"), ("error", error.to_string().as_str())],
                        );
                        in_flight = None;
                    }
                }
            }
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        match policy.should_retry(&error) {
            RetryDecision::Retry { after, args: next } => {
                args = Some(next);
                delay = after;
                if in_flight.is_none() && after >= fallback_min_backoff && !after.is_zero() {
                    if let Some(start) = fallback.take() {
                        log_event_with_fields(
                            Event::RegionFallbackStart,
                            &[("backoff_ms", after.as_millis().to_string().as_str())],
                        );
                        in_flight = Some(Box::pin(start()));
                    }
                }
            }
            RetryDecision::Fail(replacement) => {
                let error = replacement.unwrap_or(error);
                if let Some(secondary) = in_flight.take() {
                    if let Ok(value) = secondary.await {
                        log_event_with_fields(Event::RegionFallbackWon, &[("winner", "fallback")]);
                        return Ok(value);
                    }
                }
                return Err(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Retries gone errors a fixed number of times with a fixed backoff.
    struct FixedPolicy {
        left: u32,
        backoff: Duration,
    }

    impl RetryPolicy for FixedPolicy {
        type Args = u32;

        fn should_retry(&mut self, error: &RouterError) -> RetryDecision<u32> {
            if self.left == 0 || !matches!(error, RouterError::Gone { .. }) {
                return RetryDecision::Fail(None);
            }
            self.left -= 1;
            RetryDecision::Retry {
                after: self.backoff,
                args: self.left,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let mut policy = FixedPolicy {
            left: 5,
            backoff: Duration::from_millis(10),
        };
        let calls = AtomicU32::new(0);
        let result = execute_with_retry(&mut policy, &CancellationToken::new(), |args| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RouterError::gone("x"))
                } else {
                    Ok(args)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fail_surfaces_original_error() {
        let mut policy = FixedPolicy {
            left: 5,
            backoff: Duration::ZERO,
        };
        let result: RouterResult<()> =
            execute_with_retry(&mut policy, &CancellationToken::new(), |_| async {
                Err(RouterError::bad_request("nope"))
            })
            .await;
        assert!(matches!(result, Err(RouterError::BadRequest { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let mut policy = FixedPolicy {
            left: 5,
            backoff: Duration::from_secs(60),
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let result: RouterResult<()> = execute_with_retry(&mut policy, &cancel, |_| async {
            Err(RouterError::gone("x"))
        })
        .await;
        assert!(matches!(result, Err(RouterError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_wins_during_long_backoff() {
        let mut policy = FixedPolicy {
            left: 3,
            backoff: Duration::from_secs(10),
        };
        let result = execute_with_retry_and_fallback(
            &mut policy,
            &CancellationToken::new(),
            Duration::from_millis(500),
            |_| async { Err::<&str, _>(RouterError::gone("primary down")) },
            Some(|| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok("fallback")
            }),
        )
        .await;
        assert_eq!(result.unwrap(), "fallback");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_not_started_for_short_backoff() {
        let mut policy = FixedPolicy {
            left: 1,
            backoff: Duration::from_millis(10),
        };
        let started = AtomicU32::new(0);
        let result = execute_with_retry_and_fallback(
            &mut policy,
            &CancellationToken::new(),
            Duration::from_millis(500),
            |args| async move {
                match args {
                    None => Err(RouterError::gone("x")),
                    Some(_) => Ok("primary"),
                }
            },
            Some(|| {
                started.fetch_add(1, Ordering::SeqCst);
                async { Ok("fallback") }
            }),
        )
        .await;
        assert_eq!(result.unwrap(), "primary");
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_primary_continues_after_fallback_fails() {
        let mut policy = FixedPolicy {
            left: 3,
            backoff: Duration::from_secs(1),
        };
        let result = execute_with_retry_and_fallback(
            &mut policy,
            &CancellationToken::new(),
            Duration::from_millis(500),
            |args| async move {
                match args {
                    Some(left) if left <= 1 => Ok("primary"),
                    _ => Err(RouterError::gone("x")),
                }
            },
            Some(|| async { Err::<&str, _>(RouterError::gone("fallback down")) }),
        )
        .await;
        assert_eq!(result.unwrap(), "primary");
    }
}
