//! Bounded retry with exponential backoff for remote calls.
//!
//! Every listing page and every upload goes through [`with_retry`]. A call
//! that fails on its final attempt is returned as an error; nothing is
//! recorded as transferred until a call succeeds.

use std::future::Future;

use bucket_backup_sync_models::RetryPolicy;

use crate::StoreError;

/// Runs `op` until it succeeds or `policy.max_attempts` attempts have
/// failed, sleeping [`RetryPolicy::delay_after`] between attempts.
///
/// `what` names the operation in log lines.
///
/// # Errors
///
/// Returns the error of the last attempt.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                log::warn!(
                    "{what}: attempt {attempt}/{max_attempts} failed ({e}), retrying in {delay:.1?}..."
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&policy(3), "op", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err::<u32, StoreError>("transient".into())
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&policy(2), "op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), StoreError>("down".into())
        })
        .await;

        assert_eq!(result.unwrap_err().to_string(), "down");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn single_attempt_policy_does_not_retry() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&RetryPolicy::none(), "op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), StoreError>("down".into())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
