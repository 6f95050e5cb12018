use std::{future::Future, time::Duration};

use tracing::debug;

use crate::ClusterError;

/// Bounded retry for read-modify-write cycles that lost an optimistic
/// concurrency race.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            ..Self::default()
        }
    }
}

/// Runs `operation` until it succeeds, fails with anything other than a
/// conflict, or the policy runs out of attempts. Each attempt must re-read the
/// current object itself.
pub async fn retry_on_conflict<T, F, Fut>(
    policy: &RetryPolicy,
    kind: &'static str,
    name: &str,
    mut operation: F,
) -> Result<T, ClusterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClusterError>>,
{
    let mut delay = policy.initial_backoff;

    for attempt in 1..=policy.attempts {
        match operation().await {
            Err(ClusterError::Conflict(message)) => {
                debug!(kind, name, attempt, %message, "update conflicted");

                if attempt < policy.attempts {
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(policy.max_backoff);
                }
            }
            result => return result,
        }
    }

    Err(ClusterError::RetriesExhausted {
        kind,
        name: name.to_owned(),
        attempts: policy.attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn should_retry_until_success() {
        let calls = &AtomicU32::new(0);

        let result = retry_on_conflict(&fast(5), "Deployment", "web", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ClusterError::Conflict("stale".to_owned()))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn should_give_up_after_configured_attempts() {
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = retry_on_conflict(&fast(3), "Secret", "creds", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ClusterError::Conflict("stale".to_owned()))
        })
        .await;

        assert!(matches!(
            result,
            Err(ClusterError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn should_not_retry_other_errors() {
        let calls = &AtomicU32::new(0);

        let result: Result<(), _> = retry_on_conflict(&fast(5), "Service", "web", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ClusterError::Invalid("bad".to_owned()))
        })
        .await;

        assert!(matches!(result, Err(ClusterError::Invalid(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
