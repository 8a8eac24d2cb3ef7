//! Bounded retry with capped exponential backoff for transport-level
//! failures.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{trace, warn};

use crate::Error;

/// Result of a single attempt, distinguishing "ssh itself failed" (exit
/// 255, retryable) from a remote command exit code, which is always
/// returned as data rather than retried.
#[derive(Debug)]
pub struct AttemptOutcome<T> {
    /// Exit status of the ssh transport for this attempt.
    pub status: i32,
    /// The caller's payload (stdout/stderr, or whatever `attempt` produces)
    /// for this attempt.
    pub payload: T,
}

/// Wrap `attempt` with bounded retries and exponential backoff.
///
/// `retries` is `ANSIBLE_SSH_RETRIES`; the transport makes `retries + 1`
/// attempts. Backoff between attempts is `min(2^attempt - 1, 30)` seconds.
/// Exit code 255 is treated as "the ssh transport itself failed"; any other
/// exit code (1-254, or 0) is returned immediately without a retry. An
/// `Err` is retried only when [`Error::is_retryable`] says so.
pub async fn retry<T, F, Fut>(retries: u32, mut attempt: F) -> Result<AttemptOutcome<T>, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<AttemptOutcome<T>, Error>>,
{
    let mut remaining = retries + 1;
    let mut backoff_attempt: u32 = 0;

    loop {
        remaining -= 1;
        let result = attempt().await;

        match result {
            Ok(outcome) if outcome.status != 255 => return Ok(outcome),
            Ok(outcome) => {
                if remaining == 0 {
                    warn!(status = outcome.status, "ssh retries exhausted");
                    return Ok(outcome);
                }
                trace!(status = outcome.status, remaining, "retrying after exit 255");
            }
            Err(e) if e.is_retryable() && remaining > 0 => {
                trace!(error = %e, remaining, "retrying after transport error");
            }
            Err(e) => return Err(e),
        }

        let pause = backoff_seconds(backoff_attempt);
        backoff_attempt += 1;
        if pause > 0 {
            sleep(Duration::from_secs(pause)).await;
        }
    }
}

fn backoff_seconds(attempt: u32) -> u64 {
    let raw = 2u64.saturating_pow(attempt).saturating_sub(1);
    raw.min(30)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_sequence_matches_spec() {
        let seq: Vec<u64> = (0..8).map(backoff_seconds).collect();
        assert_eq!(seq, vec![0, 1, 3, 7, 15, 30, 30, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exactly_n_plus_one_times_on_255() {
        let calls = AtomicU32::new(0);
        let result = retry(3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 4 {
                    Ok(AttemptOutcome {
                        status: 255,
                        payload: (),
                    })
                } else {
                    Ok(AttemptOutcome {
                        status: 0,
                        payload: (),
                    })
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result.status, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_retryable_error_propagates_immediately() {
        let calls = AtomicU32::new(0);
        let result = retry(5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<AttemptOutcome<()>, _>(Error::Configuration("bad".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remote_exit_code_never_retried() {
        let calls = AtomicU32::new(0);
        let result = retry(5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Ok(AttemptOutcome {
                    status: 1,
                    payload: (),
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(result.status, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
