use crate::config::RetryConfig;
use crate::error::{Error, Result};

/// Run a storage operation with bounded exponential backoff.
///
/// Every failed attempt is logged; the last error surfaces as `Error::BackendIo`.
pub(crate) fn with_retry<T>(
    config: &RetryConfig,
    operation: &str,
    mut attempt: impl FnMut() -> anyhow::Result<T>,
) -> Result<T> {
    let max_attempts = config.max_attempts.max(1);
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt() {
            Ok(value) => return Ok(value),
            Err(e) if tries < max_attempts => {
                let delay = config.backoff(tries);
                tracing::warn!(
                    operation,
                    attempt = tries,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "[backend] Storage operation failed, retrying"
                );
                std::thread::sleep(delay);
            }
            Err(e) => {
                tracing::error!(operation, attempts = tries, error = %e, "[backend] Storage operation failed");
                return Err(Error::BackendIo(e.context(format!("{} after {} attempt(s)", operation, tries))));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let mut calls = 0;
        let result = with_retry(&fast(3), "put", || {
            calls += 1;
            if calls < 3 {
                anyhow::bail!("transient")
            }
            Ok(calls)
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_gives_up_as_backend_io() {
        let mut calls = 0;
        let result: Result<()> = with_retry(&fast(2), "put", || {
            calls += 1;
            anyhow::bail!("disk full")
        });
        assert_eq!(calls, 2);
        let err = result.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("disk full"));
    }
}
