use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_std::sync::Arc;

use crate::error::SessionError;

/// How often a bounded wait looks at its cancel token.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Cooperative cancellation shared between a crawl and whoever started it.
#[derive(Clone, Default, Debug)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Awaits `future` for at most `limit`, giving up early once `cancel` fires.
pub async fn bounded<F, T>(
    future: F,
    limit: Duration,
    cancel: &CancelToken,
    what: &str,
) -> Result<T, SessionError>
where
    F: Future<Output = Result<T, SessionError>>,
{
    let started = Instant::now();
    let mut future = Box::pin(future);

    loop {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        let left = match limit.checked_sub(started.elapsed()) {
            Some(x) if !x.is_zero() => x,
            _ => {
                return Err(SessionError::Timeout {
                    what: what.to_owned(),
                    secs: limit.as_secs(),
                })
            }
        };

        if let Ok(result) = async_std::future::timeout(left.min(CANCEL_POLL), &mut future).await {
            return result;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_bounded_returns_result() {
        let cancel = CancelToken::new();
        let result = async_std::task::block_on(bounded(
            async { Ok::<_, SessionError>(7) },
            Duration::from_secs(1),
            &cancel,
            "seven",
        ));
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn test_bounded_times_out() {
        let cancel = CancelToken::new();
        let result: Result<(), SessionError> = async_std::task::block_on(bounded(
            async {
                async_std::task::sleep(Duration::from_secs(10)).await;
                Ok(())
            },
            Duration::from_millis(250),
            &cancel,
            "sleeper",
        ));
        assert!(matches!(result, Err(SessionError::Timeout { .. })));
    }

    #[test]
    fn test_bounded_observes_cancel() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        async_std::task::spawn(async move {
            async_std::task::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });

        let result: Result<(), SessionError> = async_std::task::block_on(bounded(
            async {
                async_std::task::sleep(Duration::from_secs(10)).await;
                Ok(())
            },
            Duration::from_secs(5),
            &cancel,
            "sleeper",
        ));
        assert!(matches!(result, Err(SessionError::Cancelled)));
    }
}
