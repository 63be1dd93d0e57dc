//! Per-request cancellation and deadline.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use kestrel_core::{KestrelError, KestrelResult};

/// Bounds one request. Dropping the wrapped future aborts every store call
/// still in flight; deletes already issued stay issued.
#[derive(Debug, Clone, Default)]
pub struct RequestScope {
    cancel: CancellationToken,
    deadline: Option<Duration>,
}

impl RequestScope {
    pub fn new() -> Self { Self::default() }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken { &self.cancel }

    pub fn deadline(&self) -> Option<Duration> { self.deadline }

    pub async fn run<T, F>(&self, fut: F) -> KestrelResult<T>
    where
        F: Future<Output = KestrelResult<T>>,
    {
        let bounded = async {
            match self.deadline {
                Some(d) => tokio::time::timeout(d, fut).await.map_err(|_| KestrelError::DeadlineExceeded(d))?,
                None => fut.await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(KestrelError::Cancelled),
            res = bounded => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_result() {
        let v = RequestScope::new().run(async { Ok::<_, KestrelError>(7) }).await.unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test]
    async fn deadline_aborts_slow_work() {
        let scope = RequestScope::new().with_deadline(Some(Duration::from_millis(20)));
        let res = scope
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, KestrelError>(())
            })
            .await;
        assert!(matches!(res, Err(KestrelError::DeadlineExceeded(_))));
    }

    #[tokio::test]
    async fn cancellation_wins() {
        let token = CancellationToken::new();
        let scope = RequestScope::new().with_cancel(token.clone());
        token.cancel();
        let res = scope
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, KestrelError>(())
            })
            .await;
        assert!(matches!(res, Err(KestrelError::Cancelled)));
    }
}
