//! Per-provider in-flight request limits.
//!
//! `LocalInFlightLimiter` only bounds calls made by this process. Several
//! worker processes sharing one provider each get their own budget.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Held for the duration of one provider call.
pub struct InFlightPermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl InFlightPermit {
    /// Permit that does not count against any limit.
    pub fn unlimited() -> Self {
        Self { _permit: None }
    }
}

#[async_trait::async_trait]
pub trait InFlightLimiter: Send + Sync {
    /// Wait until a call to `provider_code` may start.
    async fn acquire(&self, provider_code: &str) -> InFlightPermit;
}

/// Semaphore per provider code, created on first use.
pub struct LocalInFlightLimiter {
    per_provider: usize,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl LocalInFlightLimiter {
    pub fn new(per_provider: usize) -> Self {
        Self {
            per_provider: per_provider.max(1),
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    fn semaphore(&self, provider_code: &str) -> Arc<Semaphore> {
        let mut semaphores = self
            .semaphores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            semaphores
                .entry(provider_code.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_provider))),
        )
    }

    /// Free slots for `provider_code`.
    pub fn available(&self, provider_code: &str) -> usize {
        self.semaphore(provider_code).available_permits()
    }
}

#[async_trait::async_trait]
impl InFlightLimiter for LocalInFlightLimiter {
    async fn acquire(&self, provider_code: &str) -> InFlightPermit {
        let semaphore = self.semaphore(provider_code);
        InFlightPermit {
            _permit: semaphore.acquire_owned().await.ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn permits_are_per_provider() {
        let limiter = LocalInFlightLimiter::new(2);
        let a1 = limiter.acquire("a").await;
        let _a2 = limiter.acquire("a").await;
        assert_eq!(limiter.available("a"), 0);
        assert_eq!(limiter.available("b"), 2);

        drop(a1);
        assert_eq!(limiter.available("a"), 1);
    }

    #[tokio::test]
    async fn acquire_waits_for_release() {
        let limiter = Arc::new(LocalInFlightLimiter::new(1));
        let held = limiter.acquire("gemini").await;

        let waiter = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                let _permit = limiter.acquire("gemini").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn zero_limit_is_raised_to_one() {
        let limiter = LocalInFlightLimiter::new(0);
        assert_eq!(limiter.available("x"), 1);
    }
}
