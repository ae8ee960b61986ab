// Bounded concurrency gate for externally-bound calls.
//
// The fan-out stages embed one code per task; this gate is what actually
// bounds how many of those calls are in flight at once. The limit is a
// first-class, backend-tunable parameter: high for local inference, low
// for rate-limited remote APIs.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A semaphore-backed gate with a fixed permit count.
#[derive(Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl ConcurrencyGate {
    /// Create a gate with the given limit (clamped to at least 1).
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Wait for a permit. The permit releases on drop.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| anyhow::anyhow!("concurrency gate closed"))
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_limit_clamped_to_one() {
        let gate = ConcurrencyGate::new(0);
        assert_eq!(gate.limit(), 1);
    }

    #[tokio::test]
    async fn test_permits_bound_concurrency() {
        let gate = ConcurrencyGate::new(2);
        let p1 = gate.acquire().await.unwrap();
        let _p2 = gate.acquire().await.unwrap();

        // Third acquire should not be immediately ready.
        let third = tokio::time::timeout(
            tokio::time::Duration::from_millis(20),
            gate.acquire(),
        )
        .await;
        assert!(third.is_err(), "third permit should block at limit 2");

        // Releasing one permit unblocks the next waiter.
        drop(p1);
        let p3 = tokio::time::timeout(
            tokio::time::Duration::from_millis(100),
            gate.acquire(),
        )
        .await;
        assert!(p3.is_ok());
    }
}
