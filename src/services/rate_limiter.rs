//! Client-side throttle for GitHub search calls.
//!
//! A call holds its slot from admission until `cooldown` after the returned
//! [`Admission`] is dropped, so the limiter bounds throughput rather than
//! just concurrency.

use crate::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    cooldown: Duration,
}

/// Proof of admission. Dropping it schedules the slot's release.
#[derive(Debug)]
pub struct Admission {
    permit: Option<OwnedSemaphorePermit>,
    cooldown: Duration,
}

impl RateLimiter {
    pub fn new(concurrency: usize, cooldown: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            cooldown,
        }
    }

    /// Wait until fewer than `concurrency` calls are in flight.
    pub async fn admit(&self) -> Result<Admission, AppError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::internal("rate limiter closed"))?;

        Ok(Admission {
            permit: Some(permit),
            cooldown: self.cooldown,
        })
    }

    /// Slots free right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        let cooldown = self.cooldown;

        // Outside a runtime nothing can be waiting on the semaphore
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                tokio::time::sleep(cooldown).await;
                drop(permit);
            });
        }
    }
}
