//! Bounded retry for source lookups

use crate::errors::Result;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

const BASE_DELAY_MS: u64 = 100;
const MAX_DELAY_MS: u64 = 2_000;

fn backoff(attempt: u32) -> Duration {
    let delay = BASE_DELAY_MS.saturating_mul(1u64 << attempt.min(6));
    Duration::from_millis(delay.min(MAX_DELAY_MS))
}

/// Run `op` up to `max_attempts` times.
///
/// Transient errors back off and retry; a definitive error (see
/// [`ResolverError::is_definitive`](crate::ResolverError::is_definitive))
/// returns immediately. Callers degrade exhaustion to "no result" rather
/// than aborting the surrounding batch.
pub async fn with_retries<T, F, Fut>(what: &str, max_attempts: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_definitive() || attempt >= max_attempts => return Err(e),
            Err(e) => {
                debug!(what, attempt, error = %e, "transient lookup failure, retrying");
                tokio::time::sleep(backoff(attempt)).await;
            }
        }
    }
}
