//! Small cross-cutting helpers shared by the durable-storage components.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::error;

pub const TX_RETRY_LIMIT: u32 = 10;

/// Retries a `sqlx::Any` transaction body up to [`TX_RETRY_LIMIT`] times.
/// Only commit failures are retried; an `Err` returned by the body itself
/// rolls back immediately and is not retried, since it represents a logic
/// decision, not a transient storage conflict.
#[macro_export]
macro_rules! retry_tx {
    ($pool:expr, $tx:ident, $expression:expr) => {
        async {
            let mut res;
            let mut counter = 0;
            loop {
                let mut $tx = $pool.begin().await?;
                res = async { $expression }.await;
                if let Err(e) = res {
                    return Err(e);
                }
                match $tx.commit().await {
                    Err(e) => {
                        counter += 1;
                        if counter > $crate::utils::TX_RETRY_LIMIT {
                            return Err(e.into());
                        }
                        tracing::warn!(error = ?e, "db transaction commit failed ({counter}/{})", $crate::utils::TX_RETRY_LIMIT);
                    }
                    Ok(_) => break,
                }
            }
            res
        }
    };
}

/// Spawns `future_spawner` repeatedly with a fixed backoff until it succeeds
/// or a shutdown signal arrives; a panic inside the task is treated the same
/// as an `Err`.
pub fn spawn_with_backoff<S, F>(future_spawner: S, backoff: Duration) -> JoinHandle<()>
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
    S: Fn() -> F + Send + Sync + 'static,
{
    tokio::spawn(async move {
        loop {
            if crate::shutdown::is_shutting_down() {
                return;
            }

            let future = std::panic::AssertUnwindSafe(future_spawner());
            let result = futures::FutureExt::catch_unwind(future).await;

            match result {
                Ok(Ok(())) => return,
                Ok(Err(err)) => error!("task failed: {err:?}"),
                Err(err) => error!("task panicked: {err:?}"),
            }

            if crate::shutdown::is_shutting_down() {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = crate::shutdown::await_shutdown() => return,
            }
        }
    })
}

/// Converts a USD amount to integer cents, rounding to nearest, for
/// wire-format fields that must serialize as exact integers.
pub fn usd_to_cents(usd: f64) -> u64 {
    (usd * 100.0).round().max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usd_to_cents_rounds() {
        assert_eq!(usd_to_cents(1.005), 101);
        assert_eq!(usd_to_cents(-5.0), 0);
    }
}
