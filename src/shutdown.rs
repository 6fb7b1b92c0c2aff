//! Process-wide graceful shutdown signal: a `tokio::sync::watch` broadcast so
//! every suspended task sees the same edge exactly once.

use once_cell::sync::Lazy;
use tokio::sync::watch::{self, Receiver, Sender};
use tracing::info;

static NOTIFY: Lazy<(Sender<bool>, Receiver<bool>)> = Lazy::new(|| watch::channel(false));

/// Signals every `await_shutdown()` waiter to proceed.
pub fn shutdown() {
    NOTIFY.0.send(true).unwrap();
}

/// Resets the signal so it can be triggered again. Only useful in tests.
pub fn reset_shutdown() {
    NOTIFY.0.send(false).unwrap();
}

#[must_use]
pub fn is_shutting_down() -> bool {
    *NOTIFY.1.borrow()
}

/// Resolves immediately if already shutting down, otherwise waits for the
/// edge. Safe to cancel by dropping.
pub async fn await_shutdown() {
    let mut watch = NOTIFY.1.clone();
    if *watch.borrow_and_update() {
        return;
    }
    watch.changed().await.unwrap();
}

pub fn watch_shutdown_signals() {
    tokio::spawn(async move {
        signal_shutdown()
            .await
            .map_err(|err| tracing::error!("error handling shutdown signal: {err}"))
            .unwrap();
        shutdown();
    });
}

#[cfg(unix)]
async fn signal_shutdown() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received, shutting down"),
        _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
    };
    Ok(())
}

#[cfg(not(unix))]
async fn signal_shutdown() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");
    Ok(())
}

/// Runs registered drain hooks, in order, each bounded by `timeout`. Used by
/// the orchestrator to flush the recovery journal before the process exits.
pub struct Shutdown {
    hooks: Vec<Box<dyn FnOnce() -> futures::future::BoxFuture<'static, ()> + Send>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn register<F, Fut>(&mut self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.hooks.push(Box::new(move || Box::pin(hook())));
    }

    pub async fn run(self, timeout: std::time::Duration) {
        for hook in self.hooks {
            if tokio::time::timeout(timeout, hook()).await.is_err() {
                tracing::warn!("shutdown hook exceeded {timeout:?}, continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::{sleep, Duration};

    use super::*;

    #[tokio::test]
    async fn shutdown_signal_propagates() {
        reset_shutdown();
        let start = tokio::time::Instant::now();

        tokio::spawn(async {
            sleep(Duration::from_millis(50)).await;
            shutdown();
        });

        await_shutdown().await;

        assert!(start.elapsed() >= Duration::from_millis(50));
        reset_shutdown();
    }

    #[tokio::test]
    async fn shutdown_hooks_run_in_order() {
        let order = std::sync::Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let mut sd = Shutdown::new();

        let o1 = order.clone();
        sd.register(move || async move { o1.lock().await.push(1) });
        let o2 = order.clone();
        sd.register(move || async move { o2.lock().await.push(2) });

        sd.run(Duration::from_secs(1)).await;

        assert_eq!(*order.lock().await, vec![1, 2]);
    }
}
