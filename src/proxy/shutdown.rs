// src/proxy/shutdown.rs
use futures::future::join_all;
use std::future::Future;
use std::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

// One cancellation signal shared by every actor, plus the handles to wait on.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn spawn<F>(&self, name: impl Into<String>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        self.lock_tasks().push((name.into(), handle));
    }

    pub fn active_tasks(&self) -> usize {
        self.lock_tasks()
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .count()
    }

    pub async fn shutdown(&self) {
        self.token.cancel();

        let tasks = std::mem::take(&mut *self.lock_tasks());
        let (names, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();

        for (name, result) in names.iter().zip(join_all(handles).await) {
            match result {
                Ok(()) => debug!("{} exited", name),
                Err(e) if e.is_panic() => error!("{} panicked: {}", name, e),
                Err(e) => error!("{} did not finish: {}", name, e),
            }
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<(String, JoinHandle<()>)>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_waits_for_every_task() {
        let coordinator = ShutdownCoordinator::new();
        let exited = Arc::new(AtomicUsize::new(0));

        for i in 0..5 {
            let token = coordinator.token();
            let exited = exited.clone();
            coordinator.spawn(format!("task-{}", i), async move {
                token.cancelled().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
                exited.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(coordinator.active_tasks(), 5);
        coordinator.shutdown().await;

        assert_eq!(exited.load(Ordering::SeqCst), 5);
        assert_eq!(coordinator.active_tasks(), 0);
        assert!(coordinator.is_shutting_down());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let coordinator = ShutdownCoordinator::new();
        let token = coordinator.token();
        coordinator.spawn("waiter", async move { token.cancelled().await });

        coordinator.shutdown().await;
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_block_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.spawn("broken", async { panic!("boom") });

        tokio::time::timeout(Duration::from_secs(1), coordinator.shutdown())
            .await
            .unwrap();
    }
}
