//! The command capability executed by the scheduler.

use std::future::Future;

use async_trait::async_trait;

/// User-supplied work driven by the scheduler.
///
/// `execute` runs on the scheduler worker and may block it arbitrarily long;
/// its errors are reported on the scheduler's error stream, not returned to
/// producers. `finalize` is called exactly once, after the task has
/// permanently left the scheduler, and is the place to release
/// command-owned resources.
#[async_trait]
pub trait Command: Send + Sync {
    async fn execute(&self) -> anyhow::Result<()>;

    fn finalize(&self) {}
}

/// Adapter turning an async closure into a [`Command`].
pub struct FnCommand<F> {
    f: F,
}

impl<F, Fut> FnCommand<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Command for FnCommand<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn execute(&self) -> anyhow::Result<()> {
        (self.f)().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn fn_command_runs_the_closure() {
        let calls = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&calls);
        let command = FnCommand::new(move || {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        command.execute().await.unwrap();
        command.execute().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fn_command_propagates_errors() {
        let command = FnCommand::new(|| async { anyhow::bail!("boom") });
        let err = command.execute().await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
