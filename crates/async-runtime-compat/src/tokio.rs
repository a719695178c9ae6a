//! Tokio runtime spawner implementation

use crate::{BoxedTask, Spawner};

/// Spawner for the Tokio runtime
///
/// Must be used from inside a Tokio runtime context.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl Spawner for TokioSpawner {
    fn spawn(&self, future: BoxedTask) {
        // Dropping the JoinHandle detaches the task
        drop(tokio::spawn(future));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokio_spawner() {
        let spawner = TokioSpawner;
        let (tx, rx) = tokio::sync::oneshot::channel();

        spawner.spawn(Box::pin(async move {
            let _ = tx.send(42);
        }));

        assert_eq!(rx.await.ok(), Some(42));
    }
}
