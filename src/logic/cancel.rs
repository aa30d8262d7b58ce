use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::CancellationError;

/// Signal observed by in-flight storage calls of one request.
#[derive(Debug, Clone)]
pub struct Cancellation {
    receiver: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

/// Fires the paired [`Cancellation`].
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // receivers may already be gone
        let _ = self.sender.send(true);
    }
}

impl Cancellation {
    pub fn new(timeout: Option<Duration>) -> (CancelHandle, Self) {
        let (sender, receiver) = watch::channel(false);
        let cancellation = Self {
            receiver,
            deadline: timeout.map(|t| Instant::now() + t),
        };
        (CancelHandle { sender }, cancellation)
    }

    /// A signal that only its deadline (if any) can fire.
    pub fn detached(timeout: Option<Duration>) -> Self {
        let (_handle, cancellation) = Self::new(timeout);
        cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Runs `operation`, aborting it when the signal or the deadline fires.
    pub async fn guard<F, T, E>(&self, operation: F) -> Result<Result<T, E>, CancellationError>
    where
        F: Future<Output = Result<T, E>>,
    {
        if self.is_cancelled() {
            return Err(CancellationError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(CancellationError::DeadlineExceeded);
            }
        }

        let mut receiver = self.receiver.clone();
        let cancelled = async move {
            loop {
                if receiver.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
                if *receiver.borrow() {
                    return;
                }
            }
        };
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            result = operation => Ok(result),
            _ = cancelled => Err(CancellationError::Cancelled),
            _ = deadline => Err(CancellationError::DeadlineExceeded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guard_passes_result_through() {
        let cancellation = Cancellation::detached(None);
        let result = cancellation.guard(async { Ok::<_, ()>(7) }).await;
        assert_eq!(result, Ok(Ok(7)));
    }

    #[tokio::test]
    async fn test_cancel_aborts_pending_operation() {
        let (handle, cancellation) = Cancellation::new(None);
        let pending = cancellation.guard(std::future::pending::<Result<(), ()>>());
        handle.cancel();
        assert_eq!(pending.await, Err(CancellationError::Cancelled));
        assert!(cancellation.is_cancelled());
    }

    #[tokio::test]
    async fn test_deadline_aborts_slow_operation() {
        let cancellation = Cancellation::detached(Some(Duration::from_millis(10)));
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ()>(())
        };
        assert_eq!(cancellation.guard(slow).await, Err(CancellationError::DeadlineExceeded));
    }
}
