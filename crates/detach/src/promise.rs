//! The caller-facing handle for one detached launch.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::JobError;

pub(crate) type Outcome = Result<String, JobError>;

/// Single-settlement handle to a detached launch.
///
/// Resolves with the command's captured output joined by newlines, or
/// rejects with a [`JobError`]. Settlement happens exactly once: the
/// collector consumes its sender on delivery, so a second settlement is
/// unrepresentable. If the collector dies without settling, awaiting
/// surfaces [`JobError::ResultUndeliverable`] rather than hanging.
#[derive(Debug)]
pub struct JobPromise {
    pid: i32,
    rx: oneshot::Receiver<Outcome>,
}

impl JobPromise {
    pub(crate) fn new(pid: i32, rx: oneshot::Receiver<Outcome>) -> Self {
        Self { pid, rx }
    }

    /// Process id of the detached child.
    ///
    /// Valid for the life of this handle; once the promise settles the
    /// process is guaranteed terminated and the id may be recycled by the
    /// OS, so it must not be interpreted after that.
    pub fn pid(&self) -> i32 {
        self.pid
    }
}

impl Future for JobPromise {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(JobError::ResultUndeliverable(
                "collector terminated before settling".into(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_once_sender_delivers() {
        let (tx, rx) = oneshot::channel();
        let promise = JobPromise::new(42, rx);
        assert_eq!(promise.pid(), 42);

        tx.send(Ok("done".into())).unwrap();
        assert_eq!(promise.await.unwrap(), "done");
    }

    #[tokio::test]
    async fn dropped_sender_surfaces_undeliverable() {
        let (tx, rx) = oneshot::channel::<Outcome>();
        drop(tx);
        let promise = JobPromise::new(7, rx);
        assert!(matches!(
            promise.await.unwrap_err(),
            JobError::ResultUndeliverable(_)
        ));
    }
}
