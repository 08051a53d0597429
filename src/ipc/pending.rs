use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::IpcError;

pub(crate) type ReplySender = oneshot::Sender<Result<Value, IpcError>>;

/// Result of a [`MessageBus::dispatch`](crate::MessageBus::dispatch).
///
/// Resolves exactly once. Dropping it abandons the reply; the responder is not
/// interrupted.
#[must_use = "a pending result does nothing unless awaited"]
pub struct Pending<T> {
    kind: &'static str,
    rx: oneshot::Receiver<Result<Value, IpcError>>,
    _reply: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Pending<T> {
    pub(crate) fn channel(kind: &'static str) -> (ReplySender, Self) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            Self {
                kind,
                rx,
                _reply: PhantomData,
            },
        )
    }

    /// An already rejected result.
    pub(crate) fn failed(kind: &'static str, err: IpcError) -> Self {
        let (tx, pending) = Self::channel(kind);
        let _ = tx.send(Err(err));
        pending
    }
}

impl<T: DeserializeOwned> Future for Pending<T> {
    type Output = Result<T, IpcError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(_)) => Poll::Ready(Err(IpcError::Canceled)),
            Poll::Ready(Ok(Err(e))) => Poll::Ready(Err(e)),
            Poll::Ready(Ok(Ok(body))) => Poll::Ready(serde_json::from_value(body).map_err(|e| {
                IpcError::Deserialize {
                    kind: this.kind.to_string(),
                    reason: e.to_string(),
                }
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dropped_sender_cancels() {
        let (tx, pending) = Pending::<u32>::channel("ping");
        drop(tx);
        assert!(matches!(pending.await, Err(IpcError::Canceled)));
    }

    #[tokio::test]
    async fn test_reply_shape_mismatch_is_deserialize_error() {
        let (tx, pending) = Pending::<u32>::channel("ping");
        let _ = tx.send(Ok(Value::String("nope".into())));
        let err = pending.await.unwrap_err();
        assert_eq!(err.as_label(), "ipc_deserialize");
    }
}
