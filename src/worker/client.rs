//! # Worker-side connection to the supervisor.
//!
//! A [`WorkerClient`] owns a [`MessageBus`] whose upstream link is the parent
//! supervisor. Lifecycle notifications are published (fire-and-forget), the
//! readiness handshake is a request/reply.
//!
//! ```text
//! worker process                                   supervisor
//!   handshake()          ── Request(handshake) ──►  Handshake handler → RUNNING
//!                        ◄── Reply(ack) ──────────
//!   request_completed(1) ── Publish(lifecycle) ──►  ReloadStrategy evaluation
//!   exiting(0)           ── Publish(lifecycle) ──►
//!   finish()             (flushes queued frames)
//! ```

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::IpcError;
use crate::ipc::{Handshake, HandshakeAck, LifecycleEvent, MessageBus};
use crate::process::WORKER_ENV;

/// Handle used by a worker process to talk to its supervisor.
#[derive(Clone, Debug)]
pub struct WorkerClient {
    bus: MessageBus,
    pid: u32,
    name: String,
}

impl WorkerClient {
    /// Connects over the process's stdin/stdout, the pipes set up by
    /// [`CommandLauncher`](crate::CommandLauncher).
    ///
    /// The worker name comes from the `PROCVISOR_WORKER` environment variable,
    /// falling back to `fallback_name`. Nothing else may write to stdout afterwards.
    pub fn over_stdio(fallback_name: &str) -> Self {
        let name = std::env::var(WORKER_ENV).unwrap_or_else(|_| fallback_name.to_string());
        Self::connect(name, std::process::id(), tokio::io::stdin(), tokio::io::stdout())
    }

    /// Connects over an arbitrary byte-stream pair.
    pub fn connect<R, W>(name: impl Into<String>, pid: u32, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let bus = MessageBus::new();
        bus.attach_upstream(reader, writer);
        Self {
            bus,
            pid,
            name: name.into(),
        }
    }

    /// Pid announced to the supervisor.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Worker name announced to the supervisor.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The worker's message bus.
    ///
    /// Handlers subscribed here are advertised to the supervisor, whose
    /// [`MessageBus::dispatch`] then routes requests of that kind to this worker.
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Announces readiness and waits for the supervisor's acknowledgement.
    pub async fn handshake(&self, handled_by: Vec<String>) -> Result<HandshakeAck, IpcError> {
        self.bus
            .dispatch(&Handshake {
                pid: self.pid,
                worker: self.name.clone(),
                handled_by,
            })
            .await
    }

    /// Publishes a lifecycle event.
    pub async fn emit(&self, event: LifecycleEvent) -> Result<(), IpcError> {
        self.bus.publish(&event).await
    }

    /// Reports `delta` completed units of work.
    pub async fn request_completed(&self, delta: u64) -> Result<(), IpcError> {
        self.emit(LifecycleEvent::RequestCounterIncrease {
            pid: self.pid,
            delta,
        })
        .await
    }

    /// Reports an accepted connection.
    pub async fn connection_created(
        &self,
        connection_id: u64,
        info: Value,
    ) -> Result<(), IpcError> {
        self.emit(LifecycleEvent::ConnectionCreated {
            pid: self.pid,
            connection_id,
            connection_info: info,
        })
        .await
    }

    /// Reports that the worker is blocked.
    pub async fn blocked(&self) -> Result<(), IpcError> {
        self.emit(LifecycleEvent::ProcessBlocked { pid: self.pid })
            .await
    }

    /// Reports an unhandled error the worker survived.
    pub async fn exception(&self, message: impl Into<String>) -> Result<(), IpcError> {
        self.emit(LifecycleEvent::ExceptionRaised {
            pid: self.pid,
            message: message.into(),
        })
        .await
    }

    /// Reports the exit code the worker is about to exit with.
    pub async fn exiting(&self, exit_code: i32) -> Result<(), IpcError> {
        self.emit(LifecycleEvent::ProcessExit {
            pid: self.pid,
            exit_code,
        })
        .await
    }

    /// Flushes queued frames and drops the link to the supervisor.
    pub async fn finish(&self) {
        if let Some(peer) = self.bus.upstream() {
            self.bus.disconnect(peer).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reload::{EachRequest, ReloadEvent, ReloadStrategy};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_handshake_and_events_reach_parent() {
        let (child_io, parent_io) = tokio::io::duplex(16 * 1024);
        let (pr, pw) = tokio::io::split(parent_io);
        let (cr, cw) = tokio::io::split(child_io);

        let parent = MessageBus::new();
        parent.attach(pr, pw);
        parent.subscribe(|h: Handshake| async move {
            Ok::<_, String>(HandshakeAck { worker: h.worker })
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        parent.subscribe(move |ev: LifecycleEvent| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(ev);
                Ok::<_, String>(())
            }
        });

        let client = WorkerClient::connect("web", 77, cr, cw);
        let ack = client.handshake(vec!["http".into()]).await.expect("ack");
        assert_eq!(ack.worker, "web");

        client.request_completed(1).await.expect("publish");
        client.exiting(0).await.expect("publish");
        client.finish().await;

        let first = rx.recv().await.expect("event");
        assert!(EachRequest.should_reload(&ReloadEvent::Lifecycle(&first)));
        assert_eq!(
            rx.recv().await,
            Some(LifecycleEvent::ProcessExit { pid: 77, exit_code: 0 })
        );
    }
}
