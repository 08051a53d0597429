//! Scripted in-memory processes for supervisor and scheduler tests.
//!
//! Every launch creates a "process" task that talks to the supervisor through a
//! [`WorkerClient`] over a `tokio::io::duplex` pipe. Signals are delivered
//! through a channel and recorded with their tokio timestamp.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::control::ProcessControl;
use super::launcher::{Channel, Launched, Launcher};
use crate::error::SpawnError;
use crate::ipc::Message;
use crate::worker::{Readiness, WorkerClient, WorkerSpec};

/// Behaviour of one launched process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Script {
    /// Becomes ready, exits 0 on SIGTERM.
    Serve,
    /// Becomes ready, reports `n` completed requests, then serves.
    Requests(u32),
    /// Hosts an [`Echo`] handler, then serves like [`Script::Serve`].
    Echo,
    /// Becomes ready and ignores SIGTERM.
    Stubborn,
    /// Becomes ready, then exits with `code` after 10ms.
    Crash(i32),
    /// Becomes ready, then exits with `code` after the given delay.
    CrashAfter(Duration, i32),
    /// Exits with `code` after 10ms without becoming ready.
    CrashBeforeReady(i32),
    /// Never signals readiness.
    Hang,
    /// The launch itself fails.
    FailSpawn,
}

/// Request served inside [`Script::Echo`] workers; the reply is `"<worker>: <text>"`.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Echo(pub(crate) String);

impl Message for Echo {
    const KIND: &'static str = "echo";
    type Reply = String;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Signal {
    Term,
    Kill,
}

#[derive(Clone, Debug)]
pub(crate) struct Launch {
    pub(crate) name: String,
    pub(crate) pid: u32,
    pub(crate) at: Instant,
}

#[derive(Clone, Debug)]
pub(crate) struct Delivered {
    pub(crate) pid: u32,
    pub(crate) signal: Signal,
    pub(crate) at: Instant,
}

type ScriptFn = dyn Fn(&str, u32) -> Script + Send + Sync;

#[derive(Default)]
struct Journal {
    launches: Vec<Launch>,
    signals: Vec<Delivered>,
    counts: HashMap<String, u32>,
}

/// [`Launcher`] whose processes follow a [`Script`] chosen per worker name and
/// launch number (1-based).
#[derive(Clone)]
pub(crate) struct FakeLauncher {
    script: Arc<ScriptFn>,
    journal: Arc<Mutex<Journal>>,
    next_pid: Arc<AtomicU32>,
}

impl FakeLauncher {
    pub(crate) fn new(script: impl Fn(&str, u32) -> Script + Send + Sync + 'static) -> Self {
        Self {
            script: Arc::new(script),
            journal: Arc::new(Mutex::new(Journal::default())),
            next_pid: Arc::new(AtomicU32::new(1000)),
        }
    }

    /// Every process follows `script`.
    pub(crate) fn uniform(script: Script) -> Self {
        Self::new(move |_, _| script)
    }

    pub(crate) fn launches(&self) -> Vec<Launch> {
        self.journal.lock().launches.clone()
    }

    pub(crate) fn launches_of(&self, name: &str) -> Vec<Launch> {
        self.launches().into_iter().filter(|l| l.name == name).collect()
    }

    pub(crate) fn signals(&self) -> Vec<Delivered> {
        self.journal.lock().signals.clone()
    }

    pub(crate) fn signals_to(&self, pid: u32) -> Vec<Delivered> {
        self.signals().into_iter().filter(|s| s.pid == pid).collect()
    }
}

struct FakeControl {
    pid: u32,
    tx: mpsc::UnboundedSender<Signal>,
    journal: Arc<Mutex<Journal>>,
}

impl FakeControl {
    fn deliver(&self, signal: Signal) -> std::io::Result<()> {
        self.journal.lock().signals.push(Delivered {
            pid: self.pid,
            signal,
            at: Instant::now(),
        });
        let _ = self.tx.send(signal);
        Ok(())
    }
}

impl ProcessControl for FakeControl {
    fn terminate(&self) -> std::io::Result<()> {
        self.deliver(Signal::Term)
    }

    fn kill(&self) -> std::io::Result<()> {
        self.deliver(Signal::Kill)
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self, spec: &WorkerSpec) -> Result<Launched, SpawnError> {
        let nth = {
            let mut journal = self.journal.lock();
            let n = journal.counts.entry(spec.name.clone()).or_insert(0);
            *n += 1;
            *n
        };
        let script = (self.script)(&spec.name, nth);
        if script == Script::FailSpawn {
            return Err(SpawnError::Rejected {
                reason: format!("{} launch {nth} refused", spec.name),
            });
        }

        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        self.journal.lock().launches.push(Launch {
            name: spec.name.clone(),
            pid,
            at: Instant::now(),
        });

        let (sig_tx, sig_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let control = FakeControl {
            pid,
            tx: sig_tx,
            journal: Arc::clone(&self.journal),
        };

        let (channel, client) = match spec.readiness {
            Readiness::Handshake => {
                let (sup_side, worker_side) = tokio::io::duplex(64 * 1024);
                let (sup_read, sup_write) = tokio::io::split(sup_side);
                let (worker_read, worker_write) = tokio::io::split(worker_side);
                let client =
                    WorkerClient::connect(spec.name.clone(), pid, worker_read, worker_write);
                let channel = Channel {
                    reader: Box::new(sup_read),
                    writer: Box::new(sup_write),
                };
                (Some(channel), Some(client))
            }
            Readiness::Spawned => (None, None),
        };

        tokio::spawn(async move {
            let code = play(script, client, sig_rx).await;
            let _ = exit_tx.send(code);
        });

        Ok(Launched {
            pid,
            control: Box::new(control),
            exit: exit_rx.map(|r| r.ok().flatten()).boxed(),
            channel,
        })
    }
}

async fn play(
    script: Script,
    client: Option<WorkerClient>,
    mut signals: mpsc::UnboundedReceiver<Signal>,
) -> Option<i32> {
    let ready = |client: &Option<WorkerClient>| {
        let client = client.clone();
        async move {
            if let Some(client) = client {
                let _ = client.handshake(vec!["fake".into()]).await;
            }
        }
    };

    match script {
        Script::FailSpawn => None,
        Script::Serve | Script::Requests(_) | Script::Echo => {
            if let (Script::Echo, Some(c)) = (script, &client) {
                let name = c.name().to_string();
                c.bus().subscribe(move |Echo(text): Echo| {
                    let reply = format!("{name}: {text}");
                    async move { Ok::<_, String>(reply) }
                });
            }
            ready(&client).await;
            if let (Script::Requests(n), Some(c)) = (script, &client) {
                for _ in 0..n {
                    let _ = c.request_completed(1).await;
                }
            }
            loop {
                match signals.recv().await {
                    Some(Signal::Term) => return Some(0),
                    Some(Signal::Kill) | None => return None,
                }
            }
        }
        Script::Stubborn | Script::Hang => {
            if script == Script::Stubborn {
                ready(&client).await;
            }
            loop {
                match signals.recv().await {
                    Some(Signal::Term) => continue,
                    Some(Signal::Kill) | None => return None,
                }
            }
        }
        Script::Crash(code) => {
            ready(&client).await;
            die_after(Duration::from_millis(10), code, &mut signals).await
        }
        Script::CrashAfter(delay, code) => {
            ready(&client).await;
            die_after(delay, code, &mut signals).await
        }
        Script::CrashBeforeReady(code) => {
            die_after(Duration::from_millis(10), code, &mut signals).await
        }
    }
}

async fn die_after(
    delay: Duration,
    code: i32,
    signals: &mut mpsc::UnboundedReceiver<Signal>,
) -> Option<i32> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Some(code),
        sig = signals.recv() => match sig {
            Some(Signal::Term) => Some(0),
            _ => None,
        },
    }
}
