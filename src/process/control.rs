use std::io;

use tokio::process::Child;
use tokio::sync::mpsc;

/// Signals a live worker process.
pub trait ProcessControl: Send + Sync {
    /// Asks the process to stop gracefully (SIGTERM on unix).
    fn terminate(&self) -> io::Result<()>;

    /// Forcibly stops the process (SIGKILL on unix).
    fn kill(&self) -> io::Result<()>;
}

/// Stop request handed to the task owning a `Child`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Stop {
    Terminate,
    Kill,
}

impl Stop {
    /// Delivers the request; the pid is only read while the child is unreaped.
    pub(crate) fn deliver(self, child: &mut Child) -> io::Result<()> {
        match self {
            Stop::Kill => child.start_kill(),
            Stop::Terminate => terminate(child),
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> io::Result<()> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Err(io::Error::new(io::ErrorKind::NotFound, "process already reaped"));
    };
    let pid = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

/// Control handle for a process spawned by [`CommandLauncher`](super::CommandLauncher).
///
/// Both signals go through the task owning the `Child`, so they cannot hit a
/// recycled pid once the child was reaped.
pub struct ChildControl {
    tx: mpsc::UnboundedSender<Stop>,
}

impl ChildControl {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Stop>) -> Self {
        Self { tx }
    }

    fn request(&self, stop: Stop) -> io::Result<()> {
        self.tx
            .send(stop)
            .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "process already reaped"))
    }
}

impl ProcessControl for ChildControl {
    fn terminate(&self) -> io::Result<()> {
        self.request(Stop::Terminate)
    }

    fn kill(&self) -> io::Result<()> {
        self.request(Stop::Kill)
    }
}
