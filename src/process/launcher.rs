use std::process::Stdio;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::control::{ChildControl, ProcessControl, Stop};
use crate::error::SpawnError;
use crate::worker::{Readiness, WorkerSpec};

/// Environment variable carrying the worker name into the child process.
pub const WORKER_ENV: &str = "PROCVISOR_WORKER";

/// IPC byte streams of a launched process, seen from the supervisor.
pub struct Channel {
    /// Frames written by the worker.
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Frames read by the worker.
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
}

/// A freshly created worker process.
pub struct Launched {
    /// OS process id.
    pub pid: u32,
    /// Signal handle.
    pub control: Box<dyn ProcessControl>,
    /// Resolves once when the process exits; `None` when killed by a signal.
    pub exit: BoxFuture<'static, Option<i32>>,
    /// IPC channel; `None` for processes that do not speak the protocol.
    pub channel: Option<Channel>,
}

/// Creates worker processes.
#[async_trait]
pub trait Launcher: Send + Sync + 'static {
    /// Starts one process for `spec`.
    async fn launch(&self, spec: &WorkerSpec) -> Result<Launched, SpawnError>;
}

/// [`Launcher`] backed by `tokio::process`.
///
/// Workers using [`Readiness::Handshake`] get piped stdin/stdout for IPC; stderr
/// is always inherited so worker logs reach the supervisor's stderr.
#[derive(Clone, Copy, Debug, Default)]
pub struct CommandLauncher;

#[async_trait]
impl Launcher for CommandLauncher {
    async fn launch(&self, spec: &WorkerSpec) -> Result<Launched, SpawnError> {
        let speaks_protocol = matches!(spec.readiness, Readiness::Handshake);

        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k, v)))
            .env(WORKER_ENV, &spec.name)
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if speaks_protocol {
            cmd.stdin(Stdio::piped()).stdout(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null()).stdout(Stdio::inherit());
        }

        let mut child = cmd.spawn().map_err(|source| SpawnError::Io {
            command: spec.command.clone(),
            source,
        })?;
        let pid = child.id().ok_or_else(|| SpawnError::Rejected {
            reason: format!("{:?} exited before its pid was read", spec.command),
        })?;

        let channel = if speaks_protocol {
            let writer = child.stdin.take().ok_or_else(|| SpawnError::MissingPipe {
                command: spec.command.clone(),
                pipe: "stdin",
            })?;
            let reader = child.stdout.take().ok_or_else(|| SpawnError::MissingPipe {
                command: spec.command.clone(),
                pipe: "stdout",
            })?;
            Some(Channel {
                reader: Box::new(reader),
                writer: Box::new(writer),
            })
        } else {
            None
        };

        let (stop_tx, mut stop_rx) = mpsc::unbounded_channel::<Stop>();
        let worker = spec.name.clone();
        let exit = async move {
            loop {
                tokio::select! {
                    status = child.wait() => {
                        return match status {
                            Ok(status) => status.code(),
                            Err(e) => {
                                tracing::warn!(
                                    target: "procvisor::process",
                                    worker = %worker,
                                    pid,
                                    error = %e,
                                    "wait failed"
                                );
                                None
                            }
                        };
                    }
                    Some(stop) = stop_rx.recv() => {
                        if let Err(e) = stop.deliver(&mut child) {
                            tracing::debug!(
                                target: "procvisor::process",
                                worker = %worker,
                                pid,
                                ?stop,
                                error = %e,
                                "signal failed"
                            );
                        }
                    }
                }
            }
        }
        .boxed();

        Ok(Launched {
            pid,
            control: Box::new(ChildControl::new(stop_tx)),
            exit,
            channel,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::SupervisorConfig;

    #[tokio::test]
    async fn test_spawned_process_reports_exit_code() {
        let spec = WorkerSpec::builder("sh", "/bin/sh")
            .args(["-c", "exit 3"])
            .readiness(Readiness::Spawned)
            .build(&SupervisorConfig::default());
        let launched = CommandLauncher.launch(&spec).await.expect("spawn");
        assert!(launched.pid > 0);
        assert!(launched.channel.is_none());
        assert_eq!(launched.exit.await, Some(3));
    }

    #[tokio::test]
    async fn test_killed_process_has_no_exit_code() {
        let spec = WorkerSpec::builder("sleeper", "/bin/sh")
            .args(["-c", "sleep 30"])
            .readiness(Readiness::Spawned)
            .build(&SupervisorConfig::default());
        let launched = CommandLauncher.launch(&spec).await.expect("spawn");
        launched.control.kill().expect("kill");
        assert_eq!(launched.exit.await, None);
    }

    #[tokio::test]
    async fn test_spec_env_reaches_the_child() {
        let spec = WorkerSpec::builder("env", "/bin/sh")
            .args(["-c", "exit $PROCVISOR_TEST_CODE"])
            .env("PROCVISOR_TEST_CODE", "7")
            .readiness(Readiness::Spawned)
            .build(&SupervisorConfig::default());
        let launched = CommandLauncher.launch(&spec).await.expect("spawn");
        assert_eq!(launched.exit.await, Some(7));
    }

    #[tokio::test]
    async fn test_terminate_stops_running_child() {
        let spec = WorkerSpec::builder("sleeper", "/bin/sh")
            .args(["-c", "sleep 30"])
            .readiness(Readiness::Spawned)
            .build(&SupervisorConfig::default());
        let launched = CommandLauncher.launch(&spec).await.expect("spawn");
        launched.control.terminate().expect("terminate");
        assert_eq!(launched.exit.await, None);
    }

    #[tokio::test]
    async fn test_signals_after_reaping_are_refused() {
        let spec = WorkerSpec::builder("sh", "/bin/sh")
            .args(["-c", "exit 0"])
            .readiness(Readiness::Spawned)
            .build(&SupervisorConfig::default());
        let Launched { control, exit, .. } = CommandLauncher.launch(&spec).await.expect("spawn");
        assert_eq!(exit.await, Some(0));
        let err = control.terminate().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
        assert_eq!(control.kill().unwrap_err().kind(), std::io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let spec = WorkerSpec::builder("ghost", "/nonexistent/procvisor-ghost")
            .build(&SupervisorConfig::default());
        let err = CommandLauncher.launch(&spec).await.err().expect("error");
        assert_eq!(err.as_label(), "spawn_io");
    }
}
