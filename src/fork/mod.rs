//! Process isolation.
//!
//! Each fork re-executes the current binary with [`WORKER_ENV`] set. The
//! child serves exactly one worker session over its stdin/stdout (see
//! [`ipc`]) and exits, so compiler and runtime state adapted while measuring
//! one unit never carries over into the next fork or unit.

pub mod ipc;
pub(crate) mod worker;

use crate::error::{FailureKind, HarnessError, Result};
use crate::phase::PhaseEvent;
use ipc::{
    FrameError, FrameReader, FrameWriter, RunRequest, SupervisorCommand, WorkerMessage,
    PROTOCOL_VERSION,
};
use std::io::BufReader;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Set to `1` in the environment of forked workers.
pub const WORKER_ENV: &str = "MICROBENCH_WORKER";

/// How long a freshly spawned worker has to say hello.
const HELLO_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra time past the unit timeout before the supervisor kills the worker.
/// The worker enforces the timeout itself and normally reports first.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Whether this process was spawned as a forked worker.
pub fn is_worker_process() -> bool {
    std::env::var(WORKER_ENV).is_ok_and(|v| v == "1")
}

type Inbox = Receiver<std::result::Result<WorkerMessage, FrameError>>;

/// Forked worker process. Killed on drop unless it already exited.
struct WorkerHandle {
    child: Child,
    pid: u32,
    writer: FrameWriter<ChildStdin>,
    inbox: Inbox,
}

impl WorkerHandle {
    fn spawn() -> Result<Self> {
        let binary = std::env::current_exe()?;
        let mut child = Command::new(&binary)
            .env(WORKER_ENV, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        debug!(pid = child.id(), binary = %binary.display(), "spawned worker");

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(i), Some(o)) => (i, o),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(HarnessError::Ipc("worker pipes unavailable".into()));
            }
        };

        // Blocking reads happen on their own thread so the supervisor can
        // wait with a timeout.
        let (tx, inbox) = mpsc::channel();
        let pid = child.id();
        let spawned = std::thread::Builder::new()
            .name(format!("microbench-worker-{pid}"))
            .spawn(move || {
                let mut reader = FrameReader::new(BufReader::new(stdout));
                let mut forward = |line: &str| eprintln!("{line}");
                loop {
                    let msg = reader.read::<WorkerMessage>(&mut forward);
                    let done = msg.is_err();
                    if tx.send(msg).is_err() || done {
                        break;
                    }
                }
            });
        if let Err(e) = spawned {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e.into());
        }

        let mut handle = Self {
            pid,
            child,
            writer: FrameWriter::new(stdin),
            inbox,
        };
        handle.wait_for_hello()?;
        Ok(handle)
    }

    fn wait_for_hello(&mut self) -> Result<()> {
        match self.recv(Some(Instant::now() + HELLO_TIMEOUT))? {
            Some(WorkerMessage::Hello {
                protocol_version,
                pid,
            }) => {
                if protocol_version != PROTOCOL_VERSION {
                    return Err(HarnessError::Ipc(format!(
                        "worker speaks protocol {protocol_version}, expected {PROTOCOL_VERSION}"
                    )));
                }
                debug!(pid, "worker ready");
                self.pid = pid;
                Ok(())
            }
            Some(other) => Err(HarnessError::Ipc(format!(
                "expected hello from worker, got {other:?}"
            ))),
            None => Err(HarnessError::Ipc("worker did not say hello in time".into())),
        }
    }

    /// Next message, or `None` if `deadline` passes first.
    fn recv(&mut self, deadline: Option<Instant>) -> Result<Option<WorkerMessage>> {
        let received = match deadline {
            Some(at) => {
                let wait = at.saturating_duration_since(Instant::now());
                match self.inbox.recv_timeout(wait) {
                    Ok(msg) => msg,
                    Err(RecvTimeoutError::Timeout) => return Ok(None),
                    Err(RecvTimeoutError::Disconnected) => Err(FrameError::EndOfStream),
                }
            }
            None => self.inbox.recv().unwrap_or(Err(FrameError::EndOfStream)),
        };
        match received {
            Ok(msg) => Ok(Some(msg)),
            Err(FrameError::EndOfStream) => Err(self.exited_early()),
            Err(e) => Err(e.into()),
        }
    }

    fn exited_early(&mut self) -> HarnessError {
        match self.child.wait() {
            Ok(status) => HarnessError::Ipc(format!("worker exited unexpectedly ({status})")),
            Err(e) => HarnessError::Io(e),
        }
    }

    fn send(&mut self, command: &SupervisorCommand) -> Result<()> {
        self.writer.write(command)?;
        Ok(())
    }

    fn shutdown(mut self) {
        if self.send(&SupervisorCommand::Shutdown).is_ok() {
            match self.child.wait() {
                Ok(status) if !status.success() => warn!(%status, "worker exited with failure"),
                Ok(_) => debug!(pid = self.child.id(), "worker exited"),
                Err(e) => warn!(error = %e, "could not reap worker"),
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Run one fork of a unit in a fresh child process and return its pid.
///
/// Warmup and sample events are forwarded to `on_event` as they arrive. The
/// fork must deliver exactly the measurement iteration count. A unit that
/// outlives its timeout is killed and reported as
/// [`HarnessError::IncompleteRun`].
pub(crate) fn run_fork(
    request: &RunRequest,
    mut on_event: impl FnMut(PhaseEvent) -> Result<()>,
) -> Result<u32> {
    let mut worker = WorkerHandle::spawn()?;
    worker.send(&SupervisorCommand::Run(request.clone()))?;

    let deadline = request
        .params
        .timeout
        .map(|t| Instant::now() + t + KILL_GRACE);
    let mut received = 0usize;

    loop {
        let Some(msg) = worker.recv(deadline)? else {
            warn!(unit = %request.unit, "worker timed out, killing it");
            // drop kills the child
            return Err(HarnessError::IncompleteRun {
                unit: request.unit.clone(),
                expected: request.params.measurement_iterations,
                actual: received,
            });
        };

        match msg {
            WorkerMessage::WarmupComplete { iterations } => {
                on_event(PhaseEvent::WarmupComplete { iterations })?;
            }
            WorkerMessage::Sample(sample) => {
                received += 1;
                on_event(PhaseEvent::Sample(sample))?;
            }
            WorkerMessage::Complete { samples } => {
                if samples != received {
                    return Err(HarnessError::Ipc(format!(
                        "worker reported {samples} samples but sent {received}"
                    )));
                }
                let expected = request.params.measurement_iterations;
                if received != expected {
                    return Err(HarnessError::IncompleteRun {
                        unit: request.unit.clone(),
                        expected,
                        actual: received,
                    });
                }
                let pid = worker.pid;
                worker.shutdown();
                return Ok(pid);
            }
            WorkerMessage::Failure { kind, message } => {
                worker.shutdown();
                return Err(match kind {
                    FailureKind::Incomplete => HarnessError::IncompleteRun {
                        unit: request.unit.clone(),
                        expected: request.params.measurement_iterations,
                        actual: received,
                    },
                    FailureKind::Crashed => HarnessError::Ipc(message),
                    FailureKind::Execution => HarnessError::Execution {
                        unit: request.unit.clone(),
                        message,
                    },
                });
            }
            WorkerMessage::Hello { .. } => {
                return Err(HarnessError::Ipc("unexpected hello mid-run".into()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_not_be_worker_without_env() {
        // The test harness never sets the worker variable.
        assert!(!is_worker_process());
    }
}
