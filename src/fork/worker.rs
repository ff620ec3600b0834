//! Worker side of a fork: one session over stdin/stdout, then exit.

use super::ipc::{
    FrameError, FrameReader, FrameWriter, RunRequest, SupervisorCommand, WorkerMessage,
    PROTOCOL_VERSION,
};
use crate::error::{FailureKind, Result};
use crate::phase::{PhaseController, PhaseEvent};
use crate::registry::Registry;
use std::io::{self, BufRead, Write};
use tracing::{debug, error};

/// Serve supervisor commands until shutdown. Returns the process exit code.
pub(crate) fn serve(registry: &Registry) -> i32 {
    let stdin = io::stdin();
    let mut reader = FrameReader::new(stdin.lock());
    let mut writer = FrameWriter::new(io::stdout());
    match session(registry, &mut reader, &mut writer) {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "worker session failed");
            1
        }
    }
}

fn session<R: BufRead, W: Write>(
    registry: &Registry,
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
) -> Result<()> {
    writer.write(&WorkerMessage::Hello {
        protocol_version: PROTOCOL_VERSION,
        pid: std::process::id(),
    })?;

    let mut stray = |line: &str| debug!(line, "ignoring non-protocol input");
    loop {
        let command = match reader.read::<SupervisorCommand>(&mut stray) {
            Ok(c) => c,
            // supervisor went away
            Err(FrameError::EndOfStream) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match command {
            SupervisorCommand::Run(request) => run_unit(registry, &request, writer)?,
            SupervisorCommand::Shutdown => return Ok(()),
        }
    }
}

/// Run one unit, streaming events. Unit failures are reported, not returned.
fn run_unit<W: Write>(
    registry: &Registry,
    request: &RunRequest,
    writer: &mut FrameWriter<W>,
) -> Result<()> {
    let Some(unit) = registry.get(&request.unit) else {
        writer.write(&WorkerMessage::Failure {
            kind: FailureKind::Execution,
            message: format!("benchmark '{}' is not registered in the worker", request.unit),
        })?;
        return Ok(());
    };

    debug!(unit = unit.name(), mode = %request.mode, "worker running unit");
    let mut sent = 0usize;
    let mut controller = PhaseController::new(unit, request.mode, &request.params);
    let outcome = controller.run(|event| {
        let message = match event {
            PhaseEvent::WarmupComplete { iterations } => {
                WorkerMessage::WarmupComplete { iterations }
            }
            PhaseEvent::Sample(sample) => {
                sent += 1;
                WorkerMessage::Sample(sample)
            }
        };
        writer.write(&message)?;
        Ok(())
    });

    let last = match outcome {
        Ok(()) => WorkerMessage::Complete { samples: sent },
        Err(e) => WorkerMessage::Failure {
            kind: e.kind(),
            message: e.to_string(),
        },
    };
    writer.write(&last)?;
    Ok(())
}
