//! Line-framed JSON messages between the supervisor and a forked worker.
//!
//! Frame format, one per line:
//! ```text
//! @microbench {"type":"sample", ...}\n
//! ```
//! The worker's stdout also carries whatever the benchmark body prints, so
//! lines without the prefix are not protocol traffic. Readers hand them to a
//! callback instead of failing. A body that prints without a trailing newline
//! leaves its text at the start of the next frame's line; readers split that
//! text off and treat it as stray output too. Each frame is a single
//! `write_all` on the locked stdout, so body output never lands inside one.

use crate::config::IterationParams;
use crate::error::{FailureKind, HarnessError};
use crate::result::Sample;
use crate::unit::{Mode, TimeUnit};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Read, Write};
use thiserror::Error;

/// Bumped whenever a message shape changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Marks a protocol line.
pub const FRAME_PREFIX: &str = "@microbench ";

/// Maximum frame size (16 MB), sample-mode invocation vectors included.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge { size: usize, max: usize },

    #[error("End of stream")]
    EndOfStream,
}

impl From<FrameError> for HarnessError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Io(io) => HarnessError::Io(io),
            other => HarnessError::Ipc(other.to_string()),
        }
    }
}

/// What the supervisor asks a worker to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub unit: String,
    pub mode: Mode,
    pub time_unit: TimeUnit,
    pub params: IterationParams,
}

/// Supervisor -> worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorCommand {
    Run(RunRequest),
    Shutdown,
}

/// Worker -> supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Hello { protocol_version: u32, pid: u32 },
    WarmupComplete { iterations: usize },
    Sample(Sample),
    Complete { samples: usize },
    Failure { kind: FailureKind, message: String },
}

/// Writes one frame per message and flushes it immediately.
pub struct FrameWriter<W: Write> {
    writer: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write<T: Serialize>(&mut self, message: &T) -> Result<(), FrameError> {
        let json =
            serde_json::to_string(message).map_err(|e| FrameError::Serialization(e.to_string()))?;
        if json.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge {
                size: json.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        // One write per line keeps frames whole next to user output.
        let mut line = String::with_capacity(FRAME_PREFIX.len() + json.len() + 1);
        line.push_str(FRAME_PREFIX);
        line.push_str(&json);
        line.push('\n');
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Reads frames, diverting non-protocol lines to a callback.
pub struct FrameReader<R: BufRead> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    /// Read the next frame. Stray lines go to `stray`, without their newline.
    pub fn read<T: DeserializeOwned>(
        &mut self,
        stray: &mut dyn FnMut(&str),
    ) -> Result<T, FrameError> {
        let limit = (FRAME_PREFIX.len() + MAX_FRAME_SIZE + 1) as u64;
        loop {
            self.buf.clear();
            let n = (&mut self.reader).take(limit).read_until(b'\n', &mut self.buf)?;
            if n == 0 {
                return Err(FrameError::EndOfStream);
            }
            if self.buf.last() != Some(&b'\n') && n as u64 == limit {
                return Err(FrameError::FrameTooLarge {
                    size: n,
                    max: MAX_FRAME_SIZE,
                });
            }

            let line = String::from_utf8_lossy(&self.buf);
            let line = line.trim_end_matches(['\n', '\r']);

            // The first prefix whose tail parses is the frame; body text may
            // contain the prefix too.
            let mut last_err = None;
            for (at, _) in line.match_indices(FRAME_PREFIX) {
                match serde_json::from_str::<T>(&line[at + FRAME_PREFIX.len()..]) {
                    Ok(message) => {
                        if at > 0 {
                            stray(&line[..at]);
                        }
                        return Ok(message);
                    }
                    Err(e) => last_err = Some(e),
                }
            }
            match last_err {
                Some(e) => return Err(FrameError::Deserialization(e.to_string())),
                None => stray(line),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    fn ignore(_: &str) {}

    #[test]
    fn should_read_back_written_messages() {
        let mut out = Vec::new();
        let mut writer = FrameWriter::new(&mut out);
        writer
            .write(&WorkerMessage::Hello {
                protocol_version: PROTOCOL_VERSION,
                pid: 42,
            })
            .unwrap();
        writer
            .write(&WorkerMessage::Sample(Sample::new(Duration::from_nanos(500), 5)))
            .unwrap();

        let mut reader = FrameReader::new(Cursor::new(out));
        let hello: WorkerMessage = reader.read(&mut ignore).unwrap();
        assert_eq!(
            hello,
            WorkerMessage::Hello {
                protocol_version: PROTOCOL_VERSION,
                pid: 42
            }
        );
        let sample: WorkerMessage = reader.read(&mut ignore).unwrap();
        assert!(matches!(sample, WorkerMessage::Sample(s) if s.operations == 5));
        assert!(matches!(
            reader.read::<WorkerMessage>(&mut ignore),
            Err(FrameError::EndOfStream)
        ));
    }

    #[test]
    fn should_divert_stray_lines_when_body_prints() {
        let input = format!(
            "hello from the body\n{FRAME_PREFIX}{{\"type\":\"complete\",\"samples\":3}}\nno newline"
        );
        let mut reader = FrameReader::new(Cursor::new(input.into_bytes()));
        let mut strays = Vec::new();
        let mut collect = |line: &str| strays.push(line.to_string());

        let msg: WorkerMessage = reader.read(&mut collect).unwrap();
        assert_eq!(msg, WorkerMessage::Complete { samples: 3 });
        assert!(matches!(
            reader.read::<WorkerMessage>(&mut collect),
            Err(FrameError::EndOfStream)
        ));
        assert_eq!(strays, ["hello from the body", "no newline"]);
    }

    #[test]
    fn should_find_frame_when_body_output_lacks_newline() {
        let mut out = Vec::new();
        out.extend_from_slice(b".....");
        FrameWriter::new(&mut out)
            .write(&WorkerMessage::WarmupComplete { iterations: 1 })
            .unwrap();
        out.extend_from_slice(b"@microbench says hi ");
        FrameWriter::new(&mut out)
            .write(&WorkerMessage::Complete { samples: 3 })
            .unwrap();

        let mut reader = FrameReader::new(Cursor::new(out));
        let mut strays = Vec::new();
        let mut collect = |line: &str| strays.push(line.to_string());

        let first: WorkerMessage = reader.read(&mut collect).unwrap();
        assert_eq!(first, WorkerMessage::WarmupComplete { iterations: 1 });
        let second: WorkerMessage = reader.read(&mut collect).unwrap();
        assert_eq!(second, WorkerMessage::Complete { samples: 3 });
        assert_eq!(strays, [".....", "@microbench says hi "]);
    }

    #[test]
    fn should_fail_when_frame_is_not_json() {
        let input = format!("{FRAME_PREFIX}not json\n");
        let mut reader = FrameReader::new(Cursor::new(input.into_bytes()));
        assert!(matches!(
            reader.read::<WorkerMessage>(&mut ignore),
            Err(FrameError::Deserialization(_))
        ));
    }

    #[test]
    fn should_tag_commands_by_type() {
        let json = serde_json::to_value(SupervisorCommand::Shutdown).unwrap();
        assert_eq!(json["type"], "shutdown");

        let run = SupervisorCommand::Run(RunRequest {
            unit: "measure_right".into(),
            mode: Mode::AverageTime,
            time_unit: TimeUnit::Nanoseconds,
            params: crate::RunOptions::new().iteration_params(),
        });
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["type"], "run");
        assert_eq!(json["unit"], "measure_right");
    }

    #[test]
    fn should_map_frame_errors_to_ipc_errors() {
        let err: HarnessError = FrameError::EndOfStream.into();
        assert!(matches!(err, HarnessError::Ipc(_)));
        assert_eq!(err.kind(), FailureKind::Crashed);
    }
}
