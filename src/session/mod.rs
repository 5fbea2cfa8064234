//! Per-device SSH sessions and the fleet-wide collection run.
//!
//! Each device gets one interactive shell. The whole command batch is written
//! in one burst, then output is read until the device prompt reappears. All
//! devices run concurrently and their outcomes are merged in arrival order.
//!
//! # Main Components
//!
//! - [`Connector`] / [`ShellStream`] - Transport seam; [`SshConnector`] is the real one
//! - [`collect_transcript`] - Dispatch plus the prompt-detection loop
//! - [`Orchestrator`] - Fans out one worker per device and drains their outcomes
//! - [`aggregate_lines`] / [`json_report`] - Flatten outcomes for display
//! - [`ReplayConnector`] - Scripted devices for offline runs and tests

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config;
use crate::device::{Credential, Device};
use crate::error::GatherError;

pub use aggregate::{OutcomeRecord, OutcomeStatus, aggregate_lines, json_report};
pub use driver::{accumulate, collect_transcript, dispatch, run_device};
pub use orchestrator::Orchestrator;
pub use replay::{ReplayConnector, ReplayScript, ReplayShell, ScriptEnd};
pub use security::{AlgorithmSet, SecurityLevel};
pub use ssh::{SshConnector, SshShell};

/// Ordered commands sent identically to every device in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBatch {
    commands: Arc<[String]>,
}

impl CommandBatch {
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Every command terminated by a line break, ready to write in one burst.
    pub fn payload(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        for command in self.commands.iter() {
            payload.extend_from_slice(command.as_bytes());
            payload.push(b'\n');
        }
        payload
    }
}

impl Default for CommandBatch {
    fn default() -> Self {
        Self::new(config::DEFAULT_COMMANDS.iter().copied())
    }
}

/// Lines captured from one device's shell, in the order they were read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    lines: Vec<String>,
}

impl Transcript {
    pub fn push_line(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn last_line(&self) -> Option<&str> {
        self.lines.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

/// Result of one device's session: a transcript, or the reason it failed.
#[derive(Debug)]
pub enum SessionOutcome {
    Completed {
        address: String,
        transcript: Transcript,
    },
    Failed {
        address: String,
        error: GatherError,
    },
}

impl SessionOutcome {
    pub fn address(&self) -> &str {
        match self {
            SessionOutcome::Completed { address, .. } | SessionOutcome::Failed { address, .. } => {
                address
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SessionOutcome::Completed { .. })
    }

    /// The single line a failed device contributes to the aggregated output.
    pub fn failure_line(address: &str, error: &GatherError) -> String {
        format!("{address} failed: {error}")
    }
}

/// Pseudo-terminal request sent before the shell is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtySettings {
    pub term: String,
    pub columns: u32,
    pub rows: u32,
    /// Input and output baud rate; echo is always disabled.
    pub speed: u32,
}

impl Default for PtySettings {
    fn default() -> Self {
        Self {
            term: config::PTY_TERM.to_string(),
            columns: config::PTY_COLUMNS,
            rows: config::PTY_ROWS,
            speed: config::PTY_SPEED,
        }
    }
}

/// Knobs shared by every session in a run.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub port: u16,
    /// Pause before every read, giving the device time to produce output.
    pub read_delay: Duration,
    /// Maximum bytes taken from the shell per read.
    pub read_buffer_size: usize,
    pub connect_timeout: Duration,
    /// Deadline for the prompt to reappear. `None` waits forever.
    pub response_timeout: Option<Duration>,
    /// Concurrent session limit. `None` runs one session per device at once.
    pub max_parallel: Option<usize>,
    pub pty: PtySettings,
    /// Algorithm offer and host key policy.
    pub security: SecurityLevel,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            port: config::DEFAULT_PORT,
            read_delay: config::DEFAULT_READ_DELAY,
            read_buffer_size: config::DEFAULT_READ_BUFFER_SIZE,
            connect_timeout: config::DEFAULT_CONNECT_TIMEOUT,
            response_timeout: Some(config::DEFAULT_RESPONSE_TIMEOUT),
            max_parallel: None,
            pty: PtySettings::default(),
            security: SecurityLevel::default(),
        }
    }
}

/// Byte stream of an interactive shell.
pub trait ShellStream: Send {
    /// Writes `data` to the shell's input.
    fn write_all(&mut self, data: &[u8]) -> impl Future<Output = Result<(), GatherError>> + Send;

    /// Waits for output and returns at most `limit` bytes of whatever is
    /// available. `None` means the shell closed.
    fn read_chunk(
        &mut self,
        limit: usize,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, GatherError>> + Send;

    /// Ends the shell: no more input is sent and the channel is closed.
    /// Closing an already closed shell does nothing.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens an interactive shell on a device: connect, authenticate, request a
/// pseudo-terminal and start the shell.
pub trait Connector: Send + Sync + 'static {
    type Stream: ShellStream + 'static;

    fn open_shell(
        &self,
        device: &Device,
        credential: &Credential,
    ) -> impl Future<Output = Result<Self::Stream, GatherError>> + Send;
}

mod aggregate;
mod driver;
mod orchestrator;
mod replay;
mod security;
mod ssh;

#[cfg(test)]
mod tests {
    use super::{CommandBatch, SessionOutcome, Transcript};
    use crate::config::DEFAULT_COMMANDS;
    use crate::error::GatherError;

    #[test]
    fn default_batch_is_built_in_command_set() {
        let batch = CommandBatch::default();
        assert_eq!(batch.commands().len(), DEFAULT_COMMANDS.len());
        assert_eq!(batch.commands()[0], "show version");
        assert_eq!(batch.commands()[5], "show platform resources");
    }

    #[test]
    fn payload_terminates_every_command() {
        let batch = CommandBatch::new(["show version", "show arp"]);
        assert_eq!(batch.payload(), b"show version\nshow arp\n".to_vec());
    }

    #[test]
    fn transcript_keeps_insertion_order() {
        let mut transcript = Transcript::default();
        transcript.push_line("a");
        transcript.push_line("b");
        assert_eq!(transcript.lines(), ["a", "b"]);
        assert_eq!(transcript.last_line(), Some("b"));
    }

    #[test]
    fn failure_line_names_device() {
        let line = SessionOutcome::failure_line("10.0.0.2", &GatherError::ChannelDisconnectError);
        assert!(line.starts_with("10.0.0.2 failed:"));
    }
}
