//! Error types for inventory loading and per-device SSH sessions.
//!
//! Input errors abort a run before any connection is attempted. Every other
//! variant is produced inside a device worker and ends up in that device's
//! [`SessionOutcome`](crate::session::SessionOutcome) instead of stopping the run.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while collecting device output.
#[derive(Error, Debug)]
pub enum GatherError {
    /// The inventory file could not be opened or read.
    #[error("failed to read inventory {path}: {source}")]
    InventoryIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An inventory line did not carry both an address and a prompt identity.
    #[error("inventory line {line}: expected `<address> <prompt>`, got {content:?}")]
    MalformedInventoryLine { line: usize, content: String },

    /// The shared secret was empty.
    #[error("no password entered")]
    EmptySecret,

    /// Reading the secret from the terminal failed.
    #[error("failed to read password: {0}")]
    PasswordInput(#[source] std::io::Error),

    /// Connecting, authenticating or negotiating the shell did not finish in time.
    #[error("connect timeout after {0:?}")]
    ConnectTimeout(Duration),

    /// The remote side refused a pseudo-terminal or shell request.
    #[error("{0} request refused")]
    SessionSetup(&'static str),

    /// The shell channel closed before the prompt reappeared.
    #[error("channel disconnect on wait prompt")]
    ChannelDisconnectError,

    /// The prompt did not reappear within the response timeout.
    #[error("prompt {prompt:?} not seen within {timeout:?}")]
    PromptTimeout { prompt: String, timeout: Duration },

    /// A replayed device was scripted to refuse the connection.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// Reading shell output failed before the prompt reappeared.
    #[error("shell read failed: {0}")]
    ShellRead(String),

    /// A device worker ended without reporting an outcome.
    #[error("worker for {address} ended without reporting: {reason}")]
    WorkerLost { address: String, reason: String },

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),
}
