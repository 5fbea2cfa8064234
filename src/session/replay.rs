//! Scripted devices that stand in for SSH, for offline runs and tests.
//!
//! Each address maps to a [`ReplayScript`]: fixed output chunks, an echoing
//! device that answers whatever batch it is sent, or one of the ways a real
//! session goes wrong (refused connection, refused shell, broken read, a
//! worker that dies outright).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::trace;

use super::{Connector, ShellStream};
use crate::device::{Credential, Device};
use crate::error::GatherError;

/// What a replayed shell does once its chunks are used up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEnd {
    /// The shell closes.
    Close,
    /// The shell stays open without producing output.
    Stall,
    /// The next read fails with [`GatherError::ShellRead`].
    Fail(String),
}

/// What a replayed device does once connected.
#[derive(Debug, Clone)]
pub enum ReplayScript {
    /// Returns the chunks in order, then behaves as `end` says.
    Chunks { chunks: Vec<Vec<u8>>, end: ScriptEnd },
    /// Echoes every written command as `<prompt>#<command>` followed by one
    /// output line, then shows `<prompt>#`.
    Echo { prompt: String },
    /// Fails the connection with the given reason.
    Refuse(String),
    /// Connects, then has the named pty or shell request refused.
    RefuseSetup(&'static str),
    /// Panics inside the worker while connecting.
    Crash,
}

impl ReplayScript {
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        Self::ending(chunks, ScriptEnd::Close)
    }

    /// Like [`ReplayScript::chunks`], but the shell never closes afterwards.
    pub fn stalled<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        Self::ending(chunks, ScriptEnd::Stall)
    }

    /// Like [`ReplayScript::chunks`], but the read after the last chunk fails.
    pub fn failing<I, S>(chunks: I, reason: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        Self::ending(chunks, ScriptEnd::Fail(reason.into()))
    }

    fn ending<I, S>(chunks: I, end: ScriptEnd) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        ReplayScript::Chunks {
            chunks: chunks.into_iter().map(|c| c.as_ref().to_vec()).collect(),
            end,
        }
    }

    pub fn echo(prompt: impl Into<String>) -> Self {
        ReplayScript::Echo {
            prompt: prompt.into(),
        }
    }

    pub fn refuse(reason: impl Into<String>) -> Self {
        ReplayScript::Refuse(reason.into())
    }
}

/// Connector backed by per-address scripts. Unknown addresses are refused.
#[derive(Debug, Clone, Default)]
pub struct ReplayConnector {
    scripts: HashMap<String, ReplayScript>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl ReplayConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, address: impl Into<String>, script: ReplayScript) -> Self {
        self.scripts.insert(address.into(), script);
        self
    }

    /// Highest number of shells that were open at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Shells opened and not yet dropped.
    pub fn open_shells(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Shells that were explicitly closed.
    pub fn closed_shells(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Connector for ReplayConnector {
    type Stream = ReplayShell;

    async fn open_shell(
        &self,
        device: &Device,
        _credential: &Credential,
    ) -> Result<ReplayShell, GatherError> {
        let (chunks, end, echo_prompt) = match self.scripts.get(&device.address) {
            Some(ReplayScript::Chunks { chunks, end }) => {
                (chunks.iter().cloned().collect(), end.clone(), None)
            }
            Some(ReplayScript::Echo { prompt }) => {
                (VecDeque::new(), ScriptEnd::Close, Some(prompt.clone()))
            }
            Some(ReplayScript::Refuse(reason)) => {
                return Err(GatherError::ConnectionRefused(reason.clone()));
            }
            Some(ReplayScript::RefuseSetup(request)) => {
                return Err(GatherError::SessionSetup(*request));
            }
            Some(ReplayScript::Crash) => panic!("{} worker crashed", device.address),
            None => {
                return Err(GatherError::ConnectionRefused(format!(
                    "no script for {}",
                    device.address
                )));
            }
        };

        let open = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(open, Ordering::SeqCst);
        trace!("{} replay shell opened ({} open)", device.address, open);

        Ok(ReplayShell {
            chunks,
            end,
            echo_prompt,
            reads: 0,
            writes: Vec::new(),
            is_closed: false,
            active: self.active.clone(),
            closed: self.closed.clone(),
        })
    }
}

/// Shell produced by [`ReplayConnector`].
#[derive(Debug)]
pub struct ReplayShell {
    chunks: VecDeque<Vec<u8>>,
    end: ScriptEnd,
    echo_prompt: Option<String>,
    reads: usize,
    writes: Vec<Vec<u8>>,
    is_closed: bool,
    active: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl ReplayShell {
    /// Number of reads that returned output.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Every buffer passed to `write_all`, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed
    }
}

impl ShellStream for ReplayShell {
    async fn write_all(&mut self, data: &[u8]) -> Result<(), GatherError> {
        if self.is_closed {
            return Err(GatherError::ChannelDisconnectError);
        }
        self.writes.push(data.to_vec());
        if let Some(prompt) = self.echo_prompt.as_ref() {
            let text = String::from_utf8_lossy(data);
            for command in text.lines() {
                self.chunks.push_back(
                    format!("{prompt}#{command}\r\n% output of {command}\r\n").into_bytes(),
                );
            }
            self.chunks.push_back(format!("{prompt}#").into_bytes());
        }
        Ok(())
    }

    async fn read_chunk(&mut self, limit: usize) -> Result<Option<Vec<u8>>, GatherError> {
        if self.is_closed {
            return Ok(None);
        }
        let Some(mut chunk) = self.chunks.pop_front() else {
            return match &self.end {
                ScriptEnd::Close => Ok(None),
                ScriptEnd::Stall => std::future::pending().await,
                ScriptEnd::Fail(reason) => Err(GatherError::ShellRead(reason.clone())),
            };
        };
        if chunk.len() > limit {
            let rest = chunk.split_off(limit);
            self.chunks.push_front(rest);
        }
        self.reads += 1;
        Ok(Some(chunk))
    }

    async fn close(&mut self) {
        if !self.is_closed {
            self.is_closed = true;
            self.chunks.clear();
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ReplayShell {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
