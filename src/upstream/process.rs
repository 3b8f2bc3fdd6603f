//! Process transport: shells out to the daemon's command-line tool.
//!
//! `<binary> list` is run to completion for model discovery. `<binary> run
//! <model> <prompt>` is spawned per request; its stdout is read on a blocking
//! worker thread and relayed fragment by fragment through a bounded channel,
//! so a slow child never stalls the async runtime.

use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn, Span};

use crate::config::{Granularity, ProcessConfig};
use crate::error::RelayError;
use crate::upstream::{or_fallback, FragmentStream, PromptRequest, Upstream};

/// Upstream backed by the daemon's CLI.
pub struct ProcessUpstream {
    config: ProcessConfig,
}

impl ProcessUpstream {
    pub fn new(config: ProcessConfig) -> Self {
        Self { config }
    }

    fn spawn_run(&self, request: &PromptRequest) -> Result<ChildGuard, RelayError> {
        let child = Command::new(&self.config.binary)
            .arg("run")
            .arg(&request.model)
            .arg(&request.prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| RelayError::Spawn {
                program: self.config.binary.clone(),
                source,
            })?;
        Ok(ChildGuard::new(child, self.config.binary.clone()))
    }
}

#[async_trait]
impl Upstream for ProcessUpstream {
    fn name(&self) -> &'static str {
        "process"
    }

    /// Never fails: any problem running the list command degrades to the
    /// configured fallback model.
    async fn list_models(&self) -> Result<Vec<String>, RelayError> {
        let fallback = &self.config.fallback_model;

        let output = match tokio::process::Command::new(&self.config.binary)
            .arg("list")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                error!(binary = ?self.config.binary, error = %e, "Error fetching models");
                return Ok(vec![fallback.clone()]);
            }
        };

        if !output.status.success() {
            warn!(status = %output.status, "List command exited unsuccessfully");
        }

        let models = parse_model_list(&String::from_utf8_lossy(&output.stdout));
        debug!(count = models.len(), "CLI listed models");
        Ok(or_fallback(models, fallback))
    }

    async fn generate(&self, request: &PromptRequest) -> Result<FragmentStream, RelayError> {
        let mut guard = self.spawn_run(request)?;
        let stdout = guard.take_stdout().ok_or_else(|| RelayError::Spawn {
            program: self.config.binary.clone(),
            source: io::Error::new(io::ErrorKind::BrokenPipe, "stdout not captured"),
        })?;

        info!(model = %request.model, pid = guard.id(), "Child process started");

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let granularity = self.config.granularity;
        let span = Span::current();

        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let relayed = read_fragments(BufReader::new(stdout), granularity, |fragment| {
                tx.blocking_send(fragment).is_ok()
            });
            // End the stream at EOF, not when the child exits.
            drop(tx);

            match relayed.end {
                ReadEnd::Eof => match guard.wait() {
                    Ok(status) => info!(fragments = relayed.fragments, %status, "Child process finished"),
                    Err(e) => warn!(error = %e, "Failed to reap child process"),
                },
                ReadEnd::Closed => {
                    debug!(fragments = relayed.fragments, "Client went away, killing child process");
                }
                ReadEnd::Failed(e) => {
                    warn!(fragments = relayed.fragments, error = %e, "Reading child stdout failed, ending early");
                }
            }
            // Guard drop kills and reaps the child if it was not waited for.
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Model names from `list` output: skip the header, keep the first column.
pub fn parse_model_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Owns a spawned child and guarantees it is reaped.
///
/// Dropping the guard without calling [`ChildGuard::wait`] kills the child
/// if it is still running and then waits for it.
pub struct ChildGuard {
    child: Child,
    program: PathBuf,
    reaped: bool,
}

impl ChildGuard {
    pub fn new(child: Child, program: PathBuf) -> Self {
        Self {
            child,
            program,
            reaped: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Block until the child exits.
    pub fn wait(&mut self) -> io::Result<ExitStatus> {
        let status = self.child.wait()?;
        self.reaped = true;
        Ok(status)
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill() {
                debug!(program = ?self.program, error = %e, "Kill failed");
            }
        }
        if let Err(e) = self.child.wait() {
            warn!(program = ?self.program, error = %e, "Failed to reap child process");
        }
    }
}

/// Why a read loop stopped.
#[derive(Debug)]
pub enum ReadEnd {
    /// The child closed its stdout.
    Eof,
    /// The consumer stopped accepting fragments.
    Closed,
    /// Reading failed.
    Failed(io::Error),
}

#[derive(Debug)]
pub struct Relayed {
    pub fragments: usize,
    pub end: ReadEnd,
}

/// Decodes a byte stream into chars one at a time without waiting for more
/// input than the current char needs. Invalid UTF-8 yields U+FFFD.
pub struct Utf8Chars<R> {
    reader: R,
}

impl<R: BufRead> Utf8Chars<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        loop {
            match self.reader.fill_buf() {
                Ok(buf) => return Ok(buf.first().copied()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn next_char(&mut self) -> io::Result<Option<char>> {
        let Some(first) = self.peek_byte()? else {
            return Ok(None);
        };
        self.reader.consume(1);

        let width = match first {
            0x00..=0x7F => return Ok(Some(first as char)),
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => return Ok(Some(char::REPLACEMENT_CHARACTER)),
        };

        let mut buf = [first, 0, 0, 0];
        for slot in buf.iter_mut().take(width).skip(1) {
            match self.peek_byte()? {
                Some(b) if b & 0xC0 == 0x80 => {
                    *slot = b;
                    self.reader.consume(1);
                }
                _ => return Ok(Some(char::REPLACEMENT_CHARACTER)),
            }
        }

        let decoded = std::str::from_utf8(&buf[..width])
            .ok()
            .and_then(|s| s.chars().next())
            .unwrap_or(char::REPLACEMENT_CHARACTER);
        Ok(Some(decoded))
    }
}

impl<R: BufRead> Iterator for Utf8Chars<R> {
    type Item = io::Result<char>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_char().transpose()
    }
}

/// Read `reader` to the end, handing each fragment to `emit` as soon as it
/// is complete. `emit` returns `false` to stop reading.
pub fn read_fragments<R, F>(reader: R, granularity: Granularity, mut emit: F) -> Relayed
where
    R: BufRead,
    F: FnMut(String) -> bool,
{
    let mut fragments = 0;
    let mut word = String::new();

    for c in Utf8Chars::new(reader) {
        let c = match c {
            Ok(c) => c,
            Err(e) => {
                return Relayed {
                    fragments,
                    end: ReadEnd::Failed(e),
                }
            }
        };

        let ready = match granularity {
            Granularity::Char => Some(c.to_string()),
            Granularity::Word => {
                word.push(c);
                (c == ' ' || c == '\n').then(|| std::mem::take(&mut word))
            }
            Granularity::Line => {
                word.push(c);
                (c == '\n').then(|| std::mem::take(&mut word))
            }
        };

        if let Some(fragment) = ready {
            if !emit(fragment) {
                return Relayed {
                    fragments,
                    end: ReadEnd::Closed,
                };
            }
            fragments += 1;
        }
    }

    if !word.is_empty() {
        if !emit(word) {
            return Relayed {
                fragments,
                end: ReadEnd::Closed,
            };
        }
        fragments += 1;
    }

    Relayed {
        fragments,
        end: ReadEnd::Eof,
    }
}
