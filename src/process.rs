use std::collections::VecDeque;
use std::ffi::OsString;
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

const OUTPUT_TAIL_LINES: usize = 40;

static FRAME_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"frame=\s*(\d+)").expect("frame token pattern is valid"));

#[derive(Debug, Error)]
pub enum ExternalToolError {
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with {status}\n{output}")]
    NonZeroExit {
        tool: String,
        status: String,
        output: String,
    },
    #[error("{tool} did not finish within {}s", timeout.as_secs_f64())]
    Timeout { tool: String, timeout: Duration },
    #[error("interpolation produced {found} frame(s), expected {expected}")]
    InterpolationIncomplete { expected: u64, found: u64 },
}

pub fn parse_frame_progress(line: &str) -> Option<u64> {
    FRAME_TOKEN
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Monotonic frame counter clamped to the expected total.
#[derive(Debug, Clone)]
pub struct FrameProgress {
    total: u64,
    current: u64,
}

impl FrameProgress {
    pub fn new(total: u64) -> Self {
        Self { total, current: 0 }
    }

    /// Feed an observed counter. Returns the new position when it advanced.
    pub fn observe(&mut self, frame: u64) -> Option<u64> {
        let clamped = frame.min(self.total);
        if clamped > self.current {
            self.current = clamped;
            Some(clamped)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn tool_name(&self) -> String {
        self.program
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    pub fn spawn(&self) -> Result<RunningTool, ExternalToolError> {
        self.spawn_with(StdoutMode::Lines)
    }

    fn spawn_with(&self, stdout_mode: StdoutMode) -> Result<RunningTool, ExternalToolError> {
        debug!(
            program = %self.program.display(),
            args = ?self.args,
            "Spawning external tool"
        );
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExternalToolError::Spawn {
                tool: self.tool_name(),
                source,
            })?;

        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::with_capacity(2);
        let mut stdout_reader = None;
        if let Some(mut stdout) = child.stdout.take() {
            match stdout_mode {
                StdoutMode::Lines => {
                    let tx = tx.clone();
                    readers.push(thread::spawn(move || forward_lines(stdout, tx)));
                }
                StdoutMode::Collect => {
                    stdout_reader = Some(thread::spawn(move || {
                        let mut buf = Vec::new();
                        let _ = stdout.read_to_end(&mut buf);
                        buf
                    }));
                }
            }
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(thread::spawn(move || forward_lines(stderr, tx)));
        }

        Ok(RunningTool {
            tool: self.tool_name(),
            child,
            lines: rx,
            readers,
            stdout_reader,
            tail: VecDeque::with_capacity(OUTPUT_TAIL_LINES),
            started_at: Instant::now(),
        })
    }

    pub fn run_streaming<F>(
        &self,
        timeout: Option<Duration>,
        mut on_line: F,
    ) -> Result<ToolOutput, ExternalToolError>
    where
        F: FnMut(&str),
    {
        let mut running = self.spawn()?;
        while let Some(line) = running.next_line(timeout)? {
            on_line(&line);
        }
        running.finish(timeout)
    }

    /// Run to completion, keeping stdout apart. Only stderr feeds `lines`
    /// and the failure tail.
    pub fn run_stdout(&self, timeout: Option<Duration>) -> Result<ToolOutput, ExternalToolError> {
        let mut running = self.spawn_with(StdoutMode::Collect)?;
        let mut lines = Vec::new();
        while let Some(line) = running.next_line(timeout)? {
            lines.push(line);
        }
        let mut output = running.finish(timeout)?;
        output.lines = lines;
        Ok(output)
    }

    pub fn run_captured(&self, timeout: Option<Duration>) -> Result<ToolOutput, ExternalToolError> {
        let mut lines = Vec::new();
        let mut output = self.run_streaming(timeout, |line| lines.push(line.to_string()))?;
        output.lines = lines;
        Ok(output)
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StdoutMode {
    Lines,
    Collect,
}

#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub lines: Vec<String>,
    pub stdout: String,
    pub elapsed: Duration,
}

pub struct RunningTool {
    tool: String,
    child: Child,
    lines: Receiver<String>,
    readers: Vec<JoinHandle<()>>,
    stdout_reader: Option<JoinHandle<Vec<u8>>>,
    tail: VecDeque<String>,
    started_at: Instant,
}

impl RunningTool {
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Block until the next line arrives. `None` once both streams closed.
    pub fn next_line(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, ExternalToolError> {
        let received = match timeout {
            Some(limit) => {
                let remaining = limit.saturating_sub(self.elapsed());
                match self.lines.recv_timeout(remaining) {
                    Ok(line) => Some(line),
                    Err(RecvTimeoutError::Disconnected) => None,
                    Err(RecvTimeoutError::Timeout) => return Err(self.abort(limit)),
                }
            }
            None => self.lines.recv().ok(),
        };
        if let Some(line) = &received {
            self.remember(line);
        }
        Ok(received)
    }

    pub fn drain(&mut self) -> Vec<String> {
        let mut drained = Vec::new();
        loop {
            match self.lines.try_recv() {
                Ok(line) => {
                    self.remember(&line);
                    drained.push(line);
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        drained
    }

    pub fn try_status(&mut self) -> Result<Option<ExitStatus>, ExternalToolError> {
        self.child.try_wait().map_err(|source| ExternalToolError::Spawn {
            tool: self.tool.clone(),
            source,
        })
    }

    pub fn check_deadline(&mut self, timeout: Option<Duration>) -> Result<(), ExternalToolError> {
        match timeout {
            Some(limit) if self.elapsed() >= limit => Err(self.abort(limit)),
            _ => Ok(()),
        }
    }

    pub fn finish(mut self, timeout: Option<Duration>) -> Result<ToolOutput, ExternalToolError> {
        let status = loop {
            if let Some(status) = self.try_status()? {
                break status;
            }
            self.check_deadline(timeout)?;
            self.drain();
            thread::sleep(Duration::from_millis(20));
        };
        for reader in self.readers.drain(..) {
            let _ = reader.join();
        }
        self.drain();
        let stdout = self
            .stdout_reader
            .take()
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(self.failure(status));
        }
        Ok(ToolOutput {
            lines: Vec::new(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            elapsed: self.elapsed(),
        })
    }

    pub fn failure(&self, status: ExitStatus) -> ExternalToolError {
        ExternalToolError::NonZeroExit {
            tool: self.tool.clone(),
            status: status.to_string(),
            output: self.tail.iter().cloned().collect::<Vec<_>>().join("\n"),
        }
    }

    pub fn abort(&mut self, limit: Duration) -> ExternalToolError {
        warn!(tool = %self.tool, timeout_secs = limit.as_secs_f64(), "Killing unresponsive tool");
        let _ = self.child.kill();
        let _ = self.child.wait();
        ExternalToolError::Timeout {
            tool: self.tool.clone(),
            timeout: limit,
        }
    }

    fn remember(&mut self, line: &str) {
        if self.tail.len() == OUTPUT_TAIL_LINES {
            self.tail.pop_front();
        }
        self.tail.push_back(line.to_string());
    }
}

impl Drop for RunningTool {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

// ffmpeg rewrites its stats line with '\r', so both terminators end a line.
fn forward_lines<R: Read>(stream: R, tx: mpsc::Sender<String>) {
    let mut reader = BufReader::new(stream);
    let mut pending = Vec::new();
    loop {
        let (consumed, finished) = match reader.fill_buf() {
            Ok([]) => (0, true),
            Ok(buf) => {
                let mut consumed = 0;
                for (idx, byte) in buf.iter().enumerate() {
                    if *byte == b'\n' || *byte == b'\r' {
                        pending.extend_from_slice(&buf[consumed..idx]);
                        consumed = idx + 1;
                        if !pending.is_empty() {
                            let line = String::from_utf8_lossy(&pending).to_string();
                            pending.clear();
                            if tx.send(line).is_err() {
                                return;
                            }
                        }
                    }
                }
                pending.extend_from_slice(&buf[consumed..]);
                (buf.len(), false)
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => (0, false),
            Err(_) => (0, true),
        };
        if finished {
            break;
        }
        reader.consume(consumed);
    }
    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).to_string());
    }
}
