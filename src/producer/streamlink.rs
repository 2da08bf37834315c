//! Streamlink child-process producer
//!
//! Runs `streamlink --stdout` for the source URL and relays its stdout.
//! Segment fetching, playlist reloads and parallel segment threads are all
//! handled by streamlink; this side only pipes bytes.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use super::{ProducerError, ProducerOptions, ProducerSource, ProducerStream};

/// Ring buffer size requested from streamlink itself
const RINGBUFFER_SIZE: &str = "32M";

/// Streamlink-backed producer source
#[derive(Debug, Clone)]
pub struct StreamlinkSource {
    /// Path to streamlink binary
    program: String,
    /// Quality selector passed after the URL
    quality: String,
    /// Additional streamlink arguments
    extra_args: Vec<String>,
}

impl Default for StreamlinkSource {
    fn default() -> Self {
        Self {
            program: "streamlink".to_string(),
            quality: "best".to_string(),
            extra_args: Vec::new(),
        }
    }
}

impl StreamlinkSource {
    /// Create a source that runs `streamlink` from PATH
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom streamlink binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Select a quality other than `best`
    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    /// Add extra streamlink arguments
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Build the streamlink command line for `url`
    pub fn build_args(&self, url: &str, options: &ProducerOptions) -> Vec<String> {
        let mut args = vec![
            "--stdout".to_string(),
            "--http-header".to_string(),
            format!("User-Agent={}", options.user_agent),
            "--http-timeout".to_string(),
            options.timeout.as_secs_f64().to_string(),
            "--stream-segment-threads".to_string(),
            options.threads.to_string(),
            "--ringbuffer-size".to_string(),
            RINGBUFFER_SIZE.to_string(),
        ];

        args.extend(self.extra_args.iter().cloned());

        args.push(url.to_string());
        args.push(self.quality.clone());
        args
    }
}

#[async_trait]
impl ProducerSource for StreamlinkSource {
    async fn start(
        &self,
        url: &str,
        options: &ProducerOptions,
    ) -> Result<Box<dyn ProducerStream>, ProducerError> {
        let args = self.build_args(url, options);
        tracing::debug!(program = %self.program, args = ?args, "Spawning downloader");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProducerError::Start(format!("failed to spawn {}: {}", self.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProducerError::Start("downloader stdout not captured".to_string()))?;

        let last_stderr = Arc::new(Mutex::new(None));
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr, Arc::clone(&last_stderr)));
        }

        let mut stream = StreamlinkStream {
            child,
            stdout,
            buf: BytesMut::new(),
            chunk_size: options.buffer_size.max(1),
            last_stderr,
            pending: None,
            exited: false,
        };

        // Hold the first chunk back so "no streams found" style failures
        // surface as start errors instead of an empty 200 response
        match tokio::time::timeout(options.timeout, stream.read_stdout()).await {
            Ok(Ok(Some(chunk))) => {
                tracing::info!(url = %url, pid = ?stream.child.id(), "Downloader producing");
                stream.pending = Some(chunk);
                Ok(Box::new(stream))
            }
            Ok(Ok(None)) => {
                let status = stream.reap().await;
                Err(ProducerError::Start(stream.describe_exit(status)))
            }
            Ok(Err(e)) => {
                let _ = stream.stop().await;
                Err(e)
            }
            Err(_) => {
                let _ = stream.stop().await;
                Err(ProducerError::Timeout(options.timeout))
            }
        }
    }
}

/// Log downloader stderr and remember its last line for error reports
async fn forward_stderr(stderr: ChildStderr, last: Arc<Mutex<Option<String>>>) {
    let mut lines = BufReader::new(stderr).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        tracing::debug!(target: "hls_relay::downloader", "{}", line);
        *last.lock() = Some(line);
    }
}

struct StreamlinkStream {
    child: Child,
    stdout: ChildStdout,
    buf: BytesMut,
    chunk_size: usize,
    last_stderr: Arc<Mutex<Option<String>>>,
    pending: Option<Bytes>,
    exited: bool,
}

impl StreamlinkStream {
    async fn read_stdout(&mut self) -> Result<Option<Bytes>, ProducerError> {
        self.buf.reserve(self.chunk_size);

        let n = self.stdout.read_buf(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }

        Ok(Some(self.buf.split().freeze()))
    }

    async fn reap(&mut self) -> Option<ExitStatus> {
        if self.exited {
            return None;
        }
        self.exited = true;
        self.child.wait().await.ok()
    }

    fn describe_exit(&self, status: Option<ExitStatus>) -> String {
        let status = status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown status".to_string());

        match self.last_stderr.lock().clone() {
            Some(line) => format!("downloader exited ({}): {}", status, line),
            None => format!("downloader exited ({})", status),
        }
    }
}

#[async_trait]
impl ProducerStream for StreamlinkStream {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>, ProducerError> {
        if let Some(chunk) = self.pending.take() {
            return Ok(Some(chunk));
        }

        match self.read_stdout().await? {
            Some(chunk) => Ok(Some(chunk)),
            None => {
                let status = self.reap().await;
                match status {
                    Some(s) if s.success() => Ok(None),
                    other => Err(ProducerError::Failed(self.describe_exit(other))),
                }
            }
        }
    }

    async fn stop(&mut self) -> Result<(), ProducerError> {
        if self.exited {
            return Ok(());
        }

        // Already-exited children report an error here; reaping still works
        let _ = self.child.start_kill();
        self.exited = true;
        let status = self.child.wait().await?;
        tracing::debug!(status = %status, "Downloader stopped");
        Ok(())
    }
}
