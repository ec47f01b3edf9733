//! Bounded capture of backend stdout/stderr.
//!
//! Process output is the only startup diagnostic that survives the
//! process itself, so each stream is drained into a capped tail
//! buffer rather than discarded or accumulated without bound.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Default tail capacity per stream.
pub(crate) const OUTPUT_TAIL_BYTES: usize = 8 * 1024;

const READ_CHUNK_BYTES: usize = 4096;

/// Exit summary of one backend generation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProcessExit {
    pub code: Option<i32>,
}

/// Shared, capped accumulator holding the last N bytes of a stream.
#[derive(Clone)]
pub(crate) struct OutputTail {
    inner: Arc<Mutex<TailBuf>>,
}

struct TailBuf {
    buf: VecDeque<u8>,
    cap: usize,
}

impl OutputTail {
    pub(crate) fn with_capacity(cap: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TailBuf {
                buf: VecDeque::with_capacity(cap.min(READ_CHUNK_BYTES)),
                cap,
            })),
        }
    }

    pub(crate) fn push(&self, bytes: &[u8]) {
        let mut tail = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        tail.buf.extend(bytes.iter().copied());
        let len = tail.buf.len();
        let cap = tail.cap;
        if len > cap {
            tail.buf.drain(..len - cap);
        }
    }

    pub(crate) fn contents(&self) -> String {
        let mut tail = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(tail.buf.make_contiguous()).into_owned()
    }

    pub(crate) fn contains(&self, needle: &str) -> bool {
        self.contents().contains(needle)
    }
}

/// Render both tails into one diagnostic blob for error reporting.
pub(crate) fn combined_tail(stdout: &OutputTail, stderr: &OutputTail) -> String {
    format!(
        "stdout: {}\nstderr: {}",
        stdout.contents().trim_end(),
        stderr.contents().trim_end()
    )
}

/// Drain stdout into its tail, firing `ready_tx` once the readiness
/// marker is seen. The pump ends when the stream closes.
pub(crate) fn spawn_stdout_pump(
    mut stream: ChildStdout,
    tail: OutputTail,
    marker: String,
    ready_tx: oneshot::Sender<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ready_tx = Some(ready_tx);
        let mut buf = [0u8; READ_CHUNK_BYTES];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    tail.push(&buf[..n]);
                    if ready_tx.is_some()
                        && tail.contains(&marker)
                        && let Some(tx) = ready_tx.take()
                    {
                        let _ = tx.send(());
                    }
                }
            }
        }
    })
}

/// Drain stderr into its tail until the stream closes.
pub(crate) fn spawn_stderr_pump(mut stream: ChildStderr, tail: OutputTail) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; READ_CHUNK_BYTES];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => tail.push(&buf[..n]),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_keeps_only_last_bytes() {
        let tail = OutputTail::with_capacity(8);
        tail.push(b"0123456789abcdef");
        assert_eq!(tail.contents(), "89abcdef");
    }

    #[test]
    fn test_tail_accumulates_across_pushes() {
        let tail = OutputTail::with_capacity(64);
        tail.push(b"Application startup");
        tail.push(b" complete");
        assert!(tail.contains("Application startup complete"));
    }

    #[test]
    fn test_tail_tolerates_invalid_utf8() {
        let tail = OutputTail::with_capacity(16);
        tail.push(&[0xff, 0xfe, b'o', b'k']);
        assert!(tail.contents().ends_with("ok"));
    }

    #[test]
    fn test_combined_tail_labels_streams() {
        let stdout = OutputTail::with_capacity(32);
        let stderr = OutputTail::with_capacity(32);
        stdout.push(b"out line\n");
        stderr.push(b"err line\n");
        let combined = combined_tail(&stdout, &stderr);
        assert!(combined.contains("stdout: out line"));
        assert!(combined.contains("stderr: err line"));
    }
}
