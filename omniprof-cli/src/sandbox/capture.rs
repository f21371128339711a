//! Bounded capture of the worker's standard streams.

use std::io::Read;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Default)]
struct CaptureBuffer {
    data: Vec<u8>,
    dropped: usize,
}

impl CaptureBuffer {
    fn push(&mut self, chunk: &[u8], limit: usize) {
        let room = limit.saturating_sub(self.data.len());
        let kept = room.min(chunk.len());
        self.data.extend_from_slice(&chunk[..kept]);
        self.dropped += chunk.len() - kept;
    }

    fn render(&self, limit: usize) -> String {
        let mut text = String::from_utf8_lossy(&self.data).into_owned();
        if self.dropped > 0 {
            if !text.ends_with('\n') && !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&format!(
                "[output truncated at {} bytes, {} bytes dropped]\n",
                limit, self.dropped
            ));
        }
        text
    }
}

/// Reader thread draining one stream into a bounded buffer.
///
/// The stream is drained to EOF even past the limit so the writer never
/// blocks on a full pipe.
pub(crate) struct StreamCapture {
    buffer: Arc<Mutex<CaptureBuffer>>,
    done: Receiver<()>,
    limit: usize,
}

impl StreamCapture {
    pub(crate) fn spawn<R>(name: &str, mut reader: R, limit: usize) -> std::io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(CaptureBuffer::default()));
        let (done_tx, done) = mpsc::channel();
        let shared = Arc::clone(&buffer);
        thread::Builder::new()
            .name(format!("omniprof-{name}"))
            .spawn(move || {
                let mut chunk = [0u8; CHUNK_SIZE];
                loop {
                    match reader.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => shared
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .push(&chunk[..n], limit),
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
                let _ = done_tx.send(());
            })?;
        Ok(Self {
            buffer,
            done,
            limit,
        })
    }

    /// Wait up to `bound` for end of stream, then return what was captured.
    /// A reader still blocked (a grandchild holds the pipe) is left detached.
    pub(crate) fn finish(self, bound: Duration) -> String {
        match self.done.recv_timeout(bound) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => {
                tracing::debug!("output reader still blocked after {:?}, detaching", bound);
            }
        }
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .render(self.limit)
    }
}
