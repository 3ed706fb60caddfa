//! Serialized output shared by the follower and its tails
use std::{
    io::{self, Write},
    sync::Arc,
};

use parking_lot::Mutex;

/// A cloneable writer where every [`LogSink::write_str`] lands as one uninterrupted chunk
///
/// Lines from different containers may interleave, but a single write is never split. The
/// lock is only held for the write itself.
#[derive(Clone)]
pub struct LogSink {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl LogSink {
    /// Wraps any writer
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Arc::new(Mutex::new(Box::new(out))),
        }
    }

    /// Writes to the process stdout
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// An in-memory sink and a handle to read back what was written
    pub fn buffer() -> (Self, SharedBuffer) {
        let buf = SharedBuffer::default();
        (Self::new(buf.clone()), buf)
    }

    /// Writes `text` and flushes
    ///
    /// Output is best effort, a failing writer is logged and otherwise ignored.
    pub fn write_str(&self, text: &str) {
        let mut out = self.out.lock();
        if let Err(err) = out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
            tracing::warn!(error = %err, "failed writing to log sink");
        }
    }
}

/// Growable byte buffer shared between a [`LogSink`] and its reader
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Everything written so far, lossily decoded
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
