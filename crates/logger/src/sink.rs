//! Pluggable log output.
//!
//! The subscriber writes through a [`LogSink`] capability instead of a
//! hardwired stream, so tests can collect formatted lines and embedders can
//! redirect output without touching the subscriber.

use std::{
    io,
    sync::{Arc, Mutex},
};

use tracing_subscriber::fmt::MakeWriter;

/// Receives one formatted log line at a time.
pub trait LogSink: Send + Sync {
    fn write_line(&self, line: &str);
}

/// Default sink: stdout.
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn write_line(&self, line: &str) {
        println!("{line}");
    }
}

/// Test sink that collects every line.
#[derive(Clone, Default)]
pub struct CollectingSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl LogSink for CollectingSink {
    fn write_line(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}

// ── MakeWriter adapter ───────────────────────────────────────────────────────

/// Adapts a [`LogSink`] to the `MakeWriter` interface `tracing_subscriber`
/// formats into. Bytes are buffered until a newline, then handed to the sink
/// one complete line at a time.
#[derive(Clone)]
pub struct SinkWriter {
    sink: Arc<dyn LogSink>,
}

impl SinkWriter {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }
}

impl<'a> MakeWriter<'a> for SinkWriter {
    type Writer = LineBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        LineBuffer {
            sink: Arc::clone(&self.sink),
            buf: Vec::new(),
        }
    }
}

pub struct LineBuffer {
    sink: Arc<dyn LogSink>,
    buf: Vec<u8>,
}

impl io::Write for LineBuffer {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            self.sink.write_line(text.trim_end_matches('\n'));
        }
        Ok(())
    }
}

impl Drop for LineBuffer {
    fn drop(&mut self) {
        let _ = io::Write::flush(self);
        if !self.buf.is_empty() {
            let text = String::from_utf8_lossy(&self.buf).to_string();
            self.sink.write_line(&text);
        }
    }
}
