//! Output multiplexer: many producers, one outbound reply channel.
//!
//! Each producer (in practice, a running task keyed by its id) owns a line
//! buffer. Complete lines become `output` replies immediately; the tail waits
//! for more bytes or a flush. Lines from one producer never interleave
//! mid-line with another's; ordering *across* producers is unspecified.
//!
//! The channel receiver lives in the session loop. Once the session is gone
//! the receiver is dropped and every later send fails; those sends are
//! discarded on purpose, so a task finishing after its connection closed
//! never touches a stale socket.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use tether_protocol::Reply;

use crate::runtime::OutputSink;

pub type ProducerId = u64;

#[derive(Clone)]
pub struct OutputMux {
    inner: Arc<MuxInner>,
}

struct MuxInner {
    outbound: mpsc::UnboundedSender<Reply>,
    buffers: Mutex<HashMap<ProducerId, String>>,
}

impl OutputMux {
    /// Create a multiplexer and the receiver the session loop drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Reply>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                inner: Arc::new(MuxInner {
                    outbound: tx,
                    buffers: Mutex::new(HashMap::new()),
                }),
            },
            rx,
        )
    }

    /// Append text to a producer's stream. Every complete line is emitted as
    /// one `output` reply carrying its terminator; the unterminated tail is
    /// retained.
    pub fn write(&self, producer: ProducerId, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut buffers = self.inner.buffers.lock().unwrap();
        let buf = buffers.entry(producer).or_default();
        buf.push_str(text);
        while let Some(pos) = buf.find('\n') {
            let line: String = buf.drain(..=pos).collect();
            self.send(Reply::Output { data: line });
        }
    }

    /// Emit any retained tail as a final `output` reply (without a
    /// terminator) and drop the producer's buffer. No output is lost even if
    /// the producer never wrote a newline.
    pub fn flush(&self, producer: ProducerId) {
        let tail = self.inner.buffers.lock().unwrap().remove(&producer);
        if let Some(tail) = tail
            && !tail.is_empty()
        {
            self.send(Reply::Output { data: tail });
        }
    }

    /// Queue a non-output reply (task status, for instance) on the same
    /// channel, so it ends up ordered after everything the producer already
    /// emitted.
    pub fn emit(&self, reply: Reply) {
        self.send(reply);
    }

    /// An [`OutputSink`] bound to one producer, handed to the evaluator.
    pub fn sink(&self, producer: ProducerId) -> ProducerSink {
        ProducerSink {
            mux: self.clone(),
            producer,
        }
    }

    fn send(&self, reply: Reply) {
        if self.inner.outbound.send(reply).is_err() {
            // Connection is gone; late output is dropped, never written to a
            // stale or reused socket.
            tracing::debug!("connection closed, discarding late reply");
        }
    }
}

/// Per-producer handle implementing the sink contract the evaluator writes
/// through.
pub struct ProducerSink {
    mux: OutputMux,
    producer: ProducerId,
}

impl OutputSink for ProducerSink {
    fn write(&mut self, text: &str) {
        self.mux.write(self.producer, text);
    }

    fn flush(&mut self) {
        self.mux.flush(self.producer);
    }
}
