use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// In-memory transport that records everything written to it.
///
/// A write limit caps how many bytes a single `write` accepts, which is how
/// tests exercise partial writes and the drain state machine.
#[derive(Debug)]
pub struct MemoryTransport {
    name: String,
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    written: Vec<u8>,
    write_limit: Option<usize>,
    wakeup_wanted: bool,
    write_calls: usize,
    closed: bool,
}

impl MemoryTransport {
    /// Create a transport that accepts every write in full.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Create a transport that accepts at most `limit` bytes per write.
    pub fn with_write_limit(name: impl Into<String>, limit: usize) -> Self {
        let transport = Self::new(name);
        transport.set_write_limit(Some(limit));
        transport
    }

    /// Change the per-write byte limit (`None` accepts everything).
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.state().write_limit = limit;
    }

    /// Bytes written so far.
    pub fn written(&self) -> Vec<u8> {
        self.state().written.clone()
    }

    /// Drain and return the bytes written so far.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.state().written)
    }

    /// Whether a write wakeup is currently requested.
    pub fn wakeup_wanted(&self) -> bool {
        self.state().wakeup_wanted
    }

    /// Number of `write` calls that reached the transport.
    pub fn write_calls(&self) -> usize {
        self.state().write_calls
    }

    /// Simulate a hangup: every later write fails with `Closed`.
    pub fn close(&self) {
        debug!(name = %self.name, "memory transport closed");
        self.state().closed = true;
    }

    /// Whether [`MemoryTransport::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for MemoryTransport {
    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut state = self.state();
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.write_calls += 1;
        let accepted = state.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        state.written.extend_from_slice(&buf[..accepted]);
        Ok(accepted)
    }

    fn set_write_wakeup(&self, wanted: bool) {
        self.state().wakeup_wanted = wanted;
    }

    fn name(&self) -> &str {
        &self.name
    }
}
