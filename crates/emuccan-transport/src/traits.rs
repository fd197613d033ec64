use std::sync::Arc;

use crate::error::Result;

/// Outbound half of a byte-stream transport.
///
/// Implementations must never block in [`Transport::write`]: callers hold a
/// per-link lock across the call. Accepting zero bytes is a valid answer and
/// means "try again after the next write wakeup".
pub trait Transport: Send + Sync {
    /// Write as many bytes of `buf` as the transport accepts right now.
    ///
    /// Returns the number of bytes taken, which may be less than `buf.len()`.
    /// `Err(TransportError::Closed)` means the transport is gone for good.
    fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Ask for (or cancel) a wakeup once the transport can accept more bytes.
    ///
    /// Must be called *before* the write it guards: a short write may complete
    /// inside `write` itself and the notification would otherwise be lost.
    fn set_write_wakeup(&self, wanted: bool);

    /// Transport name for diagnostics.
    fn name(&self) -> &str;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn write(&self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn set_write_wakeup(&self, wanted: bool) {
        (**self).set_write_wakeup(wanted)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
