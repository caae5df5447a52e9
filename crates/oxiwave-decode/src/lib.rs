//! Protocol decoders for pulse-oximeter byte streams.

pub mod bci;

pub use bci::{PulseOximeter, PulseOximeterValues};

/// Non-blocking byte source, typically the receive side of a serial or
/// transparent-UART transport.
///
/// `read` is best-effort: it copies whatever is currently buffered, up to
/// `buf.len()` bytes, and returns how many were written. Zero means nothing
/// is available right now; it never blocks and never fails.
pub trait ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> usize;
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        (**self).read(buf)
    }
}
