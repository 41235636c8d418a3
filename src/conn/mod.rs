//! Traits to perform in-order, serial, byte-wise I/O.

mod impls;

/// A trait to perform in-order, serial, byte-wise I/O.
///
/// This trait is automatically implemented for
/// [`TcpStream`](std::net::TcpStream).
pub trait Connection {
    /// Transport-specific error type.
    type Error;

    /// Write a single byte.
    fn write(&mut self, byte: u8) -> Result<(), Self::Error>;

    /// Write the entire buffer, blocking until complete.
    ///
    /// This method's default implementation calls `self.write()` on each byte
    /// in the buffer. This can be quite inefficient, so if a more efficient
    /// implementation exists (such as calling `write_all()` on an underlying
    /// `std::io::Write` object), this method should be overwritten.
    fn write_all(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        for b in buf {
            self.write(*b)?;
        }
        Ok(())
    }

    /// Flush this Connection, ensuring that all intermediately buffered
    /// contents reach their destination.
    fn flush(&mut self) -> Result<(), Self::Error>;

    /// Called once when the GDB client attaches, _before_ any packets have
    /// been exchanged.
    ///
    /// This method's default implementation is a no-op.
    ///
    /// The `TcpStream` implementation uses this hook to
    /// [`set_nodelay(true)`](std::net::TcpStream::set_nodelay). The GDB remote
    /// serial protocol sends/receives many small packets, so forgetting to
    /// enable `TCP_NODELAY` can result in a massively degraded debugging
    /// experience.
    fn on_session_start(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Extends [`Connection`] with blocking `read` and non-blocking `peek`.
///
/// The server's run loop blocks in `read` between packets, and uses `peek`
/// while the target is running to notice an in-band break (`0x03`) without
/// stalling the halt-status poll.
pub trait ConnectionExt: Connection {
    /// Read a single byte, blocking until one is available.
    fn read(&mut self) -> Result<u8, Self::Error>;

    /// Peek at the next byte without consuming it, returning `None` if no
    /// data is available.
    fn peek(&mut self) -> Result<Option<u8>, Self::Error>;
}

impl<C: Connection + ?Sized> Connection for &mut C {
    type Error = C::Error;

    fn write(&mut self, byte: u8) -> Result<(), Self::Error> {
        (**self).write(byte)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        (**self).write_all(buf)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        (**self).flush()
    }

    fn on_session_start(&mut self) -> Result<(), Self::Error> {
        (**self).on_session_start()
    }
}

impl<C: ConnectionExt + ?Sized> ConnectionExt for &mut C {
    fn read(&mut self) -> Result<u8, Self::Error> {
        (**self).read()
    }

    fn peek(&mut self) -> Result<Option<u8>, Self::Error> {
        (**self).peek()
    }
}
