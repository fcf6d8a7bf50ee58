//! Host-facing byte stream
//!
//! The transport is the only place the dispatcher waits. It uses
//! `maybe_async` to support both sync and async modes:
//! - By default the trait is async and awaiting it is the cooperative yield
//!   point of the firmware (Embassy)
//! - With the `is_sync` feature the trait is blocking (threads, std sockets)
//!
//! There are no timeouts: a silent host blocks forever.

use crate::error::{Error, Result};
use crate::protocol::u24_from_le;
use embedded_io::{Error as _, ReadExactError};
use maybe_async::maybe_async;

/// Byte stream between the host tool and the programmer
#[maybe_async(AFIT)]
pub trait Transport {
    /// Read exactly `buf.len()` bytes
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Write all of `buf`
    async fn write_exact(&mut self, buf: &[u8]) -> Result<()>;

    /// Push buffered bytes out to the host
    async fn flush(&mut self) -> Result<()>;

    /// Read a single byte
    async fn read_byte(&mut self) -> Result<u8> {
        let mut b = [0u8];
        self.read_exact(&mut b).await?;
        Ok(b[0])
    }

    /// Write a single byte
    async fn write_byte(&mut self, b: u8) -> Result<()> {
        self.write_exact(&[b]).await
    }

    /// Read a 24-bit little-endian value
    async fn read_u24_le(&mut self) -> Result<u32> {
        let mut b = [0u8; 3];
        self.read_exact(&mut b).await?;
        Ok(u24_from_le(b))
    }

    /// Read a 32-bit little-endian value
    async fn read_u32_le(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b).await?;
        Ok(u32::from_le_bytes(b))
    }
}

fn read_error<E: embedded_io::Error>(e: ReadExactError<E>) -> Error {
    match e {
        ReadExactError::UnexpectedEof => Error::Disconnected,
        ReadExactError::Other(e) => link_error(e),
    }
}

fn link_error<E: embedded_io::Error>(e: E) -> Error {
    match e.kind() {
        embedded_io::ErrorKind::BrokenPipe
        | embedded_io::ErrorKind::ConnectionReset
        | embedded_io::ErrorKind::ConnectionAborted
        | embedded_io::ErrorKind::NotConnected => Error::Disconnected,
        kind => Error::Transport(kind),
    }
}

// Any blocking embedded-io stream is a transport
#[cfg(feature = "is_sync")]
impl<T> Transport for T
where
    T: embedded_io::Read + embedded_io::Write,
{
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        embedded_io::Read::read_exact(self, buf).map_err(read_error)
    }

    fn write_exact(&mut self, buf: &[u8]) -> Result<()> {
        embedded_io::Write::write_all(self, buf).map_err(link_error)
    }

    fn flush(&mut self) -> Result<()> {
        embedded_io::Write::flush(self).map_err(link_error)
    }
}

// Any async embedded-io stream is a transport
#[cfg(not(feature = "is_sync"))]
impl<T> Transport for T
where
    T: embedded_io_async::Read + embedded_io_async::Write,
{
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        embedded_io_async::Read::read_exact(self, buf)
            .await
            .map_err(read_error)
    }

    async fn write_exact(&mut self, buf: &[u8]) -> Result<()> {
        embedded_io_async::Write::write_all(self, buf)
            .await
            .map_err(link_error)
    }

    async fn flush(&mut self) -> Result<()> {
        embedded_io_async::Write::flush(self)
            .await
            .map_err(link_error)
    }
}
