//! Full-duplex byte relay between a client and its backend.
//!
//! Two pumps run concurrently, one per direction. The first pump to end, for
//! any reason, ends the relay: the other pump is dropped mid-flight and both
//! streams are closed. Half-close is not supported.

use std::fmt;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the per-pump transfer buffer.
pub const RELAY_BUFFER_SIZE: usize = 8192;

/// Direction of a pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToBackend => f.write_str("client_to_backend"),
            Direction::BackendToClient => f.write_str("backend_to_client"),
        }
    }
}

/// Why a pump stopped.
#[derive(Debug)]
pub enum PumpEnd {
    /// Source reached end-of-stream.
    Eof,
    /// Reading from the source failed.
    ReadFailed(io::Error),
    /// Writing to the destination failed.
    WriteFailed(io::Error),
}

impl PumpEnd {
    /// Whether the pump ended on a clean end-of-stream.
    pub fn is_clean(&self) -> bool {
        matches!(self, PumpEnd::Eof)
    }
}

impl fmt::Display for PumpEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpEnd::Eof => f.write_str("eof"),
            PumpEnd::ReadFailed(e) => write!(f, "read failed: {}", e),
            PumpEnd::WriteFailed(e) => write!(f, "write failed: {}", e),
        }
    }
}

/// Summary of a finished relay.
#[derive(Debug)]
pub struct RelayOutcome {
    /// The pump that ended first and triggered teardown.
    pub first_ended: Direction,
    /// Why that pump ended.
    pub reason: PumpEnd,
    /// Bytes fully written to the backend.
    pub bytes_to_backend: u64,
    /// Bytes fully written to the client.
    pub bytes_from_backend: u64,
}

/// Copy from `reader` to `writer` until either side ends.
///
/// Each chunk is written in full before the next read, so a slow writer
/// throttles the reader.
async fn pump<R, W>(reader: &mut R, writer: &mut W, total: &mut u64) -> PumpEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return PumpEnd::Eof,
            Ok(n) => n,
            Err(e) => return PumpEnd::ReadFailed(e),
        };

        if let Err(e) = writer.write_all(&buf[..n]).await {
            return PumpEnd::WriteFailed(e);
        }
        *total += n as u64;
    }
}

/// Relay bytes between `client` and `backend` until either direction ends.
///
/// Takes ownership of both streams; they are dropped, and therefore closed,
/// before this returns.
pub async fn relay<A, B>(client: A, backend: B) -> RelayOutcome
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(backend);

    let mut bytes_to_backend = 0u64;
    let mut bytes_from_backend = 0u64;

    let (first_ended, reason) = tokio::select! {
        end = pump(&mut client_read, &mut backend_write, &mut bytes_to_backend) => {
            (Direction::ClientToBackend, end)
        }
        end = pump(&mut backend_read, &mut client_write, &mut bytes_from_backend) => {
            (Direction::BackendToClient, end)
        }
    };

    drop(client_read);
    drop(client_write);
    drop(backend_read);
    drop(backend_write);

    RelayOutcome {
        first_ended,
        reason,
        bytes_to_backend,
        bytes_from_backend,
    }
}
