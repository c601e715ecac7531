//! Per-connection echo loop.

use crate::counter::ActiveClients;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time;

/// Largest chunk read (and echoed) in one cycle.
pub const BUFFER_SIZE: usize = 16 * 1024;

/// State shared by every handler the listener spawns.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub debug: bool,
    pub idle_timeout: Duration,
    pub clients: ActiveClients,
}

/// Why a connection stopped echoing.
#[derive(Debug)]
pub enum CloseReason {
    PeerClosed,
    IdleTimeout,
    ReadError(io::Error),
    WriteError(io::Error),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "closed connection"),
            CloseReason::IdleTimeout => write!(f, "read timeout"),
            CloseReason::ReadError(e) => write!(f, "read error: {e}"),
            CloseReason::WriteError(e) => write!(f, "write error: {e}"),
        }
    }
}

/// Echo everything read from `stream` back into it until EOF, an I/O error,
/// or `idle_timeout` passes without a read completing.
///
/// The idle deadline is re-armed before every read, so only silence closes
/// a connection, never its total age. The stream is closed on return.
pub async fn handle_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    ctx: &ConnectionContext,
) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let guard = ctx.debug.then(|| {
        tracing::debug!("TCP server accepted client {peer}");
        ctx.clients.register(peer)
    });

    let mut buf = vec![0u8; BUFFER_SIZE];
    let reason = loop {
        let n = match time::timeout(ctx.idle_timeout, stream.read(&mut buf)).await {
            Err(_) => break CloseReason::IdleTimeout,
            Ok(Ok(0)) => break CloseReason::PeerClosed,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => break CloseReason::ReadError(e),
        };

        if let Err(e) = stream.write_all(&buf[..n]).await {
            break CloseReason::WriteError(e);
        }
    };

    if ctx.debug {
        tracing::debug!("TCP client {peer} {reason}");
    }

    drop(stream);
    drop(guard);
    reason
}
