// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-pseudo-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Session lifetime tracking
//!
//! A session is the life of one admitted connection. The request/reply loop itself
//! runs inside `tokio-modbus`; this module wraps the connection so that:
//!
//! - every read and write is traced at byte level (`trace!`),
//! - the reason the session ended is recorded as a [`SessionEnd`],
//! - teardown (releasing the admission slot) happens when the library drops the
//!   connection, whatever the exit path.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::OwnedSemaphorePermit;

/// Why a session ended
///
/// Every variant terminates the session the same way; the distinction only
/// feeds the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed the connection (zero-length read)
    PeerClosed,
    /// The protocol layer could not decode a frame
    MalformedFrame,
    /// A read or write on the connection failed
    TransportFailure(io::ErrorKind),
}

impl SessionEnd {
    /// Classify an error reported by the protocol layer
    pub fn from_io_error(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::InvalidData => SessionEnd::MalformedFrame,
            io::ErrorKind::UnexpectedEof => SessionEnd::PeerClosed,
            kind => SessionEnd::TransportFailure(kind),
        }
    }
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::PeerClosed => write!(f, "peer closed the connection"),
            SessionEnd::MalformedFrame => write!(f, "malformed frame"),
            SessionEnd::TransportFailure(kind) => write!(f, "transport failure ({kind})"),
        }
    }
}

/// Admission slot held for the lifetime of a session
///
/// Dropping the guard releases the slot. It is owned by the [`SessionStream`],
/// which the protocol layer drops on every exit path of the session task.
#[derive(Debug)]
pub struct SessionGuard {
    id: u64,
    peer: SocketAddr,
    _permit: OwnedSemaphorePermit,
}

impl SessionGuard {
    pub(crate) fn new(id: u64, peer: SocketAddr, permit: OwnedSemaphorePermit) -> Self {
        debug!("start the session {} with {}", id, peer);
        Self {
            id,
            peer,
            _permit: permit,
        }
    }

    /// Session id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote address of the session
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

/// Connection of an admitted session
///
/// Wraps the transport (a `TcpStream` in production) and owns the session's
/// [`SessionGuard`].
#[derive(Debug)]
pub struct SessionStream<T> {
    inner: T,
    guard: SessionGuard,
    end: Option<SessionEnd>,
    bytes_received: u64,
    bytes_sent: u64,
}

impl<T> SessionStream<T> {
    pub fn new(inner: T, guard: SessionGuard) -> Self {
        Self {
            inner,
            guard,
            end: None,
            bytes_received: 0,
            bytes_sent: 0,
        }
    }

    /// Session id
    pub fn id(&self) -> u64 {
        self.guard.id()
    }

    /// End reason observed on the transport so far
    pub fn end(&self) -> Option<SessionEnd> {
        self.end
    }

    /// Closing line of the session log
    ///
    /// The end reason is named only when the transport observed it; a frame
    /// rejected by the protocol layer is reported by the listener instead.
    pub fn summary(&self) -> String {
        let reason = self.end.map(|end| format!(": {}", end)).unwrap_or_default();
        format!(
            "quit the session {} with {}{} ({} bytes received, {} bytes sent)",
            self.guard.id, self.guard.peer, reason, self.bytes_received, self.bytes_sent
        )
    }

    fn record_end(&mut self, end: SessionEnd) {
        // The first terminal condition wins
        if self.end.is_none() {
            self.end = Some(end);
        }
    }
}

impl<T> Drop for SessionStream<T> {
    fn drop(&mut self) {
        debug!("{}", self.summary());
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for SessionStream<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let wants_data = buf.remaining() > 0;
        let this = &mut *self;
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        match &poll {
            Poll::Ready(Ok(())) => {
                let received = buf.filled().len() - before;
                if received == 0 && wants_data {
                    this.record_end(SessionEnd::PeerClosed);
                } else {
                    this.bytes_received += received as u64;
                    trace!("received {} bytes on session {}", received, this.guard.id);
                }
            }
            Poll::Ready(Err(err)) => {
                trace!("read error on session {}: {}", this.guard.id, err);
                this.record_end(SessionEnd::TransportFailure(err.kind()));
            }
            Poll::Pending => {}
        }
        poll
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for SessionStream<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = &mut *self;
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        match &poll {
            Poll::Ready(Ok(sent)) => {
                this.bytes_sent += *sent as u64;
                trace!("sent {} bytes on session {}", sent, this.guard.id);
            }
            Poll::Ready(Err(err)) => {
                trace!("write error on session {}: {}", this.guard.id, err);
                this.record_end(SessionEnd::TransportFailure(err.kind()));
            }
            Poll::Pending => {}
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
