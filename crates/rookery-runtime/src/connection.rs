//! Accepted connection state and the per-call handler context

use crate::io::{classify, retry_interrupted, IoClass};

use rookery_core::{ConnId, CoreId};

use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, IntoRawFd, RawFd};
use std::time::Duration;

/// How long a synchronous write waits for the socket to drain
const WRITE_STALL: Duration = Duration::from_secs(5);

/// One accepted socket, owned by whichever thread currently holds it
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    core: CoreId,
    peer: SocketAddr,
    /// Bytes read but not yet consumed by the handler
    pending: Vec<u8>,
    close_requested: bool,
}

impl Connection {
    pub fn new(stream: TcpStream, core: CoreId, peer: SocketAddr) -> Self {
        Self {
            stream,
            core,
            peer,
            pending: Vec::new(),
            close_requested: false,
        }
    }

    #[inline]
    pub fn core(&self) -> CoreId {
        self.core
    }

    #[inline]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    #[inline]
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    /// Append `fresh` to the pending buffer and build the handler view.
    pub(crate) fn ctx<'a>(&'a mut self, id: ConnId, fresh: &'a [u8]) -> ConnCtx<'a> {
        self.pending.extend_from_slice(fresh);
        ConnCtx {
            id,
            core: self.core,
            peer: self.peer,
            stream: &self.stream,
            fresh,
            pending: &mut self.pending,
            close: &mut self.close_requested,
        }
    }

    /// Give up the descriptor without closing it (it is already invalid).
    pub(crate) fn forget(self) {
        let _ = self.stream.into_raw_fd();
    }
}

/// What a protocol handler sees during one call
///
/// Borrowed from the connection for the duration of the call only.
pub struct ConnCtx<'a> {
    id: ConnId,
    core: CoreId,
    peer: SocketAddr,
    stream: &'a TcpStream,
    fresh: &'a [u8],
    pending: &'a mut Vec<u8>,
    close: &'a mut bool,
}

impl<'a> ConnCtx<'a> {
    #[inline]
    pub fn id(&self) -> ConnId {
        self.id
    }

    #[inline]
    pub fn core(&self) -> CoreId {
        self.core
    }

    #[inline]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Bytes delivered by the read that triggered this call
    #[inline]
    pub fn fresh(&self) -> &[u8] {
        self.fresh
    }

    /// Everything received and not yet consumed, `fresh` included
    #[inline]
    pub fn pending(&self) -> &[u8] {
        self.pending
    }

    /// Drop the first `n` pending bytes (clamped to what is pending)
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.pending.len());
        self.pending.drain(..n);
    }

    /// Write all of `buf` before returning.
    ///
    /// The socket is non-blocking; when the send buffer is full this waits
    /// for writability, giving up with `TimedOut` after a bounded stall.
    pub fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        let mut stream: &TcpStream = self.stream;
        while !buf.is_empty() {
            match retry_interrupted(|| stream.write(buf)) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => buf = &buf[n..],
                Err(e) if classify(&e) == IoClass::WouldBlock => {
                    wait_writable(stream.as_raw_fd(), WRITE_STALL)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Ask for the connection to be torn down after this call
    #[inline]
    pub fn close(&mut self) {
        *self.close = true;
    }

    #[inline]
    pub fn is_closing(&self) -> bool {
        *self.close
    }
}

fn wait_writable(fd: RawFd, timeout: Duration) -> io::Result<()> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    let ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
    let n = retry_interrupted(|| {
        // SAFETY: one valid pollfd
        let n = unsafe { libc::poll(&mut pfd, 1, ms) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n)
        }
    })?;
    if n == 0 {
        return Err(io::ErrorKind::TimedOut.into());
    }
    Ok(())
}
