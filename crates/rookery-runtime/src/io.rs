//! I/O error classification
//!
//! Maps `std::io::Error` to the handful of outcomes the accept and drain
//! loops act on.

use std::io;

/// What an I/O failure means for the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoClass {
    /// EINTR: retry the call
    Interrupted,
    /// EAGAIN/EWOULDBLOCK: nothing more until the next readiness event
    WouldBlock,
    /// The peer closed or the path died (ECONNRESET, EPIPE, ETIMEDOUT, ...)
    PeerGone,
    /// EBADF: the descriptor is no longer ours
    Invalidated,
    /// Anything else
    Fatal,
}

/// Classify an I/O error
pub fn classify(err: &io::Error) -> IoClass {
    match err.kind() {
        io::ErrorKind::Interrupted => return IoClass::Interrupted,
        io::ErrorKind::WouldBlock => return IoClass::WouldBlock,
        _ => {}
    }
    match err.raw_os_error() {
        Some(libc::EBADF) => IoClass::Invalidated,
        Some(
            libc::ECONNRESET
            | libc::ECONNABORTED
            | libc::EPIPE
            | libc::ETIMEDOUT
            | libc::ENOTCONN
            | libc::EHOSTUNREACH
            | libc::ENETUNREACH
            | libc::ENETDOWN
            | libc::ESHUTDOWN,
        ) => IoClass::PeerGone,
        _ => match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof => IoClass::PeerGone,
            _ => IoClass::Fatal,
        },
    }
}

/// Run `op` until it returns something other than EINTR.
pub fn retry_interrupted<T, F>(mut op: F) -> io::Result<T>
where
    F: FnMut() -> io::Result<T>,
{
    loop {
        match op() {
            Err(e) if classify(&e) == IoClass::Interrupted => continue,
            other => return other,
        }
    }
}

/// Turn a libc `-1` return into an `io::Error`
#[inline]
pub(crate) fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_classify() {
        let os = io::Error::from_raw_os_error;
        assert_eq!(classify(&os(libc::EINTR)), IoClass::Interrupted);
        assert_eq!(classify(&os(libc::EAGAIN)), IoClass::WouldBlock);
        assert_eq!(classify(&os(libc::ECONNRESET)), IoClass::PeerGone);
        assert_eq!(classify(&os(libc::EPIPE)), IoClass::PeerGone);
        assert_eq!(classify(&os(libc::ETIMEDOUT)), IoClass::PeerGone);
        assert_eq!(classify(&os(libc::EBADF)), IoClass::Invalidated);
        assert_eq!(classify(&os(libc::EINVAL)), IoClass::Fatal);
        assert_eq!(
            classify(&io::Error::new(io::ErrorKind::BrokenPipe, "x")),
            IoClass::PeerGone
        );
    }

    #[test]
    fn test_retry_interrupted() {
        let calls = Cell::new(0);
        let out = retry_interrupted(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(io::Error::from_raw_os_error(libc::EINTR))
            } else {
                Ok(7)
            }
        });
        assert_eq!(out.unwrap(), 7);
        assert_eq!(calls.get(), 3);

        let err = retry_interrupted(|| -> io::Result<()> {
            Err(io::Error::from_raw_os_error(libc::EAGAIN))
        })
        .unwrap_err();
        assert_eq!(classify(&err), IoClass::WouldBlock);
    }
}
