//! Per-core readiness registry (epoll)
//!
//! One `Poller` per reactor core. Connections are registered edge-triggered
//! and one-shot (`EPOLLIN | EPOLLET | EPOLLONESHOT`): after one delivery the
//! registration stays but is disarmed until [`Poller::rearm`]. That is what
//! guarantees a single data worker per connection at a time.
//!
//! Each poller also owns an eventfd registered level-triggered under
//! [`WAKE_TOKEN`], so shutdown can interrupt a wait with no timeout.

use crate::io::{cvt, retry_interrupted};

use rookery_core::{ConnId, CoreId};

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Token of the wake eventfd. Never a valid [`ConnId`] token since the
/// arena never hands out index `u32::MAX`.
pub const WAKE_TOKEN: u64 = u64::MAX;

const CONN_INTEREST: u32 = (libc::EPOLLIN | libc::EPOLLET | libc::EPOLLONESHOT) as u32;
const READ_READY: u32 =
    (libc::EPOLLIN | libc::EPOLLHUP | libc::EPOLLERR | libc::EPOLLRDHUP) as u32;

/// Readiness registry bound to one reactor core
#[derive(Debug)]
pub struct Poller {
    core: CoreId,
    epfd: OwnedFd,
    wake: OwnedFd,
}

impl Poller {
    /// Create the registry. `hint` is passed to `epoll_create` (the kernel
    /// ignores it beyond being positive).
    pub fn new(core: CoreId, hint: usize) -> io::Result<Self> {
        let size = hint.clamp(1, i32::MAX as usize) as libc::c_int;
        // SAFETY: plain syscall, result checked
        let raw = cvt(unsafe { libc::epoll_create(size) })?;
        // SAFETY: fresh descriptor we own
        let epfd = unsafe { OwnedFd::from_raw_fd(raw) };
        // epoll_create has no flags argument
        // SAFETY: valid fd
        cvt(unsafe { libc::fcntl(epfd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) })?;

        // SAFETY: plain syscall, result checked
        let raw = cvt(unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) })?;
        // SAFETY: fresh descriptor we own
        let wake = unsafe { OwnedFd::from_raw_fd(raw) };

        let poller = Self { core, epfd, wake };
        poller.ctl(
            libc::EPOLL_CTL_ADD,
            poller.wake.as_raw_fd(),
            libc::EPOLLIN as u32,
            WAKE_TOKEN,
        )?;
        Ok(poller)
    }

    #[inline]
    pub fn core(&self) -> CoreId {
        self.core
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32, token: u64) -> io::Result<()> {
        let mut ev = libc::epoll_event { events, u64: token };
        // SAFETY: ev outlives the call; fds are checked by the kernel
        cvt(unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut ev) })?;
        Ok(())
    }

    /// Register `fd` for one edge-triggered read notification.
    pub fn register(&self, fd: RawFd, id: ConnId) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, CONN_INTEREST, id.to_token())
    }

    /// Arm `fd` for the next notification.
    pub fn rearm(&self, fd: RawFd, id: ConnId) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, CONN_INTEREST, id.to_token())
    }

    /// Remove `fd`. Must run before the socket is closed.
    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        // Non-null event for pre-2.6.9 kernels
        self.ctl(libc::EPOLL_CTL_DEL, fd, 0, 0)
    }

    /// Wait for readiness. `None` blocks indefinitely. EINTR is returned
    /// to the caller as an `Interrupted` error.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = match timeout {
            None => -1,
            Some(d) => d.as_millis().min(i32::MAX as u128) as libc::c_int,
        };
        events.len = 0;
        // SAFETY: every entry of `buf` is initialised
        let n = unsafe {
            libc::epoll_wait(
                self.epfd.as_raw_fd(),
                events.buf.as_mut_ptr(),
                events.buf.len() as libc::c_int,
                timeout_ms,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        events.len = n as usize;
        Ok(events.len)
    }

    /// Interrupt a blocked [`wait`](Self::wait). Coalesces.
    pub fn wake(&self) -> io::Result<()> {
        let val: u64 = 1;
        let ret = retry_interrupted(|| {
            // SAFETY: writes 8 bytes from a live u64
            let n = unsafe {
                libc::write(
                    self.wake.as_raw_fd(),
                    &val as *const u64 as *const libc::c_void,
                    std::mem::size_of::<u64>(),
                )
            };
            if n < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        });
        match ret {
            // Counter saturated: a wake is already pending
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            other => other,
        }
    }

    /// Consume pending wakes so the next wait blocks again.
    pub fn reset_wake(&self) {
        let mut val: u64 = 0;
        // SAFETY: reads 8 bytes into a live u64; EAGAIN just means nothing pending
        unsafe {
            libc::read(
                self.wake.as_raw_fd(),
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }
}

/// Event buffer reused across waits
pub struct Events {
    buf: Box<[libc::epoll_event]>,
    len: usize,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, i32::MAX as usize);
        Self {
            buf: (0..capacity)
                .map(|_| libc::epoll_event { events: 0, u64: 0 })
                .collect(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.buf[..self.len].iter().map(|ev| Event {
            // copy out of the packed struct
            events: ev.events,
            token: ev.u64,
        })
    }
}

/// One readiness notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    events: u32,
    token: u64,
}

impl Event {
    /// Readable, or closed/errored (a read will not block and reports it)
    #[inline]
    pub fn is_readable(&self) -> bool {
        self.events & READ_READY != 0
    }

    #[inline]
    pub fn is_wake(&self) -> bool {
        self.token == WAKE_TOKEN
    }

    #[inline]
    pub fn conn_id(&self) -> ConnId {
        ConnId::from_token(self.token)
    }

    #[inline]
    pub fn raw_events(&self) -> u32 {
        self.events
    }
}

#[cfg(test)]
impl Poller {
    /// Point the epoll descriptor at /dev/null so every `epoll_ctl` fails
    pub(crate) fn break_registry(&self) {
        let null = std::fs::File::open("/dev/null").unwrap();
        // SAFETY: both descriptors are live; dup2 replaces the target in place
        let rc = unsafe { libc::dup2(null.as_raw_fd(), self.epfd.as_raw_fd()) };
        assert!(rc >= 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;
    use std::thread;

    fn pair() -> (TcpStream, TcpStream) {
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(l.local_addr().unwrap()).unwrap();
        let (server, _) = l.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (client, server)
    }

    #[test]
    fn test_oneshot_delivers_once_until_rearm() {
        let poller = Poller::new(CoreId::new(0), 16).unwrap();
        let mut events = Events::with_capacity(8);
        let (mut client, server) = pair();
        let id = ConnId::new(3, 9);
        poller.register(server.as_raw_fd(), id).unwrap();

        client.write_all(b"ping").unwrap();
        let n = poller.wait(&mut events, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(n, 1);
        let ev = events.iter().next().unwrap();
        assert!(ev.is_readable());
        assert!(!ev.is_wake());
        assert_eq!(ev.conn_id(), id);

        // Data still unread, but the registration is disarmed.
        client.write_all(b"more").unwrap();
        let n = poller.wait(&mut events, Some(Duration::from_millis(50))).unwrap();
        assert_eq!(n, 0);

        poller.rearm(server.as_raw_fd(), id).unwrap();
        let n = poller.wait(&mut events, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(n, 1);
        assert_eq!(events.iter().next().unwrap().conn_id(), id);

        poller.deregister(server.as_raw_fd()).unwrap();
        assert!(poller.rearm(server.as_raw_fd(), id).is_err());
    }

    #[test]
    fn test_peer_close_is_readable() {
        let poller = Poller::new(CoreId::new(0), 1).unwrap();
        let mut events = Events::with_capacity(4);
        let (client, server) = pair();
        poller.register(server.as_raw_fd(), ConnId::new(0, 0)).unwrap();
        drop(client);

        let n = poller.wait(&mut events, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(n, 1);
        assert!(events.iter().next().unwrap().is_readable());
    }

    #[test]
    fn test_wake_interrupts_blocking_wait() {
        let poller = Arc::new(Poller::new(CoreId::new(1), 1).unwrap());
        let waiter = {
            let poller = Arc::clone(&poller);
            thread::spawn(move || {
                let mut events = Events::with_capacity(4);
                poller.wait(&mut events, None).unwrap();
                let woke = events.iter().any(|e| e.is_wake());
                woke
            })
        };
        thread::sleep(Duration::from_millis(50));
        poller.wake().unwrap();
        poller.wake().unwrap();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_register_invalid_fd_fails() {
        let poller = Poller::new(CoreId::new(0), 1).unwrap();
        let err = poller.register(-1, ConnId::new(0, 0)).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }

    #[test]
    fn test_wake_token_never_collides() {
        assert_ne!(ConnId::new(0, u32::MAX).to_token(), WAKE_TOKEN);
        assert!(ConnId::from_token(WAKE_TOKEN).index() as usize
            >= rookery_core::ConnArena::<()>::new().limit());
    }
}
