//! Thin wrappers around the socket and `select(2)` calls the dispatcher
//! needs. Everything here works on raw file descriptors; ownership is
//! tracked one level up, in [`crate::Source`].

use libc::{c_int, c_void, socklen_t};
use std::io;
use std::mem::{self, MaybeUninit};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

pub trait IsMinusOne {
    fn is_minus_one(&self) -> bool;
}

macro_rules! impl_is_minus_one {
    ($($t:ident)*) => ($(impl IsMinusOne for $t {
        fn is_minus_one(&self) -> bool {
            *self == -1
        }
    })*)
}

impl_is_minus_one! { i8 i16 i32 i64 isize }

pub fn cvt<T: IsMinusOne>(t: T) -> io::Result<T> {
    if t.is_minus_one() {
        Err(io::Error::last_os_error())
    } else {
        Ok(t)
    }
}

fn max_len() -> usize {
    // macOS rejects reads and writes of INT_MAX bytes or more.
    if cfg!(target_os = "macos") {
        <c_int>::max_value() as usize - 1
    } else {
        <libc::ssize_t>::max_value() as usize
    }
}

pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    unsafe {
        let previous = cvt(libc::fcntl(fd, libc::F_GETFL))?;
        if previous & libc::O_NONBLOCK == 0 {
            cvt(libc::fcntl(fd, libc::F_SETFL, previous | libc::O_NONBLOCK))?;
        }
    }
    Ok(())
}

pub fn set_cloexec(fd: RawFd) -> io::Result<()> {
    unsafe {
        let previous = cvt(libc::fcntl(fd, libc::F_GETFD))?;
        if previous & libc::FD_CLOEXEC == 0 {
            cvt(libc::fcntl(fd, libc::F_SETFD, previous | libc::FD_CLOEXEC))?;
        }
    }
    Ok(())
}

/// `read(2)`. Zero means end of stream; a descriptor with nothing to read
/// yields `ErrorKind::WouldBlock`.
pub fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let ret = cvt(unsafe {
        libc::read(
            fd,
            buf.as_mut_ptr() as *mut c_void,
            std::cmp::min(buf.len(), max_len()),
        )
    })?;
    Ok(ret as usize)
}

pub fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let ret = cvt(unsafe {
        libc::write(
            fd,
            buf.as_ptr() as *const c_void,
            std::cmp::min(buf.len(), max_len()),
        )
    })?;
    Ok(ret as usize)
}

pub fn close(fd: RawFd) -> io::Result<()> {
    cvt(unsafe { libc::close(fd) })?;
    Ok(())
}

fn socket(family: c_int) -> io::Result<RawFd> {
    let fd = cvt(unsafe { libc::socket(family, libc::SOCK_STREAM, 0) })?;
    if let Err(e) = set_nonblocking(fd).and_then(|_| set_cloexec(fd)) {
        let _ = close(fd);
        return Err(e);
    }
    Ok(fd)
}

/// Start a non-blocking connect.
///
/// Returns the new descriptor and whether the connection is still in
/// progress, in which case the caller waits for the descriptor to become
/// writable and then checks [`take_socket_error`].
pub fn connect_nonblocking(addr: &SocketAddr) -> io::Result<(RawFd, bool)> {
    let family = match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };
    let fd = socket(family)?;
    let (storage, len) = sockaddr_from(addr);
    let ret = unsafe { libc::connect(fd, &storage as *const _ as *const libc::sockaddr, len) };
    if ret == 0 {
        return Ok((fd, false));
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EINPROGRESS) | Some(libc::EALREADY) | Some(libc::EINTR) => Ok((fd, true)),
        _ if err.kind() == io::ErrorKind::WouldBlock => Ok((fd, true)),
        _ => {
            let _ = close(fd);
            Err(err)
        }
    }
}

/// Fetch and clear the pending error of a socket (`SO_ERROR`).
pub fn take_socket_error(fd: RawFd) -> io::Result<Option<io::Error>> {
    let mut val: c_int = 0;
    let mut len = mem::size_of::<c_int>() as socklen_t;
    cvt(unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut val as *mut c_int as *mut c_void,
            &mut len,
        )
    })?;
    if val == 0 {
        Ok(None)
    } else {
        Ok(Some(io::Error::from_raw_os_error(val)))
    }
}

/// Accept a connection; the new descriptor is already non-blocking and
/// close-on-exec.
pub fn accept(fd: RawFd) -> io::Result<(RawFd, SocketAddr)> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as socklen_t;
    let conn = cvt(unsafe {
        libc::accept(
            fd,
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
        )
    })?;
    let prepared = set_nonblocking(conn)
        .and_then(|_| set_cloexec(conn))
        .and_then(|_| sockaddr_to(&storage));
    match prepared {
        Ok(addr) => Ok((conn, addr)),
        Err(e) => {
            let _ = close(conn);
            Err(e)
        }
    }
}

pub fn listen(fd: RawFd, queue: i32) -> io::Result<()> {
    cvt(unsafe { libc::listen(fd, queue) })?;
    Ok(())
}

/// Create a non-blocking IPv4 socket listening on `port` of every interface.
pub fn bind_and_listen(port: u16, queue: i32) -> io::Result<RawFd> {
    let fd = socket(libc::AF_INET)?;
    let setup = || -> io::Result<()> {
        let on: c_int = 1;
        cvt(unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &on as *const c_int as *const c_void,
                mem::size_of::<c_int>() as socklen_t,
            )
        })?;
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        let (storage, len) = sockaddr_from(&addr);
        cvt(unsafe { libc::bind(fd, &storage as *const _ as *const libc::sockaddr, len) })?;
        listen(fd, queue)
    };
    match setup() {
        Ok(()) => Ok(fd),
        Err(e) => {
            let _ = close(fd);
            Err(e)
        }
    }
}

pub fn local_addr(fd: RawFd) -> io::Result<SocketAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as socklen_t;
    cvt(unsafe { libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) })?;
    sockaddr_to(&storage)
}

/// A connected pair of non-blocking unix stream sockets.
pub fn socketpair() -> io::Result<(RawFd, RawFd)> {
    let mut fds: [c_int; 2] = [-1, -1];
    cvt(unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) })?;
    for &fd in &fds {
        if let Err(e) = set_nonblocking(fd).and_then(|_| set_cloexec(fd)) {
            let _ = close(fds[0]);
            let _ = close(fds[1]);
            return Err(e);
        }
    }
    Ok((fds[0], fds[1]))
}

fn sockaddr_from(addr: &SocketAddr) -> (libc::sockaddr_storage, socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(a) => {
            let sin = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in) };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = a.port().to_be();
            sin.sin_addr.s_addr = u32::from_ne_bytes(a.ip().octets());
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(a) => {
            let sin6 = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in6) };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = a.port().to_be();
            sin6.sin6_addr.s6_addr = a.ip().octets();
            sin6.sin6_flowinfo = a.flowinfo();
            sin6.sin6_scope_id = a.scope_id();
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as socklen_t)
}

fn sockaddr_to(storage: &libc::sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as c_int {
        libc::AF_INET => {
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
            Ok(SocketAddr::V4(SocketAddrV4::new(
                ip,
                u16::from_be(sin.sin_port),
            )))
        }
        libc::AF_INET6 => {
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            Ok(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "unsupported address family",
        )),
    }
}

/// A `fd_set` for [`select`].
#[derive(Clone, Copy)]
pub struct FdSet {
    set: libc::fd_set,
    max: RawFd,
}

impl FdSet {
    pub fn new() -> Self {
        let mut set = MaybeUninit::<libc::fd_set>::uninit();
        unsafe {
            libc::FD_ZERO(set.as_mut_ptr());
            FdSet {
                set: set.assume_init(),
                max: -1,
            }
        }
    }

    pub fn insert(&mut self, fd: RawFd) -> io::Result<()> {
        if fd < 0 || fd as usize >= libc::FD_SETSIZE as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("fd {} cannot be used with select", fd),
            ));
        }
        unsafe { libc::FD_SET(fd, &mut self.set) };
        self.max = self.max.max(fd);
        Ok(())
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        fd >= 0 && (fd as usize) < libc::FD_SETSIZE as usize && unsafe { libc::FD_ISSET(fd, &self.set) }
    }

    pub fn is_empty(&self) -> bool {
        self.max < 0
    }
}

impl Default for FdSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait until a descriptor in one of the sets is ready or `timeout` passes.
///
/// `None` blocks indefinitely. On return the sets hold only the ready
/// descriptors. Interrupted calls are retried with the same timeout.
pub fn select(
    read: &mut FdSet,
    write: &mut FdSet,
    except: &mut FdSet,
    timeout: Option<Duration>,
) -> io::Result<usize> {
    let nfds = read.max.max(write.max).max(except.max) + 1;
    loop {
        let (mut r, mut w, mut e) = (*read, *write, *except);
        let mut tv = timeout.map(|t| libc::timeval {
            tv_sec: t.as_secs().min(libc::time_t::max_value() as u64) as libc::time_t,
            tv_usec: t.subsec_micros() as libc::suseconds_t,
        });
        let tvp = tv
            .as_mut()
            .map_or(ptr::null_mut(), |tv| tv as *mut libc::timeval);
        match cvt(unsafe { libc::select(nfds, &mut r.set, &mut w.set, &mut e.set, tvp) }) {
            Ok(n) => {
                *read = r;
                *write = w;
                *except = e;
                return Ok(n as usize);
            }
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socketpair_read_write() {
        let (a, b) = socketpair().unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(
            read(a, &mut buf).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
        assert_eq!(write(b, b"ping").unwrap(), 4);
        assert_eq!(read(a, &mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"ping");
        close(b).unwrap();
        assert_eq!(read(a, &mut buf).unwrap(), 0);
        close(a).unwrap();
    }

    #[test]
    fn test_select_timeout_and_ready() {
        let (a, b) = socketpair().unwrap();
        let mut r = FdSet::new();
        r.insert(a).unwrap();
        let (mut w, mut e) = (FdSet::new(), FdSet::new());
        let n = select(&mut r, &mut w, &mut e, Some(Duration::from_millis(10))).unwrap();
        assert_eq!(n, 0);
        assert!(!r.contains(a));

        write(b, b"x").unwrap();
        let mut r = FdSet::new();
        r.insert(a).unwrap();
        let n = select(&mut r, &mut w, &mut e, Some(Duration::from_secs(1))).unwrap();
        assert_eq!(n, 1);
        assert!(r.contains(a));
        close(a).unwrap();
        close(b).unwrap();
    }

    #[test]
    fn test_fdset_rejects_negative() {
        assert!(FdSet::new().insert(-1).is_err());
        assert!(FdSet::new().is_empty());
    }

    #[test]
    fn test_listen_accept_connect() {
        let listener = bind_and_listen(0, 5).unwrap();
        let port = local_addr(listener).unwrap().port();
        assert_ne!(port, 0);

        let target = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
        let (client, _in_progress) = connect_nonblocking(&target).unwrap();

        let mut r = FdSet::new();
        r.insert(listener).unwrap();
        let (mut w, mut e) = (FdSet::new(), FdSet::new());
        select(&mut r, &mut w, &mut e, Some(Duration::from_secs(5))).unwrap();
        let (conn, peer) = accept(listener).unwrap();
        assert!(peer.ip().is_loopback());

        let mut r = FdSet::new();
        let mut w = FdSet::new();
        w.insert(client).unwrap();
        select(&mut r, &mut w, &mut e, Some(Duration::from_secs(5))).unwrap();
        assert!(take_socket_error(client).unwrap().is_none());

        for fd in [conn, client, listener] {
            close(fd).unwrap();
        }
    }
}
