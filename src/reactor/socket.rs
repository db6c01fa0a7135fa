//! Socket-level syscalls: status flags, listener validation and `accept4`.

use crate::error::{Error, Result};

use libc::{
    AF_INET, AF_INET6, AF_UNIX, F_GETFD, F_GETFL, F_SETFD, F_SETFL, FD_CLOEXEC, O_NONBLOCK,
    SO_ACCEPTCONN, SO_DOMAIN, SO_ERROR, SO_TYPE, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_STREAM,
    SOL_SOCKET, c_int, fcntl, sockaddr, sockaddr_in, sockaddr_in6, sockaddr_storage, socklen_t,
};
use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

/// Forces `O_NONBLOCK` on `fd`.
///
/// Both the read and the write of the status flags must succeed; a descriptor
/// that fails either step must not be registered.
pub fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(Error::DescriptorConfig {
            fd,
            source: io::Error::last_os_error(),
        });
    }

    if unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) } < 0 {
        return Err(Error::DescriptorConfig {
            fd,
            source: io::Error::last_os_error(),
        });
    }

    Ok(())
}

/// Returns whether `O_NONBLOCK` is set on `fd`.
pub fn is_nonblocking(fd: RawFd) -> io::Result<bool> {
    let flags = cvt(unsafe { fcntl(fd, F_GETFL) })?;

    Ok(flags & O_NONBLOCK != 0)
}

pub(crate) fn set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = cvt(unsafe { fcntl(fd, F_GETFD) })?;
    if flags & FD_CLOEXEC == 0 {
        cvt(unsafe { fcntl(fd, F_SETFD, flags | FD_CLOEXEC) })?;
    }

    Ok(())
}

/// Checks that `fd` is an internet or unix stream socket in listening state.
pub fn validate_listener(fd: RawFd) -> Result<()> {
    let invalid = |reason: String| Error::InvalidDescriptor { fd, reason };

    let socket_type = getsockopt_int(fd, SO_TYPE).map_err(|err| invalid(err.to_string()))?;
    if socket_type != SOCK_STREAM {
        return Err(invalid("not a stream socket".into()));
    }

    let domain = getsockopt_int(fd, SO_DOMAIN).map_err(|err| invalid(err.to_string()))?;
    if !matches!(domain, AF_INET | AF_INET6 | AF_UNIX) {
        return Err(invalid(format!("unsupported address family {domain}")));
    }

    let listening = getsockopt_int(fd, SO_ACCEPTCONN).map_err(|err| invalid(err.to_string()))?;
    if listening == 0 {
        return Err(invalid("socket is not listening".into()));
    }

    Ok(())
}

/// Accepts one pending connection without blocking.
///
/// The new descriptor is created non-blocking and close-on-exec. The peer
/// address is only reported for internet sockets.
pub(crate) fn accept_connection(listener: RawFd) -> io::Result<(OwnedFd, Option<SocketAddr>)> {
    let mut storage: sockaddr_storage = unsafe { mem::zeroed() };
    let mut length = mem::size_of::<sockaddr_storage>() as socklen_t;

    let fd = unsafe {
        libc::accept4(
            listener,
            &mut storage as *mut _ as *mut sockaddr,
            &mut length,
            SOCK_NONBLOCK | SOCK_CLOEXEC,
        )
    };

    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let connection = unsafe { OwnedFd::from_raw_fd(fd) };

    Ok((connection, sockaddr_to_socketaddr(&storage)))
}

/// Reads and clears the pending socket error, if any.
pub(crate) fn take_error(fd: RawFd) -> io::Result<Option<io::Error>> {
    let code = getsockopt_int(fd, SO_ERROR)?;

    if code == 0 {
        Ok(None)
    } else {
        Ok(Some(io::Error::from_raw_os_error(code)))
    }
}

fn getsockopt_int(fd: RawFd, option: c_int) -> io::Result<c_int> {
    let mut value: c_int = 0;
    let mut length = mem::size_of::<c_int>() as socklen_t;

    cvt(unsafe {
        libc::getsockopt(
            fd,
            SOL_SOCKET,
            option,
            &mut value as *mut _ as *mut libc::c_void,
            &mut length,
        )
    })?;

    Ok(value)
}

fn sockaddr_to_socketaddr(storage: &sockaddr_storage) -> Option<SocketAddr> {
    match storage.ss_family as c_int {
        AF_INET => {
            let address = unsafe { &*(storage as *const _ as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(address.sin_addr.s_addr));

            Some(SocketAddr::V4(SocketAddrV4::new(
                ip,
                u16::from_be(address.sin_port),
            )))
        }
        AF_INET6 => {
            let address = unsafe { &*(storage as *const _ as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(address.sin6_addr.s6_addr);

            Some(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(address.sin6_port),
                address.sin6_flowinfo,
                address.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

pub(crate) fn cvt(ret: c_int) -> io::Result<c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}
