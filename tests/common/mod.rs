#![allow(dead_code)]

//! Shared helpers for the completion port integration tests.
//!
//! All suites run the select backend: it behaves identically on every
//! platform the tests run on and needs no signal-mask coordination with
//! the test harness.

use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::os::fd::RawFd;

use asyncport::{BackendKind, PortConfig, PortId, Ports, SocketKind};

pub use asyncport::test_utils::init_test_logging;

/// Builds a subsystem on the select backend.
pub fn select_ports() -> Ports {
    Ports::new(PortConfig::default().with_backend(BackendKind::Select)).expect("subsystem")
}

/// Creates a port with no associations.
pub fn bare_port(ports: &Ports) -> PortId {
    ports
        .create_io_completion_port(None, None, 0, SocketKind::Tcp)
        .expect("create port")
}

/// Binds a listener on an ephemeral localhost port.
pub fn localhost_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    (listener, addr)
}

/// Binds a UDP socket on an ephemeral localhost port.
pub fn localhost_udp() -> (UdpSocket, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("bind");
    let addr = socket.local_addr().expect("local addr");
    (socket, addr)
}

/// Creates a raw, unconnected IPv4 stream socket.
pub fn raw_tcp_socket() -> RawFd {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
    assert!(fd >= 0, "socket() failed");
    fd
}

/// Closes a raw descriptor.
pub fn close_raw(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Sets `SO_LINGER` to zero so dropping the socket sends a reset instead
/// of an orderly shutdown.
pub fn set_linger_reset(fd: RawFd) {
    let linger = libc::linger {
        l_onoff: 1,
        l_linger: 0,
    };
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            std::ptr::addr_of!(linger).cast(),
            std::mem::size_of::<libc::linger>() as libc::socklen_t,
        )
    };
    assert_eq!(rc, 0, "setsockopt(SO_LINGER) failed");
}
