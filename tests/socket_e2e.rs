//! End-to-end socket flows over localhost on the select backend.

mod common;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, FromRawFd};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use asyncport::{test_complete, test_phase, ErrorKind, Overlapped, SocketKind};
use common::*;

const WAIT: Duration = Duration::from_secs(5);

fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

#[test]
fn accept_completes_when_client_connects() {
    init_test("accept_completes_when_client_connects");
    let ports = select_ports();
    let (listener, addr) = localhost_listener();
    let lfd = listener.as_raw_fd();
    let port = ports
        .create_io_completion_port(Some(lfd), None, 77, SocketKind::Tcp)
        .expect("associate listener");

    let ctx = Overlapped::new();
    ports.accept_ex(lfd, &ctx).expect("accept initiated");

    let client = TcpStream::connect(addr).expect("connect");
    let done = ports
        .get_queued_completion_status(port, Some(WAIT))
        .expect("accept completion");
    assert!(done.is_success(), "accept failed: {:?}", done.error());
    assert_eq!(done.key, 77);
    assert!(Arc::ptr_eq(&done.overlapped, &ctx));

    let accepted = done.overlapped.take_accepted().expect("accepted fd");
    let peer = done.overlapped.peer().expect("peer recorded");
    assert_eq!(peer, client.local_addr().expect("client addr"));

    // Prove the accepted descriptor is a live socket.
    let mut server_side = unsafe { TcpStream::from_raw_fd(accepted) };
    server_side.write_all(b"hi").expect("write via accepted fd");
    let mut buf = [0u8; 2];
    let mut client_reader = client;
    client_reader.read_exact(&mut buf).expect("client read");
    assert_eq!(&buf, b"hi");

    ports.close_handle(port).expect("close");
    test_complete!("accept_completes_when_client_connects");
}

#[test]
fn connect_completes_against_listening_peer() {
    init_test("connect_completes_against_listening_peer");
    let ports = select_ports();
    let (listener, addr) = localhost_listener();

    let fd = raw_tcp_socket();
    let port = ports
        .create_io_completion_port(Some(fd), None, 5, SocketKind::Tcp)
        .expect("associate");
    let ctx = Overlapped::new();
    ports.connect_ex(fd, addr, &ctx).expect("connect initiated");

    let done = ports
        .get_queued_completion_status(port, Some(WAIT))
        .expect("connect completion");
    assert!(done.is_success(), "connect failed: {:?}", done.error());
    assert_eq!(done.key, 5);

    let (mut server_side, _) = listener.accept().expect("server accept");

    // The established socket carries data in both directions.
    let sctx = Overlapped::new();
    ports
        .wsa_send(fd, b"ping".to_vec(), &sctx)
        .expect("send initiated");
    let sent = ports
        .get_queued_completion_status(port, Some(WAIT))
        .expect("send completion");
    assert_eq!(sent.bytes, 4);
    let mut buf = [0u8; 4];
    server_side.read_exact(&mut buf).expect("server read");
    assert_eq!(&buf, b"ping");

    ports.cancel_io(fd, None).expect("unregister");
    ports.close_handle(port).expect("close");
    close_raw(fd);
    test_complete!("connect_completes_against_listening_peer");
}

#[test]
fn recv_parks_until_data_then_completes() {
    init_test("recv_parks_until_data_then_completes");
    let ports = select_ports();
    let (listener, addr) = localhost_listener();
    let client = TcpStream::connect(addr).expect("connect");
    let (mut server_side, _) = listener.accept().expect("accept");
    let cfd = client.as_raw_fd();
    let port = ports
        .create_io_completion_port(Some(cfd), None, 3, SocketKind::Tcp)
        .expect("associate");

    let rctx = Overlapped::new();
    ports
        .wsa_recv(cfd, vec![0u8; 64], &rctx)
        .expect("recv initiated");

    // Nothing to read yet; the operation stays parked.
    let err = ports
        .get_queued_completion_status(port, Some(Duration::from_millis(150)))
        .expect_err("no data yet");
    assert_eq!(err.kind(), ErrorKind::TimedOut);

    server_side.write_all(b"hello").expect("peer write");
    let done = ports
        .get_queued_completion_status(port, Some(WAIT))
        .expect("recv completion");
    assert!(done.is_success());
    assert_eq!(done.bytes, 5);
    let buffer = done.overlapped.take_buffer().expect("filled buffer");
    assert_eq!(buffer, b"hello");

    ports.close_handle(port).expect("close");
    test_complete!("recv_parks_until_data_then_completes");
}

#[test]
fn socket_failure_fans_out_to_every_pending_operation() {
    init_test("socket_failure_fans_out_to_every_pending_operation");
    let ports = select_ports();
    let (listener, addr) = localhost_listener();
    let client = TcpStream::connect(addr).expect("connect");
    let (server_side, _) = listener.accept().expect("accept");
    let cfd = client.as_raw_fd();
    let port = ports
        .create_io_completion_port(Some(cfd), None, 0, SocketKind::Tcp)
        .expect("associate");

    let contexts: Vec<_> = (0..3).map(|_| Overlapped::new()).collect();
    for ctx in &contexts {
        ports
            .wsa_recv(cfd, vec![0u8; 16], ctx)
            .expect("recv initiated");
    }
    thread::sleep(Duration::from_millis(100));

    // Reset the connection out from under the pending receives.
    set_linger_reset(server_side.as_raw_fd());
    drop(server_side);

    let mut errors = Vec::new();
    for _ in 0..3 {
        let done = ports
            .get_queued_completion_status(port, Some(WAIT))
            .expect("fan-out completion");
        assert_eq!(done.bytes, 0);
        assert_ne!(done.os_error, 0, "fan-out carries the socket error");
        errors.push(done.os_error);
    }
    assert!(
        errors.windows(2).all(|pair| pair[0] == pair[1]),
        "every pending operation gets the same code: {errors:?}"
    );

    // Exactly three: no phantom fourth completion.
    let err = ports
        .get_queued_completion_status(port, Some(Duration::from_millis(150)))
        .expect_err("queue drained");
    assert_eq!(err.kind(), ErrorKind::TimedOut);

    ports.close_handle(port).expect("close");
    test_complete!("socket_failure_fans_out_to_every_pending_operation");
}

#[test]
fn cancel_removes_only_the_matching_context() {
    init_test("cancel_removes_only_the_matching_context");
    let ports = select_ports();
    let (listener, addr) = localhost_listener();
    let client = TcpStream::connect(addr).expect("connect");
    let (mut server_side, _) = listener.accept().expect("accept");
    let cfd = client.as_raw_fd();
    let port = ports
        .create_io_completion_port(Some(cfd), None, 0, SocketKind::Tcp)
        .expect("associate");

    let first = Overlapped::new();
    let second = Overlapped::new();
    ports.wsa_recv(cfd, vec![0u8; 32], &first).expect("first");
    ports.wsa_recv(cfd, vec![0u8; 32], &second).expect("second");
    thread::sleep(Duration::from_millis(50));

    ports.cancel_io(cfd, Some(&first)).expect("selective cancel");

    server_side.write_all(b"abc").expect("peer write");
    let done = ports
        .get_queued_completion_status(port, Some(WAIT))
        .expect("surviving completion");
    assert!(
        Arc::ptr_eq(&done.overlapped, &second),
        "the cancelled context must not complete"
    );
    assert_eq!(done.bytes, 3);

    let err = ports
        .get_queued_completion_status(port, Some(Duration::from_millis(150)))
        .expect_err("nothing else pending");
    assert_eq!(err.kind(), ErrorKind::TimedOut);

    ports.close_handle(port).expect("close");
    test_complete!("cancel_removes_only_the_matching_context");
}

#[test]
fn udp_round_trip_records_peer() {
    init_test("udp_round_trip_records_peer");
    let ports = select_ports();
    let (ours, our_addr) = localhost_udp();
    let (theirs, their_addr) = localhost_udp();
    let fd = ours.as_raw_fd();
    let port = ports
        .create_io_completion_port(Some(fd), None, 8, SocketKind::Udp)
        .expect("associate");

    let rctx = Overlapped::new();
    ports
        .wsa_recv_from(fd, vec![0u8; 64], &rctx)
        .expect("recv_from initiated");
    theirs.send_to(b"ping", our_addr).expect("peer send");

    let done = ports
        .get_queued_completion_status(port, Some(WAIT))
        .expect("datagram completion");
    assert_eq!(done.bytes, 4);
    assert_eq!(done.overlapped.peer(), Some(their_addr));
    assert_eq!(done.overlapped.take_buffer().expect("payload"), b"ping");

    let sctx = Overlapped::new();
    ports
        .wsa_send_to(fd, b"pong".to_vec(), their_addr, &sctx)
        .expect("send_to initiated");
    let sent = ports
        .get_queued_completion_status(port, Some(WAIT))
        .expect("send completion");
    assert_eq!(sent.bytes, 4);

    let mut buf = [0u8; 8];
    let (n, from) = theirs.recv_from(&mut buf).expect("peer recv");
    assert_eq!(&buf[..n], b"pong");
    assert_eq!(from, our_addr);

    ports.close_handle(port).expect("close");
    test_complete!("udp_round_trip_records_peer");
}

#[test]
fn contract_violations_fail_synchronously() {
    init_test("contract_violations_fail_synchronously");
    let ports = select_ports();
    let (listener, _addr) = localhost_listener();
    let lfd = listener.as_raw_fd();
    let port = ports
        .create_io_completion_port(Some(lfd), None, 0, SocketKind::Tcp)
        .expect("associate");

    // Unregistered descriptor.
    let ctx = Overlapped::new();
    let err = ports
        .wsa_recv(9999, vec![0u8; 8], &ctx)
        .expect_err("unregistered");
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // Empty buffer.
    let err = ports
        .wsa_recv(lfd, Vec::new(), &ctx)
        .expect_err("empty buffer");
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    // File operation on a socket.
    let err = ports
        .read_file(lfd, vec![0u8; 8], &ctx)
        .expect_err("kind mismatch");
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    // Double association.
    let err = ports
        .create_io_completion_port(Some(lfd), Some(port), 0, SocketKind::Tcp)
        .expect_err("re-association");
    assert_eq!(err.kind(), ErrorKind::AlreadyAssociated);

    // No phantom state was left behind by any of the rejections.
    let timed_out = ports
        .get_queued_completion_status(port, Some(Duration::from_millis(100)))
        .expect_err("no completions");
    assert_eq!(timed_out.kind(), ErrorKind::TimedOut);

    ports.close_handle(port).expect("close");
    test_complete!("contract_violations_fail_synchronously");
}
