//! File read/write completions through POSIX AIO on the select backend.

mod common;

use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::time::Duration;

use asyncport::{test_complete, test_phase, Overlapped, SocketKind};
use common::*;

const WAIT: Duration = Duration::from_secs(5);

fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

fn temp_path(tag: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("asyncport-{tag}-{}", std::process::id()));
    path
}

#[test]
fn file_write_then_read_round_trips() {
    init_test("file_write_then_read_round_trips");
    let path = temp_path("roundtrip");
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .expect("open temp file");
    let fd = file.as_raw_fd();

    let ports = select_ports();
    let port = ports
        .create_io_completion_port(Some(fd), None, 21, SocketKind::File)
        .expect("associate file");

    let wctx = Overlapped::with_offset(0);
    ports
        .write_file(fd, b"completion".to_vec(), &wctx)
        .expect("write initiated");
    let written = ports
        .get_queued_completion_status(port, Some(WAIT))
        .expect("write completion");
    assert!(written.is_success(), "write failed: {:?}", written.error());
    assert_eq!(written.bytes, 10);
    assert_eq!(written.key, 21);

    let rctx = Overlapped::with_offset(0);
    ports
        .read_file(fd, vec![0u8; 32], &rctx)
        .expect("read initiated");
    let read = ports
        .get_queued_completion_status(port, Some(WAIT))
        .expect("read completion");
    assert!(read.is_success(), "read failed: {:?}", read.error());
    assert_eq!(read.bytes, 10);
    assert_eq!(read.overlapped.take_buffer().expect("data"), b"completion");

    ports.close_handle(port).expect("close");
    drop(file);
    let _ = std::fs::remove_file(&path);
    test_complete!("file_write_then_read_round_trips");
}

#[test]
fn file_read_honors_the_overlapped_offset() {
    init_test("file_read_honors_the_overlapped_offset");
    let path = temp_path("offset");
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .expect("open temp file");
    let fd = file.as_raw_fd();

    let ports = select_ports();
    let port = ports
        .create_io_completion_port(Some(fd), None, 0, SocketKind::File)
        .expect("associate file");

    let wctx = Overlapped::with_offset(0);
    ports
        .write_file(fd, b"0123456789".to_vec(), &wctx)
        .expect("write initiated");
    assert!(ports
        .get_queued_completion_status(port, Some(WAIT))
        .expect("write completion")
        .is_success());

    // Read the tail of the file starting at byte four.
    let rctx = Overlapped::with_offset(4);
    ports
        .read_file(fd, vec![0u8; 16], &rctx)
        .expect("read initiated");
    let read = ports
        .get_queued_completion_status(port, Some(WAIT))
        .expect("read completion");
    assert!(read.is_success(), "read failed: {:?}", read.error());
    assert_eq!(read.bytes, 6);
    assert_eq!(read.overlapped.take_buffer().expect("data"), b"456789");

    ports.close_handle(port).expect("close");
    drop(file);
    let _ = std::fs::remove_file(&path);
    test_complete!("file_read_honors_the_overlapped_offset");
}
