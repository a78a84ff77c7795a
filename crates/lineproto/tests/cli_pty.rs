//! End-to-end runs of the binary against a pseudo-terminal standing in for
//! a serial port.
#![cfg(all(target_os = "linux", feature = "cli"))]

use std::ffi::CStr;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::FromRawFd;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use lineproto::frame::{encode_frame, parse_packet, Address, LinkBuffer, Packet};

struct Pty {
    master: File,
    slave: PathBuf,
}

fn open_pty() -> Pty {
    // SAFETY: plain libc pty setup on a descriptor this function owns; the
    // name buffer outlives the `ptsname_r` call and is NUL-terminated by it.
    unsafe {
        let fd = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK);
        assert!(fd >= 0, "posix_openpt failed");
        assert_eq!(libc::grantpt(fd), 0, "grantpt failed");
        assert_eq!(libc::unlockpt(fd), 0, "unlockpt failed");
        let mut name = [0 as libc::c_char; 128];
        assert_eq!(libc::ptsname_r(fd, name.as_mut_ptr(), name.len()), 0);
        let slave = CStr::from_ptr(name.as_ptr()).to_string_lossy().into_owned();
        Pty {
            master: File::from_raw_fd(fd),
            slave: PathBuf::from(slave),
        }
    }
}

fn frame(dst: u8, src: u8, payload: &'static [u8]) -> BytesMut {
    let mut buf = BytesMut::new();
    let packet = Packet::new(
        Address::new(dst),
        Address::new(src),
        0,
        Bytes::from_static(payload),
    );
    encode_frame(&packet, &mut buf).unwrap();
    buf
}

#[test]
fn send_writes_frame_to_device() {
    let mut pty = open_pty();
    let mut child = Command::new(env!("CARGO_BIN_EXE_lineproto"))
        .arg("--log-level")
        .arg("error")
        .arg("send")
        .arg(&pty.slave)
        .args(["-a", "0x01", "--to", "0x02", "--data", "hello", "--linger", "1s"])
        .stdout(Stdio::null())
        .spawn()
        .expect("send should start");

    let mut buffer = LinkBuffer::new();
    let mut chunk = [0u8; 1024];
    let deadline = Instant::now() + Duration::from_secs(5);
    let packet = loop {
        if let Some(popped) = buffer.pop_frame(Instant::now()) {
            let packet = parse_packet(popped.packet).unwrap();
            if !packet.is_keepalive() {
                break packet;
            }
            continue;
        }
        assert!(Instant::now() < deadline, "no frame from lineproto send");
        match pty.master.read(&mut chunk) {
            Ok(n) if n > 0 => buffer.append(&chunk[..n], Instant::now()),
            // EIO until the child opens the slave; WouldBlock when idle.
            Ok(_) | Err(_) => thread::sleep(Duration::from_millis(20)),
        }
    };

    assert_eq!(packet.dst, Address::new(0x02));
    assert_eq!(packet.src, Address::new(0x01));
    assert_eq!(packet.hop, 0);
    assert_eq!(packet.payload.as_ref(), b"hello");

    let status = child.wait().expect("send should exit");
    assert!(status.success());
}

#[test]
fn serve_prints_delivered_packet() {
    let mut pty = open_pty();
    let mut child = Command::new(env!("CARGO_BIN_EXE_lineproto"))
        .arg("--log-level")
        .arg("error")
        .arg("--format")
        .arg("json")
        .arg("serve")
        .arg(&pty.slave)
        .args(["-a", "0x01", "--count", "1"])
        .stdout(Stdio::piped())
        .spawn()
        .expect("serve should start");

    // The device is flushed when opened, so keep offering the frame until
    // the node has taken it.
    let ping = frame(0x01, 0x02, b"ping");
    let deadline = Instant::now() + Duration::from_secs(5);
    let status = loop {
        if let Some(status) = child.try_wait().expect("child should be waitable") {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("serve did not exit after delivery");
        }
        let _ = pty.master.write_all(&ping);
        let mut drain = [0u8; 1024];
        let _ = pty.master.read(&mut drain);
        thread::sleep(Duration::from_millis(100));
    };

    assert!(status.success());
    let mut stdout = String::new();
    child
        .stdout
        .take()
        .expect("stdout is piped")
        .read_to_string(&mut stdout)
        .unwrap();
    assert!(stdout.contains("\"kind\":\"delivery\""));
    assert!(stdout.contains("\"src\":\"0x02\""));
    assert!(stdout.contains("\"payload\":\"ping\""));
}
