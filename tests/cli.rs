// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Smoke tests for the installed binary: argument handling, serving a
//! connection, and clean termination on SIGTERM.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Ports are per-test to keep parallel test runs from colliding.
fn test_port(salt: u16) -> u16 {
    40000 + (std::process::id() as u16 % 20000) + salt
}

fn spawn_server(port: u16) -> Child {
    Command::new(env!("CARGO_BIN_EXE_ringlogd"))
        .args(["-p", &port.to_string()])
        .spawn()
        .expect("spawn server binary")
}

/// Poll until the server accepts connections.
fn connect_with_retry(port: u16) -> TcpStream {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match TcpStream::connect(("127.0.0.1", port)) {
            Ok(stream) => return stream,
            Err(_) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => panic!("server never became reachable: {e}"),
        }
    }
}

fn terminate(child: &mut Child) -> std::process::ExitStatus {
    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).expect("deliver SIGTERM");
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(status) = child.try_wait().expect("poll child") {
            return status;
        }
        assert!(Instant::now() < deadline, "server ignored SIGTERM");
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn test_serves_a_connection_and_exits_cleanly_on_sigterm() {
    let port = test_port(0);
    let mut child = spawn_server(port);

    let mut stream = connect_with_retry(port);
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .expect("read timeout");
    stream.write_all(b"smoke\n").expect("send");
    stream.shutdown(Shutdown::Write).expect("half-close");
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).expect("receive");
    assert_eq!(reply, b"smoke\n");

    let status = terminate(&mut child);
    assert!(status.success(), "exit status {status:?}");
}

#[test]
fn test_sigterm_while_idle_exits_zero() {
    let port = test_port(1);
    let mut child = spawn_server(port);
    let _ = connect_with_retry(port);

    let status = terminate(&mut child);
    assert!(status.success(), "exit status {status:?}");
}

#[test]
fn test_rejects_invalid_port_argument() {
    let output = Command::new(env!("CARGO_BIN_EXE_ringlogd"))
        .args(["-p", "notaport"])
        .output()
        .expect("run server binary");
    assert!(!output.status.success());
}
