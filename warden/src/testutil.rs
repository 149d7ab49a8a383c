//! Shared helpers for module tests: throwaway HTTP stubs standing in for the
//! backend's health endpoint, and millisecond-scale configs.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::Config;

/// Serve minimal HTTP responses with the given status line on an ephemeral
/// port. The task runs until dropped with the returned handle aborted, or
/// until the test ends.
pub(crate) async fn serve_health(status_line: &'static str) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(serve_on(listener, status_line));
    (port, handle)
}

/// Serve HTTP 200 on two adjacent ports, for ordering-sensitive scans.
pub(crate) async fn serve_health_pair() -> (u16, JoinHandle<()>, JoinHandle<()>) {
    for _ in 0..16 {
        let Ok(first) = TcpListener::bind("127.0.0.1:0").await else {
            continue;
        };
        let port = first.local_addr().unwrap().port();
        let Ok(second) = TcpListener::bind(("127.0.0.1", port + 1)).await else {
            continue;
        };
        return (
            port,
            tokio::spawn(serve_on(first, "200 OK")),
            tokio::spawn(serve_on(second, "200 OK")),
        );
    }
    panic!("could not find two adjacent free ports");
}

async fn serve_on(listener: TcpListener, status_line: &'static str) {
    loop {
        let Ok((mut stream, _)) = listener.accept().await else {
            break;
        };
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        });
    }
}

/// Accept connections but never answer, to exercise probe timeouts.
pub(crate) async fn serve_silent() -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    (port, handle)
}

/// An ephemeral port with nothing listening on it (freed before return, so
/// strictly best-effort).
pub(crate) fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// A config with millisecond budgets so supervisor paths finish fast, and a
/// backend command that can never spawn (tests that need a real child swap
/// their own in).
pub(crate) fn test_config(start: u16, end: u16) -> Config {
    Config {
        host: "127.0.0.1".into(),
        port_range_start: start,
        port_range_end: end,
        probe_timeout: Duration::from_millis(250),
        poll_interval: Duration::from_millis(50),
        poll_attempts: 3,
        monitor_interval: Duration::from_millis(100),
        stuck_threshold: Duration::from_secs(15),
        retry_delay: Duration::from_millis(10),
        reset_delay: Duration::from_millis(10),
        backend_command: vec!["warden-test-missing-backend".into()],
        backend_args: Vec::new(),
        backend_dir: PathBuf::from("."),
        backend_process_name: "warden-test-missing-backend".into(),
    }
}
