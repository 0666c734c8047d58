//! Outbound transport connector. One attempt, bounded by `timeout`; retry
//! policy lives in the supervisor.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpStream;

/// Connect to `host:port`, never taking longer than `timeout`. The attempt
/// itself is readiness-driven (no thread blocks on the handshake); on every
/// failure path the socket has been dropped before this returns.
pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let addr = format!("{host}:{port}");
    match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => {
            // Replies are small JSON lines; don't let Nagle sit on them.
            let _ = stream.set_nodelay(true);
            Ok(stream)
        }
        Ok(Err(e)) => Err(e).with_context(|| format!("failed to connect to {addr}")),
        Err(_) => anyhow::bail!("connect to {addr} timed out after {timeout:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_to_a_listening_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let stream = connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .expect("connect");
        assert!(stream.peer_addr().is_ok());
    }

    #[tokio::test]
    async fn refused_connection_is_an_error_not_a_panic() {
        // Bind-then-drop leaves a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let err = connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("failed to connect"));
    }

    #[tokio::test]
    async fn attempt_is_bounded_by_the_timeout() {
        // RFC 5737 TEST-NET address: packets go nowhere, the connect hangs.
        let start = std::time::Instant::now();
        let result = connect("192.0.2.1", 9, Duration::from_millis(200)).await;
        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
