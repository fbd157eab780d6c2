use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio::time::Instant;
use tracing::debug;

pub(crate) async fn is_server_ready(addr: &str) -> bool {
    TcpStream::connect(addr).await.is_ok()
}

/// Sends a four-letter status word and returns the plain-text answer.
///
/// The server closes the connection after answering, so the reply is read to EOF.
pub async fn send_four_letter_word(
    addr: SocketAddr,
    cmd: &str,
    io_timeout: Duration,
) -> std::io::Result<String> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(cmd.as_bytes()).await?;
        stream.flush().await?;
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await?;
        Ok::<_, std::io::Error>(String::from_utf8_lossy(&out).into_owned())
    };
    timeout(io_timeout, exchange)
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "four letter word timed out"))?
}

/// Polls `stat` until the server answers with its version banner
pub async fn wait_for_server_up(
    addr: SocketAddr,
    within: Duration,
) -> bool {
    let deadline = Instant::now() + within;
    loop {
        match send_four_letter_word(addr, "stat", Duration::from_millis(500)).await {
            Ok(reply) if reply.starts_with("Keeper version:") => return true,
            Ok(reply) => debug!(%addr, %reply, "server not serving yet"),
            Err(e) => debug!(%addr, "server not up yet: {}", e),
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(250)).await;
    }
}

/// Polls until the port refuses connections
pub async fn wait_for_server_down(
    addr: SocketAddr,
    within: Duration,
) -> bool {
    let deadline = Instant::now() + within;
    loop {
        if !is_server_ready(&addr.to_string()).await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(250)).await;
    }
}
