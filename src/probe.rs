use std::process::Stdio;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::Command;

/// Capability contract for answering "is this node up right now?".
///
/// `is_open` is the service-port probe used for the primary node;
/// `is_alive` is the config-independent liveness check (one ICMP echo)
/// used for extra nodes. Neither propagates errors: an unreachable
/// host and a refused connection are both a normal `false`.
pub trait Probe {
    async fn is_open(&self, host: &str, port: u16) -> bool;
    async fn is_alive(&self, host: &str) -> bool;
}

pub struct NetProbe {
    timeout: Duration,
}

impl NetProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for NetProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Probe for NetProbe {
    async fn is_open(&self, host: &str, port: u16) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect((host, port))).await,
            Ok(Ok(_))
        )
    }

    async fn is_alive(&self, host: &str) -> bool {
        let status = Command::new("ping")
            .args(["-c", "1", "-W", "3"])
            .arg(host)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) => status.success(),
            Err(e) => {
                tracing::error!("ping {} failed to run: {}", host, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_port_is_false() {
        let probe = NetProbe::new(Duration::from_millis(500));
        // Port 1 on localhost is about as reliably closed as it gets.
        assert!(!probe.is_open("127.0.0.1", 1).await);
    }

    #[tokio::test]
    async fn open_port_is_true() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let probe = NetProbe::default();
        assert!(probe.is_open("127.0.0.1", port).await);
    }
}
