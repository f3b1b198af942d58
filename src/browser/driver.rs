//! WebDriver server process management
//!
//! Spawns the chromedriver binary on an ephemeral local port and tears it
//! down with the session. The child is spawned with kill-on-drop so it
//! cannot outlive its handle even when the owner never reaches a clean
//! shutdown.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use super::errors::BrowserError;

/// How long to wait for the server to accept connections after spawning.
const READY_TIMEOUT: Duration = Duration::from_secs(10);
/// Pause between readiness probes.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A running WebDriver server process bound to a local port.
#[derive(Debug)]
pub(crate) struct DriverProcess {
    child: Child,
    port: u16,
}

impl DriverProcess {
    /// Spawn the driver binary and wait until it accepts connections.
    pub(crate) async fn spawn(binary: &Path) -> Result<Self, BrowserError> {
        let port = ephemeral_port()?;

        info!("Starting webdriver {} on port {}", binary.display(), port);
        let mut child = Command::new(binary)
            .arg(format!("--port={}", port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BrowserError::LaunchFailed(format!(
                    "could not start {}: {}",
                    binary.display(),
                    e
                ))
            })?;

        // Poll until the server listens or the child dies.
        let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
        loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?
            {
                return Err(BrowserError::LaunchFailed(format!(
                    "webdriver exited during startup with {}",
                    status
                )));
            }

            if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
                debug!("Webdriver accepting connections on port {}", port);
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                let _ = child.start_kill();
                return Err(BrowserError::LaunchFailed(format!(
                    "webdriver did not start listening within {:?}",
                    READY_TIMEOUT
                )));
            }

            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }

        Ok(Self { child, port })
    }

    /// Base URL of the local WebDriver server.
    pub(crate) fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Terminate the driver process and reap it.
    pub(crate) async fn shutdown(&mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        debug!("Webdriver process on port {} terminated", self.port);
    }
}

/// Ask the OS for a free local port.
fn ephemeral_port() -> Result<u16, BrowserError> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").map_err(|e| {
        BrowserError::LaunchFailed(format!("could not allocate local port: {}", e))
    })?;
    let port = listener
        .local_addr()
        .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?
        .port();
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_ports_are_nonzero() {
        assert_ne!(ephemeral_port().unwrap(), 0);
    }

    #[tokio::test]
    async fn spawn_rejects_missing_binary() {
        let err = DriverProcess::spawn(Path::new("/nonexistent/chromedriver"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrowserError::LaunchFailed(_)));
    }
}
