//! Coordinator client: one TCP connection per command.

use log::{info, warn};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{DacaError, DacaResult};
use crate::server::protocol::BODY_TERMINATOR;
use crate::types::VersionPair;

/// Bounded retries with a fixed pause between attempts.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Run `operation` until it succeeds or the attempts are used up; the
    /// last error is returned.
    pub async fn run<T, F, Fut>(&self, what: &str, mut operation: F) -> DacaResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DacaResult<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {}s",
                        what,
                        attempt,
                        attempts,
                        e,
                        self.delay.as_secs()
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct CoordinatorClient {
    addr: String,
    retry: RetryPolicy,
    io_timeout: Duration,
}

impl CoordinatorClient {
    pub fn new(addr: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            addr: addr.into(),
            retry,
            io_timeout: Duration::from_secs(60),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send `command` and an optional body, then read the reply until the
    /// server closes the connection.
    pub async fn request(&self, command: &str, body: Option<&str>) -> DacaResult<String> {
        let exchange = async {
            let mut stream = TcpStream::connect(&self.addr).await?;
            let mut message = format!("{}\n", command);
            if let Some(body) = body {
                message.push_str(body);
            }
            stream.write_all(message.as_bytes()).await?;
            stream.shutdown().await?;

            let mut reply = Vec::new();
            stream.read_to_end(&mut reply).await?;
            Ok::<_, std::io::Error>(reply)
        };
        let reply = timeout(self.io_timeout, exchange)
            .await
            .map_err(|_| {
                DacaError::Coordinator(format!("{}: no reply to {}", self.addr, command))
            })??;
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }

    pub async fn get_versions(&self) -> DacaResult<VersionPair> {
        let reply = self.request("GetCppcheckVersions", None).await?;
        VersionPair::parse_reply(&reply)
            .ok_or_else(|| DacaError::Coordinator(format!("unexpected versions reply {:?}", reply)))
    }

    /// Next package url from the shared cursor.
    pub async fn get_package(&self) -> DacaResult<String> {
        let reply = self.request("get", None).await?;
        let url = reply.trim();
        if url.is_empty() {
            return Err(DacaError::Coordinator("no package handed out".to_string()));
        }
        Ok(url.to_string())
    }

    /// Package url at `index`; `None` when the server closes without one.
    pub async fn get_package_idx(&self, index: usize) -> DacaResult<Option<String>> {
        let reply = self.request(&format!("getPackageIdx:{}", index), None).await?;
        let url = reply.trim();
        Ok((!url.is_empty()).then(|| url.to_string()))
    }

    pub async fn get_packages_count(&self) -> DacaResult<usize> {
        let reply = self.request("getPackagesCount", None).await?;
        reply
            .trim()
            .parse()
            .map_err(|_| DacaError::Coordinator(format!("unexpected count reply {:?}", reply)))
    }

    async fn upload(&self, command: &str, url: &str, payload: &str) -> DacaResult<()> {
        let body = format!("{}\n{}{}", url, payload.trim_end_matches('\n'), BODY_TERMINATOR);
        let what = format!("{} {}", command, url);
        self.retry
            .run(&what, || self.request(command, Some(&body)))
            .await?;
        info!("{}: uploaded {} bytes", what, body.len());
        Ok(())
    }

    pub async fn upload_result(&self, url: &str, payload: &str) -> DacaResult<()> {
        self.upload("write", url, payload).await
    }

    pub async fn upload_info(&self, url: &str, payload: &str) -> DacaResult<()> {
        self.upload("write_info", url, payload).await
    }

    /// Report that `url` contains nothing to analyze.
    pub async fn upload_nodata(&self, url: &str) -> DacaResult<()> {
        let body = format!("{}\n", url);
        self.retry
            .run(&format!("write_nodata {}", url), || {
                self.request("write_nodata", Some(&body))
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_retry_gives_up_after_attempts() {
        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);
        let result: DacaResult<()> = policy
            .run("op", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(DacaError::Coordinator("down".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_success() {
        let policy = RetryPolicy {
            attempts: 4,
            delay: Duration::from_millis(1),
        };
        let calls = AtomicU32::new(0);
        let value = policy
            .run("op", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 1 {
                    Err(DacaError::Coordinator("flaky".to_string()))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn test_request_sends_line_and_reads_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            socket.write_all(b"head 2.14").await.unwrap();
            received
        });

        let client = CoordinatorClient::new(addr.to_string(), RetryPolicy::default());
        let versions = client.get_versions().await.unwrap();
        assert_eq!(versions.baseline, "2.14");
        assert_eq!(server.await.unwrap(), b"GetCppcheckVersions\n");
    }
}
