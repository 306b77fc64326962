//! Connector boundary between the supervisor and the decode backend.
//!
//! A connector owns one network video source. `open` must fail fast on
//! unreachable hosts (TCP pre-check, short timeout) instead of waiting out
//! protocol timeouts, and `open_validated` additionally reads and discards
//! one frame so an open socket that never yields decodable data is treated
//! as a failed candidate.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use url::Url;

use crate::config::StreamingConfig;
use crate::error::{ConnectError, ReadError};
use crate::stream::Frame;

#[derive(Debug, Clone, Copy)]
pub struct ConnectorTimeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl ConnectorTimeouts {
    pub fn from_config(config: &StreamingConfig) -> Self {
        Self {
            connect: Duration::from_secs(config.connect_timeout_secs),
            read: Duration::from_secs(config.read_timeout_secs),
        }
    }
}

impl Default for ConnectorTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            read: Duration::from_secs(3),
        }
    }
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Handle: Send + 'static;

    async fn open(&self, url: &str) -> Result<Self::Handle, ConnectError>;

    async fn read_frame(&self, handle: &mut Self::Handle) -> Result<Frame, ReadError>;

    async fn close(&self, handle: Self::Handle);

    /// Open and validate that the stream actually yields decodable data.
    /// The first frame is read and discarded.
    async fn open_validated(&self, url: &str) -> Result<Self::Handle, ConnectError> {
        let mut handle = self.open(url).await?;
        match self.read_frame(&mut handle).await {
            Ok(_) => Ok(handle),
            Err(err) => {
                self.close(handle).await;
                Err(ConnectError::EmptyStream(err.to_string()))
            }
        }
    }
}

/// Extract host and port from a candidate URL, defaulting the port by
/// scheme (554 for rtsp, 80 for http).
pub fn host_port_of(url: &str) -> Option<(String, u16)> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_string();
    let port = parsed.port().or_else(|| match parsed.scheme() {
        "rtsp" | "rtsps" => Some(554),
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    })?;
    Some((host, port))
}

/// Lightweight TCP reachability pre-check, run before any protocol-level
/// open so a dead host costs milliseconds rather than a protocol timeout.
pub async fn precheck_reachable(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<(), ConnectError> {
    let addr = format!("{}:{}", host, port);
    match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(err)) => Err(ConnectError::UnreachableHost(format!("{}: {}", addr, err))),
        Err(_) => Err(ConnectError::UnreachableHost(format!(
            "{}: connect timed out after {}ms",
            addr,
            timeout.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_port_parses_rtsp_defaults() {
        let (host, port) = host_port_of("rtsp://admin:pw@10.0.0.8/cam/realmonitor").unwrap();
        assert_eq!(host, "10.0.0.8");
        assert_eq!(port, 554);

        let (_, port) = host_port_of("rtsp://admin:pw@10.0.0.8:8554/live").unwrap();
        assert_eq!(port, 8554);

        let (_, port) = host_port_of("http://cam.local/videoMain").unwrap();
        assert_eq!(port, 80);

        assert!(host_port_of("not a url").is_none());
    }

    #[tokio::test]
    async fn precheck_accepts_listening_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        precheck_reachable("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn precheck_rejects_closed_port_quickly() {
        // Bind and drop to get a port nothing listens on.
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let started = std::time::Instant::now();
        let err = precheck_reachable("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::UnreachableHost(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
