//! Brand probing.
//!
//! A handful of cheap handshakes against brand-signature endpoints, each
//! bounded by a short timeout. The first brand whose signature responds
//! wins; everything else falls back to `Brand::Generic`. The result is
//! cached on the `StreamTarget` so reconnects skip probing.

use std::time::Duration;

use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::stream::Brand;

#[derive(Debug, Clone)]
pub struct BrandProber {
    timeout: Duration,
}

/// HTTP endpoints whose responses identify a brand. Checked in order;
/// signatures are matched case-insensitively against the response head.
const HTTP_SIGNATURES: [(&str, &[&str], Brand); 3] = [
    (
        "/ISAPI/System/deviceInfo",
        &["hikvision", "dvrdvs", "dnvrs"],
        Brand::Hikvision,
    ),
    (
        "/cgi-bin/magicBox.cgi?action=getDeviceType",
        &["dahua", "dh-"],
        Brand::Dahua,
    ),
    ("/axis-cgi/param.cgi", &["axis"], Brand::Axis),
];

impl BrandProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Infer the brand of the device at `host`, falling back to generic.
    pub async fn probe(&self, host: &str, http_port: u16, rtsp_port: u16) -> Brand {
        for (path, signatures, brand) in HTTP_SIGNATURES {
            if let Some(head) = self.http_head(host, http_port, path).await {
                if signatures.iter().any(|sig| head.contains(sig)) {
                    debug!("brand probe matched {} via {}", brand, path);
                    return brand;
                }
            }
        }

        if let Some(head) = self.rtsp_options(host, rtsp_port).await {
            for (brand, sig) in [
                (Brand::Dahua, "dahua"),
                (Brand::Hikvision, "hikvision"),
                (Brand::Xm, "h264dvr"),
            ] {
                if head.contains(sig) {
                    debug!("brand probe matched {} via rtsp server header", brand);
                    return brand;
                }
            }
        }

        Brand::Generic
    }

    /// One HTTP GET, returning the lowercased response head. Any network
    /// failure or timeout is treated as "no signature".
    async fn http_head(&self, host: &str, port: u16, path: &str) -> Option<String> {
        let request = format!(
            "GET {} HTTP/1.0\r\nHost: {}\r\nUser-Agent: sitewatch-probe\r\n\r\n",
            path, host
        );
        self.exchange(host, port, request.as_bytes()).await
    }

    /// One RTSP OPTIONS exchange, returning the lowercased response head.
    async fn rtsp_options(&self, host: &str, port: u16) -> Option<String> {
        let request = format!(
            "OPTIONS rtsp://{}:{}/ RTSP/1.0\r\nCSeq: 1\r\nUser-Agent: sitewatch-probe\r\n\r\n",
            host, port
        );
        self.exchange(host, port, request.as_bytes()).await
    }

    async fn exchange(&self, host: &str, port: u16, request: &[u8]) -> Option<String> {
        let fut = async {
            let mut stream = TcpStream::connect((host, port)).await.ok()?;
            stream.write_all(request).await.ok()?;
            let mut buf = vec![0u8; 2048];
            let n = stream.read(&mut buf).await.ok()?;
            Some(String::from_utf8_lossy(&buf[..n]).to_ascii_lowercase())
        };
        tokio::time::timeout(self.timeout, fut).await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn canned_server(response: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = [0u8; 1024];
                use tokio::io::AsyncReadExt;
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        port
    }

    #[tokio::test]
    async fn identifies_hikvision_from_isapi_response() {
        let port = canned_server(
            "HTTP/1.1 401 Unauthorized\r\nWWW-Authenticate: Digest realm=\"DS-7608NI Hikvision\"\r\n\r\n",
        )
        .await;
        let prober = BrandProber::new(Duration::from_secs(1));
        // Same canned socket answers the rtsp probe too; the http match wins first.
        assert_eq!(
            prober.probe("127.0.0.1", port, port).await,
            Brand::Hikvision
        );
    }

    #[tokio::test]
    async fn falls_back_to_generic_when_nothing_matches() {
        let port = canned_server("HTTP/1.1 404 Not Found\r\nServer: lighttpd\r\n\r\n").await;
        let prober = BrandProber::new(Duration::from_secs(1));
        assert_eq!(prober.probe("127.0.0.1", port, port).await, Brand::Generic);
    }

    #[tokio::test]
    async fn unreachable_host_is_generic_not_an_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let prober = BrandProber::new(Duration::from_millis(300));
        assert_eq!(prober.probe("127.0.0.1", port, port).await, Brand::Generic);
    }
}
