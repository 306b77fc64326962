//! GStreamer-backed connector (production decode path).
//!
//! Builds a `rtspsrc`/`souphttpsrc -> decodebin -> videoconvert -> jpegenc
//! -> appsink` pipeline per candidate URL and pulls JPEG-encoded frames
//! from the appsink. Requires the system GStreamer libraries; enabled with
//! the `gst` cargo feature.

use async_trait::async_trait;
use chrono::Utc;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use log::debug;

use crate::error::{ConnectError, ReadError};
use crate::stream::connector::{host_port_of, precheck_reachable, Connector, ConnectorTimeouts};
use crate::stream::Frame;

pub struct GstConnector {
    timeouts: ConnectorTimeouts,
}

pub struct GstHandle {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    url: String,
}

impl GstConnector {
    pub fn new(timeouts: ConnectorTimeouts) -> Result<Self, ConnectError> {
        gst::init().map_err(|e| ConnectError::ProtocolOpenFailed {
            url: String::new(),
            reason: format!("gstreamer init failed: {}", e),
        })?;
        Ok(Self { timeouts })
    }

    fn pipeline_description(&self, url: &str) -> String {
        let source = if url.starts_with("http") {
            format!("souphttpsrc location={} timeout=5 is-live=true", url)
        } else {
            format!(
                "rtspsrc location={} latency=200 protocols=tcp tcp-timeout={}",
                url,
                self.timeouts.connect.as_micros()
            )
        };
        format!(
            "{} ! decodebin ! videoconvert ! jpegenc ! appsink name=sink max-buffers=1 drop=true sync=false",
            source
        )
    }
}

#[async_trait]
impl Connector for GstConnector {
    type Handle = GstHandle;

    async fn open(&self, url: &str) -> Result<Self::Handle, ConnectError> {
        let (host, port) = host_port_of(url).ok_or_else(|| ConnectError::ProtocolOpenFailed {
            url: url.to_string(),
            reason: "unparseable URL".to_string(),
        })?;
        precheck_reachable(&host, port, self.timeouts.connect).await?;

        let description = self.pipeline_description(url);
        let url_owned = url.to_string();

        // Pipeline construction and state changes are blocking.
        tokio::task::spawn_blocking(move || {
            let pipeline = gst::parse::launch(&description)
                .map_err(|e| ConnectError::ProtocolOpenFailed {
                    url: url_owned.clone(),
                    reason: e.to_string(),
                })?
                .downcast::<gst::Pipeline>()
                .map_err(|_| ConnectError::ProtocolOpenFailed {
                    url: url_owned.clone(),
                    reason: "not a pipeline".to_string(),
                })?;

            let appsink = pipeline
                .by_name("sink")
                .and_then(|e| e.downcast::<gst_app::AppSink>().ok())
                .ok_or_else(|| ConnectError::ProtocolOpenFailed {
                    url: url_owned.clone(),
                    reason: "appsink missing from pipeline".to_string(),
                })?;

            pipeline
                .set_state(gst::State::Playing)
                .map_err(|e| ConnectError::ProtocolOpenFailed {
                    url: url_owned.clone(),
                    reason: e.to_string(),
                })?;

            Ok(GstHandle {
                pipeline,
                appsink,
                url: url_owned,
            })
        })
        .await
        .map_err(|e| ConnectError::ProtocolOpenFailed {
            url: url.to_string(),
            reason: format!("open task failed: {}", e),
        })?
    }

    async fn read_frame(&self, handle: &mut Self::Handle) -> Result<Frame, ReadError> {
        let appsink = handle.appsink.clone();
        let read_timeout = self.timeouts.read;

        let sample = tokio::task::spawn_blocking(move || {
            appsink.try_pull_sample(gst::ClockTime::from_mseconds(
                read_timeout.as_millis() as u64
            ))
        })
        .await
        .map_err(|e| ReadError::Disconnected(format!("read task failed: {}", e)))?;

        let sample = match sample {
            Some(sample) => sample,
            None => {
                if handle.appsink.is_eos() {
                    return Err(ReadError::Disconnected(format!(
                        "end of stream: {}",
                        handle.url
                    )));
                }
                return Err(ReadError::Timeout(read_timeout.as_millis() as u64));
            }
        };

        let buffer = sample
            .buffer()
            .ok_or_else(|| ReadError::Decode("sample without buffer".to_string()))?;
        let map = buffer
            .map_readable()
            .map_err(|e| ReadError::Decode(format!("unmappable buffer: {}", e)))?;

        let (width, height) = sample
            .caps()
            .and_then(|caps| caps.structure(0))
            .map(|s| {
                (
                    s.get::<i32>("width").unwrap_or(0) as u32,
                    s.get::<i32>("height").unwrap_or(0) as u32,
                )
            })
            .unwrap_or((0, 0));

        Ok(Frame {
            jpeg: map.as_slice().to_vec(),
            width,
            height,
            captured_at: Utc::now(),
        })
    }

    async fn close(&self, handle: Self::Handle) {
        let _ = tokio::task::spawn_blocking(move || {
            if let Err(e) = handle.pipeline.set_state(gst::State::Null) {
                debug!("pipeline teardown for {}: {}", handle.url, e);
            }
        })
        .await;
    }
}
