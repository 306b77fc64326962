use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod connector;
#[cfg(feature = "gst")]
pub mod gst_connector;
pub mod manager;
pub mod prober;
pub mod supervisor;
pub mod url_candidates;

pub use connector::Connector;
pub use manager::{ChannelManager, SessionId};
pub use supervisor::{ChannelHealth, ChannelStatus, StreamSupervisor};
pub use url_candidates::BrandTable;

/// DVR/camera manufacturers with known stream URL conventions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Brand {
    Dahua,
    Hikvision,
    Axis,
    Xm,
    Generic,
}

impl Brand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Brand::Dahua => "dahua",
            Brand::Hikvision => "hikvision",
            Brand::Axis => "axis",
            Brand::Xm => "xm",
            Brand::Generic => "generic",
        }
    }

    pub fn from_name(name: &str) -> Option<Brand> {
        match name.to_ascii_lowercase().as_str() {
            "dahua" => Some(Brand::Dahua),
            "hikvision" => Some(Brand::Hikvision),
            "axis" => Some(Brand::Axis),
            "xm" => Some(Brand::Xm),
            "generic" => Some(Brand::Generic),
            _ => None,
        }
    }
}

impl std::fmt::Display for Brand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Rtsp,
    Http,
}

/// One video source: a standalone IP camera or one tap of a DVR/NVR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamTarget {
    pub owner_id: Uuid,
    pub channel_id: Uuid,
    pub name: String,
    pub host: String,
    pub rtsp_port: u16,
    pub http_port: u16,
    /// DVR channel number; 1 for standalone cameras
    pub channel: u32,
    pub transport: Transport,
    pub credentials: Credentials,
    /// Set once by the brand prober; reconnects skip probing when present
    pub brand_hint: Option<Brand>,
    /// Explicit URL overrides; generated from the brand table when empty
    #[serde(default)]
    pub candidate_urls: Vec<String>,
}

/// One decoded frame, JPEG-encoded by the connector backend.
#[derive(Debug, Clone)]
pub struct Frame {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}
