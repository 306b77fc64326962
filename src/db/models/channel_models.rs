use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stream::{Brand, Credentials, StreamTarget, Transport};

/// Registered channel row: one camera or one DVR tap, as entered by an
/// operator. `brand` is written once by the brand prober after the first
/// successful probe.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChannelRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub host: String,
    pub rtsp_port: i32,
    pub http_port: i32,
    pub channel_number: i32,
    pub transport: String,
    pub username: String,
    pub password: String,
    pub brand: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChannelRecord {
    pub fn to_target(&self) -> StreamTarget {
        StreamTarget {
            owner_id: self.owner_id,
            channel_id: self.id,
            name: self.name.clone(),
            host: self.host.clone(),
            rtsp_port: self.rtsp_port as u16,
            http_port: self.http_port as u16,
            channel: self.channel_number.max(1) as u32,
            transport: match self.transport.as_str() {
                "http" => Transport::Http,
                _ => Transport::Rtsp,
            },
            credentials: Credentials {
                username: self.username.clone(),
                password: self.password.clone(),
            },
            brand_hint: self.brand.as_deref().and_then(Brand::from_name),
            candidate_urls: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_maps_to_stream_target() {
        let record = ChannelRecord {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: "gate-cam".to_string(),
            host: "10.1.2.3".to_string(),
            rtsp_port: 554,
            http_port: 80,
            channel_number: 4,
            transport: "rtsp".to_string(),
            username: "admin".to_string(),
            password: "pw".to_string(),
            brand: Some("hikvision".to_string()),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let target = record.to_target();
        assert_eq!(target.channel, 4);
        assert_eq!(target.brand_hint, Some(Brand::Hikvision));
        assert_eq!(target.transport, Transport::Rtsp);
    }
}
