//! JSON request bodies and image encoding for the server API.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use serde::{Deserialize, Serialize};

use super::sink::DeliveryError;
use crate::tripwire::{CrossingEvent, Direction};

#[derive(Debug, Serialize)]
pub struct CrossingPayload<'a> {
    pub device_id: &'a str,
    pub track_id: u64,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    pub frame_index: u64,
    pub images: Vec<String>,
}

impl<'a> CrossingPayload<'a> {
    pub fn new(device_id: &'a str, event: &CrossingEvent, jpeg_quality: u8) -> Result<Self, DeliveryError> {
        let images = match &event.snapshot {
            Some(image) => vec![encode_jpeg(image, jpeg_quality)?],
            None => Vec::new(),
        };
        Ok(Self {
            device_id,
            track_id: event.track_id,
            direction: event.direction,
            timestamp: event.timestamp,
            frame_index: event.frame_index,
            images,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct RegistrationPayload<'a> {
    pub device_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_id: Option<&'a str>,
    pub images: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatPayload<'a> {
    pub device_id: &'a str,
    pub status: &'a str,
    pub uptime_secs: u64,
}

/// Server reply to a registration. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RegistrationReceipt {
    #[serde(default, alias = "person_id")]
    pub member_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Tripwire lines as served to the device.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RemoteTripwire {
    pub outer_x: f32,
    pub inner_x: f32,
}

/// Server-side settings for one device. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceSettings {
    #[serde(alias = "tripwires")]
    pub tripwire: RemoteTripwire,
}

/// JPEG-encode and base64 an image for a JSON body.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<String, DeliveryError> {
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|e| DeliveryError::Encode(e.to_string()))?;
    Ok(STANDARD.encode(buf.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn event(snapshot: Option<RgbImage>) -> CrossingEvent {
        let mut event = CrossingEvent {
            track_id: 7,
            direction: Direction::Exit,
            frame_index: 42,
            timestamp: DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            snapshot: None,
        };
        if let Some(image) = snapshot {
            event = event.with_snapshot(Arc::new(image));
        }
        event
    }

    #[test]
    fn test_crossing_payload_json() {
        let payload = CrossingPayload::new("gate-1", &event(None), 85).unwrap();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["device_id"], "gate-1");
        assert_eq!(json["track_id"], 7);
        assert_eq!(json["direction"], "exit");
        assert_eq!(json["frame_index"], 42);
        assert_eq!(json["timestamp"], "2024-05-01T12:00:00Z");
        assert_eq!(json["images"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_snapshot_is_base64_jpeg() {
        let payload =
            CrossingPayload::new("gate-1", &event(Some(RgbImage::new(8, 8))), 85).unwrap();
        assert_eq!(payload.images.len(), 1);
        let bytes = STANDARD.decode(&payload.images[0]).unwrap();
        // SOI marker
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_unlabeled_registration_omits_member_id() {
        let payload = RegistrationPayload {
            device_id: "gate-1",
            member_id: None,
            images: vec![],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("member_id").is_none());
    }

    #[test]
    fn test_receipt_accepts_person_id() {
        let receipt: RegistrationReceipt =
            serde_json::from_str(r#"{"status":"ok","person_id":"p-17","extra":1}"#).unwrap();
        assert_eq!(receipt.member_id.as_deref(), Some("p-17"));
        assert_eq!(receipt.status.as_deref(), Some("ok"));

        let empty: RegistrationReceipt = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, RegistrationReceipt::default());
    }
}
