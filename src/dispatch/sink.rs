//! Delivery seam between the dispatch worker and the remote server.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};
use ureq::{Agent, AgentBuilder};

use super::payload::{
    CrossingPayload, DeviceSettings, HeartbeatPayload, RegistrationPayload, RegistrationReceipt,
    encode_jpeg,
};
use crate::registration::RegistrationBatch;
use crate::tripwire::CrossingEvent;

pub const CROSSING_ENDPOINT: &str = "/events/crossing";
pub const REGISTER_ENDPOINT: &str = "/members/register";
pub const HEARTBEAT_ENDPOINT: &str = "/devices/heartbeat";

/// Startup settings fetches give up sooner than event delivery.
pub const SETTINGS_TIMEOUT: Duration = Duration::from_secs(5);

pub fn settings_endpoint(device_id: &str) -> String {
    format!("/devices/{device_id}/config")
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The server answered with a non-2xx status.
    #[error("{endpoint} returned {status} {reason}")]
    Status {
        endpoint: String,
        status: u16,
        reason: String,
    },
    /// No usable response: connect failure, timeout, reset.
    #[error("{endpoint} unreachable: {message}")]
    Transport { endpoint: String, message: String },
    #[error("failed to encode request: {0}")]
    Encode(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl DeliveryError {
    /// Worth another attempt: the request may succeed unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Transport { .. } => true,
            DeliveryError::Status { status, .. } => *status >= 500,
            DeliveryError::Encode(_) | DeliveryError::Decode(_) => false,
        }
    }
}

/// Liveness report sent on the heartbeat interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub status: String,
    pub uptime_secs: u64,
}

/// Where the dispatch worker delivers messages.
///
/// Implementations block until the request completes or fails; the worker
/// thread is the only caller.
pub trait EventSink: Send {
    fn send_crossing(&mut self, event: &CrossingEvent) -> Result<(), DeliveryError>;

    fn send_registration(
        &mut self,
        batch: &RegistrationBatch,
    ) -> Result<RegistrationReceipt, DeliveryError>;

    fn send_heartbeat(&mut self, heartbeat: &Heartbeat) -> Result<(), DeliveryError>;
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn send_crossing(&mut self, event: &CrossingEvent) -> Result<(), DeliveryError> {
        (**self).send_crossing(event)
    }

    fn send_registration(
        &mut self,
        batch: &RegistrationBatch,
    ) -> Result<RegistrationReceipt, DeliveryError> {
        (**self).send_registration(batch)
    }

    fn send_heartbeat(&mut self, heartbeat: &Heartbeat) -> Result<(), DeliveryError> {
        (**self).send_heartbeat(heartbeat)
    }
}

#[derive(Debug, Clone)]
pub struct HttpSinkConfig {
    pub base_url: String,
    pub device_id: String,
    pub timeout: Duration,
    pub event_jpeg_quality: u8,
    pub registration_jpeg_quality: u8,
}

impl Default for HttpSinkConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            device_id: "edge-01".to_string(),
            timeout: Duration::from_secs(10),
            event_jpeg_quality: 85,
            registration_jpeg_quality: 95,
        }
    }
}

/// JSON-over-HTTP client for the recognition server.
pub struct HttpSink {
    agent: Agent,
    config: HttpSinkConfig,
}

impl HttpSink {
    pub fn new(mut config: HttpSinkConfig) -> Self {
        let trimmed = config.base_url.trim_end_matches('/').len();
        config.base_url.truncate(trimmed);
        let agent = AgentBuilder::new().timeout(config.timeout).build();
        Self { agent, config }
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn post<T: serde::Serialize>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<ureq::Response, DeliveryError> {
        let url = format!("{}{}", self.config.base_url, endpoint);
        debug!(%url, "POST");
        self.agent
            .post(&url)
            .send_json(body)
            .map_err(|e| request_error(endpoint, e))
    }

    /// Fetch this device's settings (tripwire lines) from the server.
    pub fn fetch_settings(&self) -> Result<DeviceSettings, DeliveryError> {
        let endpoint = settings_endpoint(&self.config.device_id);
        let url = format!("{}{}", self.config.base_url, endpoint);
        debug!(%url, "GET");
        let response = self
            .agent
            .get(&url)
            .timeout(SETTINGS_TIMEOUT)
            .call()
            .map_err(|e| request_error(&endpoint, e))?;
        response
            .into_json()
            .map_err(|e| DeliveryError::Decode(e.to_string()))
    }
}

fn request_error(endpoint: &str, e: ureq::Error) -> DeliveryError {
    match e {
        ureq::Error::Status(status, response) => DeliveryError::Status {
            endpoint: endpoint.to_string(),
            status,
            reason: response.status_text().to_string(),
        },
        ureq::Error::Transport(transport) => DeliveryError::Transport {
            endpoint: endpoint.to_string(),
            message: transport.to_string(),
        },
    }
}

impl EventSink for HttpSink {
    fn send_crossing(&mut self, event: &CrossingEvent) -> Result<(), DeliveryError> {
        let payload =
            CrossingPayload::new(&self.config.device_id, event, self.config.event_jpeg_quality)?;
        self.post(CROSSING_ENDPOINT, &payload).map(drop)
    }

    fn send_registration(
        &mut self,
        batch: &RegistrationBatch,
    ) -> Result<RegistrationReceipt, DeliveryError> {
        let images = batch
            .frames
            .iter()
            .map(|f| encode_jpeg(&f.image, self.config.registration_jpeg_quality))
            .collect::<Result<Vec<_>, _>>()?;
        let payload = RegistrationPayload {
            device_id: &self.config.device_id,
            member_id: batch.member_id.as_deref(),
            images,
        };

        // Any 2xx is an accepted registration; the body only adds detail.
        let response = self.post(REGISTER_ENDPOINT, &payload)?;
        let body = match response.into_string() {
            Ok(body) => body,
            Err(e) => {
                warn!(endpoint = REGISTER_ENDPOINT, error = %e, "registration reply unreadable");
                return Ok(RegistrationReceipt::default());
            }
        };
        if body.trim().is_empty() {
            return Ok(RegistrationReceipt::default());
        }
        match serde_json::from_str(&body) {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                warn!(endpoint = REGISTER_ENDPOINT, error = %e, "registration reply is not JSON");
                Ok(RegistrationReceipt::default())
            }
        }
    }

    fn send_heartbeat(&mut self, heartbeat: &Heartbeat) -> Result<(), DeliveryError> {
        let payload = HeartbeatPayload {
            device_id: &self.config.device_id,
            status: &heartbeat.status,
            uptime_secs: heartbeat.uptime_secs,
        };
        self.post(HEARTBEAT_ENDPOINT, &payload).map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    use image::RgbImage;

    use crate::frame::Frame;

    /// Answer one request with `response`; the handle yields the request text.
    fn serve_once(response: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut stream);
            stream.write_all(response.as_bytes()).unwrap();
            request
        });
        (url, handle)
    }

    fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn sink(base_url: String) -> HttpSink {
        HttpSink::new(HttpSinkConfig {
            base_url,
            device_id: "gate-1".to_string(),
            timeout: Duration::from_secs(5),
            ..HttpSinkConfig::default()
        })
    }

    fn batch() -> RegistrationBatch {
        RegistrationBatch {
            session_id: 1,
            member_id: Some("m-7".to_string()),
            frames: vec![Frame::new(1, RgbImage::new(8, 8))],
            complete: true,
        }
    }

    fn status(code: u16) -> DeliveryError {
        DeliveryError::Status {
            endpoint: REGISTER_ENDPOINT.to_string(),
            status: code,
            reason: String::new(),
        }
    }

    #[test]
    fn test_retryable_errors() {
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!status(409).is_retryable());
        assert!(
            DeliveryError::Transport {
                endpoint: REGISTER_ENDPOINT.to_string(),
                message: "connection refused".to_string(),
            }
            .is_retryable()
        );
        assert!(!DeliveryError::Encode("bad".to_string()).is_retryable());
    }

    #[test]
    fn test_error_message_names_endpoint() {
        let err = DeliveryError::Status {
            endpoint: CROSSING_ENDPOINT.to_string(),
            status: 502,
            reason: "Bad Gateway".to_string(),
        };
        assert_eq!(err.to_string(), "/events/crossing returned 502 Bad Gateway");
    }

    #[test]
    fn test_base_url_is_normalised() {
        let sink = HttpSink::new(HttpSinkConfig {
            base_url: "http://server:8000//".to_string(),
            ..HttpSinkConfig::default()
        });
        assert_eq!(sink.base_url(), "http://server:8000");
    }

    #[test]
    fn test_registration_plain_text_2xx_is_accepted() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\nConnection: close\r\n\r\nOK",
        );
        let receipt = sink(url).send_registration(&batch()).unwrap();
        assert_eq!(receipt, RegistrationReceipt::default());

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /members/register "), "{request}");
        assert!(request.contains("\"member_id\":\"m-7\""));
    }

    #[test]
    fn test_registration_json_reply_is_parsed() {
        let (url, server) = serve_once(
            "HTTP/1.1 201 Created\r\nContent-Type: application/json\r\nContent-Length: 38\r\nConnection: close\r\n\r\n{\"person_id\":\"p-12\",\"status\":\"queued\"}",
        );
        let receipt = sink(url).send_registration(&batch()).unwrap();
        assert_eq!(receipt.member_id.as_deref(), Some("p-12"));
        assert_eq!(receipt.status.as_deref(), Some("queued"));
        server.join().unwrap();
    }

    #[test]
    fn test_fetch_settings_reads_tripwire() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 43\r\nConnection: close\r\n\r\n{\"tripwires\":{\"outer_x\":150,\"inner_x\":420}}",
        );
        let settings = sink(url).fetch_settings().unwrap();
        assert_eq!(settings.tripwire.outer_x, 150.0);
        assert_eq!(settings.tripwire.inner_x, 420.0);

        let request = server.join().unwrap();
        assert!(request.starts_with("GET /devices/gate-1/config "), "{request}");
    }

    #[test]
    fn test_unreachable_server_is_transport_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let mut sink = HttpSink::new(HttpSinkConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_millis(500),
            ..HttpSinkConfig::default()
        });
        let err = sink
            .send_heartbeat(&Heartbeat {
                status: "running".to_string(),
                uptime_secs: 1,
            })
            .unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }
}
