//! Off-thread delivery of crossing events, registration batches and heartbeats.

mod payload;
mod sink;
mod worker;

pub use payload::{
    CrossingPayload, DeviceSettings, HeartbeatPayload, RegistrationPayload, RegistrationReceipt,
    RemoteTripwire, encode_jpeg,
};
pub use sink::{
    CROSSING_ENDPOINT, DeliveryError, EventSink, HEARTBEAT_ENDPOINT, Heartbeat, HttpSink,
    HttpSinkConfig, REGISTER_ENDPOINT, SETTINGS_TIMEOUT, settings_endpoint,
};
pub use worker::{
    DispatchStats, Dispatcher, DispatcherConfig, EnqueueError, Outbound, RegistrationOutcome,
};
