//! MAVLink telemetry towards the flight controller.
//!
//! [`TelemetryLink`] walks `Disconnected -> AwaitingHeartbeat -> Connected`
//! over any [`Transport`] and, once connected, sends `LANDING_TARGET`
//! reports and its own heartbeat.

pub mod codec;
mod crc;
mod link;
mod transport;

pub use codec::{
    encode_v1, encode_v2, CodecError, FrameHeader, FrameParser, Heartbeat, LandingTarget, Message,
    ReceivedMessage,
};
pub use crc::{frame_crc, X25Crc};
pub use link::{Endpoint, LinkConfig, LinkError, LinkState, TelemetryLink};
pub use transport::{SerialTransport, Transport};
