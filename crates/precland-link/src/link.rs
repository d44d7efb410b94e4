//! Telemetry link state machine: handshake, liveness and outbound reports.

use crate::codec::{encode_v2, CodecError, FrameParser, Heartbeat, LandingTarget, Message};
use crate::transport::{SerialTransport, Transport};
use log::{debug, info, trace, warn};
use std::io;
use std::time::{Duration, Instant};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Remote system identified by its heartbeat.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub system_id: u8,
    pub component_id: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    AwaitingHeartbeat,
    Connected(Endpoint),
}

#[derive(thiserror::Error, Debug)]
pub enum LinkError {
    #[error("telemetry transport unavailable: {0}")]
    Unavailable(String),
    #[error("telemetry link is not connected")]
    NotConnected,
    #[error("no flight controller heartbeat within {0:?}")]
    HeartbeatTimeout(Duration),
    #[error("heartbeat wait cancelled")]
    Cancelled,
    #[error("transport i/o failed: {0}")]
    Io(#[from] io::Error),
}

/// Link identity and timing.
#[derive(Clone, Debug)]
pub struct LinkConfig {
    /// Our MAVLink system id.
    pub system_id: u8,
    /// Our MAVLink component id (191 = onboard computer).
    pub component_id: u8,
    /// Period of our own heartbeat once connected.
    pub heartbeat_interval: Duration,
    /// Flight controller heartbeat age after which loss is reported.
    pub heartbeat_loss_timeout: Duration,
    /// Serial read timeout; bounds how long one [`TelemetryLink::poll`] blocks
    /// while awaiting the heartbeat. Connected polls never wait.
    pub read_timeout: Duration,
    /// Most inbound bytes consumed by one connected poll.
    pub max_drain_bytes: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            system_id: 1,
            component_id: 191,
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_loss_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_millis(100),
            max_drain_bytes: 64 * 1024,
        }
    }
}

/// MAVLink link to one flight controller.
pub struct TelemetryLink {
    config: LinkConfig,
    state: LinkState,
    transport: Option<Box<dyn Transport>>,
    parser: FrameParser,
    sequence: u8,
    last_remote_heartbeat: Option<Instant>,
    last_own_heartbeat: Option<Instant>,
    heartbeat_lost: bool,
    handshakes: u32,
    reports_sent: u64,
}

impl TelemetryLink {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            state: LinkState::Disconnected,
            transport: None,
            parser: FrameParser::new(),
            sequence: 0,
            last_remote_heartbeat: None,
            last_own_heartbeat: None,
            heartbeat_lost: false,
            handshakes: 0,
            reports_sent: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> LinkState {
        self.state
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self.state, LinkState::Connected(_))
    }

    /// Number of `AwaitingHeartbeat -> Connected` transitions so far.
    #[inline]
    pub fn handshake_count(&self) -> u32 {
        self.handshakes
    }

    #[inline]
    pub fn reports_sent(&self) -> u64 {
        self.reports_sent
    }

    /// Whether the last flight controller heartbeat is older than the loss timeout.
    #[inline]
    pub fn heartbeat_lost(&self) -> bool {
        self.heartbeat_lost
    }

    /// Take ownership of an open transport and start waiting for a heartbeat.
    pub fn attach(&mut self, transport: Box<dyn Transport>) {
        info!("telemetry transport open: {}", transport.describe());
        self.transport = Some(transport);
        self.parser = FrameParser::new();
        self.last_remote_heartbeat = None;
        self.last_own_heartbeat = None;
        self.heartbeat_lost = false;
        self.state = LinkState::AwaitingHeartbeat;
    }

    /// Open a serial device and [`attach`](Self::attach) it.
    pub fn open_serial(&mut self, path: &str, baud_rate: u32) -> Result<(), LinkError> {
        let transport = SerialTransport::open(path, baud_rate, self.config.read_timeout)
            .map_err(|e| LinkError::Unavailable(format!("{path}: {e}")))?;
        self.attach(Box::new(transport));
        Ok(())
    }

    /// Drop the transport and return to `Disconnected`.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            info!("telemetry link closed");
        }
        self.state = LinkState::Disconnected;
    }

    /// Read inbound bytes and run the periodic duties.
    ///
    /// While awaiting the heartbeat this blocks for up to one read timeout.
    /// Once connected it only consumes bytes that have already arrived.
    pub fn poll(&mut self) -> Result<LinkState, LinkError> {
        self.poll_at(Instant::now())
    }

    /// [`poll`](Self::poll) with an explicit clock.
    pub fn poll_at(&mut self, now: Instant) -> Result<LinkState, LinkError> {
        let connected = self.is_connected();
        let Some(transport) = self.transport.as_mut() else {
            return Ok(self.state);
        };

        let mut buf = [0u8; 512];
        if connected {
            let mut budget = self.config.max_drain_bytes;
            while budget > 0 {
                let pending = transport.bytes_pending()?.min(buf.len()).min(budget);
                if pending == 0 {
                    break;
                }
                let n = transport.read(&mut buf[..pending])?;
                if n == 0 {
                    break;
                }
                self.parser.push(&buf[..n]);
                budget -= n;
            }
        } else {
            let n = transport.read(&mut buf)?;
            if n > 0 {
                self.parser.push(&buf[..n]);
            }
        }
        while let Some(parsed) = self.parser.next_message() {
            match parsed {
                Ok(msg) => {
                    if let Message::Heartbeat(hb) = msg.message {
                        let from = Endpoint {
                            system_id: msg.header.system_id,
                            component_id: msg.header.component_id,
                        };
                        self.on_heartbeat(&hb, from, now);
                    }
                }
                Err(CodecError::UnknownMessage(id)) => trace!("skipping message id {id}"),
                Err(e) => debug!("dropping inbound bytes: {e}"),
            }
        }

        if let LinkState::Connected(_) = self.state {
            self.check_liveness(now);
            let due = self
                .last_own_heartbeat
                .is_none_or(|t| now.saturating_duration_since(t) >= self.config.heartbeat_interval);
            if due {
                self.send(&Message::Heartbeat(Heartbeat::onboard_controller()))?;
                self.last_own_heartbeat = Some(now);
            }
        }
        Ok(self.state)
    }

    /// Block until a flight controller heartbeat arrives.
    ///
    /// `timeout = None` waits forever. `should_abort` is checked between
    /// polls and cancels the wait when it returns true.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self, should_abort)))]
    pub fn wait_for_heartbeat(
        &mut self,
        timeout: Option<Duration>,
        should_abort: impl Fn() -> bool,
    ) -> Result<Endpoint, LinkError> {
        let started = Instant::now();
        info!(
            "waiting for flight controller heartbeat ({})",
            timeout.map_or("no timeout".to_string(), |t| format!("timeout {t:?}"))
        );
        loop {
            match self.poll()? {
                LinkState::Connected(endpoint) => return Ok(endpoint),
                LinkState::Disconnected => return Err(LinkError::NotConnected),
                LinkState::AwaitingHeartbeat => {}
            }
            if should_abort() {
                return Err(LinkError::Cancelled);
            }
            if let Some(t) = timeout {
                if started.elapsed() >= t {
                    return Err(LinkError::HeartbeatTimeout(t));
                }
            }
        }
    }

    /// Send one `LANDING_TARGET`. Only valid while connected.
    pub fn send_landing_target(&mut self, target: &LandingTarget) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        self.send(&Message::LandingTarget(*target))?;
        self.reports_sent += 1;
        Ok(())
    }

    fn on_heartbeat(&mut self, hb: &Heartbeat, from: Endpoint, now: Instant) {
        if !hb.is_flight_controller() {
            trace!(
                "ignoring heartbeat from non-autopilot {}/{}",
                from.system_id,
                from.component_id
            );
            return;
        }
        match self.state {
            LinkState::AwaitingHeartbeat => {
                info!(
                    "heartbeat from system {} component {}: link connected",
                    from.system_id, from.component_id
                );
                self.state = LinkState::Connected(from);
                self.handshakes += 1;
                self.last_remote_heartbeat = Some(now);
            }
            LinkState::Connected(endpoint) if endpoint.system_id == from.system_id => {
                if self.heartbeat_lost {
                    info!("flight controller heartbeat recovered");
                    self.heartbeat_lost = false;
                }
                self.last_remote_heartbeat = Some(now);
            }
            _ => {}
        }
    }

    fn check_liveness(&mut self, now: Instant) {
        let Some(last) = self.last_remote_heartbeat else {
            return;
        };
        let age = now.saturating_duration_since(last);
        if !self.heartbeat_lost && age > self.config.heartbeat_loss_timeout {
            warn!(
                "no flight controller heartbeat for {:.1}s",
                age.as_secs_f64()
            );
            self.heartbeat_lost = true;
        }
    }

    fn send(&mut self, message: &Message) -> Result<(), LinkError> {
        let transport = self.transport.as_mut().ok_or(LinkError::NotConnected)?;
        let frame = encode_v2(
            self.sequence,
            self.config.system_id,
            self.config.component_id,
            message,
        );
        self.sequence = self.sequence.wrapping_add(1);
        transport.write_all(&frame)?;
        Ok(())
    }
}
