use parking_lot::Mutex;
use precland_link::{
    encode_v2, FrameParser, Heartbeat, LandingTarget, LinkConfig, LinkError, LinkState, Message,
    TelemetryLink, Transport,
};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Transport double: a scripted inbound byte queue per read call and a
/// shared record of everything written.
struct ScriptedTransport {
    reads: VecDeque<Vec<u8>>,
    polls: Arc<Mutex<usize>>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl Transport for ScriptedTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        *self.polls.lock() += 1;
        let Some(mut chunk) = self.reads.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.reads.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn bytes_pending(&mut self) -> io::Result<usize> {
        Ok(self.reads.front().map_or(0, Vec::len))
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.written.lock().extend_from_slice(bytes);
        Ok(())
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

struct Harness {
    link: TelemetryLink,
    polls: Arc<Mutex<usize>>,
    written: Arc<Mutex<Vec<u8>>>,
}

fn autopilot_heartbeat(seq: u8) -> Vec<u8> {
    let hb = Heartbeat {
        custom_mode: 0,
        mav_type: 2,  // quadrotor
        autopilot: 3, // ArduPilot
        base_mode: 81,
        system_status: 3,
        mavlink_version: 3,
    };
    encode_v2(seq, 1, 1, &Message::Heartbeat(hb))
}

/// Inbound script: `n - 1` empty reads, then one heartbeat.
fn harness_with_heartbeat_after(n: usize) -> Harness {
    let mut reads: VecDeque<Vec<u8>> = (1..n).map(|_| Vec::new()).collect();
    reads.push_back(autopilot_heartbeat(0));
    let polls = Arc::new(Mutex::new(0));
    let written = Arc::new(Mutex::new(Vec::new()));

    let mut link = TelemetryLink::new(LinkConfig::default());
    link.attach(Box::new(ScriptedTransport {
        reads,
        polls: polls.clone(),
        written: written.clone(),
    }));
    Harness {
        link,
        polls,
        written,
    }
}

fn sent_messages(written: &[u8]) -> Vec<Message> {
    let mut parser = FrameParser::new();
    parser.push(written);
    std::iter::from_fn(|| parser.next_message())
        .map(|r| r.expect("well-formed outbound frame").message)
        .collect()
}

fn count_landing_targets(written: &[u8]) -> usize {
    sent_messages(written)
        .iter()
        .filter(|m| matches!(m, Message::LandingTarget(_)))
        .count()
}

#[test]
fn connects_after_heartbeat_on_nth_poll() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut link = TelemetryLink::new(LinkConfig::default());
    assert_eq!(link.state(), LinkState::Disconnected);

    let mut h = harness_with_heartbeat_after(5);
    assert_eq!(h.link.state(), LinkState::AwaitingHeartbeat);

    let report = LandingTarget::body_position(10, 1.0, 0.0, 0.0);
    for _ in 0..4 {
        assert_eq!(h.link.poll().expect("poll"), LinkState::AwaitingHeartbeat);
        assert!(matches!(
            h.link.send_landing_target(&report),
            Err(LinkError::NotConnected)
        ));
    }
    assert_eq!(count_landing_targets(&h.written.lock()), 0);

    let state = h.link.poll().expect("poll");
    let LinkState::Connected(endpoint) = state else {
        panic!("expected connected, got {state:?}");
    };
    assert_eq!((endpoint.system_id, endpoint.component_id), (1, 1));
    assert_eq!(*h.polls.lock(), 5);

    h.link.send_landing_target(&report).expect("send");
    for _ in 0..3 {
        h.link.poll().expect("poll");
    }
    assert_eq!(h.link.handshake_count(), 1);
    assert_eq!(h.link.reports_sent(), 1);
    assert_eq!(count_landing_targets(&h.written.lock()), 1);

    link.close();
    assert!(matches!(
        link.send_landing_target(&report),
        Err(LinkError::NotConnected)
    ));
}

#[test]
fn blocking_wait_returns_endpoint() {
    let mut h = harness_with_heartbeat_after(3);
    let endpoint = h
        .link
        .wait_for_heartbeat(None, || false)
        .expect("heartbeat");
    assert_eq!(endpoint.system_id, 1);
    assert_eq!(*h.polls.lock(), 3);
    assert_eq!(h.link.handshake_count(), 1);
}

#[test]
fn wait_times_out_and_cancels() {
    let mut link = TelemetryLink::new(LinkConfig::default());
    link.attach(Box::new(ScriptedTransport {
        reads: VecDeque::new(),
        polls: Arc::new(Mutex::new(0)),
        written: Arc::new(Mutex::new(Vec::new())),
    }));
    let err = link
        .wait_for_heartbeat(Some(Duration::from_millis(20)), || false)
        .unwrap_err();
    assert!(matches!(err, LinkError::HeartbeatTimeout(_)));
    assert_eq!(link.state(), LinkState::AwaitingHeartbeat);

    let err = link.wait_for_heartbeat(None, || true).unwrap_err();
    assert!(matches!(err, LinkError::Cancelled));
}

#[test]
fn companion_heartbeats_do_not_connect() {
    let own = encode_v2(0, 1, 191, &Message::Heartbeat(Heartbeat::onboard_controller()));
    let mut link = TelemetryLink::new(LinkConfig::default());
    link.attach(Box::new(ScriptedTransport {
        reads: VecDeque::from(vec![own]),
        polls: Arc::new(Mutex::new(0)),
        written: Arc::new(Mutex::new(Vec::new())),
    }));
    assert_eq!(link.poll().expect("poll"), LinkState::AwaitingHeartbeat);
}

#[test]
fn own_heartbeat_and_loss_detection_follow_the_clock() {
    let mut h = harness_with_heartbeat_after(1);
    let t0 = Instant::now();
    assert!(matches!(
        h.link.poll_at(t0).expect("poll"),
        LinkState::Connected(_)
    ));
    // one heartbeat right after connecting, the next one a second later
    h.link.poll_at(t0 + Duration::from_millis(500)).expect("poll");
    h.link.poll_at(t0 + Duration::from_millis(1000)).expect("poll");
    let heartbeats = sent_messages(&h.written.lock())
        .iter()
        .filter(|m| matches!(m, Message::Heartbeat(_)))
        .count();
    assert_eq!(heartbeats, 2);

    assert!(!h.link.heartbeat_lost());
    h.link.poll_at(t0 + Duration::from_secs(4)).expect("poll");
    assert!(h.link.heartbeat_lost());
    // still connected: loss is reported, not a state change
    assert!(h.link.is_connected());
}

#[test]
fn landing_target_on_the_wire() {
    let mut h = harness_with_heartbeat_after(1);
    h.link.poll().expect("poll");
    let report = LandingTarget::body_position(123_456, 1.0, -0.25, 0.5);
    h.link.send_landing_target(&report).expect("send");

    let sent = sent_messages(&h.written.lock());
    let Some(Message::LandingTarget(lt)) = sent.last() else {
        panic!("last frame is not a landing target: {sent:?}");
    };
    assert_eq!(lt.time_usec, 123_456);
    assert_eq!((lt.x, lt.y, lt.z), (1.0, -0.25, 0.5));
    assert_eq!(lt.position_valid, 1);
    assert_eq!(lt.frame, 8);
    assert_eq!(lt.target_type, 2);
    assert_eq!((lt.angle_x, lt.angle_y, lt.size_x, lt.size_y), (0.0, 0.0, 0.0, 0.0));
}

#[test]
fn connected_poll_never_waits_on_a_quiet_link() {
    let mut h = harness_with_heartbeat_after(1);
    assert!(matches!(h.link.poll().expect("poll"), LinkState::Connected(_)));
    let reads = *h.polls.lock();
    for _ in 0..5 {
        h.link.poll().expect("poll");
    }
    assert_eq!(*h.polls.lock(), reads);
}

#[test]
fn connected_poll_drains_the_backlog() {
    // a heartbeat behind more than one read buffer of line noise
    let mut backlog = vec![0u8; 2000];
    backlog.extend(autopilot_heartbeat(1));
    let mut link = TelemetryLink::new(LinkConfig::default());
    link.attach(Box::new(ScriptedTransport {
        reads: VecDeque::from(vec![autopilot_heartbeat(0), backlog]),
        polls: Arc::new(Mutex::new(0)),
        written: Arc::new(Mutex::new(Vec::new())),
    }));

    let t0 = Instant::now();
    assert!(matches!(link.poll_at(t0).expect("poll"), LinkState::Connected(_)));
    link.poll_at(t0 + Duration::from_secs(4)).expect("poll");
    assert!(!link.heartbeat_lost());
    link.poll_at(t0 + Duration::from_secs(8)).expect("poll");
    assert!(link.heartbeat_lost());
}
