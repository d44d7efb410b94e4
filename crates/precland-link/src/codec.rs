//! MAVLink wire codec for the handful of messages the link speaks.
//!
//! Outbound frames are MAVLink 2. The parser accepts MAVLink 1 and 2,
//! skips v2 signatures, and resynchronises on corrupt input.

use crate::crc::frame_crc;

pub const STX_V1: u8 = 0xfe;
pub const STX_V2: u8 = 0xfd;

const V1_HEADER_LEN: usize = 6;
const V2_HEADER_LEN: usize = 10;
const CHECKSUM_LEN: usize = 2;
const SIGNATURE_LEN: usize = 13;
const INCOMPAT_SIGNED: u8 = 0x01;

/// `MAV_TYPE_ONBOARD_CONTROLLER`
pub const MAV_TYPE_ONBOARD_CONTROLLER: u8 = 18;
/// `MAV_AUTOPILOT_INVALID`: sender is not a flight controller.
pub const MAV_AUTOPILOT_INVALID: u8 = 8;
/// `MAV_STATE_ACTIVE`
pub const MAV_STATE_ACTIVE: u8 = 4;
/// `MAV_FRAME_BODY_NED`
pub const MAV_FRAME_BODY_NED: u8 = 8;
/// `LANDING_TARGET_TYPE_VISION_FIDUCIAL`
pub const LANDING_TARGET_TYPE_VISION_FIDUCIAL: u8 = 2;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("checksum mismatch for message {message_id}: expected {expected:#06x}, got {received:#06x}")]
    Checksum {
        message_id: u32,
        expected: u16,
        received: u16,
    },
    #[error("no definition for message id {0}")]
    UnknownMessage(u32),
}

/// `HEARTBEAT` (#0).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Heartbeat {
    pub custom_mode: u32,
    pub mav_type: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub system_status: u8,
    pub mavlink_version: u8,
}

impl Heartbeat {
    pub const ID: u32 = 0;
    pub const CRC_EXTRA: u8 = 50;
    pub const LEN: usize = 9;

    /// Heartbeat of this companion computer.
    pub fn onboard_controller() -> Self {
        Self {
            custom_mode: 0,
            mav_type: MAV_TYPE_ONBOARD_CONTROLLER,
            autopilot: MAV_AUTOPILOT_INVALID,
            base_mode: 0,
            system_status: MAV_STATE_ACTIVE,
            mavlink_version: 3,
        }
    }

    /// True when the sender identifies as an autopilot.
    pub fn is_flight_controller(&self) -> bool {
        self.autopilot != MAV_AUTOPILOT_INVALID
    }

    fn encode(&self, out: &mut [u8; Self::LEN]) {
        out[0..4].copy_from_slice(&self.custom_mode.to_le_bytes());
        out[4] = self.mav_type;
        out[5] = self.autopilot;
        out[6] = self.base_mode;
        out[7] = self.system_status;
        out[8] = self.mavlink_version;
    }

    fn decode(p: &[u8; Self::LEN]) -> Self {
        Self {
            custom_mode: u32::from_le_bytes([p[0], p[1], p[2], p[3]]),
            mav_type: p[4],
            autopilot: p[5],
            base_mode: p[6],
            system_status: p[7],
            mavlink_version: p[8],
        }
    }
}

/// `LANDING_TARGET` (#149), including the MAVLink 2 extension fields.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LandingTarget {
    pub time_usec: u64,
    pub angle_x: f32,
    pub angle_y: f32,
    pub distance: f32,
    pub size_x: f32,
    pub size_y: f32,
    pub target_num: u8,
    pub frame: u8,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub q: [f32; 4],
    pub target_type: u8,
    pub position_valid: u8,
}

impl LandingTarget {
    pub const ID: u32 = 149;
    pub const CRC_EXTRA: u8 = 200;
    pub const LEN: usize = 60;

    /// Body-frame (forward, right, down) position fix in meters.
    pub fn body_position(time_usec: u64, forward: f32, right: f32, down: f32) -> Self {
        Self {
            time_usec,
            angle_x: 0.0,
            angle_y: 0.0,
            distance: (forward * forward + right * right + down * down).sqrt(),
            size_x: 0.0,
            size_y: 0.0,
            target_num: 0,
            frame: MAV_FRAME_BODY_NED,
            x: forward,
            y: right,
            z: down,
            q: [0.0; 4],
            target_type: LANDING_TARGET_TYPE_VISION_FIDUCIAL,
            position_valid: 1,
        }
    }

    fn encode(&self, out: &mut [u8; Self::LEN]) {
        out[0..8].copy_from_slice(&self.time_usec.to_le_bytes());
        let floats = [
            (8, self.angle_x),
            (12, self.angle_y),
            (16, self.distance),
            (20, self.size_x),
            (24, self.size_y),
            (30, self.x),
            (34, self.y),
            (38, self.z),
            (42, self.q[0]),
            (46, self.q[1]),
            (50, self.q[2]),
            (54, self.q[3]),
        ];
        for (at, v) in floats {
            out[at..at + 4].copy_from_slice(&v.to_le_bytes());
        }
        out[28] = self.target_num;
        out[29] = self.frame;
        out[58] = self.target_type;
        out[59] = self.position_valid;
    }

    fn decode(p: &[u8; Self::LEN]) -> Self {
        let f = |at: usize| f32::from_le_bytes([p[at], p[at + 1], p[at + 2], p[at + 3]]);
        let mut time = [0u8; 8];
        time.copy_from_slice(&p[0..8]);
        Self {
            time_usec: u64::from_le_bytes(time),
            angle_x: f(8),
            angle_y: f(12),
            distance: f(16),
            size_x: f(20),
            size_y: f(24),
            target_num: p[28],
            frame: p[29],
            x: f(30),
            y: f(34),
            z: f(38),
            q: [f(42), f(46), f(50), f(54)],
            target_type: p[58],
            position_valid: p[59],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Message {
    Heartbeat(Heartbeat),
    LandingTarget(LandingTarget),
}

impl Message {
    pub fn id(&self) -> u32 {
        match self {
            Message::Heartbeat(_) => Heartbeat::ID,
            Message::LandingTarget(_) => LandingTarget::ID,
        }
    }

    fn crc_extra(&self) -> u8 {
        match self {
            Message::Heartbeat(_) => Heartbeat::CRC_EXTRA,
            Message::LandingTarget(_) => LandingTarget::CRC_EXTRA,
        }
    }

    /// Full-length payload, before MAVLink 2 zero trimming.
    fn payload(&self) -> Vec<u8> {
        match self {
            Message::Heartbeat(m) => {
                let mut buf = [0u8; Heartbeat::LEN];
                m.encode(&mut buf);
                buf.to_vec()
            }
            Message::LandingTarget(m) => {
                let mut buf = [0u8; LandingTarget::LEN];
                m.encode(&mut buf);
                buf.to_vec()
            }
        }
    }

    /// `(CRC_EXTRA, full payload length)` for ids this codec understands.
    fn definition(message_id: u32) -> Option<(u8, usize)> {
        match message_id {
            Heartbeat::ID => Some((Heartbeat::CRC_EXTRA, Heartbeat::LEN)),
            LandingTarget::ID => Some((LandingTarget::CRC_EXTRA, LandingTarget::LEN)),
            _ => None,
        }
    }

    /// Decode a payload; truncated payloads are zero-extended.
    fn decode(message_id: u32, payload: &[u8]) -> Option<Self> {
        fn extend<const N: usize>(payload: &[u8]) -> [u8; N] {
            let mut buf = [0u8; N];
            let n = payload.len().min(N);
            buf[..n].copy_from_slice(&payload[..n]);
            buf
        }
        match message_id {
            Heartbeat::ID => Some(Message::Heartbeat(Heartbeat::decode(&extend(payload)))),
            LandingTarget::ID => Some(Message::LandingTarget(LandingTarget::decode(&extend(
                payload,
            )))),
            _ => None,
        }
    }
}

/// Sender and sequencing fields of a received frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub sequence: u8,
    pub system_id: u8,
    pub component_id: u8,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReceivedMessage {
    pub header: FrameHeader,
    pub message: Message,
}

/// Encode `message` as a MAVLink 2 frame.
pub fn encode_v2(sequence: u8, system_id: u8, component_id: u8, message: &Message) -> Vec<u8> {
    let mut payload = message.payload();
    // trailing zero bytes are implied; at least one byte is kept
    while payload.len() > 1 && payload.last() == Some(&0) {
        payload.pop();
    }

    let id = message.id().to_le_bytes();
    let mut frame = Vec::with_capacity(V2_HEADER_LEN + payload.len() + CHECKSUM_LEN);
    frame.extend_from_slice(&[
        STX_V2,
        payload.len() as u8,
        0, // incompat flags
        0, // compat flags
        sequence,
        system_id,
        component_id,
        id[0],
        id[1],
        id[2],
    ]);
    frame.extend_from_slice(&payload);
    let crc = frame_crc(&frame[1..], message.crc_extra());
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Encode `message` as a MAVLink 1 frame (message id must fit in a byte).
pub fn encode_v1(sequence: u8, system_id: u8, component_id: u8, message: &Message) -> Vec<u8> {
    let payload = message.payload();
    let mut frame = Vec::with_capacity(V1_HEADER_LEN + payload.len() + CHECKSUM_LEN);
    frame.extend_from_slice(&[
        STX_V1,
        payload.len() as u8,
        sequence,
        system_id,
        component_id,
        message.id() as u8,
    ]);
    frame.extend_from_slice(&payload);
    let crc = frame_crc(&frame[1..], message.crc_extra());
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Incremental frame parser over an arbitrary byte stream.
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet consumed.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Next complete frame, `None` when more bytes are needed.
    ///
    /// Errors are reported once per offending frame; parsing continues
    /// after them.
    pub fn next_message(&mut self) -> Option<Result<ReceivedMessage, CodecError>> {
        loop {
            let start = self.buf.iter().position(|&b| b == STX_V1 || b == STX_V2);
            let Some(start) = start else {
                self.buf.clear();
                return None;
            };
            self.buf.drain(..start);

            let (header_len, version) = match self.buf[0] {
                STX_V2 => (V2_HEADER_LEN, 2),
                _ => (V1_HEADER_LEN, 1),
            };
            if self.buf.len() < header_len {
                return None;
            }
            let len = self.buf[1] as usize;
            let (header, message_id, trailer) = if version == 2 {
                let signed = self.buf[2] & INCOMPAT_SIGNED != 0;
                let header = FrameHeader {
                    version,
                    sequence: self.buf[4],
                    system_id: self.buf[5],
                    component_id: self.buf[6],
                };
                let id = u32::from_le_bytes([self.buf[7], self.buf[8], self.buf[9], 0]);
                (header, id, if signed { SIGNATURE_LEN } else { 0 })
            } else {
                let header = FrameHeader {
                    version,
                    sequence: self.buf[2],
                    system_id: self.buf[3],
                    component_id: self.buf[4],
                };
                (header, self.buf[5] as u32, 0)
            };

            let crc_at = header_len + len;
            let total = crc_at + CHECKSUM_LEN + trailer;
            if self.buf.len() < total {
                return None;
            }

            let Some((crc_extra, _)) = Message::definition(message_id) else {
                self.buf.drain(..total);
                return Some(Err(CodecError::UnknownMessage(message_id)));
            };

            let expected = frame_crc(&self.buf[1..crc_at], crc_extra);
            let received = u16::from_le_bytes([self.buf[crc_at], self.buf[crc_at + 1]]);
            if expected != received {
                // false start or corruption: rescan from the next byte
                self.buf.drain(..1);
                return Some(Err(CodecError::Checksum {
                    message_id,
                    expected,
                    received,
                }));
            }

            let message = Message::decode(message_id, &self.buf[header_len..crc_at]);
            self.buf.drain(..total);
            if let Some(message) = message {
                return Some(Ok(ReceivedMessage { header, message }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(bytes: &[u8]) -> Vec<Result<ReceivedMessage, CodecError>> {
        let mut parser = FrameParser::new();
        parser.push(bytes);
        std::iter::from_fn(|| parser.next_message()).collect()
    }

    #[test]
    fn heartbeat_v2_layout_and_zero_trim() {
        let frame = encode_v2(7, 1, 191, &Message::Heartbeat(Heartbeat::onboard_controller()));
        // custom_mode 0, type 18, autopilot 8, base_mode 0, status 4, version 3: nothing to trim
        assert_eq!(&frame[..10], &[0xfd, 9, 0, 0, 7, 1, 191, 0, 0, 0]);
        assert_eq!(&frame[10..19], &[0, 0, 0, 0, 18, 8, 0, 4, 3]);
        assert_eq!(frame.len(), 21);
    }

    #[test]
    fn landing_target_trims_trailing_zeros_and_decodes() {
        let lt = LandingTarget::body_position(1_000_000, 1.0, 0.0, 0.0);
        let frame = encode_v2(0, 1, 191, &Message::LandingTarget(lt));
        // position_valid = 1 is the last byte, so the full payload is kept
        assert_eq!(frame[1] as usize, LandingTarget::LEN);
        assert_eq!(&frame[7..10], &[149, 0, 0]);
        assert_eq!(frame[10 + 29], MAV_FRAME_BODY_NED);
        assert_eq!(frame[10 + 58], LANDING_TARGET_TYPE_VISION_FIDUCIAL);

        let parsed = parse_all(&frame);
        assert_eq!(parsed.len(), 1);
        let msg = parsed[0].clone().expect("valid frame");
        assert_eq!(msg.message, Message::LandingTarget(lt));
        assert_eq!(msg.header.system_id, 1);
        assert_eq!(msg.header.component_id, 191);
    }

    #[test]
    fn truncated_payload_is_zero_extended() {
        let hb = Heartbeat {
            custom_mode: 0,
            mav_type: 2,
            autopilot: 3,
            base_mode: 0,
            system_status: 0,
            mavlink_version: 0,
        };
        let frame = encode_v2(0, 1, 1, &Message::Heartbeat(hb));
        assert_eq!(frame[1], 6);
        let parsed = parse_all(&frame);
        assert_eq!(parsed[0].clone().expect("ok").message, Message::Heartbeat(hb));
    }

    #[test]
    fn v1_heartbeat_is_accepted() {
        let hb = Heartbeat {
            custom_mode: 4,
            mav_type: 2,
            autopilot: 3,
            base_mode: 81,
            system_status: 3,
            mavlink_version: 3,
        };
        let frame = encode_v1(12, 1, 1, &Message::Heartbeat(hb));
        assert_eq!(frame.len(), 6 + 9 + 2);
        let parsed = parse_all(&frame);
        let msg = parsed[0].clone().expect("ok");
        assert_eq!(msg.header.version, 1);
        assert_eq!(msg.header.sequence, 12);
        assert_eq!(msg.message, Message::Heartbeat(hb));
        assert!(hb.is_flight_controller());
    }

    #[test]
    fn resyncs_after_garbage_and_corruption() {
        let good = encode_v2(1, 1, 1, &Message::Heartbeat(Heartbeat::onboard_controller()));
        let mut corrupt = good.clone();
        corrupt[12] ^= 0x40;

        let mut stream = vec![0x00, 0x13, 0x37];
        stream.extend_from_slice(&corrupt);
        stream.extend_from_slice(&good);

        let parsed = parse_all(&stream);
        assert!(matches!(parsed[0], Err(CodecError::Checksum { message_id: 0, .. })));
        let oks: Vec<_> = parsed.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(oks.len(), 1);
        assert_eq!(oks[0].header.sequence, 1);
    }

    #[test]
    fn unknown_and_signed_frames() {
        // unknown message id 30 (ATTITUDE), CRC not checkable: skipped whole
        let mut unknown = vec![0xfd, 2, 0, 0, 0, 1, 1, 30, 0, 0, 0xaa, 0xbb, 0x00, 0x00];
        // signed heartbeat: 13 signature bytes after the checksum
        let mut signed = encode_v2(3, 1, 1, &Message::Heartbeat(Heartbeat::onboard_controller()));
        signed[2] = INCOMPAT_SIGNED;
        let crc = frame_crc(&signed[1..signed.len() - 2], Heartbeat::CRC_EXTRA);
        let n = signed.len();
        signed[n - 2..].copy_from_slice(&crc.to_le_bytes());
        signed.extend_from_slice(&[0u8; SIGNATURE_LEN]);
        unknown.extend_from_slice(&signed);

        let parsed = parse_all(&unknown);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], Err(CodecError::UnknownMessage(30)));
        assert_eq!(parsed[1].clone().expect("ok").header.sequence, 3);
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let frame = encode_v2(0, 1, 1, &Message::Heartbeat(Heartbeat::onboard_controller()));
        let mut parser = FrameParser::new();
        parser.push(&frame[..8]);
        assert!(parser.next_message().is_none());
        parser.push(&frame[8..]);
        assert!(matches!(parser.next_message(), Some(Ok(_))));
        assert_eq!(parser.pending(), 0);
    }
}
