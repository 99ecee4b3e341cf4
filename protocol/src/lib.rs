//! The packet ids and the fixed wire header that we use. They are used consistent
//! across the server and the client.
//!
//! Every MazeWar message is a 16 byte header followed by an optional payload of
//! `size` bytes. Multi-byte header fields travel in network byte order; the
//! single-byte params do not.

mod connection;

pub use connection::{Connection, PacketWriter};

use bytes::{Buf, BufMut, BytesMut};

/// The size of the fixed packet header on the wire.
pub const HEADER_SIZE: usize = 16;

/// The maximum payload a single packet can carry (`size` is a u16).
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

// Client -> Server.

/// Login request. param1 = requested avatar, payload = player name.
pub const LOGIN_PKT: u8 = 1;
/// Move the avatar. param1 = +1 forward / -1 back.
pub const MOVE_PKT: u8 = 2;
/// Turn the gaze. param1 = +1 counter-clockwise / -1 clockwise.
pub const TURN_PKT: u8 = 3;
/// Fire the laser along the current gaze.
pub const FIRE_PKT: u8 = 4;
/// Request a full view refresh.
pub const REFRESH_PKT: u8 = 5;
/// Chat message, payload = chat text.
pub const SEND_PKT: u8 = 6;

// Server -> Client.

/// Login accepted.
pub const READY_PKT: u8 = 7;
/// Login rejected, avatar already in use.
pub const INUSE_PKT: u8 = 8;
/// Draw one view cell. param1 = cell, param2 = column (0..3), param3 = depth.
pub const SHOW_PKT: u8 = 9;
/// Clear the client's view before a full redraw.
pub const CLEAR_PKT: u8 = 10;
/// The client's avatar was hit by a laser.
pub const ALERT_PKT: u8 = 11;
/// Scoreboard entry. param1 = avatar, param2 = score (-1 = remove entry).
pub const SCORE_PKT: u8 = 12;
/// Broadcast chat line, payload = formatted text.
pub const CHAT_PKT: u8 = 13;

/// A packet header in host byte order.
///
/// `size` is the payload length in bytes. The timestamps are stamped by the
/// sender at transmission time from a monotonic clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Packet {
    pub kind: u8,
    pub param1: i8,
    pub param2: i8,
    pub param3: i8,
    pub size: u16,
    pub timestamp_sec: u32,
    pub timestamp_nsec: u32,
}

impl Packet {
    pub fn new(kind: u8) -> Self {
        Packet {
            kind,
            ..Default::default()
        }
    }

    /// Appends the 16 byte wire image of this header to `buf`.
    ///
    /// Bytes 6..8 are padding, written as zero.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(HEADER_SIZE);
        buf.put_u8(self.kind);
        buf.put_i8(self.param1);
        buf.put_i8(self.param2);
        buf.put_i8(self.param3);
        buf.put_u16(self.size);
        buf.put_bytes(0, 2);
        buf.put_u32(self.timestamp_sec);
        buf.put_u32(self.timestamp_nsec);
    }

    /// Decodes a header from the first [`HEADER_SIZE`] bytes of `buf`.
    ///
    /// # Panics
    /// Panics if `buf` is shorter than [`HEADER_SIZE`].
    pub fn decode(buf: &[u8]) -> Packet {
        let mut buf = &buf[..HEADER_SIZE];
        let kind = buf.get_u8();
        let param1 = buf.get_i8();
        let param2 = buf.get_i8();
        let param3 = buf.get_i8();
        let size = buf.get_u16();
        buf.advance(2);
        let timestamp_sec = buf.get_u32();
        let timestamp_nsec = buf.get_u32();
        Packet {
            kind,
            param1,
            param2,
            param3,
            size,
            timestamp_sec,
            timestamp_nsec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_sixteen_bytes() {
        let mut buf = BytesMut::new();
        Packet::new(CLEAR_PKT).encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);
    }

    #[test]
    fn header_round_trip() {
        let pkt = Packet {
            kind: SCORE_PKT,
            param1: b'A' as i8,
            param2: -1,
            param3: 5,
            size: 513,
            timestamp_sec: 0xDEAD_BEEF,
            timestamp_nsec: 999_999_999,
        };
        let mut buf = BytesMut::new();
        pkt.encode(&mut buf);
        assert_eq!(Packet::decode(&buf), pkt);
    }

    #[test]
    fn multi_byte_fields_are_big_endian() {
        let pkt = Packet {
            kind: CHAT_PKT,
            size: 0x0102,
            timestamp_sec: 0x0304_0506,
            timestamp_nsec: 0x0708_090A,
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        pkt.encode(&mut buf);
        assert_eq!(&buf[4..6], &[0x01, 0x02]);
        assert_eq!(&buf[6..8], &[0, 0]);
        assert_eq!(&buf[8..12], &[0x03, 0x04, 0x05, 0x06]);
        assert_eq!(&buf[12..16], &[0x07, 0x08, 0x09, 0x0A]);
    }

    #[test]
    fn negative_params_survive() {
        let pkt = Packet {
            kind: MOVE_PKT,
            param1: -1,
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        pkt.encode(&mut buf);
        assert_eq!(Packet::decode(&buf).param1, -1);
    }
}
