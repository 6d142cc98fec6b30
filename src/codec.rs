//! A byte-at-a-time MAVLink v1/v2 frame parser.
//!
//! Unlike a dialect-generated codec, this one does not decode every field of
//! every message -- the router only needs a frame's source/destination
//! addresses, its message id, and the raw bytes to forward unchanged. A
//! small static table (see `ADDRESSED_MESSAGES`) describes the handful of
//! message types whose payload carries a target system/component, since
//! those fields sit at dialect-specific payload offsets that the wire
//! header doesn't expose.

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use crc_any::CRCu16;

use crate::address::MavAddress;
use crate::packet::{MavlinkVersion, Packet};

const STX_V1: u8 = 0xFE;
const STX_V2: u8 = 0xFD;
const HEADER_LEN_V1: usize = 6;
const HEADER_LEN_V2: usize = 10;
const SIGNATURE_LEN: usize = 13;

bitflags! {
    /// The MAVLink v2 header's incompatibility-flags byte. An unrecognized
    /// bit here would mean a receiver that doesn't understand it MUST drop
    /// the frame; the only bit this router understands is `SIGNED`, which it
    /// only needs to know about to size the frame correctly, not to verify.
    struct IncompatFlags: u8 {
        const SIGNED = 0x01;
    }
}

/// Per-message CRC_EXTRA seed, keyed by message id, mixed into the MAVLink
/// checksum after the header+payload bytes. Only messages the router needs
/// to fully validate are listed; unknown message ids are still framed and
/// forwarded, just without payload interpretation by [`addressed_message`].
fn crc_extra(id: u32) -> Option<u8> {
    match id {
        0 => Some(50),   // HEARTBEAT
        1 => Some(124),  // SYS_STATUS
        4 => Some(237),  // PING
        30 => Some(39),  // ATTITUDE
        76 => Some(152), // COMMAND_LONG
        _ => None,
    }
}

struct AddressedMessage {
    id: u32,
    name: &'static str,
    /// Byte offset into the payload of the target system id, if the
    /// message is addressed to a specific system.
    target_system_offset: Option<usize>,
    target_component_offset: Option<usize>,
}

/// A small static table of messages the router knows how to extract a
/// destination address from. Every other message id is treated as a
/// broadcast (no destination).
const ADDRESSED_MESSAGES: &[AddressedMessage] = &[
    AddressedMessage {
        id: 0,
        name: "HEARTBEAT",
        target_system_offset: None,
        target_component_offset: None,
    },
    AddressedMessage {
        id: 4,
        name: "PING",
        target_system_offset: Some(9),
        target_component_offset: Some(10),
    },
    AddressedMessage {
        id: 76,
        name: "COMMAND_LONG",
        target_system_offset: Some(30),
        target_component_offset: Some(31),
    },
    AddressedMessage {
        id: 1,
        name: "SYS_STATUS",
        target_system_offset: None,
        target_component_offset: None,
    },
    AddressedMessage {
        id: 30,
        name: "ATTITUDE",
        target_system_offset: None,
        target_component_offset: None,
    },
];

fn lookup(id: u32) -> Option<&'static AddressedMessage> {
    ADDRESSED_MESSAGES.iter().find(|m| m.id == id)
}

fn message_name(id: u32) -> &'static str {
    lookup(id).map(|m| m.name).unwrap_or("UNKNOWN")
}

fn message_dest(id: u32, payload: &[u8]) -> Option<MavAddress> {
    let msg = lookup(id)?;
    let system = msg
        .target_system_offset
        .and_then(|off| payload.get(off).copied())?;
    let component = msg
        .target_component_offset
        .and_then(|off| payload.get(off).copied())
        .unwrap_or(0);
    Some(MavAddress::new(system, component))
}

/// Computes the MAVLink CRC-16/MCRF4XX over header+payload bytes (excluding
/// STX) plus a message-specific `CRC_EXTRA` byte.
fn checksum(bytes: &[u8], extra: u8) -> u16 {
    let mut crc = CRCu16::crc16mcrf4cc();
    crc.digest(bytes);
    crc.digest(&[extra]);
    crc.get_crc()
}

/// Parses a byte stream into framed [`Packet`]s.
///
/// Feed bytes in with [`MavlinkCodec::accept`] as they arrive from a
/// transport; each call returns any packets that became complete as a
/// result. A checksum failure (or a CRC_EXTRA-less unknown message) resyncs
/// by discarding the leading STX and resuming the search for the next one,
/// rather than giving up on the stream.
pub struct MavlinkCodec {
    buf: Vec<u8>,
}

impl MavlinkCodec {
    pub fn new() -> MavlinkCodec {
        MavlinkCodec { buf: Vec::new() }
    }

    /// Feed newly-read bytes into the codec, returning every packet that
    /// completed as a result, in the order their framing finished.
    pub fn accept(&mut self, bytes: &[u8]) -> Vec<Packet> {
        self.buf.extend_from_slice(bytes);
        let mut packets = Vec::new();
        loop {
            match self.try_parse_one() {
                ParseOutcome::Packet(packet, consumed) => {
                    self.buf.drain(..consumed);
                    packets.push(packet);
                }
                ParseOutcome::Resync(skip) => {
                    self.buf.drain(..skip);
                }
                ParseOutcome::NeedMoreData => break,
            }
        }
        packets
    }

    /// Discard any partially-framed bytes. Used when a transport can tell
    /// its peer changed mid-frame (e.g. a UDP socket multiplexing several
    /// source addresses), since a half-received frame from one peer is
    /// meaningless spliced with bytes from another.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    fn try_parse_one(&self) -> ParseOutcome {
        let stx_pos = match self.buf.iter().position(|&b| b == STX_V1 || b == STX_V2) {
            Some(pos) => pos,
            None => {
                return if self.buf.is_empty() {
                    ParseOutcome::NeedMoreData
                } else {
                    // Nothing but garbage so far; drop it, keeping only the
                    // last byte in case it's a second STX-candidate split
                    // across two reads.
                    ParseOutcome::Resync(self.buf.len())
                };
            }
        };
        if stx_pos > 0 {
            return ParseOutcome::Resync(stx_pos);
        }

        let version = match self.buf[0] {
            STX_V1 => MavlinkVersion::V1,
            STX_V2 => MavlinkVersion::V2,
            _ => unreachable!(),
        };
        let header_len = match version {
            MavlinkVersion::V1 => HEADER_LEN_V1,
            MavlinkVersion::V2 => HEADER_LEN_V2,
        };
        if self.buf.len() < header_len {
            return ParseOutcome::NeedMoreData;
        }

        let payload_len = self.buf[1] as usize;
        let (id, source, header_body_len, signature_len) = match version {
            MavlinkVersion::V1 => {
                // STX, LEN, SEQ, SYS, COMP, MSGID
                let sys = self.buf[3];
                let comp = self.buf[4];
                let id = self.buf[5] as u32;
                (id, MavAddress::new(sys, comp), HEADER_LEN_V1, 0)
            }
            MavlinkVersion::V2 => {
                // STX, LEN, INCOMPAT, COMPAT, SEQ, SYS, COMP, MSGID(3 bytes LE)
                let incompat = IncompatFlags::from_bits_truncate(self.buf[2]);
                let sys = self.buf[5];
                let comp = self.buf[6];
                let id = LittleEndian::read_u24(&self.buf[7..10]);
                let signature_len = if incompat.contains(IncompatFlags::SIGNED) {
                    SIGNATURE_LEN
                } else {
                    0
                };
                (id, MavAddress::new(sys, comp), HEADER_LEN_V2, signature_len)
            }
        };

        let total_len = header_body_len + payload_len + 2 + signature_len;
        if self.buf.len() < total_len {
            return ParseOutcome::NeedMoreData;
        }

        let payload = &self.buf[header_body_len..header_body_len + payload_len];
        let crc_bytes = &self.buf[header_body_len + payload_len..header_body_len + payload_len + 2];
        let received_crc = LittleEndian::read_u16(crc_bytes);

        let extra = match crc_extra(id) {
            Some(extra) => extra,
            None => {
                // Unknown message: we cannot validate its checksum, so trust
                // the declared length and forward the frame as-is.
                let bytes = self.buf[..total_len].to_vec();
                let dest = message_dest(id, payload);
                let packet = Packet::new(bytes, version, id, message_name(id), source, dest);
                return ParseOutcome::Packet(packet, total_len);
            }
        };

        let computed_crc = checksum(&self.buf[1..header_body_len + payload_len], extra);
        if computed_crc != received_crc {
            // Checksum mismatch; this STX was not really a frame start.
            // Resync past it and keep scanning.
            return ParseOutcome::Resync(1);
        }

        let bytes = self.buf[..total_len].to_vec();
        let dest = message_dest(id, payload);
        let packet = Packet::new(bytes, version, id, message_name(id), source, dest);
        ParseOutcome::Packet(packet, total_len)
    }
}

impl Default for MavlinkCodec {
    fn default() -> Self {
        MavlinkCodec::new()
    }
}

enum ParseOutcome {
    Packet(Packet, usize),
    Resync(usize),
    NeedMoreData,
}

/// Encode a v1 frame for `id`/`payload` from `source`, with the given
/// sequence number. Used by tests and by loopback/injection tooling; live
/// traffic is always forwarded byte-for-byte from what was received.
#[cfg(test)]
fn encode_v1(source: MavAddress, seq: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN_V1 + payload.len() + 2);
    bytes.push(STX_V1);
    bytes.push(payload.len() as u8);
    bytes.push(seq);
    bytes.push(source.system());
    bytes.push(source.component());
    bytes.push(id);
    bytes.extend_from_slice(payload);
    let extra = crc_extra(id as u32).unwrap_or(0);
    let crc = checksum(&bytes[1..], extra);
    bytes.extend_from_slice(&crc.to_le_bytes());
    bytes
}

/// Encode a v2 frame, optionally signed (appending `SIGNATURE_LEN` zero
/// bytes and setting the `SIGNED` incompat flag).
#[cfg(test)]
fn encode_v2(source: MavAddress, seq: u8, id: u32, payload: &[u8], signed: bool) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN_V2 + payload.len() + 2 + SIGNATURE_LEN);
    bytes.push(STX_V2);
    bytes.push(payload.len() as u8);
    bytes.push(if signed { IncompatFlags::SIGNED.bits() } else { 0 });
    bytes.push(0); // compat flags
    bytes.push(seq);
    bytes.push(source.system());
    bytes.push(source.component());
    bytes.push(id as u8);
    bytes.push((id >> 8) as u8);
    bytes.push((id >> 16) as u8);
    bytes.extend_from_slice(payload);
    let extra = crc_extra(id).unwrap_or(0);
    let crc = checksum(&bytes[1..], extra);
    bytes.extend_from_slice(&crc.to_le_bytes());
    if signed {
        bytes.extend_from_slice(&[0u8; SIGNATURE_LEN]);
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_single_heartbeat() {
        let source = MavAddress::new(1, 1);
        let frame = encode_v1(source, 0, 0, &[4, 0, 0, 0, 0, 0, 0, 0, 0]);
        let mut codec = MavlinkCodec::new();
        let packets = codec.accept(&frame);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].name(), "HEARTBEAT");
        assert_eq!(packets[0].source(), source);
        assert_eq!(packets[0].version(), MavlinkVersion::V1);
    }

    #[test]
    fn parses_across_multiple_reads() {
        let source = MavAddress::new(2, 1);
        let frame = encode_v1(source, 0, 0, &[0; 9]);
        let mut codec = MavlinkCodec::new();
        assert!(codec.accept(&frame[..4]).is_empty());
        let packets = codec.accept(&frame[4..]);
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn resyncs_past_garbage_before_stx() {
        let source = MavAddress::new(3, 1);
        let frame = encode_v1(source, 0, 0, &[0; 9]);
        let mut garbage = vec![0x00, 0x11, 0x22];
        garbage.extend_from_slice(&frame);
        let mut codec = MavlinkCodec::new();
        let packets = codec.accept(&garbage);
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn resyncs_past_a_corrupted_frame() {
        let source = MavAddress::new(4, 1);
        let mut frame = encode_v1(source, 0, 0, &[0; 9]);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF; // corrupt the checksum
        let good = encode_v1(source, 1, 0, &[0; 9]);
        frame.extend_from_slice(&good);
        let mut codec = MavlinkCodec::new();
        let packets = codec.accept(&frame);
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn extracts_destination_from_ping_payload() {
        let source = MavAddress::new(1, 1);
        let mut payload = vec![0u8; 14];
        payload[9] = 42; // target_system
        payload[10] = 7; // target_component
        let frame = encode_v1(source, 0, 4, &payload);
        let mut codec = MavlinkCodec::new();
        let packets = codec.accept(&frame);
        assert_eq!(packets[0].dest(), Some(MavAddress::new(42, 7)));
    }

    #[test]
    fn clear_discards_a_partial_frame() {
        let source = MavAddress::new(6, 1);
        let frame = encode_v1(source, 0, 0, &[0; 9]);
        let mut codec = MavlinkCodec::new();
        assert!(codec.accept(&frame[..4]).is_empty());
        codec.clear();
        assert!(codec.accept(&frame[4..]).is_empty());
    }

    #[test]
    fn parses_an_unsigned_v2_heartbeat() {
        let source = MavAddress::new(7, 1);
        let frame = encode_v2(source, 0, 0, &[4, 0, 0, 0, 0, 0, 0, 0, 0], false);
        let mut codec = MavlinkCodec::new();
        let packets = codec.accept(&frame);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].name(), "HEARTBEAT");
        assert_eq!(packets[0].version(), MavlinkVersion::V2);
        assert_eq!(packets[0].bytes().len(), frame.len());
    }

    #[test]
    fn signed_v2_frame_includes_the_trailing_signature_in_the_framed_bytes() {
        // A signed v2 frame carries a 13-byte signature after the checksum;
        // failing to account for it would make the codec treat the
        // signature's leading bytes as the start of the next frame.
        let source = MavAddress::new(7, 2);
        let frame = encode_v2(source, 0, 0, &[4, 0, 0, 0, 0, 0, 0, 0, 0], true);
        let mut codec = MavlinkCodec::new();
        let packets = codec.accept(&frame);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].bytes().len(), frame.len());
    }

    #[test]
    fn two_signed_v2_frames_back_to_back_both_parse() {
        let source = MavAddress::new(7, 3);
        let mut stream = encode_v2(source, 0, 0, &[4, 0, 0, 0, 0, 0, 0, 0, 0], true);
        stream.extend(encode_v2(source, 1, 0, &[4, 0, 0, 0, 0, 0, 0, 0, 0], true));
        let mut codec = MavlinkCodec::new();
        let packets = codec.accept(&stream);
        assert_eq!(packets.len(), 2);
    }

    #[test]
    fn unknown_message_id_is_forwarded_without_validation() {
        let source = MavAddress::new(5, 1);
        let mut bytes = vec![STX_V1, 3, 0, source.system(), source.component(), 250];
        bytes.extend_from_slice(&[1, 2, 3]);
        bytes.extend_from_slice(&[0xAB, 0xCD]); // bogus crc, never checked
        let mut codec = MavlinkCodec::new();
        let packets = codec.accept(&bytes);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].name(), "UNKNOWN");
    }
}
