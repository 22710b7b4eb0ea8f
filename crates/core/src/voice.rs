//! The datagram voice packet format: a fixed 12-byte header plus an opaque
//! encoded-audio payload the relay never inspects.
//!
//! Grounded in `original_source/include/audio` (the header layout the
//! distillation dropped but datagram relaying can't function without) and
//! spec.md §6's `[0, 2048]` size bound.

use crate::error::{Error, Result};

pub const MAX_DATAGRAM_LEN: usize = 2048;
const HEADER_LEN: usize = 12;

/// A parsed voice datagram, borrowing its payload from the socket's receive
/// buffer.
#[derive(Debug, Clone, Copy)]
pub struct VoicePacket<'a> {
    pub seq: u32,
    pub timestamp: u32,
    pub user_id: u32,
    pub payload: &'a [u8],
}

impl<'a> VoicePacket<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() > MAX_DATAGRAM_LEN {
            return Err(Error::DatagramTooLarge(bytes.len(), MAX_DATAGRAM_LEN));
        }
        if bytes.len() < HEADER_LEN {
            return Err(Error::Channel(format!(
                "datagram of {} bytes shorter than the {}-byte voice header",
                bytes.len(),
                HEADER_LEN
            )));
        }
        Ok(Self {
            seq: u32::from_be_bytes(bytes[0..4].try_into().unwrap()),
            timestamp: u32::from_be_bytes(bytes[4..8].try_into().unwrap()),
            user_id: u32::from_be_bytes(bytes[8..12].try_into().unwrap()),
            payload: &bytes[HEADER_LEN..],
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.user_id.to_be_bytes());
        out.extend_from_slice(self.payload);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let packet = VoicePacket {
            seq: 7,
            timestamp: 123456,
            user_id: 42,
            payload: b"opus-frame",
        };
        let bytes = packet.encode();
        let parsed = VoicePacket::parse(&bytes).unwrap();
        assert_eq!(parsed.seq, 7);
        assert_eq!(parsed.timestamp, 123456);
        assert_eq!(parsed.user_id, 42);
        assert_eq!(parsed.payload, b"opus-frame");
    }

    #[test]
    fn rejects_oversized_datagram() {
        let bytes = vec![0u8; MAX_DATAGRAM_LEN + 1];
        assert!(matches!(
            VoicePacket::parse(&bytes),
            Err(Error::DatagramTooLarge(_, _))
        ));
    }

    #[test]
    fn rejects_truncated_header() {
        let bytes = vec![0u8; HEADER_LEN - 1];
        assert!(VoicePacket::parse(&bytes).is_err());
    }
}
