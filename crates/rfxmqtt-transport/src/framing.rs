//! RFXtrx packet framing
//!
//! Every packet starts with a length byte that counts the bytes following
//! it, so a packet occupies `length + 1` bytes on the wire:
//!
//! ```text
//! 0B 11 00 2A 01 23 AB CD 01 01 0F 70
//! ^^ length = 11
//! ```

use bytes::{Buf, Bytes, BytesMut};
use tracing::warn;

/// Longest packet the transceiver emits
pub const MAX_PACKET_LENGTH: u8 = 0x40;

/// Reassembles packets from a serial byte stream
#[derive(Debug, Default)]
pub struct PacketFramer {
    buf: BytesMut,
}

impl PacketFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes and return every completed packet
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(data);

        let mut packets = Vec::new();
        loop {
            let Some(&length) = self.buf.first() else {
                break;
            };

            // zero bytes are line noise between packets
            if length == 0 {
                self.buf.advance(1);
                continue;
            }
            if length > MAX_PACKET_LENGTH {
                warn!("Dropping byte 0x{:02X}: implausible packet length", length);
                self.buf.advance(1);
                continue;
            }

            let total = length as usize + 1;
            if self.buf.len() < total {
                break;
            }
            packets.push(self.buf.split_to(total).freeze());
        }
        packets
    }

    /// Bytes waiting for the rest of their packet
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Discard any partial packet
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
