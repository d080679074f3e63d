use bitflags::bitflags;

use super::checksum;

/// Fixed header size in bytes: seqno(4) + ackno(4) + len(2) + flags(4) + window(2) + cksum(2).
pub const HEADER_SIZE: usize = 18;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u32 {
        const FIN = 0b0000_0001;
        const ACK = 0b0000_0010;
    }
}

/// A decoded, checksum-verified wire segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub seqno: u32,
    pub ackno: u32,
    pub flags: Flags,
    pub window: u16,
    pub data: Vec<u8>,
}

impl Segment {
    pub fn len(&self) -> usize {
        HEADER_SIZE + self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Serialises this segment into wire bytes, computing the checksum over
    /// the full frame with the checksum field held at zero.
    pub fn encode(&self) -> Vec<u8> {
        let total_len = self.len();
        let mut buf = vec![0u8; total_len];

        buf[0..4].copy_from_slice(&self.seqno.to_be_bytes());
        buf[4..8].copy_from_slice(&self.ackno.to_be_bytes());
        buf[8..10].copy_from_slice(&(total_len as u16).to_be_bytes());
        buf[10..14].copy_from_slice(&self.flags.bits().to_be_bytes());
        buf[14..16].copy_from_slice(&self.window.to_be_bytes());
        // buf[16..18] (cksum) stays zero for the checksum pass below.
        buf[HEADER_SIZE..].copy_from_slice(&self.data);

        let cksum = checksum::of(&buf);
        buf[16..18].copy_from_slice(&cksum.to_be_bytes());

        buf
    }

    /// Validates and decodes a received buffer. Rejections are silent drops
    /// at the call site (§4.1): malformed input simply yields `None`.
    pub fn decode(buf: &[u8]) -> Option<Segment> {
        if buf.len() < HEADER_SIZE {
            log::trace!("dropping segment: {} bytes shorter than header", buf.len());
            return None;
        }

        let declared_len = u16::from_be_bytes([buf[8], buf[9]]) as usize;
        if declared_len != buf.len() {
            log::trace!(
                "dropping segment: declared len {declared_len} != actual {}",
                buf.len()
            );
            return None;
        }

        let stored_cksum = u16::from_be_bytes([buf[16], buf[17]]);
        let mut zeroed = buf.to_vec();
        zeroed[16] = 0;
        zeroed[17] = 0;
        let computed = checksum::of(&zeroed);
        if computed != stored_cksum {
            log::trace!("dropping segment: checksum mismatch");
            return None;
        }

        let seqno = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let ackno = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let flags_bits = u32::from_be_bytes([buf[10], buf[11], buf[12], buf[13]]);
        let window = u16::from_be_bytes([buf[14], buf[15]]);
        let data = buf[HEADER_SIZE..].to_vec();

        Some(Segment {
            seqno,
            ackno,
            flags: Flags::from_bits_truncate(flags_bits),
            window,
            data,
        })
    }
}
