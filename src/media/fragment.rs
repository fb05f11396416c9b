//! RTP packetization of encoded frames
//!
//! A frame larger than the stream MTU is split into several packets sharing
//! the frame's timestamp. Only the last packet of a frame carries the marker
//! bit. When SCMS-T is active every packet starts with the content protection
//! header byte, which counts against the MTU.

use super::MediaFrame;
use crate::constants::MEDIA_PAYLOAD_TYPE;

/// Size of the fixed RTP header
pub const RTP_HEADER_SIZE: usize = 12;

const RTP_VERSION: u8 = 0x80;
const RTP_MARKER: u8 = 0x80;

/// One media packet ready for the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaPacket<'a> {
    /// RTP header
    pub header: [u8; RTP_HEADER_SIZE],
    /// SCMS-T content protection header, sent before the payload
    pub cp_header: Option<u8>,
    /// Payload bytes
    pub payload: &'a [u8],
}

impl MediaPacket<'_> {
    /// Marker bit, set on the last packet of a frame
    #[must_use]
    pub const fn marker(&self) -> bool {
        self.header[1] & RTP_MARKER != 0
    }

    /// RTP sequence number
    #[must_use]
    pub const fn sequence(&self) -> u16 {
        u16::from_be_bytes([self.header[2], self.header[3]])
    }

    /// RTP timestamp
    #[must_use]
    pub const fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.header[4], self.header[5], self.header[6], self.header[7]])
    }

    /// Bytes after the RTP header
    #[must_use]
    pub const fn body_len(&self) -> usize {
        self.payload.len() + if self.cp_header.is_some() { 1 } else { 0 }
    }
}

/// RTP sequence state of one stream
#[derive(Debug, Default)]
pub struct Packetizer {
    sequence: u16,
}

impl Packetizer {
    /// Create a packetizer starting at sequence number 0
    #[must_use]
    pub const fn new() -> Self {
        Self { sequence: 0 }
    }

    /// Sequence number of the next packet
    #[must_use]
    pub const fn next_sequence(&self) -> u16 {
        self.sequence
    }

    /// Split `frame` into packets of at most `stream_mtu` bytes after the RTP
    /// header
    ///
    /// Returns `None` if the MTU leaves no room for payload.
    pub fn packets<'a>(
        &'a mut self,
        frame: &'a MediaFrame,
        stream_mtu: u16,
        cp_header: Option<u8>,
    ) -> Option<Packets<'a>> {
        let overhead = usize::from(cp_header.is_some());
        let chunk = usize::from(stream_mtu).checked_sub(overhead).filter(|&n| n > 0)?;
        Some(Packets {
            sequence: &mut self.sequence,
            chunks: frame.payload.chunks(chunk),
            timestamp: frame.timestamp,
            cp_header,
        })
    }
}

/// Iterator over the packets of one frame
pub struct Packets<'a> {
    sequence: &'a mut u16,
    chunks: core::slice::Chunks<'a, u8>,
    timestamp: u32,
    cp_header: Option<u8>,
}

impl<'a> Iterator for Packets<'a> {
    type Item = MediaPacket<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let payload = self.chunks.next()?;
        let last = self.chunks.len() == 0;
        let mut header = [0u8; RTP_HEADER_SIZE];
        header[0] = RTP_VERSION;
        header[1] = MEDIA_PAYLOAD_TYPE | if last { RTP_MARKER } else { 0 };
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        *self.sequence = self.sequence.wrapping_add(1);
        Some(MediaPacket {
            header,
            cp_header: self.cp_header,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_frame_single_packet() {
        let mut packetizer = Packetizer::new();
        let frame = MediaFrame::new(0x0102_0304, 2, &[0x02, 1, 2, 3]).unwrap();
        let packets: std::vec::Vec<_> = packetizer.packets(&frame, 660, None).unwrap().collect();
        assert_eq!(packets.len(), 1);
        let packet = packets[0];
        assert!(packet.marker());
        assert_eq!(packet.header[0], 0x80);
        assert_eq!(packet.header[1] & 0x7F, MEDIA_PAYLOAD_TYPE);
        assert_eq!(packet.sequence(), 0);
        assert_eq!(packet.timestamp(), 0x0102_0304);
        assert_eq!(packet.header[8..], [0, 0, 0, 0]);
        assert_eq!(packet.payload, &[0x02, 1, 2, 3]);
        assert_eq!(packetizer.next_sequence(), 1);
    }

    #[test]
    fn test_large_frame_fragmented() {
        let mut packetizer = Packetizer::new();
        let payload = [0x55u8; 250];
        let frame = MediaFrame::new(960, 5, &payload).unwrap();
        let packets: std::vec::Vec<_> = packetizer.packets(&frame, 100, Some(0x00)).unwrap().collect();

        assert_eq!(packets.len(), 3);
        assert_eq!(packets.iter().map(|p| p.payload.len()).sum::<usize>(), 250);
        assert!(packets.iter().all(|p| p.body_len() <= 100));
        assert!(packets.iter().all(|p| p.timestamp() == 960));
        assert!(packets.iter().all(|p| p.cp_header == Some(0x00)));
        assert_eq!(
            packets.iter().map(MediaPacket::marker).collect::<std::vec::Vec<_>>(),
            [false, false, true]
        );
        assert_eq!(
            packets.iter().map(MediaPacket::sequence).collect::<std::vec::Vec<_>>(),
            [0, 1, 2]
        );
    }

    #[test]
    fn test_mtu_too_small() {
        let mut packetizer = Packetizer::new();
        let frame = MediaFrame::new(0, 1, &[1]).unwrap();
        assert!(packetizer.packets(&frame, 1, Some(0)).is_none());
        assert!(packetizer.packets(&frame, 0, None).is_none());
    }

    #[test]
    fn test_sequence_wraps() {
        let mut packetizer = Packetizer { sequence: u16::MAX };
        let frame = MediaFrame::new(0, 1, &[1]).unwrap();
        let seq = packetizer.packets(&frame, 10, None).unwrap().next().unwrap().sequence();
        assert_eq!(seq, u16::MAX);
        assert_eq!(packetizer.next_sequence(), 0);
    }
}
