//! RTP header parsing per spec.md §3/§6.
//!
//! Only the subset of RFC 3550 actually exercised by the multiplexer is
//! supported: no padding, no extension header, no CSRC list. Packets that
//! set any of those bits are rejected as malformed rather than partially
//! decoded, matching §4.1's failure semantics.

use bytes::{Buf, Bytes};

use crate::error::RtpParseError;

/// One complex I/Q sample: interleaved little-endian float32 (real, imag).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Complex32 {
    pub re: f32,
    pub im: f32,
}

impl Complex32 {
    pub const ZERO: Self = Self { re: 0.0, im: 0.0 };

    pub fn magnitude(&self) -> f32 {
        (self.re * self.re + self.im * self.im).sqrt()
    }
}

const HEADER_LEN: usize = 12;

/// A parsed RTP packet carrying complex baseband samples.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub marker: bool,
    pub payload_type: u8,
    pub samples: Vec<Complex32>,
}

/// Parses one UDP datagram as an RTP packet carrying `samples_per_packet`
/// complex float32 samples.
///
/// The header fields are big-endian per RFC 3550; the multiplexer's I/Q
/// payload convention is little-endian, as stated in spec.md §6.
pub fn parse_rtp_packet(mut buf: Bytes, samples_per_packet: usize) -> Result<RtpPacket, RtpParseError> {
    if buf.len() < HEADER_LEN {
        return Err(RtpParseError::Truncated(buf.len()));
    }

    let first = buf[0];
    let version = first >> 6;
    let padding = (first & 0b0010_0000) != 0;
    let extension = (first & 0b0001_0000) != 0;
    let csrc_count = first & 0b0000_1111;

    if version != 2 {
        return Err(RtpParseError::UnsupportedVersion(version));
    }
    if padding {
        return Err(RtpParseError::PaddingUnsupported);
    }
    if extension {
        return Err(RtpParseError::ExtensionUnsupported);
    }
    if csrc_count != 0 {
        return Err(RtpParseError::CsrcUnsupported);
    }

    let second = buf[1];
    let marker = (second & 0b1000_0000) != 0;
    let payload_type = second & 0b0111_1111;

    let sequence = u16::from_be_bytes([buf[2], buf[3]]);
    let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

    buf.advance(HEADER_LEN);

    let expected_bytes = samples_per_packet * 2 * 4;
    if buf.len() != expected_bytes {
        return Err(RtpParseError::PayloadMisaligned {
            actual: buf.len(),
            expected: expected_bytes,
        });
    }

    let mut samples = Vec::with_capacity(samples_per_packet);
    for _ in 0..samples_per_packet {
        let re = buf.get_f32_le();
        let im = buf.get_f32_le();
        samples.push(Complex32 { re, im });
    }

    Ok(RtpPacket {
        sequence,
        timestamp,
        ssrc,
        marker,
        payload_type,
        samples,
    })
}

/// Signed modular difference `a - b` for 32-bit RTP timestamps, handling
/// wraparound at 2^32 (spec.md §3: "the subtraction uses 32-bit signed
/// modular arithmetic").
pub fn rtp_ts_diff(a: u32, b: u32) -> i64 {
    a.wrapping_sub(b) as i32 as i64
}

/// Signed modular difference for 16-bit RTP sequence numbers, used by the
/// resequencer's gap/duplicate arithmetic (spec.md §4.2).
pub fn seq_diff(a: u16, b: u16) -> i32 {
    a.wrapping_sub(b) as i16 as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn encode_packet(seq: u16, ts: u32, ssrc: u32, samples: &[Complex32]) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + samples.len() * 8);
        buf.extend_from_slice(&[0x80, 0x00]);
        buf.extend_from_slice(&seq.to_be_bytes());
        buf.extend_from_slice(&ts.to_be_bytes());
        buf.extend_from_slice(&ssrc.to_be_bytes());
        for s in samples {
            buf.extend_from_slice(&s.re.to_le_bytes());
            buf.extend_from_slice(&s.im.to_le_bytes());
        }
        buf.freeze()
    }

    #[test]
    fn parses_well_formed_packet() {
        let samples = vec![Complex32 { re: 1.0, im: -1.0 }; 320];
        let buf = encode_packet(42, 640, 0xdeadbeef, &samples);
        let pkt = parse_rtp_packet(buf, 320).unwrap();
        assert_eq!(pkt.sequence, 42);
        assert_eq!(pkt.timestamp, 640);
        assert_eq!(pkt.ssrc, 0xdeadbeef);
        assert_eq!(pkt.samples.len(), 320);
        assert_eq!(pkt.samples[0], Complex32 { re: 1.0, im: -1.0 });
    }

    #[test]
    fn rejects_non_version_2() {
        let mut buf = encode_packet(0, 0, 0, &[]).into_iter().collect::<Vec<u8>>();
        buf[0] = 0x40;
        let err = parse_rtp_packet(Bytes::from(buf), 0).unwrap_err();
        assert!(matches!(err, RtpParseError::UnsupportedVersion(1)));
    }

    #[test]
    fn rejects_padding_extension_csrc() {
        let mut buf = encode_packet(0, 0, 0, &[]).into_iter().collect::<Vec<u8>>();
        buf[0] = 0x80 | 0b0010_0000;
        assert!(matches!(
            parse_rtp_packet(Bytes::from(buf.clone()), 0).unwrap_err(),
            RtpParseError::PaddingUnsupported
        ));

        buf[0] = 0x80 | 0b0001_0000;
        assert!(matches!(
            parse_rtp_packet(Bytes::from(buf.clone()), 0).unwrap_err(),
            RtpParseError::ExtensionUnsupported
        ));

        buf[0] = 0x80 | 0b0000_0001;
        assert!(matches!(
            parse_rtp_packet(Bytes::from(buf), 0).unwrap_err(),
            RtpParseError::CsrcUnsupported
        ));
    }

    #[test]
    fn rtp_ts_diff_handles_wraparound() {
        let near_wrap = u32::MAX - 100;
        assert_eq!(rtp_ts_diff(near_wrap.wrapping_add(200), near_wrap), 200);
        assert_eq!(rtp_ts_diff(near_wrap, near_wrap.wrapping_add(200)), -200);
    }

    #[test]
    fn seq_diff_handles_wraparound() {
        assert_eq!(seq_diff(2, 65534), 4);
        assert_eq!(seq_diff(65534, 2), -4);
    }
}
