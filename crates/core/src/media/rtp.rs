use crate::error::{ParseErrorKind, Result, RtspError};

/// Parsed RTP fixed header (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// [`parse`](Self::parse) also computes where the payload starts and ends
/// after accounting for CSRC entries, a header extension, and padding, so
/// the receiver can slice the datagram without re-deriving offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub padding: bool,
    pub extension: bool,
    /// CSRC count (4-bit).
    pub csrc_count: u8,
    /// Marker bit (RFC 3550 §5.1), codec-specific framing signal.
    pub marker: bool,
    /// Payload type (7-bit, RFC 3551).
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    /// Offset of the first payload byte within the datagram.
    pub payload_offset: usize,
    /// Payload length after padding removal.
    pub payload_len: usize,
}

/// Fixed header length without CSRC entries or extensions.
pub const RTP_HEADER_LEN: usize = 12;

const RTP_VERSION: u8 = 2;

impl RtpHeader {
    /// Decode the header of one RTP datagram.
    ///
    /// Fails on truncated input, a version other than 2, an extension or
    /// padding declaration that exceeds the datagram, or a packet left
    /// with no payload at all — all of which the receiver discards.
    pub fn parse(datagram: &[u8]) -> Result<Self> {
        let invalid = || RtspError::Parse {
            kind: ParseErrorKind::InvalidRtpHeader,
        };

        if datagram.len() < RTP_HEADER_LEN {
            return Err(invalid());
        }

        let version = datagram[0] >> 6;
        if version != RTP_VERSION {
            return Err(invalid());
        }
        let padding = datagram[0] & 0x20 != 0;
        let extension = datagram[0] & 0x10 != 0;
        let csrc_count = datagram[0] & 0x0F;
        let marker = datagram[1] & 0x80 != 0;
        let payload_type = datagram[1] & 0x7F;
        let sequence = u16::from_be_bytes([datagram[2], datagram[3]]);
        let timestamp = u32::from_be_bytes([datagram[4], datagram[5], datagram[6], datagram[7]]);
        let ssrc = u32::from_be_bytes([datagram[8], datagram[9], datagram[10], datagram[11]]);

        let mut payload_offset = RTP_HEADER_LEN + 4 * csrc_count as usize;
        if extension {
            // 4-byte extension header, then `length` 32-bit words of data.
            if datagram.len() < payload_offset + 4 {
                return Err(invalid());
            }
            let ext_words =
                u16::from_be_bytes([datagram[payload_offset + 2], datagram[payload_offset + 3]]);
            payload_offset += 4 + 4 * ext_words as usize;
        }
        if payload_offset > datagram.len() {
            return Err(invalid());
        }

        let pad_len = if padding {
            let pad = datagram[datagram.len() - 1] as usize;
            if pad == 0 || pad > datagram.len() - payload_offset {
                return Err(invalid());
            }
            pad
        } else {
            0
        };

        let payload_len = datagram.len() - payload_offset - pad_len;
        if payload_len == 0 {
            return Err(invalid());
        }

        Ok(RtpHeader {
            padding,
            extension,
            csrc_count,
            marker,
            payload_type,
            sequence,
            timestamp,
            ssrc,
            payload_offset,
            payload_len,
        })
    }

    /// The payload slice of the datagram this header was parsed from.
    pub fn payload<'a>(&self, datagram: &'a [u8]) -> &'a [u8] {
        &datagram[self.payload_offset..self.payload_offset + self.payload_len]
    }
}
