//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Parsing of loopback RTP from the transcoder and serialization of the
//! outgoing fixed header. See https://tools.ietf.org/html/rfc3550.

mod extensions;
pub mod types;

use std::ops::Range;

use relay_common::{parse_u16, parse_u32, CheckedSplitAt};

pub use extensions::*;
pub use types::*;

const VERSION: u8 = 2;
pub const RTP_MIN_HEADER_LEN: usize = 12;
pub const RTP_PAYLOAD_TYPE_OFFSET: usize = 1;
const RTP_SEQNUM_RANGE: Range<usize> = 2..4;
const RTP_TIMESTAMP_RANGE: Range<usize> = 4..8;
const RTP_SSRC_RANGE: Range<usize> = 8..12;
const RTP_MARKER_BIT: u8 = 0b1000_0000;

// Version 2, no padding, no CSRCs. The extension bit is set because every
// outgoing packet carries the one-byte extensions block.
const OUTGOING_FIRST_BYTE: u8 = (VERSION << 6) | 0b0001_0000;

pub type Serialized = [u8; RTP_MIN_HEADER_LEN];

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Header {
    pub version: u8,
    pub has_padding: bool,
    pub has_extensions: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: PayloadType,
    pub seqnum: TruncatedSequenceNumber,
    pub timestamp: TruncatedTimestamp,
    pub ssrc: Ssrc,
    // Everything after the fixed header. CSRCs and extensions written by the
    // transcoder are not interpreted and stay part of the payload.
    pub payload_range: Range<usize>,
}

impl Header {
    /// Returns None unless the packet is longer than the fixed header.
    pub fn parse(packet: &[u8]) -> Option<Self> {
        if packet.len() <= RTP_MIN_HEADER_LEN {
            return None;
        }
        let (main_header, _payload) = packet.checked_split_at(RTP_MIN_HEADER_LEN)?;

        let version = main_header[0] >> 6;
        let has_padding = (main_header[0] & 0b0010_0000) > 0;
        let has_extensions = (main_header[0] & 0b0001_0000) > 0;
        let csrc_count = main_header[0] & 0b0000_1111;
        let payload_type = main_header[RTP_PAYLOAD_TYPE_OFFSET] & 0b0111_1111;
        let marker = (main_header[RTP_PAYLOAD_TYPE_OFFSET] & RTP_MARKER_BIT) != 0;
        let seqnum = parse_u16(&main_header[RTP_SEQNUM_RANGE]);
        let timestamp = parse_u32(&main_header[RTP_TIMESTAMP_RANGE]);
        let ssrc = parse_u32(&main_header[RTP_SSRC_RANGE]);

        Some(Self {
            version,
            has_padding,
            has_extensions,
            csrc_count,
            marker,
            payload_type,
            seqnum,
            timestamp,
            ssrc,
            payload_range: RTP_MIN_HEADER_LEN..packet.len(),
        })
    }

    pub fn payload<'packet>(&self, packet: &'packet [u8]) -> &'packet [u8] {
        &packet[self.payload_range.clone()]
    }
}

/// Reads the payload type without parsing the rest of the header.
pub fn payload_type_of(packet: &[u8]) -> Option<PayloadType> {
    packet
        .get(RTP_PAYLOAD_TYPE_OFFSET)
        .map(|byte| byte & 0b0111_1111)
}

pub fn serialize_header(
    seqnum: TruncatedSequenceNumber,
    timestamp: TruncatedTimestamp,
    ssrc: Ssrc,
    payload_type: PayloadType,
    marker: bool,
) -> Serialized {
    let mut header = [0u8; RTP_MIN_HEADER_LEN];
    header[0] = OUTGOING_FIRST_BYTE;
    header[RTP_PAYLOAD_TYPE_OFFSET] = if marker {
        payload_type | RTP_MARKER_BIT
    } else {
        payload_type
    };
    header[RTP_SEQNUM_RANGE].copy_from_slice(&seqnum.to_be_bytes());
    header[RTP_TIMESTAMP_RANGE].copy_from_slice(&timestamp.to_be_bytes());
    header[RTP_SSRC_RANGE].copy_from_slice(&ssrc.to_be_bytes());
    header
}

#[cfg(test)]
mod test {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn test_parse_rtp_header() {
        assert_eq!(None, Header::parse(&[]));

        let packet = hex!("80 e0 0102 03040506 0708090a ff ee");
        assert_eq!(
            Some(Header {
                version: 2,
                has_padding: false,
                has_extensions: false,
                csrc_count: 0,
                marker: true,
                payload_type: 96,
                seqnum: 0x0102,
                timestamp: 0x03040506,
                ssrc: 0x0708090a,
                payload_range: 12..14,
            }),
            Header::parse(&packet)
        );
        assert_eq!(&[0xff, 0xee], Header::parse(&packet).unwrap().payload(&packet));
    }

    #[test]
    fn test_parse_rejects_header_only_packets() {
        let packet = hex!("80 60 0001 00000002 00000003 55");
        assert!(Header::parse(&packet).is_some());
        assert_eq!(None, Header::parse(&packet[..RTP_MIN_HEADER_LEN]));
        assert_eq!(None, Header::parse(&packet[..RTP_MIN_HEADER_LEN - 1]));
    }

    #[test]
    fn test_parse_first_byte_flags() {
        let packet = hex!("b5 61 0000 00000000 00000000 00");
        let header = Header::parse(&packet).unwrap();
        assert_eq!(2, header.version);
        assert!(header.has_padding);
        assert!(header.has_extensions);
        assert_eq!(5, header.csrc_count);
        assert!(!header.marker);
        assert_eq!(97, header.payload_type);
    }

    #[test]
    fn test_payload_type_of() {
        assert_eq!(None, payload_type_of(&[0x80]));
        assert_eq!(Some(96), payload_type_of(&[0x80, 0xe0]));
        assert_eq!(Some(97), payload_type_of(&[0x80, 0x61, 0x00]));
    }

    #[test]
    fn test_serialize_header() {
        assert_eq!(
            hex!("90 67 1234 00bc614e 00000457"),
            serialize_header(0x1234, 12345678, 1111, 103, false)
        );
        assert_eq!(
            hex!("90 e5 ffff ffffffff 00000001"),
            serialize_header(0xffff, u32::MAX, 1, 101, true)
        );
    }
}
