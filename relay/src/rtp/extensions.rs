//
// Copyright 2024 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! The fixed one-byte header extensions block (https://www.rfc-editor.org/rfc/rfc8285#section-4.2)
//! that precedes every outgoing payload. The receiver expects this exact layout.

use relay_common::{Writable, Writer, U24};

use super::TruncatedSequenceNumber;

pub const RTP_ONE_BYTE_EXTENSIONS_PROFILE: u16 = 0xBEDE;
const RTP_EXTENSIONS_LEN_IN_WORDS: u16 = 4;
pub const RTP_EXTENSIONS_LEN: usize = 4 + 4 * RTP_EXTENSIONS_LEN_IN_WORDS as usize;

// Each tag is (ID << 4) | (len - 1).
const RTP_EXT_TAG_COUNTER: u8 = 0x32; // ID 3, 3 bytes
const RTP_EXT_TAG_FILLER_3: u8 = 0x22; // ID 2, 3 bytes
const RTP_EXT_TAG_SEQNUM: u8 = 0x51; // ID 5, 2 bytes
const RTP_EXT_TAG_FILLER_1: u8 = 0x40; // ID 4, 1 byte
const RTP_EXT_FILLER_3_VALUE: u32 = 0x000FFF;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderExtensions {
    pub counter: U24,
    pub seqnum: TruncatedSequenceNumber,
}

impl Writer for HeaderExtensions {
    fn written_len(&self) -> usize {
        RTP_EXTENSIONS_LEN
    }

    fn write(&self, out: &mut dyn Writable) {
        (
            (RTP_ONE_BYTE_EXTENSIONS_PROFILE, RTP_EXTENSIONS_LEN_IN_WORDS),
            ([RTP_EXT_TAG_COUNTER], self.counter),
            (
                [RTP_EXT_TAG_FILLER_3],
                U24::truncate(RTP_EXT_FILLER_3_VALUE),
            ),
            ([RTP_EXT_TAG_SEQNUM], self.seqnum),
            // Filler value then three bytes of tail padding.
            [RTP_EXT_TAG_FILLER_1, 0, 0, 0, 0],
        )
            .write(out)
    }
}

#[cfg(test)]
mod test {
    use std::convert::TryFrom;

    use hex_literal::hex;

    use super::*;

    #[test]
    fn test_extensions_layout() {
        let extensions = HeaderExtensions {
            counter: U24::try_from(0x0a0b0cu32).unwrap(),
            seqnum: 0x1234,
        };
        assert_eq!(
            hex!("bede 0004 32 0a0b0c 22 000fff 51 1234 40 000000 00").to_vec(),
            extensions.to_vec()
        );
        assert_eq!(RTP_EXTENSIONS_LEN, extensions.to_vec().len());
    }

    #[test]
    fn test_extensions_initial_counters() {
        let extensions = HeaderExtensions {
            counter: U24::ZERO,
            seqnum: 0,
        };
        assert_eq!(
            hex!("bede0004 32000000 22000fff 51000040 00000000").to_vec(),
            extensions.to_vec()
        );
    }
}
