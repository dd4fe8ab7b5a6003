//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! VP8 payload descriptor handling. See https://www.rfc-editor.org/rfc/rfc7741#section-4.2.

use relay_common::Writer;

pub type TruncatedPictureId = u16;

// The picture ID is written in its 15-bit form.
pub const PICTURE_ID_LIMIT: u32 = 1 << 15;

const EXTENDED_CONTROL_BITS_PRESENT: u8 = 0b1000_0000; // X
const PICTURE_ID_PRESENT: u8 = 0b1000_0000; // I
const TL0_PIC_IDX_PRESENT: u8 = 0b0100_0000; // L
const TID_PRESENT: u8 = 0b0010_0000; // T
const KEY_IDX_PRESENT: u8 = 0b0001_0000; // K
const PICTURE_ID_IS_15_BITS: u8 = 0b1000_0000; // M
const PICTURE_ID_15_BIT_FORM: u16 = 0b1000_0000_0000_0000;

/// Number of bytes the descriptor occupies at the start of `rtp_payload`.
/// Missing bytes are read as zero, so a truncated payload yields a length
/// that may exceed the payload.
pub fn payload_descriptor_len(rtp_payload: &[u8]) -> usize {
    let byte = |index: usize| rtp_payload.get(index).copied().unwrap_or(0);

    let mut len = 1;
    if byte(0) & EXTENDED_CONTROL_BITS_PRESENT != 0 {
        let extended_control = byte(1);
        len += 1;
        if extended_control & PICTURE_ID_PRESENT != 0 {
            len += 1;
            if byte(2) & PICTURE_ID_IS_15_BITS != 0 {
                len += 1;
            }
        }
        if extended_control & TL0_PIC_IDX_PRESENT != 0 {
            len += 1;
        }
        // TID and KEYIDX share one byte.
        if extended_control & (TID_PRESENT | KEY_IDX_PRESENT) != 0 {
            len += 1;
        }
    }
    len
}

/// Replaces the descriptor with one that only carries `picture_id`, keeping
/// the first byte's S/N/PID bits and the VP8 payload that follows.
pub fn rewrite_payload_descriptor(rtp_payload: &[u8], picture_id: TruncatedPictureId) -> Vec<u8> {
    let first_byte = rtp_payload.first().copied().unwrap_or(0);
    let vp8_payload = rtp_payload
        .get(payload_descriptor_len(rtp_payload)..)
        .unwrap_or(&[]);
    (
        [
            first_byte | EXTENDED_CONTROL_BITS_PRESENT,
            PICTURE_ID_PRESENT,
        ],
        picture_id | PICTURE_ID_15_BIT_FORM,
        vp8_payload,
    )
        .to_vec()
}

/// Picture IDs only move at the end of a frame.
pub fn next_picture_id(picture_id: TruncatedPictureId, marker: bool) -> TruncatedPictureId {
    if !marker {
        return picture_id;
    }
    let next = picture_id as u32 + 1;
    if next >= PICTURE_ID_LIMIT {
        0
    } else {
        next as TruncatedPictureId
    }
}
