//
// Copyright 2024 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Codec-specific rewriting of the media payload before encryption.

use relay_common::Writer;
use strum_macros::{Display, EnumString};

use crate::{
    rtp::{HeaderExtensions, PayloadType},
    vp8::{self, TruncatedPictureId},
};

const H264_PAYLOAD_TYPE: PayloadType = 101;
const VP8_PAYLOAD_TYPE: PayloadType = 103;
const OTHER_VIDEO_PAYLOAD_TYPE: PayloadType = 105;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString)]
pub enum VideoCodec {
    #[strum(serialize = "H264")]
    H264,
    #[strum(serialize = "VP8")]
    Vp8,
    #[strum(serialize = "VP9")]
    Vp9,
    #[strum(serialize = "AV1")]
    Av1,
}

impl VideoCodec {
    /// The payload type the receiver expects for this codec.
    pub fn payload_type(self) -> PayloadType {
        match self {
            VideoCodec::H264 => H264_PAYLOAD_TYPE,
            VideoCodec::Vp8 => VP8_PAYLOAD_TYPE,
            VideoCodec::Vp9 | VideoCodec::Av1 => OTHER_VIDEO_PAYLOAD_TYPE,
        }
    }
}

/// Produces the plaintext to encrypt: the extensions block followed by the
/// payload. For VP8 the payload descriptor is rewritten to carry
/// `picture_id`, which then advances if this packet ends a frame. Other
/// codecs pass through unchanged.
pub fn transform(
    codec: VideoCodec,
    rtp_payload: &[u8],
    extensions: &HeaderExtensions,
    picture_id: &mut TruncatedPictureId,
    marker: bool,
) -> Vec<u8> {
    match codec {
        VideoCodec::Vp8 => {
            let rewritten = vp8::rewrite_payload_descriptor(rtp_payload, *picture_id);
            *picture_id = vp8::next_picture_id(*picture_id, marker);
            (extensions, rewritten).to_vec()
        }
        VideoCodec::H264 | VideoCodec::Vp9 | VideoCodec::Av1 => {
            (extensions, rtp_payload).to_vec()
        }
    }
}
