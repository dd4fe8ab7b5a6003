//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Passthrough of the transcoder's Opus RTP into the connection's own audio
//! playback. Only the payloads travel; the audio path builds its own headers.

use std::sync::Arc;

use log::*;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::rtp::RTP_MIN_HEADER_LEN;

pub const AUDIO_SINK_CAPACITY: usize = 256;

pub type OpusPayload = Vec<u8>;

pub fn channel(capacity: usize) -> (AudioSink, AudioStream) {
    let (sender, receiver) = mpsc::channel(capacity);
    (
        AudioSink {
            sender: Arc::new(Mutex::new(Some(sender))),
        },
        AudioStream { receiver },
    )
}

/// The writing end. Clones share one channel, so destroying any of them
/// closes it for all.
#[derive(Clone, Debug)]
pub struct AudioSink {
    sender: Arc<Mutex<Option<mpsc::Sender<OpusPayload>>>>,
}

impl AudioSink {
    /// Queues the payload of an RTP packet. Drops it if the packet has no
    /// payload, the consumer is behind, or the sink was destroyed.
    pub fn write(&self, rtp_packet: &[u8]) {
        if rtp_packet.len() <= RTP_MIN_HEADER_LEN {
            return;
        }
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return;
        };
        match sender.try_send(rtp_packet[RTP_MIN_HEADER_LEN..].to_vec()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!("audio sink full; dropping packet"),
            Err(TrySendError::Closed(_)) => trace!("audio stream closed; dropping packet"),
        }
    }

    pub fn destroy(&self) {
        if self.sender.lock().take().is_some() {
            debug!("audio sink destroyed");
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.sender.lock().is_none()
    }
}

/// The reading end, handed to the connection's audio playback.
#[derive(Debug)]
pub struct AudioStream {
    receiver: mpsc::Receiver<OpusPayload>,
}

impl AudioStream {
    /// Returns None once the sink is destroyed and drained.
    pub async fn recv(&mut self) -> Option<OpusPayload> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<OpusPayload> {
        self.receiver.try_recv().ok()
    }
}
