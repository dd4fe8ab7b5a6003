//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Rewrites loopback RTP video from the transcoder into encrypted packets for
//! the connection's transport.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use log::*;
use relay_common::{Writer, U24};
use tokio::sync::mpsc;

use crate::{
    connection::{Authentication, Connection},
    encryption::{SecretboxSealer, Sealer, TransportEncryptor},
    payload::{self, VideoCodec},
    player::PlayerEvent,
    rtp::{self, Header, HeaderExtensions, PayloadType, TruncatedSequenceNumber},
    vp8::TruncatedPictureId,
};

const BIG_COUNTER_STEP: u32 = 0x15;
const INITIAL_PICTURE_ID: TruncatedPictureId = 789;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionCounters {
    pub seqnum: TruncatedSequenceNumber,
    // The inbound timestamp is forwarded as is, so this never moves.
    pub timestamp: u32,
    pub big_counter: U24,
    pub picture_id: TruncatedPictureId,
}

impl Default for SessionCounters {
    fn default() -> Self {
        Self {
            seqnum: 0,
            timestamp: 0,
            big_counter: U24::ZERO,
            picture_id: INITIAL_PICTURE_ID,
        }
    }
}

impl SessionCounters {
    /// Called once per processed packet, whether or not it ended a frame.
    fn advance(&mut self) {
        self.seqnum = self.seqnum.wrapping_add(1);
        self.big_counter = self
            .big_counter
            .checked_add(BIG_COUNTER_STEP)
            .unwrap_or(U24::ZERO);
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DispatcherState {
    Idle,
    Active,
    Closed,
}

pub struct VideoDispatcher<C: Connection, S: Sealer = SecretboxSealer> {
    connection: Arc<C>,
    codec: VideoCodec,
    payload_type: PayloadType,
    counters: SessionCounters,
    encryptor: TransportEncryptor<S>,
    state: DispatcherState,
    start_time: Option<Instant>,
    events: mpsc::UnboundedSender<PlayerEvent>,
}

impl<C: Connection> VideoDispatcher<C> {
    pub fn new(
        connection: Arc<C>,
        codec: VideoCodec,
        events: mpsc::UnboundedSender<PlayerEvent>,
    ) -> Self {
        Self::with_sealer(connection, codec, SecretboxSealer, events)
    }
}

impl<C: Connection, S: Sealer> VideoDispatcher<C, S> {
    pub fn with_sealer(
        connection: Arc<C>,
        codec: VideoCodec,
        sealer: S,
        events: mpsc::UnboundedSender<PlayerEvent>,
    ) -> Self {
        Self {
            connection,
            codec,
            payload_type: codec.payload_type(),
            counters: SessionCounters::default(),
            encryptor: TransportEncryptor::new(sealer),
            state: DispatcherState::Idle,
            start_time: None,
            events,
        }
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    pub fn codec(&self) -> VideoCodec {
        self.codec
    }

    /// How long the dispatcher has been receiving packets.
    pub fn total_stream_time(&self) -> Option<Duration> {
        self.start_time.map(|start_time| start_time.elapsed())
    }

    /// Handles one datagram from the transcoder. Packets that arrive before
    /// the key is negotiated, and packets with no payload, are dropped
    /// without a trace beyond the log.
    pub fn handle_packet(&mut self, incoming: &[u8]) {
        match self.state {
            DispatcherState::Closed => {
                trace!("dropping packet for closed dispatcher");
                return;
            }
            DispatcherState::Idle => {
                self.state = DispatcherState::Active;
                self.start_time = Some(Instant::now());
                self.emit(PlayerEvent::Start);
            }
            DispatcherState::Active => {}
        }

        let Authentication { secret_key, mode } = self.connection.authentication();
        let Some(secret_key) = secret_key else {
            trace!("dropping packet; no secret key yet");
            return;
        };
        let Some(header) = Header::parse(incoming) else {
            trace!("dropping malformed packet of {} bytes", incoming.len());
            return;
        };

        let outgoing_header = rtp::serialize_header(
            self.counters.seqnum,
            header.timestamp,
            self.connection.video_ssrc(),
            self.payload_type,
            header.marker,
        );
        let extensions = HeaderExtensions {
            counter: self.counters.big_counter,
            seqnum: self.counters.seqnum,
        };
        let plaintext = payload::transform(
            self.codec,
            header.payload(incoming),
            &extensions,
            &mut self.counters.picture_id,
            header.marker,
        );

        match self
            .encryptor
            .encrypt(&outgoing_header, &plaintext, &secret_key, mode)
        {
            Ok(encrypted) => self.send_packet(&(outgoing_header, encrypted).to_vec()),
            Err(err) => {
                debug!("dropping packet: {}", err);
                self.emit(PlayerEvent::Debug(format!("Failed to encrypt a packet - {}", err)));
            }
        }

        self.counters.advance();
    }

    fn send_packet(&self, packet: &[u8]) {
        let Some(transport) = self.connection.udp_transport() else {
            self.emit(PlayerEvent::Debug(
                "Failed to send a packet - no UDP socket".to_string(),
            ));
            return;
        };
        trace!("sending packet of {} bytes", packet.len());
        if let Err(err) = transport.send_packet(packet) {
            debug!("send_packet() failed: {}", err);
            self.connection.set_speaking(false);
            self.emit(PlayerEvent::Debug(format!("Failed to send a packet - {}", err)));
        }
    }

    fn emit(&self, event: PlayerEvent) {
        // The player may already be gone; nobody is left to care.
        let _ = self.events.send(event);
    }

    pub fn close(&mut self) {
        if self.state != DispatcherState::Closed {
            debug!(
                "closing video dispatcher after {:?}",
                self.total_stream_time().unwrap_or_default()
            );
            self.state = DispatcherState::Closed;
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::Ordering;

    use hex_literal::hex;
    use relay_common::parse_u16;

    use super::*;
    use crate::{
        connection::testing::FakeConnection,
        encryption::{key_from, EncryptionMode, RecordingSealer, NONCE_LEN},
        rtp::RTP_EXTENSIONS_LEN,
    };

    const SEALED_PREFIX_LEN: usize = b"sealed:".len();

    struct Setup {
        connection: Arc<FakeConnection>,
        dispatcher: VideoDispatcher<FakeConnection, RecordingSealer>,
        nonces: Arc<parking_lot::Mutex<Vec<crate::encryption::Nonce>>>,
        events: mpsc::UnboundedReceiver<PlayerEvent>,
    }

    fn setup(codec: &str, mode: EncryptionMode) -> Setup {
        let connection = Arc::new(FakeConnection::new(codec, mode));
        let sealer = RecordingSealer::default();
        let nonces = sealer.nonces.clone();
        let (events_tx, events) = mpsc::unbounded_channel();
        let dispatcher = VideoDispatcher::with_sealer(
            connection.clone(),
            codec.parse().unwrap(),
            sealer,
            events_tx,
        );
        Setup {
            connection,
            dispatcher,
            nonces,
            events,
        }
    }

    fn incoming(seqnum: u16, timestamp: u32, marker: bool, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0x80, if marker { 0xe0 } else { 0x60 }];
        packet.extend_from_slice(&seqnum.to_be_bytes());
        packet.extend_from_slice(&timestamp.to_be_bytes());
        packet.extend_from_slice(&0xaabbccddu32.to_be_bytes());
        packet.extend_from_slice(payload);
        packet
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<PlayerEvent>) -> Vec<PlayerEvent> {
        let mut drained = vec![];
        while let Ok(event) = events.try_recv() {
            drained.push(event);
        }
        drained
    }

    #[test]
    fn test_rewrites_vp8_packet() {
        let mut setup = setup("VP8", EncryptionMode::Normal);
        setup
            .dispatcher
            .handle_packet(&incoming(5000, 90000, true, &hex!("90 80 12 aabb")));

        let sent = setup.connection.sent();
        assert_eq!(1, sent.len());
        let packet = &sent[0];
        // Our own seqnum and SSRC, the transcoder's timestamp and marker.
        assert_eq!(hex!("90 e7 0000 00015f90 12345678"), packet[..12]);
        assert_eq!(b"sealed:", &packet[12..12 + SEALED_PREFIX_LEN]);
        let plaintext = &packet[12 + SEALED_PREFIX_LEN..];
        assert_eq!(
            hex!("bede0004 32000000 22000fff 51000040 00000000"),
            plaintext[..RTP_EXTENSIONS_LEN]
        );
        assert_eq!(hex!("90 80 8315 aabb"), plaintext[RTP_EXTENSIONS_LEN..]);

        let mut expected_nonce = [0u8; NONCE_LEN];
        expected_nonce[..12].copy_from_slice(&packet[..12]);
        assert_eq!(vec![expected_nonce], *setup.nonces.lock());

        assert_eq!(vec![PlayerEvent::Start], drain(&mut setup.events));
        assert_eq!(DispatcherState::Active, setup.dispatcher.state());
        assert!(setup.dispatcher.total_stream_time().is_some());
    }

    #[test]
    fn test_counters_advance_per_packet() {
        let mut setup = setup("VP8", EncryptionMode::Lite);
        for i in 0..4u16 {
            let marker = i % 2 == 1;
            setup
                .dispatcher
                .handle_packet(&incoming(100, 3000, marker, &hex!("10 01")));
        }
        let sent = setup.connection.sent();
        assert_eq!(4, sent.len());
        for (i, packet) in sent.iter().enumerate() {
            assert_eq!(i as u16, parse_u16(&packet[2..4]));
            let plaintext = &packet[12 + SEALED_PREFIX_LEN..packet.len() - 4];
            // The extensions carry the counter and our seqnum.
            assert_eq!((i as u32 * 0x15).to_be_bytes()[1..], plaintext[5..8]);
            assert_eq!((i as u16).to_be_bytes(), plaintext[13..15]);
            // Lite nonce suffix starts at 1.
            assert_eq!((i as u32 + 1).to_be_bytes(), packet[packet.len() - 4..]);
        }
        // Picture IDs only moved after the packets with the marker set.
        let picture_ids: Vec<u16> = sent
            .iter()
            .map(|packet| {
                let descriptor = &packet[12 + SEALED_PREFIX_LEN + RTP_EXTENSIONS_LEN..];
                parse_u16(&descriptor[2..4]) & 0x7fff
            })
            .collect();
        assert_eq!(vec![789, 789, 790, 790], picture_ids);
        assert_eq!(
            &SessionCounters {
                seqnum: 4,
                timestamp: 0,
                big_counter: U24::from(4 * 0x15u16),
                picture_id: 791,
            },
            setup.dispatcher.counters()
        );
    }

    #[test]
    fn test_counters_wrap() {
        let mut counters = SessionCounters {
            seqnum: u16::MAX,
            timestamp: 0,
            big_counter: U24::try_from(0xffffffu32 - 0x15).unwrap(),
            picture_id: 0,
        };
        counters.advance();
        assert_eq!(0, counters.seqnum);
        assert_eq!(U24::MAX, counters.big_counter);
        counters.advance();
        assert_eq!(1, counters.seqnum);
        // Resets rather than carrying over.
        assert_eq!(U24::ZERO, counters.big_counter);
    }

    #[test]
    fn test_drops_undersized_packets() {
        let mut setup = setup("VP8", EncryptionMode::Lite);
        for len in 0..=12 {
            setup.dispatcher.handle_packet(&vec![0x80; len]);
        }
        assert!(setup.connection.sent().is_empty());
        assert_eq!(&SessionCounters::default(), setup.dispatcher.counters());
        assert_eq!(0, setup.dispatcher.encryptor.lite_nonce());
        // The stream still counts as started.
        assert_eq!(vec![PlayerEvent::Start], drain(&mut setup.events));
    }

    #[test]
    fn test_drops_packets_without_secret_key() {
        let mut setup = setup("H264", EncryptionMode::Lite);
        setup.connection.authentication.lock().secret_key = None;
        setup
            .dispatcher
            .handle_packet(&incoming(1, 1, false, &hex!("7c85")));
        assert!(setup.connection.sent().is_empty());
        assert_eq!(&SessionCounters::default(), setup.dispatcher.counters());

        setup.connection.authentication.lock().secret_key = Some(key_from(9));
        setup
            .dispatcher
            .handle_packet(&incoming(2, 1, false, &hex!("7c85")));
        assert_eq!(1, setup.connection.sent().len());
        assert_eq!(vec![PlayerEvent::Start], drain(&mut setup.events));
    }

    #[test]
    fn test_h264_payload_passes_through() {
        let mut setup = setup("H264", EncryptionMode::Suffix);
        setup
            .dispatcher
            .handle_packet(&incoming(1, 1, true, &hex!("7c85 0102")));
        let sent = setup.connection.sent();
        let packet = &sent[0];
        assert_eq!(0xe5, packet[1]);
        let plaintext = &packet[12 + SEALED_PREFIX_LEN..packet.len() - NONCE_LEN];
        assert_eq!(hex!("7c85 0102"), plaintext[RTP_EXTENSIONS_LEN..]);
        assert_eq!(setup.nonces.lock()[0], packet[packet.len() - NONCE_LEN..]);
        assert_eq!(INITIAL_PICTURE_ID, setup.dispatcher.counters().picture_id);
    }

    #[test]
    fn test_send_failure_stops_speaking_and_continues() {
        let mut setup = setup("VP8", EncryptionMode::Lite);
        setup.connection.sender.fail.store(true, Ordering::Relaxed);
        setup
            .dispatcher
            .handle_packet(&incoming(1, 1, false, &hex!("10 01")));
        assert_eq!(vec![false], *setup.connection.speaking.lock());
        let events = drain(&mut setup.events);
        assert_eq!(2, events.len());
        assert!(matches!(
            &events[1],
            PlayerEvent::Debug(message) if message.starts_with("Failed to send a packet")
        ));

        setup.connection.sender.fail.store(false, Ordering::Relaxed);
        setup
            .dispatcher
            .handle_packet(&incoming(2, 1, false, &hex!("10 01")));
        let sent = setup.connection.sent();
        assert_eq!(1, sent.len());
        assert_eq!(1, parse_u16(&sent[0][2..4]));
    }

    #[test]
    fn test_missing_transport_is_reported() {
        let mut setup = setup("VP8", EncryptionMode::Lite);
        setup
            .connection
            .has_transport
            .store(false, Ordering::Relaxed);
        setup
            .dispatcher
            .handle_packet(&incoming(1, 1, false, &hex!("10 01")));
        assert_eq!(
            vec![
                PlayerEvent::Start,
                PlayerEvent::Debug("Failed to send a packet - no UDP socket".to_string())
            ],
            drain(&mut setup.events)
        );
        assert!(setup.connection.speaking.lock().is_empty());
    }

    #[test]
    fn test_start_fires_once_and_close_is_idempotent() {
        let mut setup = setup("VP8", EncryptionMode::Normal);
        assert_eq!(DispatcherState::Idle, setup.dispatcher.state());
        assert_eq!(None, setup.dispatcher.total_stream_time());
        for seqnum in 0..3 {
            setup
                .dispatcher
                .handle_packet(&incoming(seqnum, 1, false, &hex!("10 01")));
        }
        assert_eq!(vec![PlayerEvent::Start], drain(&mut setup.events));

        setup.dispatcher.close();
        setup.dispatcher.close();
        assert_eq!(DispatcherState::Closed, setup.dispatcher.state());
        setup
            .dispatcher
            .handle_packet(&incoming(4, 1, false, &hex!("10 01")));
        assert_eq!(3, setup.connection.sent().len());
        assert!(drain(&mut setup.events).is_empty());
    }
}
