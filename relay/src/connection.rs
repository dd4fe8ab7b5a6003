//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! The voice connection the relay plays into. It owns the negotiated
//! encryption parameters, the outgoing transport, and the audio playback.

use std::{
    io,
    net::{SocketAddr, UdpSocket},
    sync::Arc,
};

use async_trait::async_trait;

use crate::{
    audio::AudioStream,
    encryption::{EncryptionMode, SecretKey},
    rtp::Ssrc,
};

#[derive(Clone, Default)]
pub struct Authentication {
    /// None until the session description arrives.
    pub secret_key: Option<SecretKey>,
    pub mode: EncryptionMode,
}

/// The outgoing half of the transport. Sends are best effort.
pub trait PacketSender: Send + Sync {
    fn send_packet(&self, buf: &[u8]) -> io::Result<()>;
}

#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Whatever the audio playback hands back for the Opus stream.
    type AudioDispatcher: Send;

    fn authentication(&self) -> Authentication;
    fn video_codec(&self) -> String;
    fn video_ssrc(&self) -> Ssrc;
    fn udp_transport(&self) -> Option<Arc<dyn PacketSender>>;
    fn set_speaking(&self, speaking: bool);
    fn play_opus(&self, stream: AudioStream) -> Self::AudioDispatcher;

    /// Awaited before a new video session creates any resources.
    async fn reset_video_context(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Sends over a UDP socket connected to the media server.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn connect(local_addr: SocketAddr, remote_addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(local_addr)?;
        socket.connect(remote_addr)?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl PacketSender for UdpTransport {
    fn send_packet(&self, buf: &[u8]) -> io::Result<()> {
        self.socket.send(buf).map(|_| ())
    }
}
