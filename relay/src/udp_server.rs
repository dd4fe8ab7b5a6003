//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Implementation of the loopback udp server that receives the transcoder's
//! RTP and routes it by payload type.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr, UdpSocket},
};

use log::*;

use crate::rtp::{self, PayloadType};

/// What the transcoder tags its video and audio output with.
pub const VIDEO_PAYLOAD_TYPE: PayloadType = 96;
pub const AUDIO_PAYLOAD_TYPE: PayloadType = 97;

/// The largest UDP payload, so a datagram is never truncated whatever MTU the
/// transcoder was told to use.
const MAX_DATAGRAM_SIZE: usize = 65535;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Route {
    Video,
    Audio,
    Drop,
}

impl Route {
    pub fn of(packet: &[u8]) -> Self {
        match rtp::payload_type_of(packet) {
            Some(VIDEO_PAYLOAD_TYPE) => Route::Video,
            Some(AUDIO_PAYLOAD_TYPE) => Route::Audio,
            _ => Route::Drop,
        }
    }
}

/// Binds to the first free port of `port_base..port_base + port_count` on the
/// loopback interface.
pub fn bind_relay_socket(port_base: u16, port_count: u16) -> Option<(UdpSocket, u16)> {
    for port in (port_base..=u16::MAX).take(port_count as usize) {
        match UdpSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))) {
            Ok(socket) => {
                debug!("relay socket bound to port {}", port);
                return Some((socket, port));
            }
            Err(err) => {
                warn!("failed to bind relay socket to port {}: {}", port, err);
            }
        }
    }
    None
}

/// Receives datagrams until the socket fails, handing each one to the
/// handler for its route. Packets of any other payload type are dropped.
pub async fn run(
    socket: UdpSocket,
    mut handle_video: impl FnMut(&[u8]),
    mut handle_audio: impl FnMut(&[u8]),
) -> io::Result<()> {
    socket.set_nonblocking(true)?;
    let socket = tokio::net::UdpSocket::from_std(socket)?;
    info!("udp_server ready: {:?}", socket.local_addr()?);

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let size = socket.recv(&mut buf).await?;
        let packet = &buf[..size];
        trace!("received packet of {} bytes", size);

        match Route::of(packet) {
            Route::Video => handle_video(packet),
            Route::Audio => handle_audio(packet),
            Route::Drop => trace!("dropping packet with unexpected payload type"),
        }
    }
}
