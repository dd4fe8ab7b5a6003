//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

#[macro_use]
extern crate log;

use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use clap::Parser;
use env_logger::Env;
use once_cell::sync::Lazy;
use tokio::{
    net::UdpSocket,
    runtime,
    signal::unix::{signal, SignalKind},
    sync::mpsc,
    task::JoinHandle,
};
use video_relay::{
    audio::AudioStream,
    config,
    connection::{Authentication, Connection, PacketSender, UdpTransport},
    encryption::{EncryptionMode, SecretKey, SECRET_KEY_LEN},
    player::{PlayerEvent, VideoPlayer},
    rtp::Ssrc,
    transcoder::{PlayOptions, Resource},
};

// Load the config and treat it as a read-only static value.
static CONFIG: Lazy<config::Config> = Lazy::new(config::Config::parse);

#[rustfmt::skip]
fn print_config(config: &'static config::Config) {
    info!("config:");
    info!("  {:38}{}", "input:", config.input);
    info!("  {:38}{}", "video_codec:", config.video_codec);
    info!("  {:38}{}", "mode:", EncryptionMode::from(config.mode.as_str()));
    info!("  {:38}{}", "destination:", config.destination);
    info!("  {:38}{:?}", "audio_destination:", config.audio_destination);
    info!("  {:38}{}", "video_ssrc:", config.video_ssrc);
    info!("  {:38}{}", "bitrate_kbps:", config.bitrate_kbps);
    info!("  {:38}{}", "volume:", config.volume);
    info!("  {:38}{}", "listen:", config.listen);
    info!("  {:38}{}", "audio:", config.audio);
    info!("  {:38}{:?}", "transcoder_command:", config.relay.transcoder_command);
    info!("  {:38}{}", "relay_port_base:", config.relay.relay_port_base);
    info!("  {:38}{}", "relay_port_count:", config.relay.relay_port_count);
    info!("  {:38}{}", "mtu:", config.relay.mtu);
}

fn unspecified_addr_for(remote_addr: SocketAddr) -> SocketAddr {
    match remote_addr {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    }
}

/// A connection whose parameters were negotiated out of band and given on
/// the command line.
struct CliConnection {
    authentication: Authentication,
    video_codec: String,
    video_ssrc: Ssrc,
    transport: Arc<UdpTransport>,
    audio_destination: Option<SocketAddr>,
}

impl CliConnection {
    fn new(config: &config::Config) -> Result<Self> {
        let key: [u8; SECRET_KEY_LEN] = hex::decode(&config.secret_key)?
            .try_into()
            .map_err(|_| anyhow!("secret key must be {} bytes", SECRET_KEY_LEN))?;
        let transport = UdpTransport::connect(
            unspecified_addr_for(config.destination),
            config.destination,
        )?;
        info!("sending video from {}", transport.local_addr()?);

        Ok(Self {
            authentication: Authentication {
                secret_key: Some(SecretKey::from(key)),
                mode: config.mode.as_str().into(),
            },
            video_codec: config.video_codec.clone(),
            video_ssrc: config.video_ssrc,
            transport: Arc::new(transport),
            audio_destination: config.audio_destination,
        })
    }
}

async fn forward_audio(mut stream: AudioStream, destination: Option<SocketAddr>) -> Result<()> {
    let socket = match destination {
        Some(destination) => {
            let socket = UdpSocket::bind(unspecified_addr_for(destination)).await?;
            socket.connect(destination).await?;
            Some(socket)
        }
        None => None,
    };
    while let Some(payload) = stream.recv().await {
        if let Some(socket) = &socket {
            if let Err(err) = socket.send(&payload).await {
                debug!("failed to forward audio: {}", err);
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Connection for CliConnection {
    type AudioDispatcher = JoinHandle<()>;

    fn authentication(&self) -> Authentication {
        self.authentication.clone()
    }

    fn video_codec(&self) -> String {
        self.video_codec.clone()
    }

    fn video_ssrc(&self) -> Ssrc {
        self.video_ssrc
    }

    fn udp_transport(&self) -> Option<Arc<dyn PacketSender>> {
        Some(self.transport.clone())
    }

    fn set_speaking(&self, speaking: bool) {
        info!("speaking: {}", speaking);
    }

    fn play_opus(&self, stream: AudioStream) -> JoinHandle<()> {
        let destination = self.audio_destination;
        tokio::spawn(async move {
            if let Err(err) = forward_audio(stream, destination).await {
                error!("audio forwarding failed: {}", err);
            }
        })
    }
}

/// Waits for a SIGINT or SIGTERM signal and returns. Can be cancelled
/// by sending something to the channel.
pub async fn wait_for_signal(mut canceller: mpsc::Receiver<()>) {
    tokio::select!(
        _ = async {
            if let Ok(mut stream) = signal(SignalKind::interrupt()) {
                stream.recv().await;
            }
        } => {
            info!("terminating by signal: SIGINT");
        },
        _ = async {
            if let Ok(mut stream) = signal(SignalKind::terminate()) {
                stream.recv().await;
            }
        } => {
            info!("terminating by signal: SIGTERM");
        },
        _ = async { canceller.recv().await } => {},
    )
}

fn main() -> Result<()> {
    // Initialize logging.
    env_logger::Builder::from_env(
        Env::default()
            .default_filter_or("video_relay=info")
            .default_write_style_or("never"),
    )
    .format(relay_common::format_log_line)
    .init();

    info!(
        "video_relay: v{}",
        option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
    );

    // Parse the command line arguments.
    let config = &CONFIG;
    print_config(config);

    let threaded_rt = runtime::Runtime::new()?;

    threaded_rt.block_on(async {
        let connection = Arc::new(CliConnection::new(config)?);
        let (player, mut events) = VideoPlayer::new(connection, config.relay.clone());
        let (signal_canceller_tx, signal_canceller_rx) = mpsc::channel(1);

        // Stop once the session finishes on its own.
        let events_handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    PlayerEvent::Start => info!("video started"),
                    PlayerEvent::Debug(message) => debug!("{}", message),
                    PlayerEvent::Error(message) => error!("{}", message),
                    PlayerEvent::Finish => {
                        info!("video finished");
                        let _ = signal_canceller_tx.send(()).await;
                    }
                }
            }
        });

        let resource = if config.input == "-" {
            Resource::Stream(Box::new(tokio::io::stdin()))
        } else {
            Resource::from(config.input.as_str())
        };
        let options = PlayOptions {
            bitrate_kbps: config.bitrate_kbps,
            volume: config.volume,
            listen: config.listen,
            audio: config.audio,
        };
        let handle = player.play_video(resource, options).await?;
        info!("relaying from port {}", handle.port);

        wait_for_signal(signal_canceller_rx).await;

        player.destroy().await;
        if let Some(audio) = handle.audio {
            let _ = audio.await;
        }
        events_handle.abort();
        Ok::<_, anyhow::Error>(())
    })?;

    info!("shutting down the runtime");
    threaded_rt.shutdown_timeout(Duration::from_millis(500));

    Ok(())
}
