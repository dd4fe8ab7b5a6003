//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Configuration options for the video relay.

use std::{net::SocketAddr, path::PathBuf};

/// Options for the relay itself, shared by the library and the binary.
#[derive(clap::Args, Debug, Clone)]
pub struct RelayConfig {
    /// The transcoder to spawn for each session.
    #[clap(long, default_value = "ffmpeg")]
    pub transcoder_command: PathBuf,

    /// The first loopback port to try for the relay socket.
    #[clap(long, default_value = "41234")]
    pub relay_port_base: u16,

    /// How many consecutive ports to try before giving up.
    #[clap(long, default_value = "6")]
    pub relay_port_count: u16,

    /// The RTP packet size the transcoder is asked to produce.
    #[clap(long, default_value = "1400")]
    pub mtu: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            transcoder_command: PathBuf::from("ffmpeg"),
            relay_port_base: 41234,
            relay_port_count: 6,
            mtu: 1400,
        }
    }
}

/// General configuration options, set by command line arguments.
#[derive(clap::Parser, Debug, Clone)]
#[clap(name = "video_relay")]
pub struct Config {
    /// Path or URL of the media to play, or "-" to read it from stdin.
    #[clap(long)]
    pub input: String,

    /// The negotiated video codec (VP8 or H264).
    #[clap(long, default_value = "VP8")]
    pub video_codec: String,

    /// The negotiated encryption mode.
    #[clap(long, default_value = "xsalsa20_poly1305_lite")]
    pub mode: String,

    /// The 32-byte secret key, hex encoded.
    #[clap(long)]
    pub secret_key: String,

    /// Where the encrypted video is sent.
    #[clap(long)]
    pub destination: SocketAddr,

    /// Where the Opus payloads are sent, if audio is enabled.
    #[clap(long)]
    pub audio_destination: Option<SocketAddr>,

    /// The SSRC of the outgoing video stream.
    #[clap(long, default_value = "1")]
    pub video_ssrc: u32,

    #[clap(long, default_value = "1000")]
    pub bitrate_kbps: u64,

    #[clap(long, default_value = "1.0")]
    pub volume: f64,

    /// Have the transcoder listen for the input instead of fetching it.
    #[clap(long)]
    pub listen: bool,

    /// Also relay the input's audio.
    #[clap(long)]
    pub audio: bool,

    #[clap(flatten)]
    pub relay: RelayConfig,
}

#[cfg(test)]
mod test {
    use clap::Parser;

    use super::*;

    #[test]
    fn test_defaults_match_library_defaults() {
        let config = Config::parse_from([
            "video_relay",
            "--input",
            "movie.mkv",
            "--secret-key",
            "00",
            "--destination",
            "127.0.0.1:5000",
        ]);
        let defaults = RelayConfig::default();
        assert_eq!(defaults.transcoder_command, config.relay.transcoder_command);
        assert_eq!(defaults.relay_port_base, config.relay.relay_port_base);
        assert_eq!(defaults.relay_port_count, config.relay.relay_port_count);
        assert_eq!(defaults.mtu, config.relay.mtu);
        assert_eq!("VP8", config.video_codec);
        assert_eq!(1.0, config.volume);
        assert!(!config.audio);
        assert_eq!(None, config.audio_destination);
    }

    #[test]
    fn test_relay_options() {
        let config = Config::parse_from([
            "video_relay",
            "--input",
            "-",
            "--secret-key",
            "00",
            "--destination",
            "127.0.0.1:5000",
            "--relay-port-base",
            "50000",
            "--transcoder-command",
            "/usr/local/bin/ffmpeg",
            "--audio",
        ]);
        assert_eq!(50000, config.relay.relay_port_base);
        assert_eq!(
            PathBuf::from("/usr/local/bin/ffmpeg"),
            config.relay.transcoder_command
        );
        assert!(config.audio);
    }
}
