//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Launching the transcoder (ffmpeg) that encodes the input into loopback RTP.

use std::{fmt, io, path::Path, process::Stdio};

use log::*;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
};

use crate::payload::VideoCodec;

const OUTPUT_URL: &str = "OUTPUT_URL";
const BITRATE: &str = "BITRATE";
const AUDIO_FILTER: &str = "AUDIO_FILTER";

const VP8_ARGS: &[&str] = &[
    "-an",
    "-c:v",
    "libvpx",
    "-b:v",
    BITRATE,
    "-cpu-used",
    "2",
    "-deadline",
    "realtime",
    "-f",
    "rtp",
    OUTPUT_URL,
];

const H264_ARGS: &[&str] = &[
    "-an",
    "-c:v",
    "libx264",
    "-b:v",
    BITRATE,
    "-pix_fmt",
    "yuv420p",
    "-f",
    "rtp",
    OUTPUT_URL,
];

const OPUS_ARGS: &[&str] = &[
    "-vn",
    "-ar",
    "48000",
    "-af",
    AUDIO_FILTER,
    "-c:a",
    "libopus",
    "-f",
    "rtp",
    OUTPUT_URL,
];

const STEREO_DOWNMIX: &str =
    "pan=stereo|FL < 1.0*FL + 0.707*FC + 0.707*BL|FR < 1.0*FR + 0.707*FC + 0.707*BR";

const STILL_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

/// The per-codec video arguments, or None if the codec can't be transcoded.
pub fn video_args_template(codec: VideoCodec) -> Option<&'static [&'static str]> {
    match codec {
        VideoCodec::Vp8 => Some(VP8_ARGS),
        VideoCodec::H264 => Some(H264_ARGS),
        VideoCodec::Vp9 | VideoCodec::Av1 => None,
    }
}

/// What to play: a path or URL the transcoder opens itself, or bytes that are
/// piped into its stdin.
pub enum Resource {
    Uri(String),
    Stream(Box<dyn AsyncRead + Send + Unpin>),
}

impl Resource {
    fn input_arg(&self) -> &str {
        match self {
            Resource::Uri(uri) => uri,
            Resource::Stream(_) => "-",
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Resource::Stream(_))
    }

    pub fn is_still_image(&self) -> bool {
        match self {
            Resource::Uri(uri) => Path::new(uri)
                .extension()
                .and_then(|extension| extension.to_str())
                .is_some_and(|extension| {
                    STILL_IMAGE_EXTENSIONS
                        .iter()
                        .any(|image| image.eq_ignore_ascii_case(extension))
                }),
            Resource::Stream(_) => false,
        }
    }
}

impl From<&str> for Resource {
    fn from(uri: &str) -> Self {
        Resource::Uri(uri.to_string())
    }
}

impl From<String> for Resource {
    fn from(uri: String) -> Self {
        Resource::Uri(uri)
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Uri(uri) => f.debug_tuple("Uri").field(uri).finish(),
            Resource::Stream(_) => f.write_str("Stream"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlayOptions {
    pub bitrate_kbps: u64,
    /// Linear gain applied to the audio.
    pub volume: f64,
    /// Have the transcoder accept the input as a server instead of fetching it.
    pub listen: bool,
    pub audio: bool,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            bitrate_kbps: 1000,
            volume: 1.0,
            listen: false,
            audio: false,
        }
    }
}

pub fn build_args(
    video_args: &[&str],
    resource: &Resource,
    port: u16,
    mtu: usize,
    options: &PlayOptions,
) -> Vec<String> {
    let output_url = format!("rtp://127.0.0.1:{}/?pkt_size={}", port, mtu);
    let bitrate = format!("{}k", options.bitrate_kbps);
    let audio_filter = if options.volume == 1.0 {
        STEREO_DOWNMIX.to_string()
    } else {
        format!("{},volume={}", STEREO_DOWNMIX, options.volume)
    };
    let still_image = resource.is_still_image();

    let mut args = vec!["-re".to_string()];
    if still_image {
        args.extend(["-loop".to_string(), "1".to_string()]);
    }
    if options.listen {
        args.extend(["-listen".to_string(), "1".to_string()]);
    }
    args.extend(["-i".to_string(), resource.input_arg().to_string()]);

    let audio_args: &[&str] = if options.audio && !still_image {
        OPUS_ARGS
    } else {
        &[]
    };
    args.extend(video_args.iter().chain(audio_args).map(|&arg| match arg {
        OUTPUT_URL => output_url.clone(),
        BITRATE => bitrate.clone(),
        AUDIO_FILTER => audio_filter.clone(),
        arg => arg.to_string(),
    }));
    args
}

/// Spawns the transcoder. Its stdin is piped only when `pipe_stdin` is set;
/// stderr is forwarded to the log at trace level.
pub fn spawn(program: &Path, args: &[String], pipe_stdin: bool) -> io::Result<Child> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(if pipe_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    if let Some(stderr) = child.stderr.take() {
        let pid = child.id();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                trace!("transcoder {:?}: {}", pid, line);
            }
        });
    }
    Ok(child)
}
