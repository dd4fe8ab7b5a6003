//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Owns the lifecycle of a relay session: the transcoder process, the
//! loopback socket it streams into, and the dispatchers fed from it. At most
//! one session is active per player.

use std::{
    io,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use log::*;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::{
    io::AsyncRead,
    process::{Child, ChildStdin},
    sync::{self, mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    audio::{self, AudioSink, AUDIO_SINK_CAPACITY},
    config::RelayConfig,
    connection::Connection,
    dispatcher::VideoDispatcher,
    payload::VideoCodec,
    transcoder::{self, PlayOptions, Resource},
    udp_server,
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PlayerEvent {
    /// The first packet of a session reached the dispatcher.
    Start,
    Debug(String),
    Error(String),
    /// A session was torn down, whatever the reason.
    Finish,
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("codec unsupported: {0}")]
    CodecUnsupported(String),
    #[error("no relay port available in {first}..={last}")]
    NoPortAvailable { first: u16, last: u16 },
    #[error("failed to reset the video context: {0}")]
    ResetVideoContext(anyhow::Error),
    #[error("failed to spawn the transcoder: {0}")]
    Spawn(io::Error),
}

pub type SharedDispatcher<C> = Arc<Mutex<VideoDispatcher<C>>>;

/// What a started session hands back to the caller.
pub struct PlayHandle<C: Connection> {
    pub dispatcher: SharedDispatcher<C>,
    /// Present when audio was requested.
    pub audio: Option<C::AudioDispatcher>,
    pub port: u16,
    pub args: Vec<String>,
}

type SessionId = u64;

struct RelaySession<C: Connection> {
    id: SessionId,
    dispatcher: SharedDispatcher<C>,
    port: u16,
    input: Option<JoinHandle<()>>,
    kill_transcoder: Option<oneshot::Sender<()>>,
    watcher: JoinHandle<()>,
    pump: JoinHandle<()>,
    audio_sink: Option<AudioSink>,
}

/// The tasks of a torn down session that may still be winding down. The
/// relay socket is closed once the pump is joined, and the transcoder is
/// reaped once the watcher is joined.
struct WindingDown {
    watcher: JoinHandle<()>,
    pump: JoinHandle<()>,
}

impl WindingDown {
    async fn join(self) {
        // Cancellation is the expected outcome for the pump.
        let _ = self.pump.await;
        let _ = self.watcher.await;
    }
}

impl<C: Connection> RelaySession<C> {
    fn teardown(mut self) -> WindingDown {
        if let Some(input) = self.input.take() {
            input.abort();
        }
        if let Some(kill_transcoder) = self.kill_transcoder.take() {
            // The watcher is gone if the transcoder already exited.
            let _ = kill_transcoder.send(());
        }
        self.pump.abort();
        if let Some(audio_sink) = self.audio_sink.take() {
            audio_sink.destroy();
        }
        self.dispatcher.lock().close();
        info!("session {} on port {} torn down", self.id, self.port);
        WindingDown {
            watcher: self.watcher,
            pump: self.pump,
        }
    }
}

struct PlayerInner<C: Connection> {
    connection: Arc<C>,
    config: RelayConfig,
    events: mpsc::UnboundedSender<PlayerEvent>,
    session: Mutex<Option<RelaySession<C>>>,
    // Held for the whole of a start, so starts never interleave.
    start_lock: sync::Mutex<()>,
    next_session_id: AtomicU64,
}

impl<C: Connection> PlayerInner<C> {
    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    /// Tears down the active session. With an id, only that session is torn
    /// down, so a trigger from a replaced session is ignored.
    fn teardown(&self, id: Option<SessionId>) -> Option<WindingDown> {
        let session = {
            let mut session = self.session.lock();
            match (session.as_ref(), id) {
                (None, _) => return None,
                (Some(active), Some(id)) if active.id != id => {
                    debug!("ignoring teardown of stale session {}", id);
                    return None;
                }
                _ => session.take(),
            }
        };
        let winding_down = session.map(RelaySession::teardown);
        if winding_down.is_some() {
            self.emit(PlayerEvent::Finish);
        }
        winding_down
    }

    /// Tears down the active session and waits until its socket is closed and
    /// its transcoder is reaped. Must not be called from the session's own tasks.
    async fn teardown_and_wait(&self) {
        if let Some(winding_down) = self.teardown(None) {
            winding_down.join().await;
        }
    }

    async fn start(
        self: &Arc<Self>,
        resource: Resource,
        options: PlayOptions,
    ) -> Result<PlayHandle<C>, RelayError> {
        let codec_name = self.connection.video_codec();
        let codec = VideoCodec::from_str(&codec_name)
            .map_err(|_| RelayError::CodecUnsupported(codec_name.clone()))?;
        let video_args = transcoder::video_args_template(codec)
            .ok_or_else(|| RelayError::CodecUnsupported(codec_name.clone()))?;

        let _starting = self.start_lock.lock().await;
        self.teardown_and_wait().await;
        self.connection
            .reset_video_context()
            .await
            .map_err(RelayError::ResetVideoContext)?;

        let dispatcher = Arc::new(Mutex::new(VideoDispatcher::new(
            self.connection.clone(),
            codec,
            self.events.clone(),
        )));

        let (socket, port) =
            udp_server::bind_relay_socket(self.config.relay_port_base, self.config.relay_port_count)
                .ok_or(RelayError::NoPortAvailable {
                    first: self.config.relay_port_base,
                    last: self
                        .config
                        .relay_port_base
                        .saturating_add(self.config.relay_port_count.saturating_sub(1)),
                })?;

        let args = transcoder::build_args(video_args, &resource, port, self.config.mtu, &options);
        debug!("transcoder args: {:?}", args);
        let mut child = transcoder::spawn(
            &self.config.transcoder_command,
            &args,
            resource.is_stream(),
        )
        .map_err(RelayError::Spawn)?;
        let stdin = child.stdin.take();

        let (audio_sink, audio) = if options.audio {
            let (sink, stream) = audio::channel(AUDIO_SINK_CAPACITY);
            (Some(sink), Some(self.connection.play_opus(stream)))
        } else {
            (None, None)
        };

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        info!(
            "starting {} session {} on port {} for {:?}",
            codec, id, port, resource
        );

        // The session is stored before any of its tasks can observe the lock,
        // so an early exit of the transcoder still finds it.
        let mut session = self.session.lock();
        let input = match (resource, stdin) {
            (Resource::Stream(reader), Some(stdin)) => {
                Some(tokio::spawn(pipe_input(Arc::downgrade(self), id, reader, stdin)))
            }
            _ => None,
        };
        let (kill_transcoder, kill_rx) = oneshot::channel();
        let watcher = tokio::spawn(watch_transcoder(Arc::downgrade(self), id, child, kill_rx));
        let pump = tokio::spawn(pump_packets(
            Arc::downgrade(self),
            id,
            socket,
            dispatcher.clone(),
            audio_sink.clone(),
        ));
        *session = Some(RelaySession {
            id,
            dispatcher: dispatcher.clone(),
            port,
            input,
            kill_transcoder: Some(kill_transcoder),
            watcher,
            pump,
            audio_sink,
        });

        Ok(PlayHandle {
            dispatcher,
            audio,
            port,
            args,
        })
    }
}

async fn pipe_input<C: Connection>(
    player: Weak<PlayerInner<C>>,
    id: SessionId,
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
    mut stdin: ChildStdin,
) {
    match tokio::io::copy(&mut reader, &mut stdin).await {
        Ok(size) => debug!("session {}: input finished after {} bytes", id, size),
        Err(err) => {
            warn!("session {}: input failed: {}", id, err);
            if let Some(player) = player.upgrade() {
                player.emit(PlayerEvent::Error(format!("Input stream failed - {}", err)));
                player.teardown(Some(id));
            }
        }
    }
}

async fn watch_transcoder<C: Connection>(
    player: Weak<PlayerInner<C>>,
    id: SessionId,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
) {
    tokio::select!(
        status = child.wait() => {
            match status {
                Ok(status) => info!("session {}: transcoder exited with {}", id, status),
                Err(err) => warn!("session {}: failed to wait for transcoder: {}", id, err),
            }
            if let Some(player) = player.upgrade() {
                player.teardown(Some(id));
            }
        },
        _ = kill_rx => {
            if let Err(err) = child.kill().await {
                debug!("session {}: failed to kill transcoder: {}", id, err);
            }
        },
    )
}

async fn pump_packets<C: Connection>(
    player: Weak<PlayerInner<C>>,
    id: SessionId,
    socket: std::net::UdpSocket,
    dispatcher: SharedDispatcher<C>,
    audio_sink: Option<AudioSink>,
) {
    let result = udp_server::run(
        socket,
        |packet| dispatcher.lock().handle_packet(packet),
        |packet| match &audio_sink {
            Some(audio_sink) => audio_sink.write(packet),
            None => trace!("dropping audio packet; audio not requested"),
        },
    )
    .await;

    if let Err(err) = result {
        error!("session {}: relay socket failed: {}", id, err);
        if let Some(player) = player.upgrade() {
            player.emit(PlayerEvent::Error(format!("Relay socket failed - {}", err)));
            player.teardown(Some(id));
        }
    }
}

/// Plays media into a connection through a transcoder.
pub struct VideoPlayer<C: Connection> {
    inner: Arc<PlayerInner<C>>,
}

impl<C: Connection> VideoPlayer<C> {
    pub fn new(
        connection: Arc<C>,
        config: RelayConfig,
    ) -> (Self, mpsc::UnboundedReceiver<PlayerEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let player = Self {
            inner: Arc::new(PlayerInner {
                connection,
                config,
                events,
                session: Mutex::new(None),
                start_lock: sync::Mutex::new(()),
                next_session_id: AtomicU64::new(1),
            }),
        };
        (player, events_rx)
    }

    /// Starts a session, replacing any active one. Failures are also
    /// reported as an `Error` event.
    pub async fn play_video(
        &self,
        resource: Resource,
        options: PlayOptions,
    ) -> Result<PlayHandle<C>, RelayError> {
        let result = self.inner.start(resource, options).await;
        if let Err(err) = &result {
            error!("failed to start video: {}", err);
            self.inner.emit(PlayerEvent::Error(err.to_string()));
        }
        result
    }

    /// Tears down the active session, if any. Returns once the relay socket
    /// is closed and the transcoder has exited.
    pub async fn destroy(&self) {
        self.inner.teardown_and_wait().await;
    }

    pub fn is_active(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    pub fn dispatcher(&self) -> Option<SharedDispatcher<C>> {
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|session| session.dispatcher.clone())
    }

    pub fn port(&self) -> Option<u16> {
        self.inner.session.lock().as_ref().map(|session| session.port)
    }
}

impl<C: Connection> Drop for VideoPlayer<C> {
    fn drop(&mut self) {
        self.inner.teardown(None);
    }
}
