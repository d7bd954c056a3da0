//! Generic streaming-server source.
//!
//! # Overview
//!
//! Connects to a streaming STT WebSocket server, sends 16 kHz mono audio as
//! raw little-endian `f32` binary frames, and maps JSON result frames
//! through [`ServerReconciler`].  The text sentinel `"Done"` signals end of
//! audio when the stream shuts down cleanly.
//!
//! An unexpected close while intent holds triggers the shared exponential
//! backoff schedule; the microphone keeps running across reconnect attempts
//! and frames produced while the socket is down are discarded.

use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::audio::{AudioFeed, FrameReceiver, MicFeed};
use crate::reconcile::ServerReconciler;
use crate::source::{
    reconnect_delay, SourceFlags, TranscriptionSource, MAX_RECONNECT_ATTEMPTS,
};
use crate::types::{ErrorKind, FaultSink, ResultSink, SourceError, SourceFault};
use crate::wire::{parse_frame, ServerFrame, ServerInfo};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why a connection's drive loop returned.
enum Exit {
    /// `stop()` was requested or the audio feed ended.
    Shutdown,
    /// The server closed or the socket errored; reconnect may apply.
    Closed,
}

// ---------------------------------------------------------------------------
// ServerSource
// ---------------------------------------------------------------------------

/// [`TranscriptionSource`] backed by a generic streaming WebSocket server.
pub struct ServerSource {
    url: String,
    flags: SourceFlags,
    results: ResultSink,
    faults: FaultSink,
    feed: Box<dyn AudioFeed>,
    reconciler: Arc<Mutex<ServerReconciler>>,
    info: Arc<Mutex<Option<ServerInfo>>>,
    shutdown: Option<watch::Sender<bool>>,
    driver: Option<JoinHandle<()>>,
}

impl ServerSource {
    /// Create a source that captures from the default microphone.
    pub fn new(url: impl Into<String>, results: ResultSink, faults: FaultSink) -> Self {
        Self::with_feed(url, results, faults, Box::new(MicFeed::new()))
    }

    /// Create a source over a caller-supplied audio feed.
    pub fn with_feed(
        url: impl Into<String>,
        results: ResultSink,
        faults: FaultSink,
        feed: Box<dyn AudioFeed>,
    ) -> Self {
        Self {
            url: url.into(),
            flags: SourceFlags::new(),
            results,
            faults,
            feed,
            reconciler: Arc::new(Mutex::new(ServerReconciler::new())),
            info: Arc::new(Mutex::new(None)),
            shutdown: None,
            driver: None,
        }
    }

    /// Server self-description from the INFO handshake, if one arrived.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.info.lock().ok().and_then(|guard| guard.clone())
    }
}

impl TranscriptionSource for ServerSource {
    fn name(&self) -> &'static str {
        "server"
    }

    fn start(&mut self) -> Result<(), SourceError> {
        if self.flags.should_listen() {
            return Ok(());
        }

        let frames = self.feed.start()?;

        self.flags.set_should_listen(true);
        let token = self.flags.advance_generation();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown = Some(shutdown_tx);

        let driver = Driver {
            url: self.url.clone(),
            flags: self.flags.clone(),
            results: self.results.clone(),
            faults: self.faults.clone(),
            reconciler: Arc::clone(&self.reconciler),
            info: Arc::clone(&self.info),
            token,
        };
        self.driver = Some(tokio::spawn(driver.run(frames, shutdown_rx)));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SourceError> {
        self.flags.set_should_listen(false);
        // Anything still in flight goes stale before we signal shutdown.
        self.flags.advance_generation();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        self.feed.stop();
        self.flags.set_listening(false);
        self.flags.set_connected(false);
        self.driver.take();
        Ok(())
    }

    fn force_finalize(&mut self) {
        // The protocol has no flush primitive; endpoints only come from the
        // server's own silence detection.
        log::debug!("server source: force_finalize is a no-op");
    }

    fn listening(&self) -> bool {
        self.flags.listening()
    }

    fn connected(&self) -> bool {
        self.flags.connected()
    }
}

impl Drop for ServerSource {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// ---------------------------------------------------------------------------
// Driver task
// ---------------------------------------------------------------------------

struct Driver {
    url: String,
    flags: SourceFlags,
    results: ResultSink,
    faults: FaultSink,
    reconciler: Arc<Mutex<ServerReconciler>>,
    info: Arc<Mutex<Option<ServerInfo>>>,
    token: u64,
}

impl Driver {
    /// Connection loop: connect, drive, and reconnect with backoff until
    /// shutdown, exhaustion, or staleness.
    async fn run(self, mut frames: FrameReceiver, mut shutdown: watch::Receiver<bool>) {
        let mut failures: u32 = 0;

        loop {
            if !self.flags.is_live(self.token) {
                return;
            }

            let connected = tokio::select! {
                _ = shutdown.changed() => return,
                conn = connect_async(self.url.as_str()) => conn,
            };

            match connected {
                Ok((ws, _response)) => {
                    log::debug!("connected to {}", self.url);
                    self.flags.set_connected(true);
                    self.flags.set_listening(true);
                    failures = 0;
                    if let Ok(mut rec) = self.reconciler.lock() {
                        rec.begin_session();
                    }

                    let exit = self.drive(ws, &mut frames, &mut shutdown).await;

                    self.flags.set_connected(false);
                    self.flags.set_listening(false);
                    if matches!(exit, Exit::Shutdown) {
                        return;
                    }
                }
                Err(e) => {
                    log::warn!("connection to {} failed: {e}", self.url);
                }
            }

            if !self.flags.is_live(self.token) {
                return;
            }

            failures += 1;
            if failures > MAX_RECONNECT_ATTEMPTS {
                log::error!("giving up after {MAX_RECONNECT_ATTEMPTS} reconnect attempts");
                self.fail(ErrorKind::ReconnectExhausted, "too many reconnect attempts");
                return;
            }

            let delay = reconnect_delay(failures - 1);
            log::debug!("reconnecting to {} in {delay:?} (attempt {failures})", self.url);
            if !self.wait_reconnect(delay, &mut frames, &mut shutdown).await {
                return;
            }
        }
    }

    /// Pump one live connection until it closes or shutdown is requested.
    async fn drive(
        &self,
        ws: WsStream,
        frames: &mut FrameReceiver,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Exit {
        let (mut sink, mut stream) = ws.split();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    // Signal end of audio so the server flushes, then close.
                    let _ = sink.send(Message::Text("Done".into())).await;
                    let _ = sink.close().await;
                    return Exit::Shutdown;
                }
                frame = frames.recv() => match frame {
                    Some(samples) => {
                        if sink.send(Message::Binary(encode_f32le(&samples))).await.is_err() {
                            return Exit::Closed;
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Text("Done".into())).await;
                        let _ = sink.close().await;
                        self.feed_ended();
                        return Exit::Shutdown;
                    }
                },
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Close(_))) => return Exit::Closed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("socket error: {e}");
                        return Exit::Closed;
                    }
                    None => return Exit::Closed,
                },
            }
        }
    }

    fn handle_text(&self, data: &str) {
        if !self.flags.is_live(self.token) {
            return;
        }

        let (frame, raw) = match parse_frame::<ServerFrame>(data) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("dropping malformed server frame: {e}");
                return;
            }
        };

        if frame.is_info() {
            let info = ServerInfo::from_frame(&frame);
            log::info!(
                "server info: {} ({}, {} Hz)",
                info.model_display,
                info.backend,
                info.sample_rate
            );
            if let Ok(mut guard) = self.info.lock() {
                *guard = Some(info);
            }
            return;
        }

        let transcripts = match self.reconciler.lock() {
            Ok(mut rec) => rec.push(&frame, &raw),
            Err(_) => return,
        };
        for transcript in transcripts {
            if !self.flags.is_live(self.token) {
                return;
            }
            if self.results.send(transcript).is_err() {
                return;
            }
        }
    }

    /// Report a fatal fault and clear intent, once, unless already stale.
    fn fail(&self, kind: ErrorKind, message: &str) {
        if !self.flags.is_live(self.token) {
            return;
        }
        self.flags.set_should_listen(false);
        let _ = self.faults.send(SourceFault::new(kind, message));
    }

    /// The audio feed ended on its own.  Intent must clear with it, or a
    /// later `start` would see `should_listen` still set and no-op against
    /// a dead driver.
    fn feed_ended(&self) {
        if self.flags.is_live(self.token) {
            self.flags.set_should_listen(false);
        }
    }

    /// Sleep out a backoff delay while draining (and discarding) mic frames.
    ///
    /// Returns false when shutdown was requested or the feed ended.
    async fn wait_reconnect(
        &self,
        delay: std::time::Duration,
        frames: &mut FrameReceiver,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = shutdown.changed() => return false,
                _ = &mut sleep => return true,
                frame = frames.recv() => {
                    if frame.is_none() {
                        self.feed_ended();
                        return false;
                    }
                    // Stale audio from the reconnect gap is dropped.
                }
            }
        }
    }
}

/// Raw little-endian `f32` encoding for the server's binary audio frames.
fn encode_f32le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 4);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
