//! Cloud streaming source.
//!
//! # Overview
//!
//! Connects to a cloud streaming STT API over WebSocket, authenticating via
//! an `Authorization: Token <key>` header, sends 16 kHz mono audio as
//! linear16 (little-endian `i16`) binary frames, and maps `Results` frames
//! through [`CloudReconciler`].
//!
//! Control frames: `{"type":"Finalize"}` asks the service to flush buffered
//! audio (replies are tagged `from_finalize`); `{"type":"CloseStream"}` ends
//! the stream on a clean stop.
//!
//! Close codes 1008 and 1003 mean the credentials were rejected; they
//! short-circuit the reconnect schedule and report an auth fault instead.

use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::audio::{AudioFeed, FrameReceiver, MicFeed};
use crate::config::CloudConfig;
use crate::reconcile::CloudReconciler;
use crate::source::{
    reconnect_delay, SourceFlags, TranscriptionSource, MAX_RECONNECT_ATTEMPTS,
};
use crate::types::{ErrorKind, FaultSink, ResultSink, SourceError, SourceFault};
use crate::wire::{parse_frame, CloudFrame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FINALIZE_FRAME: &str = r#"{"type":"Finalize"}"#;
const CLOSE_FRAME: &str = r#"{"type":"CloseStream"}"#;

/// Why a connection's drive loop returned.
enum Exit {
    Shutdown,
    Closed,
    /// The service rejected our credentials; do not reconnect.
    Auth { code: u16, reason: String },
}

// ---------------------------------------------------------------------------
// CloudSource
// ---------------------------------------------------------------------------

/// [`TranscriptionSource`] backed by a cloud streaming API.
pub struct CloudSource {
    config: CloudConfig,
    flags: SourceFlags,
    results: ResultSink,
    faults: FaultSink,
    feed: Box<dyn AudioFeed>,
    reconciler: Arc<Mutex<CloudReconciler>>,
    control: Option<mpsc::UnboundedSender<()>>,
    shutdown: Option<watch::Sender<bool>>,
    driver: Option<JoinHandle<()>>,
}

impl CloudSource {
    /// Create a source that captures from the default microphone.
    pub fn new(config: CloudConfig, results: ResultSink, faults: FaultSink) -> Self {
        Self::with_feed(config, results, faults, Box::new(MicFeed::new()))
    }

    /// Create a source over a caller-supplied audio feed.
    pub fn with_feed(
        config: CloudConfig,
        results: ResultSink,
        faults: FaultSink,
        feed: Box<dyn AudioFeed>,
    ) -> Self {
        Self {
            config,
            flags: SourceFlags::new(),
            results,
            faults,
            feed,
            reconciler: Arc::new(Mutex::new(CloudReconciler::new())),
            control: None,
            shutdown: None,
            driver: None,
        }
    }

    /// Endpoint URL with the streaming query parameters applied.
    fn request_url(&self) -> String {
        let base = &self.config.url;
        let sep = if base.contains('?') { '&' } else { '?' };
        format!(
            "{base}{sep}model={}&language={}&smart_format=true&interim_results=true\
             &utterance_end_ms=1000&vad_events=true&encoding=linear16\
             &sample_rate=16000&channels=1",
            self.config.model, self.config.language
        )
    }
}

impl TranscriptionSource for CloudSource {
    fn name(&self) -> &'static str {
        "cloud"
    }

    fn start(&mut self) -> Result<(), SourceError> {
        if self.flags.should_listen() {
            return Ok(());
        }

        let api_key = match self.config.api_key.as_deref() {
            Some(key) if !key.is_empty() => key,
            _ => {
                let err = SourceError::MissingCredential("cloud API key is not configured");
                let _ = self
                    .faults
                    .send(SourceFault::new(ErrorKind::MissingCredential, err.to_string()));
                return Err(err);
            }
        };
        let auth = HeaderValue::from_str(&format!("Token {api_key}")).map_err(|_| {
            SourceError::MissingCredential("cloud API key contains invalid characters")
        })?;

        let frames = self.feed.start()?;

        self.flags.set_should_listen(true);
        let token = self.flags.advance_generation();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown = Some(shutdown_tx);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        self.control = Some(control_tx);

        let driver = Driver {
            url: self.request_url(),
            auth,
            flags: self.flags.clone(),
            results: self.results.clone(),
            faults: self.faults.clone(),
            reconciler: Arc::clone(&self.reconciler),
            token,
        };
        self.driver = Some(tokio::spawn(driver.run(frames, control_rx, shutdown_rx)));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SourceError> {
        self.flags.set_should_listen(false);
        self.flags.advance_generation();
        self.control.take();
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
        if let Some(control) = &self.control {
            let _ = control.send(());
        }
    }

    fn listening(&self) -> bool {
        self.flags.listening()
    }

    fn connected(&self) -> bool {
        self.flags.connected()
    }
}

impl Drop for CloudSource {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// ---------------------------------------------------------------------------
// Driver task
// ---------------------------------------------------------------------------

struct Driver {
    url: String,
    auth: HeaderValue,
    flags: SourceFlags,
    results: ResultSink,
    faults: FaultSink,
    reconciler: Arc<Mutex<CloudReconciler>>,
    token: u64,
}

impl Driver {
    async fn run(
        self,
        mut frames: FrameReceiver,
        mut control: mpsc::UnboundedReceiver<()>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut failures: u32 = 0;

        loop {
            if !self.flags.is_live(self.token) {
                return;
            }

            let request = match self.url.as_str().into_client_request() {
                Ok(mut request) => {
                    request.headers_mut().insert(AUTHORIZATION, self.auth.clone());
                    request
                }
                Err(e) => {
                    self.fail(ErrorKind::ConnectionFailed, &format!("bad endpoint url: {e}"));
                    return;
                }
            };

            let connected = tokio::select! {
                _ = shutdown.changed() => return,
                conn = connect_async(request) => conn,
            };

            match connected {
                Ok((ws, _response)) => {
                    log::debug!("connected to cloud endpoint");
                    self.flags.set_connected(true);
                    self.flags.set_listening(true);
                    failures = 0;
                    if let Ok(mut rec) = self.reconciler.lock() {
                        rec.begin_session();
                    }

                    let exit = self
                        .drive(ws, &mut frames, &mut control, &mut shutdown)
                        .await;

                    self.flags.set_connected(false);
                    self.flags.set_listening(false);
                    match exit {
                        Exit::Shutdown => return,
                        Exit::Auth { code, reason } => {
                            self.fail(
                                ErrorKind::AuthFailed,
                                &format!("cloud auth failed (code {code}): {reason}"),
                            );
                            return;
                        }
                        Exit::Closed => {}
                    }
                }
                Err(WsError::Http(response))
                    if matches!(response.status().as_u16(), 401 | 403) =>
                {
                    self.fail(
                        ErrorKind::AuthFailed,
                        &format!("cloud auth failed (HTTP {})", response.status()),
                    );
                    return;
                }
                Err(e) => {
                    log::warn!("cloud connection failed: {e}");
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
            log::debug!("reconnecting to cloud in {delay:?} (attempt {failures})");
            if !self.wait_reconnect(delay, &mut frames, &mut shutdown).await {
                return;
            }
        }
    }

    async fn drive(
        &self,
        ws: WsStream,
        frames: &mut FrameReceiver,
        control: &mut mpsc::UnboundedReceiver<()>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Exit {
        let (mut sink, mut stream) = ws.split();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = sink.send(Message::Text(CLOSE_FRAME.into())).await;
                    let _ = sink.close().await;
                    return Exit::Shutdown;
                }
                ctl = control.recv() => match ctl {
                    Some(()) => {
                        let _ = sink.send(Message::Text(FINALIZE_FRAME.into())).await;
                    }
                    // Control sender only drops when the source goes away.
                    None => return Exit::Shutdown,
                },
                frame = frames.recv() => match frame {
                    Some(samples) => {
                        if sink.send(Message::Binary(encode_linear16(&samples))).await.is_err() {
                            return Exit::Closed;
                        }
                    }
                    None => {
                        let _ = sink.send(Message::Text(CLOSE_FRAME.into())).await;
                        let _ = sink.close().await;
                        self.feed_ended();
                        return Exit::Shutdown;
                    }
                },
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(frame) = frame {
                            let code = u16::from(frame.code);
                            if code == 1008 || code == 1003 {
                                return Exit::Auth {
                                    code,
                                    reason: frame.reason.into_owned(),
                                };
                            }
                            log::warn!("cloud closed the stream: code={code}");
                        }
                        return Exit::Closed;
                    }
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

        let (frame, raw) = match parse_frame::<CloudFrame>(data) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("dropping malformed cloud frame: {e}");
                return;
            }
        };

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
                }
            }
        }
    }
}

/// Float samples in `[-1, 1]` to linear16 (little-endian `i16`) PCM.
fn encode_linear16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = if clamped < 0.0 {
            (clamped * 0x8000 as f32) as i16
        } else {
            (clamped * 0x7fff as f32) as i16
        };
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ChannelFeed;
    use tokio::sync::mpsc as tokio_mpsc;

    fn config_with_key(api_key: Option<&str>) -> CloudConfig {
        CloudConfig {
            api_key: api_key.map(str::to_string),
            ..CloudConfig::default()
        }
    }

    fn make_source(api_key: Option<&str>) -> (CloudSource, tokio_mpsc::UnboundedReceiver<SourceFault>) {
        let (result_tx, _result_rx) = tokio_mpsc::unbounded_channel();
        let (fault_tx, fault_rx) = tokio_mpsc::unbounded_channel();
        let (_frame_tx, frame_rx) = tokio_mpsc::unbounded_channel();
        let source = CloudSource::with_feed(
            config_with_key(api_key),
            result_tx,
            fault_tx,
            Box::new(ChannelFeed::new(frame_rx)),
        );
        (source, fault_rx)
    }

    #[test]
    fn encode_linear16_full_scale() {
        let bytes = encode_linear16(&[1.0, -1.0, 0.0]);
        assert_eq!(bytes.len(), 6);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MIN);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), 0);
    }

    #[test]
    fn encode_linear16_clamps_out_of_range() {
        let bytes = encode_linear16(&[2.0, -2.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MIN);
    }

    #[test]
    fn missing_api_key_fails_start_with_fault() {
        let (mut source, mut faults) = make_source(None);
        let err = source.start().unwrap_err();
        assert!(matches!(err, SourceError::MissingCredential(_)));
        let fault = faults.try_recv().expect("fault emitted");
        assert_eq!(fault.kind, ErrorKind::MissingCredential);
        assert!(!source.listening());
    }

    #[test]
    fn empty_api_key_counts_as_missing() {
        let (mut source, _faults) = make_source(Some(""));
        assert!(matches!(
            source.start(),
            Err(SourceError::MissingCredential(_))
        ));
    }

    #[test]
    fn request_url_carries_streaming_params() {
        let (source, _faults) = make_source(Some("key"));
        let url = source.request_url();
        assert!(url.contains("encoding=linear16"));
        assert!(url.contains("sample_rate=16000"));
        assert!(url.contains("interim_results=true"));
        assert!(url.contains("channels=1"));
    }

    #[test]
    fn stop_before_start_is_safe() {
        let (mut source, _faults) = make_source(Some("key"));
        assert!(source.stop().is_ok());
        assert!(source.stop().is_ok());
    }

    #[test]
    fn force_finalize_without_start_is_a_no_op() {
        let (mut source, _faults) = make_source(Some("key"));
        source.force_finalize();
    }

    #[tokio::test(start_paused = true)]
    async fn feed_end_clears_intent_so_restart_is_not_a_no_op() {
        let (result_tx, _result_rx) = tokio_mpsc::unbounded_channel();
        let (fault_tx, _fault_rx) = tokio_mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = tokio_mpsc::unbounded_channel();
        let mut config = config_with_key(Some("key"));
        config.url = "ws://127.0.0.1:1".into();
        let mut source = CloudSource::with_feed(
            config,
            result_tx,
            fault_tx,
            Box::new(ChannelFeed::new(frame_rx)),
        );
        source.start().expect("start");
        drop(frame_tx);

        // Once the driver notices the dead feed it clears intent, and the
        // consumed single-use test feed makes the next start observable as
        // an error rather than a silent no-op.
        for _ in 0..200 {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            if source.start().is_err() {
                return;
            }
        }
        panic!("start stayed a no-op after the feed ended");
    }
}
