//! On-device recognizer source.
//!
//! # Overview
//!
//! Drives an OS speech recognizer behind the [`DeviceRecognizer`] trait.
//! The recognizer owns its own audio capture; this source only manages run
//! lifecycle and maps event batches through [`DeviceReconciler`].
//!
//! OS recognizers end their run on every endpoint (and on platform
//! timeouts), so continuous listening means restarting the run whenever it
//! ends while intent still holds.  Result indices restart at zero per run;
//! segment ids do not.
//!
//! Platform error kinds split into benign ones that merely end the run
//! (`no-speech`, `aborted`) and fatal ones that stop the source and report a
//! fault.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::reconcile::DeviceReconciler;
use crate::source::{SourceFlags, TranscriptionSource};
use crate::types::{ErrorKind, FaultSink, ResultSink, SourceError, SourceFault};
use crate::wire::DeviceEvent;

/// Event channel a recognizer run delivers into.
pub type DeviceEventSender = mpsc::UnboundedSender<DeviceEvent>;

// ---------------------------------------------------------------------------
// DeviceRecognizer trait
// ---------------------------------------------------------------------------

/// Platform integration point for an OS speech recognizer.
///
/// `begin` starts one recognizer run delivering [`DeviceEvent`]s into
/// `events` until a [`DeviceEvent::End`] (or the sender is dropped).  It
/// must fail with [`SourceError::CapabilityUnavailable`] when no recognizer
/// exists in this environment, so hosts find out at `start` time rather
/// than from a dead stream.
pub trait DeviceRecognizer: Send {
    /// Start one recognizer run for `language` (a BCP 47 tag).
    fn begin(&mut self, language: &str, events: DeviceEventSender) -> Result<(), SourceError>;

    /// Cancel the current run, if any.  The run ends without further
    /// results; best-effort.
    fn abort(&mut self);
}

/// Default recognizer for platforms without an integration.
///
/// Always reports [`SourceError::CapabilityUnavailable`].
#[derive(Debug, Default)]
pub struct UnsupportedRecognizer;

impl DeviceRecognizer for UnsupportedRecognizer {
    fn begin(&mut self, _language: &str, _events: DeviceEventSender) -> Result<(), SourceError> {
        Err(SourceError::CapabilityUnavailable(
            "no on-device speech recognizer is integrated for this platform".into(),
        ))
    }

    fn abort(&mut self) {}
}

// ---------------------------------------------------------------------------
// DeviceSource
// ---------------------------------------------------------------------------

/// [`TranscriptionSource`] backed by the OS recognizer.
pub struct DeviceSource {
    language: String,
    recognizer: Arc<Mutex<Box<dyn DeviceRecognizer>>>,
    flags: SourceFlags,
    results: ResultSink,
    faults: FaultSink,
    reconciler: Arc<Mutex<DeviceReconciler>>,
    shutdown: Option<watch::Sender<bool>>,
    driver: Option<JoinHandle<()>>,
}

impl DeviceSource {
    /// Create a source over the platform recognizer.
    ///
    /// No integration is wired up yet, so this currently always fails at
    /// `start` with a capability fault; hosts with a recognizer use
    /// [`DeviceSource::with_recognizer`].
    pub fn new(language: impl Into<String>, results: ResultSink, faults: FaultSink) -> Self {
        Self::with_recognizer(language, results, faults, Box::new(UnsupportedRecognizer))
    }

    /// Create a source over a caller-supplied recognizer.
    pub fn with_recognizer(
        language: impl Into<String>,
        results: ResultSink,
        faults: FaultSink,
        recognizer: Box<dyn DeviceRecognizer>,
    ) -> Self {
        Self {
            language: language.into(),
            recognizer: Arc::new(Mutex::new(recognizer)),
            flags: SourceFlags::new(),
            results,
            faults,
            reconciler: Arc::new(Mutex::new(DeviceReconciler::new())),
            shutdown: None,
            driver: None,
        }
    }

    fn abort_recognizer(&self) {
        if let Ok(mut recognizer) = self.recognizer.lock() {
            recognizer.abort();
        }
    }
}

impl TranscriptionSource for DeviceSource {
    fn name(&self) -> &'static str {
        "device"
    }

    fn start(&mut self) -> Result<(), SourceError> {
        if self.flags.should_listen() {
            return Ok(());
        }

        // First run begins synchronously so an unavailable recognizer is a
        // `start` error, not a silent dead stream.
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        if let Ok(mut rec) = self.reconciler.lock() {
            rec.begin_run();
        }
        match self.recognizer.lock() {
            Ok(mut recognizer) => recognizer.begin(&self.language, ev_tx)?,
            Err(_) => {
                return Err(SourceError::CapabilityUnavailable(
                    "recognizer state is poisoned".into(),
                ))
            }
        }

        self.flags.set_should_listen(true);
        self.flags.set_listening(true);
        let token = self.flags.advance_generation();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown = Some(shutdown_tx);

        let driver = Driver {
            language: self.language.clone(),
            recognizer: Arc::clone(&self.recognizer),
            flags: self.flags.clone(),
            results: self.results.clone(),
            faults: self.faults.clone(),
            reconciler: Arc::clone(&self.reconciler),
            token,
        };
        self.driver = Some(tokio::spawn(driver.run(ev_rx, shutdown_rx)));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SourceError> {
        self.flags.set_should_listen(false);
        self.flags.advance_generation();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        self.abort_recognizer();
        self.flags.set_listening(false);
        self.driver.take();
        Ok(())
    }

    fn force_finalize(&mut self) {
        if !self.flags.should_listen() {
            return;
        }
        // Aborting ends the run; the driver restarts it.  The interrupted
        // utterance never gets an endpoint, so the id it occupied is retired
        // up front.
        if let Ok(mut rec) = self.reconciler.lock() {
            rec.bump_segment();
        }
        self.abort_recognizer();
    }

    fn listening(&self) -> bool {
        self.flags.listening()
    }

    fn connected(&self) -> bool {
        // Capture and recognition are both on-device; there is no transport
        // whose state this flag could report.
        false
    }
}

impl Drop for DeviceSource {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// ---------------------------------------------------------------------------
// Driver task
// ---------------------------------------------------------------------------

struct Driver {
    language: String,
    recognizer: Arc<Mutex<Box<dyn DeviceRecognizer>>>,
    flags: SourceFlags,
    results: ResultSink,
    faults: FaultSink,
    reconciler: Arc<Mutex<DeviceReconciler>>,
    token: u64,
}

impl Driver {
    /// Run loop: pump one recognizer run, restart it while intent holds.
    async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<DeviceEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let restart = self.drive(&mut events, &mut shutdown).await;
            if !restart || !self.flags.is_live(self.token) {
                break;
            }

            log::debug!("recognizer run ended, restarting");
            let (ev_tx, ev_rx) = mpsc::unbounded_channel();
            if let Ok(mut rec) = self.reconciler.lock() {
                rec.begin_run();
            }
            let begun = match self.recognizer.lock() {
                Ok(mut recognizer) => recognizer.begin(&self.language, ev_tx),
                Err(_) => break,
            };
            if let Err(e) = begun {
                self.fail(ErrorKind::Recognition, &format!("recognizer restart failed: {e}"));
                break;
            }
            events = ev_rx;
        }

        if self.flags.generation() == self.token {
            self.flags.set_listening(false);
        }
    }

    /// Pump one run.  Returns true when the run ended and should restart.
    async fn drive(
        &self,
        events: &mut mpsc::UnboundedReceiver<DeviceEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        loop {
            let event = tokio::select! {
                _ = shutdown.changed() => return false,
                event = events.recv() => event,
            };

            match event {
                Some(DeviceEvent::Results { first_index, results }) => {
                    let transcripts = match self.reconciler.lock() {
                        Ok(mut rec) => rec.push(first_index, &results),
                        Err(_) => return false,
                    };
                    for transcript in transcripts {
                        if !self.flags.is_live(self.token) {
                            return false;
                        }
                        if self.results.send(transcript).is_err() {
                            return false;
                        }
                    }
                }
                Some(DeviceEvent::Error { kind, message }) => {
                    if benign(&kind) {
                        log::debug!("recognizer: {kind} ({message})");
                        continue;
                    }
                    self.fail(fault_kind(&kind), &format!("{kind}: {message}"));
                    return false;
                }
                // Run over (endpoint, timeout, or abort); sender dropped
                // counts the same.
                Some(DeviceEvent::End) | None => return true,
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
}

/// Error kinds that end a run without being worth a fault.
fn benign(kind: &str) -> bool {
    matches!(kind, "no-speech" | "aborted")
}

/// Map a platform error kind string to a normalized fault category.
fn fault_kind(kind: &str) -> ErrorKind {
    match kind {
        "not-allowed" | "service-not-allowed" => ErrorKind::CapabilityUnavailable,
        "network" => ErrorKind::ConnectionFailed,
        "audio-capture" => ErrorKind::Capture,
        _ => ErrorKind::Recognition,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::DeviceResult;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Recognizer that replays a scripted event list per run.
    ///
    /// Senders are retained so runs without an `End` stay open instead of
    /// hot-looping the driver.
    struct ScriptedRecognizer {
        scripts: Vec<Vec<DeviceEvent>>,
        begins: Arc<Mutex<u32>>,
        senders: Vec<DeviceEventSender>,
    }

    impl ScriptedRecognizer {
        fn new(scripts: Vec<Vec<DeviceEvent>>) -> (Self, Arc<Mutex<u32>>) {
            let begins = Arc::new(Mutex::new(0));
            let recognizer = Self {
                scripts,
                begins: Arc::clone(&begins),
                senders: Vec::new(),
            };
            (recognizer, begins)
        }
    }

    impl DeviceRecognizer for ScriptedRecognizer {
        fn begin(&mut self, _language: &str, events: DeviceEventSender) -> Result<(), SourceError> {
            *self.begins.lock().unwrap() += 1;
            if !self.scripts.is_empty() {
                for event in self.scripts.remove(0) {
                    let _ = events.send(event);
                }
            }
            self.senders.push(events);
            Ok(())
        }

        fn abort(&mut self) {
            if let Some(events) = self.senders.last() {
                let _ = events.send(DeviceEvent::End);
            }
        }
    }

    fn fin(text: &str) -> DeviceResult {
        DeviceResult {
            text: text.into(),
            is_final: true,
            confidence: Some(0.9),
        }
    }

    fn batch(first_index: usize, results: Vec<DeviceResult>) -> DeviceEvent {
        DeviceEvent::Results {
            first_index,
            results,
        }
    }

    fn channels() -> (
        ResultSink,
        mpsc::UnboundedReceiver<crate::types::Transcript>,
        FaultSink,
        mpsc::UnboundedReceiver<SourceFault>,
    ) {
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        (result_tx, result_rx, fault_tx, fault_rx)
    }

    async fn recv(
        rx: &mut mpsc::UnboundedReceiver<crate::types::Transcript>,
    ) -> crate::types::Transcript {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("transcript in time")
            .expect("channel open")
    }

    #[test]
    fn unsupported_recognizer_fails_start_synchronously() {
        let (result_tx, _result_rx, fault_tx, _fault_rx) = channels();
        let mut source = DeviceSource::new("en-US", result_tx, fault_tx);
        // No runtime involved before the first begin succeeds.
        assert!(matches!(
            source.start(),
            Err(SourceError::CapabilityUnavailable(_))
        ));
        assert!(!source.listening());
    }

    #[tokio::test]
    async fn results_flow_and_runs_restart() {
        let (recognizer, begins) = ScriptedRecognizer::new(vec![
            vec![batch(0, vec![fin("hello")]), DeviceEvent::End],
            vec![batch(0, vec![fin("world")])],
        ]);
        let (result_tx, mut result_rx, fault_tx, _fault_rx) = channels();
        let mut source =
            DeviceSource::with_recognizer("en-US", result_tx, fault_tx, Box::new(recognizer));
        source.start().expect("start");
        assert!(source.listening());
        // No transport involved: an on-device session never reads connected.
        assert!(!source.connected());

        let first = recv(&mut result_rx).await;
        assert_eq!(first.text, "hello");
        assert!(first.is_endpoint);
        assert_eq!(first.segment_id, 0);

        // Second run: indices reset, segment ids keep counting.
        let second = recv(&mut result_rx).await;
        assert_eq!(second.text, "world");
        assert_eq!(second.segment_id, 1);
        assert_eq!(*begins.lock().unwrap(), 2);

        source.stop().expect("stop");
        assert!(!source.listening());
    }

    #[tokio::test]
    async fn fatal_error_stops_the_source_with_a_fault() {
        let (recognizer, _begins) = ScriptedRecognizer::new(vec![vec![DeviceEvent::Error {
            kind: "not-allowed".into(),
            message: "speech recognition denied".into(),
        }]]);
        let (result_tx, _result_rx, fault_tx, mut fault_rx) = channels();
        let mut source =
            DeviceSource::with_recognizer("en-US", result_tx, fault_tx, Box::new(recognizer));
        source.start().expect("start");

        let fault = timeout(Duration::from_secs(1), fault_rx.recv())
            .await
            .expect("fault in time")
            .expect("channel open");
        assert_eq!(fault.kind, ErrorKind::CapabilityUnavailable);
    }

    #[tokio::test]
    async fn benign_errors_do_not_fault() {
        let (recognizer, begins) = ScriptedRecognizer::new(vec![
            vec![
                DeviceEvent::Error {
                    kind: "no-speech".into(),
                    message: "nothing heard".into(),
                },
                DeviceEvent::End,
            ],
            vec![batch(0, vec![fin("back")])],
        ]);
        let (result_tx, mut result_rx, fault_tx, mut fault_rx) = channels();
        let mut source =
            DeviceSource::with_recognizer("en-US", result_tx, fault_tx, Box::new(recognizer));
        source.start().expect("start");

        // The run restarted past the benign error and kept producing.
        let t = recv(&mut result_rx).await;
        assert_eq!(t.text, "back");
        assert_eq!(*begins.lock().unwrap(), 2);
        assert!(fault_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn force_finalize_retires_the_open_segment() {
        let (recognizer, _begins) = ScriptedRecognizer::new(vec![
            vec![batch(0, vec![fin("one")])],
            vec![batch(0, vec![fin("three")])],
        ]);
        let (result_tx, mut result_rx, fault_tx, _fault_rx) = channels();
        let mut source =
            DeviceSource::with_recognizer("en-US", result_tx, fault_tx, Box::new(recognizer));
        source.start().expect("start");

        assert_eq!(recv(&mut result_rx).await.segment_id, 0);

        // Aborts the run; the id the interrupted utterance held is skipped.
        source.force_finalize();

        let next = recv(&mut result_rx).await;
        assert_eq!(next.text, "three");
        assert_eq!(next.segment_id, 2);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (recognizer, begins) = ScriptedRecognizer::new(vec![vec![]]);
        let (result_tx, _result_rx, fault_tx, _fault_rx) = channels();
        let mut source =
            DeviceSource::with_recognizer("en-US", result_tx, fault_tx, Box::new(recognizer));
        source.start().expect("first start");
        source.start().expect("second start");
        assert_eq!(*begins.lock().unwrap(), 1);
        source.stop().expect("stop");
    }

    #[test]
    fn stop_before_start_is_safe() {
        let (result_tx, _result_rx, fault_tx, _fault_rx) = channels();
        let mut source = DeviceSource::new("en-US", result_tx, fault_tx);
        assert!(source.stop().is_ok());
        assert!(source.stop().is_ok());
    }
}
