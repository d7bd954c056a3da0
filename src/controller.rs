//! Session controller — one active source, switchable at runtime.
//!
//! # Overview
//!
//! [`SessionController`] owns at most one boxed [`TranscriptionSource`] and
//! a desired-state flag.  `toggle`/`enable`/`disable` flip that flag and
//! drive the source to match; `set_source` swaps backends, discarding the
//! old source entirely so a late event from it can never reach the stream.
//!
//! The controller never reads the sinks.  Hosts consume transcripts and
//! faults directly and call [`SessionController::notify_fault`] when a
//! fault arrives, which records that the source has already stopped itself.

use crate::config::{AppConfig, CloudConfig, DeviceConfig, ServerConfig, SourceKind};
use crate::source::{CloudSource, DeviceSource, ServerSource, TranscriptionSource};
use crate::types::{FaultSink, ResultSink, SourceError, SourceFault};

// ---------------------------------------------------------------------------
// SourceParams
// ---------------------------------------------------------------------------

/// Backend selection plus the connection parameters to switch with.
///
/// Carrying the parameters in the switch lets a host change the server URL
/// or cloud credentials at runtime without rebuilding the controller.
#[derive(Debug, Clone)]
pub enum SourceParams {
    Device(DeviceConfig),
    Server(ServerConfig),
    Cloud(CloudConfig),
}

impl SourceParams {
    /// The backend kind these parameters select.
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceParams::Device(_) => SourceKind::Device,
            SourceParams::Server(_) => SourceKind::Server,
            SourceParams::Cloud(_) => SourceKind::Cloud,
        }
    }
}

// ---------------------------------------------------------------------------
// SourceFactory
// ---------------------------------------------------------------------------

/// Construction seam between the controller and the concrete sources.
pub trait SourceFactory: Send {
    /// Build a stopped source of the given kind from current settings.
    fn build(
        &self,
        kind: SourceKind,
        config: &AppConfig,
        results: ResultSink,
        faults: FaultSink,
    ) -> Box<dyn TranscriptionSource>;
}

/// Factory producing the real backend sources.
#[derive(Debug, Default)]
pub struct DefaultSourceFactory;

impl SourceFactory for DefaultSourceFactory {
    fn build(
        &self,
        kind: SourceKind,
        config: &AppConfig,
        results: ResultSink,
        faults: FaultSink,
    ) -> Box<dyn TranscriptionSource> {
        match kind {
            SourceKind::Device => Box::new(DeviceSource::new(
                config.device.language.clone(),
                results,
                faults,
            )),
            SourceKind::Server => {
                Box::new(ServerSource::new(config.server.url.clone(), results, faults))
            }
            SourceKind::Cloud => {
                Box::new(CloudSource::new(config.cloud.clone(), results, faults))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

/// Drives the configured source to match the desired listening state.
pub struct SessionController {
    enabled: bool,
    config: AppConfig,
    active: Option<Box<dyn TranscriptionSource>>,
    factory: Box<dyn SourceFactory>,
    results: ResultSink,
    faults: FaultSink,
}

impl SessionController {
    pub fn new(config: AppConfig, results: ResultSink, faults: FaultSink) -> Self {
        Self::with_factory(config, results, faults, Box::new(DefaultSourceFactory))
    }

    /// Construct with a custom factory (scripted sources in tests).
    pub fn with_factory(
        config: AppConfig,
        results: ResultSink,
        faults: FaultSink,
        factory: Box<dyn SourceFactory>,
    ) -> Self {
        Self {
            enabled: false,
            config,
            active: None,
            factory,
            results,
            faults,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The configured backend kind.
    pub fn source_kind(&self) -> SourceKind {
        self.config.source
    }

    /// Flip the desired state.  Returns the new state.
    pub fn toggle(&mut self) -> Result<bool, SourceError> {
        if self.enabled {
            self.disable()?;
        } else {
            self.enable()?;
        }
        Ok(self.enabled)
    }

    /// Start listening with the configured source.
    ///
    /// A failed start leaves the controller disabled, so a later `toggle`
    /// retries from a clean state instead of believing it is already on.
    pub fn enable(&mut self) -> Result<(), SourceError> {
        if self.enabled {
            return Ok(());
        }
        self.enabled = true;

        let kind = self.config.source;
        let (factory, config) = (&self.factory, &self.config);
        let (results, faults) = (self.results.clone(), self.faults.clone());
        let source = self
            .active
            .get_or_insert_with(|| factory.build(kind, config, results, faults));
        if let Err(e) = source.start() {
            log::error!("failed to start {} source: {e}", source.name());
            self.enabled = false;
            return Err(e);
        }
        log::info!("listening via {} source", self.config.source);
        Ok(())
    }

    /// Stop listening.  The source is kept for the next `enable`.
    pub fn disable(&mut self) -> Result<(), SourceError> {
        self.enabled = false;
        if let Some(source) = self.active.as_mut() {
            source.stop()?;
        }
        Ok(())
    }

    /// Switch backends, applying the new backend's connection parameters
    /// before anything is built.
    ///
    /// The old source is stopped and dropped, never reused; the replacement
    /// is constructed and started only while enabled.
    pub fn set_source(&mut self, params: SourceParams) -> Result<(), SourceError> {
        if let Some(mut old) = self.active.take() {
            let _ = old.stop();
        }
        let kind = params.kind();
        match params {
            SourceParams::Device(device) => self.config.device = device,
            SourceParams::Server(server) => self.config.server = server,
            SourceParams::Cloud(cloud) => self.config.cloud = cloud,
        }
        self.config.source = kind;

        if self.enabled {
            let mut source = self.build(kind);
            if let Err(e) = source.start() {
                log::error!("failed to start {} source after switch: {e}", source.name());
                self.enabled = false;
                return Err(e);
            }
            self.active = Some(source);
        }
        Ok(())
    }

    /// Ask the active source to flush a final result now.
    pub fn force_finalize(&mut self) {
        if let Some(source) = self.active.as_mut() {
            source.force_finalize();
        }
    }

    /// Record a fatal fault the host observed on the error sink.
    ///
    /// The source has already stopped itself by the time a fault is
    /// delivered; this only reconciles the desired state with that fact.
    pub fn notify_fault(&mut self, fault: &SourceFault) {
        log::warn!("source fault: {fault}");
        self.enabled = false;
        if let Some(mut source) = self.active.take() {
            let _ = source.stop();
        }
    }

    pub fn listening(&self) -> bool {
        self.active.as_ref().is_some_and(|s| s.listening())
    }

    pub fn connected(&self) -> bool {
        self.active.as_ref().is_some_and(|s| s.connected())
    }

    fn build(&self, kind: SourceKind) -> Box<dyn TranscriptionSource> {
        self.factory
            .build(kind, &self.config, self.results.clone(), self.faults.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    /// Shared log of lifecycle calls, `"start device"` / `"stop server"` style.
    type CallLog = Arc<Mutex<Vec<String>>>;

    struct ScriptedSource {
        kind: SourceKind,
        log: CallLog,
        fail_start: bool,
        listening: bool,
    }

    impl TranscriptionSource for ScriptedSource {
        fn name(&self) -> &'static str {
            match self.kind {
                SourceKind::Device => "device",
                SourceKind::Server => "server",
                SourceKind::Cloud => "cloud",
            }
        }

        fn start(&mut self) -> Result<(), SourceError> {
            self.log.lock().unwrap().push(format!("start {}", self.name()));
            if self.fail_start {
                return Err(SourceError::CapabilityUnavailable("scripted".into()));
            }
            self.listening = true;
            Ok(())
        }

        fn stop(&mut self) -> Result<(), SourceError> {
            self.log.lock().unwrap().push(format!("stop {}", self.name()));
            self.listening = false;
            Ok(())
        }

        fn force_finalize(&mut self) {
            self.log.lock().unwrap().push(format!("finalize {}", self.name()));
        }

        fn listening(&self) -> bool {
            self.listening
        }

        fn connected(&self) -> bool {
            self.listening
        }
    }

    struct ScriptedFactory {
        log: CallLog,
        fail_kinds: Vec<SourceKind>,
        /// Config snapshot at each build, for param-application checks.
        configs: Arc<Mutex<Vec<AppConfig>>>,
    }

    impl SourceFactory for ScriptedFactory {
        fn build(
            &self,
            kind: SourceKind,
            config: &AppConfig,
            _results: ResultSink,
            _faults: FaultSink,
        ) -> Box<dyn TranscriptionSource> {
            self.log.lock().unwrap().push(format!("build {kind}"));
            self.configs.lock().unwrap().push(config.clone());
            Box::new(ScriptedSource {
                kind,
                log: Arc::clone(&self.log),
                fail_start: self.fail_kinds.contains(&kind),
                listening: false,
            })
        }
    }

    fn controller_full(
        fail_kinds: Vec<SourceKind>,
    ) -> (SessionController, CallLog, Arc<Mutex<Vec<AppConfig>>>) {
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let configs = Arc::new(Mutex::new(Vec::new()));
        let (result_tx, _result_rx) = mpsc::unbounded_channel();
        let (fault_tx, _fault_rx) = mpsc::unbounded_channel();
        let factory = ScriptedFactory {
            log: Arc::clone(&log),
            fail_kinds,
            configs: Arc::clone(&configs),
        };
        let controller = SessionController::with_factory(
            AppConfig::default(),
            result_tx,
            fault_tx,
            Box::new(factory),
        );
        (controller, log, configs)
    }

    fn controller(fail_kinds: Vec<SourceKind>) -> (SessionController, CallLog) {
        let (controller, log, _configs) = controller_full(fail_kinds);
        (controller, log)
    }

    fn calls(log: &CallLog) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[test]
    fn toggle_builds_and_starts_then_stops() {
        let (mut c, log) = controller(vec![]);
        assert!(!c.enabled());

        assert!(c.toggle().unwrap());
        assert!(c.enabled());
        assert!(c.listening());

        assert!(!c.toggle().unwrap());
        assert!(!c.enabled());
        assert!(!c.listening());

        assert_eq!(calls(&log), ["build device", "start device", "stop device"]);
    }

    #[test]
    fn enable_twice_is_a_no_op() {
        let (mut c, log) = controller(vec![]);
        c.enable().unwrap();
        c.enable().unwrap();
        assert_eq!(calls(&log), ["build device", "start device"]);
    }

    #[test]
    fn failed_start_rolls_intent_back() {
        let (mut c, _log) = controller(vec![SourceKind::Device]);
        assert!(c.toggle().is_err());
        assert!(!c.enabled());
        assert!(!c.listening());
    }

    #[test]
    fn switch_while_enabled_stops_old_then_starts_new() {
        let (mut c, log) = controller(vec![]);
        c.enable().unwrap();
        c.set_source(SourceParams::Server(ServerConfig::default()))
            .unwrap();

        assert_eq!(c.source_kind(), SourceKind::Server);
        assert!(c.enabled());
        assert_eq!(
            calls(&log),
            [
                "build device",
                "start device",
                "stop device",
                "build server",
                "start server"
            ]
        );
    }

    #[test]
    fn switch_while_disabled_only_updates_config() {
        let (mut c, log) = controller(vec![]);
        c.set_source(SourceParams::Cloud(CloudConfig::default()))
            .unwrap();
        assert_eq!(c.source_kind(), SourceKind::Cloud);
        assert!(calls(&log).is_empty());

        // Next enable builds the new kind.
        c.enable().unwrap();
        assert_eq!(calls(&log), ["build cloud", "start cloud"]);
    }

    #[test]
    fn failed_switch_start_disables() {
        let (mut c, _log) = controller(vec![SourceKind::Cloud]);
        c.enable().unwrap();
        assert!(c
            .set_source(SourceParams::Cloud(CloudConfig::default()))
            .is_err());
        assert!(!c.enabled());
        assert!(!c.listening());
    }

    #[test]
    fn switch_applies_new_connection_params() {
        let (mut c, log, configs) = controller_full(vec![]);
        c.enable().unwrap();

        // The controller was built without a cloud key; the switch supplies
        // one, and the replacement source must be built from it.
        c.set_source(SourceParams::Cloud(CloudConfig {
            api_key: Some("dg-key".into()),
            ..CloudConfig::default()
        }))
        .unwrap();

        assert_eq!(c.source_kind(), SourceKind::Cloud);
        assert_eq!(c.config().cloud.api_key.as_deref(), Some("dg-key"));
        let built = configs.lock().unwrap();
        let last = built.last().expect("cloud source built");
        assert_eq!(last.cloud.api_key.as_deref(), Some("dg-key"));

        // New server params apply the same way.
        drop(built);
        c.set_source(SourceParams::Server(ServerConfig {
            url: "ws://stt.example.net:6006".into(),
        }))
        .unwrap();
        assert_eq!(c.config().server.url, "ws://stt.example.net:6006");
        let built = configs.lock().unwrap();
        assert_eq!(
            built.last().unwrap().server.url,
            "ws://stt.example.net:6006"
        );
        assert!(calls(&log).ends_with(&["build server".into(), "start server".into()]));
    }

    #[test]
    fn fault_forces_disabled_and_discards_source() {
        let (mut c, log) = controller(vec![]);
        c.enable().unwrap();

        let fault = SourceFault::new(ErrorKind::ReconnectExhausted, "gave up");
        c.notify_fault(&fault);
        assert!(!c.enabled());
        assert!(!c.listening());

        // Re-enabling builds a fresh source rather than reusing the faulted one.
        c.enable().unwrap();
        assert_eq!(
            calls(&log),
            [
                "build device",
                "start device",
                "stop device",
                "build device",
                "start device"
            ]
        );
    }

    #[test]
    fn force_finalize_reaches_the_active_source() {
        let (mut c, log) = controller(vec![]);
        c.force_finalize();
        c.enable().unwrap();
        c.force_finalize();
        assert_eq!(
            calls(&log),
            ["build device", "start device", "finalize device"]
        );
    }
}
