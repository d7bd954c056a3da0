//! Wire-frame types for the backend protocols.
//!
//! # Overview
//!
//! Three backend dialects feed the reconciliation policies:
//!
//! - [`ServerFrame`] — generic streaming server JSON, a superset of the two
//!   server families in the wild: one with an explicit `is_final` endpoint
//!   flag plus token/log-prob arrays, and a minimal one that only sends
//!   `{ text, segment }` (endpoints are inferred from the segment counter).
//! - [`CloudFrame`] — cloud streaming API `Results` messages with two-tier
//!   finality (`is_final` = stable partial, `speech_final` = endpoint).
//! - [`DeviceEvent`] — event shapes delivered by an OS recognizer behind the
//!   [`crate::source::DeviceRecognizer`] trait (result batches indexed into
//!   a session-wide result list, error notifications, end-of-run).
//!
//! Malformed frames are the caller's problem to log and drop; [`parse_frame`]
//! returns both the typed frame and the raw JSON value so transcripts can
//! carry the untouched backend payload.

use serde::de::DeserializeOwned;
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a text frame into a typed struct plus the raw JSON value.
///
/// The raw value is kept so it can ride along on [`crate::Transcript::raw`]
/// without re-serializing.
pub fn parse_frame<T: DeserializeOwned>(
    data: &str,
) -> Result<(T, serde_json::Value), serde_json::Error> {
    let raw: serde_json::Value = serde_json::from_str(data)?;
    let frame = T::deserialize(&raw)?;
    Ok((frame, raw))
}

// ---------------------------------------------------------------------------
// Generic-server frames
// ---------------------------------------------------------------------------

/// One JSON message from a generic streaming server.
///
/// Field superset across server families; absent fields deserialize to their
/// defaults.  `is_final` stays an `Option` because its *presence* is the
/// dialect discriminator: servers that have it signal endpoints explicitly,
/// servers that lack it require segment-increment inference.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerFrame {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub segment: u64,
    /// Discriminator some servers send (`"info"` handshake vs `"result"`).
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Endpoint flag.  `None` means the dialect does not have one.
    pub is_final: Option<bool>,
    /// End-of-stream marker, sent after the client signals audio end.
    #[serde(default)]
    pub is_eof: bool,
    /// BPE sub-word tokens, parallel to `timestamps`.
    pub tokens: Option<Vec<String>>,
    /// Per-token start times, seconds relative to `start_time`.
    pub timestamps: Option<Vec<f64>>,
    /// Per-token acoustic-model log-probs.
    pub ys_probs: Option<Vec<f64>>,
    /// Per-token language-model log-probs.
    pub lm_probs: Option<Vec<f64>>,
    /// Per-token hotword/context boosting log-probs.
    pub context_scores: Option<Vec<f64>>,
    /// Segment start, seconds from stream start.
    pub start_time: Option<f64>,

    // Info-handshake fields.
    pub model: Option<String>,
    pub model_display: Option<String>,
    pub backend: Option<String>,
    pub languages: Option<Vec<String>>,
    pub sample_rate: Option<u32>,
    pub version: Option<String>,
}

impl ServerFrame {
    /// True for the one-shot handshake frame some servers send on connect.
    pub fn is_info(&self) -> bool {
        self.kind.as_deref() == Some("info")
    }
}

/// Server self-description from the INFO handshake.
///
/// Purely informational; logged and stored on the source for hosts that want
/// to display the active model.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
    pub model: String,
    pub model_display: String,
    pub backend: String,
    pub languages: Vec<String>,
    pub sample_rate: u32,
    pub version: String,
}

impl ServerInfo {
    /// Extract handshake data from an `info` frame, defaulting absent fields.
    pub fn from_frame(frame: &ServerFrame) -> Self {
        let model = frame.model.clone().unwrap_or_else(|| "unknown".into());
        Self {
            model_display: frame
                .model_display
                .clone()
                .unwrap_or_else(|| model.clone()),
            model,
            backend: frame.backend.clone().unwrap_or_else(|| "unknown".into()),
            languages: frame.languages.clone().unwrap_or_default(),
            sample_rate: frame.sample_rate.unwrap_or(16_000),
            version: frame.version.clone().unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Cloud frames
// ---------------------------------------------------------------------------

/// One JSON message from the cloud streaming API.
///
/// Only `"Results"` messages carry transcription; metadata and VAD event
/// types are identified by `kind` and skipped by the reconciler.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloudFrame {
    #[serde(rename = "type", default)]
    pub kind: String,
    /// This alternative's text will not be revised (stable partial).
    #[serde(default)]
    pub is_final: bool,
    /// Natural endpoint detected (pause in speech).
    #[serde(default)]
    pub speech_final: bool,
    /// Reply to a `Finalize` control frame.
    #[serde(default)]
    pub from_finalize: bool,
    pub start: Option<f64>,
    pub duration: Option<f64>,
    pub channel: Option<CloudChannel>,
}

impl CloudFrame {
    pub fn is_results(&self) -> bool {
        self.kind == "Results"
    }

    /// The first (best) alternative, when present.
    pub fn best_alternative(&self) -> Option<&CloudAlternative> {
        self.channel.as_ref().and_then(|c| c.alternatives.first())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloudChannel {
    #[serde(default)]
    pub alternatives: Vec<CloudAlternative>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloudAlternative {
    #[serde(default)]
    pub transcript: String,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub words: Vec<CloudWord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudWord {
    pub word: String,
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
    pub confidence: Option<f64>,
    /// Word with punctuation applied; preferred over `word` when present.
    pub punctuated_word: Option<String>,
}

// ---------------------------------------------------------------------------
// On-device recognizer events
// ---------------------------------------------------------------------------

/// A single hypothesis from the OS recognizer.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceResult {
    pub text: String,
    /// The recognizer will not revise this result.
    pub is_final: bool,
    pub confidence: Option<f64>,
}

/// Events delivered by a [`crate::source::DeviceRecognizer`] run.
///
/// Mirrors the surface OS speech APIs expose: result batches addressed into
/// a session-wide result list (some platforms replay already-delivered
/// entries), error notifications with a platform kind string, and an
/// end-of-run marker after which the recognizer must be started again.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Results {
        /// Absolute index of `results[0]` in the session's result list.
        first_index: usize,
        results: Vec<DeviceResult>,
    },
    Error {
        /// Platform error kind, e.g. `"no-speech"`, `"not-allowed"`.
        kind: String,
        message: String,
    },
    /// The recognizer run ended (endpoint, platform timeout, or stop).
    End,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
