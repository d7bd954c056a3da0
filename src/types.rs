//! Shared data model for the transcription event stream.
//!
//! # Overview
//!
//! Every backend source normalizes its native wire protocol into
//! [`Transcript`] values and pushes them into a [`ResultSink`].  Fatal
//! conditions go into a [`FaultSink`] as [`SourceFault`]s; receiving a fault
//! means the source has already stopped itself.
//!
//! Finality is two-dimensional:
//!
//! - `is_final` — this exact text will not be revised by a later event.
//! - `is_endpoint` — the utterance is complete; downstream may commit the
//!   segment and expect nothing further for its `segment_id`.
//!
//! A cloud stable partial is `is_final = false` (the utterance text is still
//! growing) even though the fragment itself is frozen, so consumers only need
//! to understand the two flags, never the backend.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::audio::CaptureError;

// ---------------------------------------------------------------------------
// Word
// ---------------------------------------------------------------------------

/// A single recognized word with timing.
///
/// Times are seconds from the start of the audio stream.  `confidence` is in
/// the backend's native scale and is not comparable across backends.
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub confidence: Option<f64>,
}

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

/// One normalized transcription event.
///
/// Produced by the reconciliation policies in [`crate::reconcile`] and
/// delivered through the [`ResultSink`] handed to a source at construction.
///
/// # Invariants
///
/// - After an event with `is_endpoint == true` for some `segment_id`, no
///   further event carries that id.
/// - `segment_id`s emitted by one source over its lifetime form a
///   non-decreasing sequence.
/// - `is_final == false` text may be replaced wholesale by the next event
///   for the same segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    /// The text a consumer should now display or commit.
    pub text: String,
    /// This text value will not be revised.
    pub is_final: bool,
    /// The utterance is complete; downstream may commit.
    pub is_endpoint: bool,
    /// Source-assigned utterance counter, monotonically non-decreasing.
    pub segment_id: u64,
    /// Utterance start, seconds from stream start (when the backend says).
    pub start: Option<f64>,
    /// Utterance end, seconds from stream start.
    pub end: Option<f64>,
    /// Backend-native confidence, passed through unconverted.
    pub confidence: Option<f64>,
    /// Per-word breakdown, when the backend provides one.
    pub words: Option<Vec<Word>>,
    /// Opaque backend payload kept for diagnostics.
    pub raw: Option<serde_json::Value>,
}

impl Transcript {
    /// A minimal transcript with only the fields every backend produces.
    /// Optional metadata defaults to `None`.
    pub fn new(text: impl Into<String>, segment_id: u64, is_final: bool, is_endpoint: bool) -> Self {
        Self {
            text: text.into(),
            is_final,
            is_endpoint,
            segment_id,
            start: None,
            end: None,
            confidence: None,
            words: None,
            raw: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ErrorKind / SourceFault
// ---------------------------------------------------------------------------

/// Category of a fatal source fault, stable across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The backend is not available in this environment at all.
    CapabilityUnavailable,
    /// A required credential (e.g. cloud API key) is not configured.
    MissingCredential,
    /// The transport could not be established.
    ConnectionFailed,
    /// The backend rejected our credentials.
    AuthFailed,
    /// Reconnection attempts hit the ceiling; the source gave up.
    ReconnectExhausted,
    /// The recognizer reported an unrecoverable error.
    Recognition,
    /// Microphone capture failed.
    Capture,
}

impl ErrorKind {
    /// Stable wire-style label, useful for logs and host UIs.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::CapabilityUnavailable => "capability-unavailable",
            ErrorKind::MissingCredential => "missing-credential",
            ErrorKind::ConnectionFailed => "connection-failed",
            ErrorKind::AuthFailed => "auth-failed",
            ErrorKind::ReconnectExhausted => "reconnect-exhausted",
            ErrorKind::Recognition => "recognition-failed",
            ErrorKind::Capture => "capture-failed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fatal condition reported through the [`FaultSink`].
///
/// By the time a fault arrives the source has stopped itself (flags cleared,
/// no more transcripts will follow).  The host decides whether to surface it
/// or restart a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFault {
    pub kind: ErrorKind,
    pub message: String,
}

impl SourceFault {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SourceFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

// ---------------------------------------------------------------------------
// SourceError
// ---------------------------------------------------------------------------

/// Errors returned synchronously from source lifecycle calls.
///
/// Asynchronous failures (mid-stream disconnects, recognizer errors) arrive
/// through the [`FaultSink`] instead.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Microphone setup failed while starting the source.
    #[error("audio capture failed: {0}")]
    Capture(#[from] CaptureError),

    /// A required credential is not configured.
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    /// The backend cannot run in this environment.
    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// The configured endpoint URL is not a valid WebSocket URL.
    #[error("invalid endpoint url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Channel a source pushes normalized [`Transcript`]s into.
pub type ResultSink = mpsc::UnboundedSender<Transcript>;

/// Channel a source pushes fatal [`SourceFault`]s into.
pub type FaultSink = mpsc::UnboundedSender<SourceFault>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
