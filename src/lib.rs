//! voice-stream — one transcript stream over heterogeneous STT backends.
//!
//! # Overview
//!
//! Streaming speech-to-text backends disagree about everything: what
//! "final" means, when an utterance ends, whether results replay, whether
//! text is cumulative or incremental.  This crate normalizes three backend
//! families — an on-device recognizer, a generic streaming WebSocket
//! server, and a cloud streaming API — into one canonical
//! [`Transcript`](types::Transcript) stream with two orthogonal flags:
//! `is_final` (this text will not be revised) and `is_endpoint` (the
//! utterance is complete, commit it).
//!
//! # Architecture
//!
//! ```text
//! mic ── audio::MicPipeline ── 16 kHz mono f32 frames
//!                                    │
//!            source::{DeviceSource, ServerSource, CloudSource}
//!                                    │   (wire::* frames in)
//!            reconcile::{Device,Server,Cloud}Reconciler
//!                                    │
//!                        Transcript / SourceFault sinks
//!                                    │
//!                      controller::SessionController host
//! ```
//!
//! Sources own reconnect (exponential backoff, bounded attempts) and a
//! generation counter that keeps events from abandoned connections out of
//! the stream.  Reconcilers are pure state machines, tested without any
//! I/O.  Segment ids are assigned per source and only ever increase, across
//! reconnects included.

pub mod audio;
pub mod config;
pub mod controller;
pub mod reconcile;
pub mod source;
pub mod types;
pub mod wire;

pub use controller::{DefaultSourceFactory, SessionController, SourceFactory, SourceParams};
pub use types::{ErrorKind, FaultSink, ResultSink, SourceError, SourceFault, Transcript, Word};
