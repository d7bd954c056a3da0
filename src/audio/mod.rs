//! Audio pipeline — microphone capture → downmix → streaming resample.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → AudioChunk (mpsc) → stereo_to_mono
//!           → StreamResampler → 16 kHz mono frames (tokio mpsc)
//! ```
//!
//! Sources consume frames through the [`AudioFeed`] seam: [`MicFeed`] runs
//! the real pipeline, [`ChannelFeed`] lets a host or test inject frames.

pub mod capture;
pub mod pipeline;
pub mod resample;

pub use capture::{AudioCapture, AudioChunk, CaptureError, StreamHandle};
pub use pipeline::{AudioFeed, ChannelFeed, FrameReceiver, FrameSender, MicFeed, MicPipeline};
pub use resample::{stereo_to_mono, StreamResampler, TARGET_RATE};
