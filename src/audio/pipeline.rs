//! Microphone pipeline — capture thread, downmix, resample, frame channel.
//!
//! # Overview
//!
//! [`MicPipeline`] owns a dedicated thread that builds the cpal stream,
//! drains raw [`AudioChunk`]s, converts them to 16 kHz mono through
//! [`StreamResampler`], and forwards frames into a tokio channel the source
//! driver consumes.  The cpal stream itself never leaves that thread
//! (`cpal::Stream` is not `Send`), which keeps the pipeline handle `Send`
//! and lets sources own it behind the [`AudioFeed`] seam.
//!
//! ```text
//! cpal callback → AudioChunk (std mpsc) → drain loop
//!              → stereo_to_mono → StreamResampler → Vec<f32> (tokio mpsc)
//! ```
//!
//! The audio callback only clones its buffer and sends; all conversion work
//! happens on the drain loop.

use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::audio::capture::{AudioCapture, AudioChunk, CaptureError};
use crate::audio::resample::{stereo_to_mono, StreamResampler};

/// Sender half for converted 16 kHz mono frames.
pub type FrameSender = mpsc::UnboundedSender<Vec<f32>>;
/// Receiver half for converted 16 kHz mono frames.
pub type FrameReceiver = mpsc::UnboundedReceiver<Vec<f32>>;

// ---------------------------------------------------------------------------
// AudioFeed
// ---------------------------------------------------------------------------

/// Where a source gets its 16 kHz mono audio frames from.
///
/// Production sources use [`MicFeed`]; tests and hosts that bring their own
/// audio use [`ChannelFeed`].
pub trait AudioFeed: Send {
    /// Begin producing frames.  Returns the receiving end of the frame
    /// channel; the feed keeps producing until [`stop`](AudioFeed::stop) or
    /// until the receiver is dropped.
    fn start(&mut self) -> Result<FrameReceiver, CaptureError>;

    /// Stop producing frames and release capture resources.  Idempotent.
    fn stop(&mut self);
}

// ---------------------------------------------------------------------------
// MicPipeline
// ---------------------------------------------------------------------------

/// Running capture pipeline.  Stops on [`stop`](MicPipeline::stop) or drop.
pub struct MicPipeline {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MicPipeline {
    /// Start capturing from the default input device.
    ///
    /// Blocks until the capture thread has either built and started the cpal
    /// stream or failed; setup failures are returned synchronously so a
    /// source `start()` can report them to its caller.
    pub fn start(frame_tx: FrameSender) -> Result<Self, CaptureError> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<u32, CaptureError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("mic-pipeline".into())
            .spawn(move || run_capture(frame_tx, ready_tx, stop_rx))
            .map_err(CaptureError::Thread)?;

        match ready_rx.recv() {
            Ok(Ok(rate)) => {
                log::info!("microphone capture running ({rate} Hz native)");
                Ok(Self {
                    stop_tx: Some(stop_tx),
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            // Thread died before reporting; treat as missing device.
            Err(_) => {
                let _ = thread.join();
                Err(CaptureError::NoDevice)
            }
        }
    }

    /// Stop the capture thread and wait for it to exit.
    ///
    /// Each teardown step is guarded so a partially started pipeline (or a
    /// second call) still stops cleanly.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MicPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Body of the `mic-pipeline` thread.
///
/// Owns the cpal stream for its whole lifetime.  Reports setup success or
/// failure exactly once through `ready_tx`, then drains chunks until asked
/// to stop or until the frame receiver goes away.
fn run_capture(
    frame_tx: FrameSender,
    ready_tx: std_mpsc::Sender<Result<u32, CaptureError>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let capture = match AudioCapture::new() {
        Ok(c) => c,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let channels = capture.channels();
    let source_rate = capture.sample_rate();
    let (chunk_tx, chunk_rx) = std_mpsc::channel::<AudioChunk>();

    let _handle = match capture.start(chunk_tx) {
        Ok(h) => h,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let _ = ready_tx.send(Ok(source_rate));

    let mut resampler = StreamResampler::new(source_rate);
    loop {
        if stop_rx.try_recv().is_ok() {
            break;
        }
        match chunk_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(chunk) => {
                let mono = stereo_to_mono(&chunk.samples, channels);
                let frame = resampler.process(&mono);
                if frame.is_empty() {
                    continue;
                }
                if frame_tx.send(frame).is_err() {
                    // Receiver gone — the source driver exited.
                    break;
                }
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    // `_handle` drops here, stopping the cpal stream.
}

// ---------------------------------------------------------------------------
// MicFeed
// ---------------------------------------------------------------------------

/// The production [`AudioFeed`]: default microphone through [`MicPipeline`].
#[derive(Default)]
pub struct MicFeed {
    pipeline: Option<MicPipeline>,
}

impl MicFeed {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioFeed for MicFeed {
    fn start(&mut self) -> Result<FrameReceiver, CaptureError> {
        self.stop();
        let (tx, rx) = mpsc::unbounded_channel();
        self.pipeline = Some(MicPipeline::start(tx)?);
        Ok(rx)
    }

    fn stop(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.stop();
        }
    }
}

// ---------------------------------------------------------------------------
// ChannelFeed
// ---------------------------------------------------------------------------

/// An [`AudioFeed`] over a caller-supplied frame channel.
///
/// Lets a host (or a test) push its own 16 kHz mono frames instead of
/// opening a microphone.  Single-use: the receiver can only be handed out
/// once.
pub struct ChannelFeed {
    rx: Option<FrameReceiver>,
}

impl ChannelFeed {
    pub fn new(rx: FrameReceiver) -> Self {
        Self { rx: Some(rx) }
    }
}

impl AudioFeed for ChannelFeed {
    fn start(&mut self) -> Result<FrameReceiver, CaptureError> {
        self.rx.take().ok_or(CaptureError::FeedConsumed)
    }

    fn stop(&mut self) {}
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
