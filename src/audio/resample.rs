//! Audio resampling and channel mixing utilities.
//!
//! Every backend consumes **16 kHz mono `f32`** audio.  This module provides
//! the two conversion steps:
//!
//! 1. [`stereo_to_mono`] — downmix any number of interleaved channels to mono.
//! 2. [`StreamResampler`] — streaming linear-interpolation resampler from any
//!    source rate to 16 000 Hz.
//!
//! The resampler is stateful on purpose: capture hardware delivers audio in
//! arbitrary block sizes, and a naive per-block conversion drops or
//! double-counts samples at every block boundary.  [`StreamResampler`] carries
//! the fractional read position across calls so the concatenated output is
//! identical to resampling the whole stream at once.

/// Output sample rate all backends expect.
pub const TARGET_RATE: u32 = 16_000;

// ---------------------------------------------------------------------------
// stereo_to_mono
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging all channels.
///
/// The output length is `samples.len() / channels`.
///
/// * If `channels == 1` the input slice is returned as an owned `Vec` with no
///   averaging (fast path — avoids an extra allocation when already mono).
/// * If `channels == 0` an empty vector is returned.
///
/// # Example
///
/// ```rust
/// use voice_stream::audio::stereo_to_mono;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, -0.2]; // L R L R
/// let mono = stereo_to_mono(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[0] - 0.0).abs() < 1e-6);
/// assert!((mono[1] - 0.0).abs() < 1e-6);
/// ```
pub fn stereo_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// StreamResampler
// ---------------------------------------------------------------------------

/// Streaming linear-interpolation resampler to [`TARGET_RATE`].
///
/// Feed capture blocks of any size through [`process`]; the fractional source
/// position left over at the end of each block is carried into the next call,
/// so block boundaries introduce no drift.  Output block sizes vary call to
/// call as a consequence.
///
/// # Example
///
/// ```rust
/// use voice_stream::audio::StreamResampler;
///
/// let mut rs = StreamResampler::new(48_000);
/// let out = rs.process(&vec![0.5_f32; 480]); // 10 ms @ 48 kHz
/// assert_eq!(out.len(), 160);                // 10 ms @ 16 kHz
/// ```
///
/// [`process`]: StreamResampler::process
#[derive(Debug, Clone)]
pub struct StreamResampler {
    /// Source samples consumed per output sample.
    step: f64,
    /// Fractional read position carried from the previous block.
    pos: f64,
}

impl StreamResampler {
    pub fn new(source_rate: u32) -> Self {
        Self {
            step: source_rate as f64 / TARGET_RATE as f64,
            pos: 0.0,
        }
    }

    /// Resample one block of mono samples.
    ///
    /// Interpolation clamps to the last sample of the block when the read
    /// position lands inside the final source interval.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if input.is_empty() {
            return Vec::new();
        }

        // Unity ratio: pass through untouched, position stays integral.
        if self.step == 1.0 {
            return input.to_vec();
        }

        let len = input.len() as f64;
        let mut out = Vec::with_capacity(((len - self.pos) / self.step).ceil() as usize);
        let mut pos = self.pos;

        while pos < len {
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            let a = input[idx];
            let b = if idx + 1 < input.len() { input[idx + 1] } else { a };
            out.push(a + (b - a) * frac);
            pos += self.step;
        }

        self.pos = pos - len;
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- stereo_to_mono ----------------------------------------------------

    #[test]
    fn stereo_to_mono_already_mono() {
        let input = vec![0.1_f32, 0.2, 0.3];
        let out = stereo_to_mono(&input, 1);
        assert_eq!(out, input);
    }

    #[test]
    fn stereo_to_mono_two_channel() {
        let input = vec![1.0_f32, -1.0, 0.5, 0.5];
        let out = stereo_to_mono(&input, 2);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.0).abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn stereo_to_mono_four_channel() {
        let input = vec![0.4_f32; 4];
        let out = stereo_to_mono(&input, 4);
        assert_eq!(out.len(), 1);
        assert!((out[0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn stereo_to_mono_zero_channels() {
        let out = stereo_to_mono(&[1.0_f32, 2.0], 0);
        assert!(out.is_empty());
    }

    // ---- StreamResampler ---------------------------------------------------

    #[test]
    fn already_16k_is_passthrough() {
        let input: Vec<f32> = (0..160).map(|i| i as f32 / 160.0).collect();
        let mut rs = StreamResampler::new(16_000);
        let out = rs.process(&input);
        assert_eq!(out, input);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let mut rs = StreamResampler::new(48_000);
        assert!(rs.process(&[]).is_empty());
    }

    #[test]
    fn downsample_48k_block() {
        // 480 samples @ 48 kHz = 10 ms → 160 samples @ 16 kHz
        let mut rs = StreamResampler::new(48_000);
        let out = rs.process(&vec![0.5_f32; 480]);
        assert_eq!(out.len(), 160);
    }

    #[test]
    fn constant_signal_preserves_amplitude() {
        let mut rs = StreamResampler::new(48_000);
        let out = rs.process(&vec![0.5_f32; 480]);
        for &s in &out {
            assert!((s - 0.5).abs() < 1e-5, "amplitude drift: {s}");
        }
    }

    #[test]
    fn upsample_from_8k() {
        let mut rs = StreamResampler::new(8_000);
        let out = rs.process(&vec![0.0_f32; 80]); // 10 ms @ 8 kHz
        assert_eq!(out.len(), 160);
    }

    #[test]
    fn block_boundaries_do_not_drop_samples() {
        // Integer ratio (48k → 16k, step 3): source positions are exact, so
        // chunked output must equal whole-buffer output sample for sample.
        let input: Vec<f32> = (0..960).map(|i| (i as f32 * 0.01).sin()).collect();

        let mut whole = StreamResampler::new(48_000);
        let expected = whole.process(&input);

        let mut chunked = StreamResampler::new(48_000);
        let mut got = Vec::new();
        for chunk in input.chunks(7) {
            got.extend(chunked.process(chunk));
        }

        assert_eq!(got, expected);
    }

    #[test]
    fn fractional_carry_conserves_output_count() {
        // 44.1 kHz has a non-integer step (2.75625); one second of input must
        // produce exactly 16 000 output samples no matter how it is chunked.
        let input = vec![0.25_f32; 44_100];

        let mut rs = StreamResampler::new(44_100);
        let mut total = 0;
        for chunk in input.chunks(441) {
            total += rs.process(chunk).len();
        }
        // ±1 tolerance for float accumulation over 100 blocks
        assert!(total.abs_diff(16_000) <= 1, "expected ~16000, got {total}");

        let mut whole = StreamResampler::new(44_100);
        let n = whole.process(&input).len();
        assert!(n.abs_diff(16_000) <= 1, "expected ~16000, got {n}");
    }

    #[test]
    fn per_call_output_size_varies_with_carry() {
        // step = 2.75625: 100-sample blocks alternate between 36 and 37
        // output samples depending on the carried remainder.
        let mut rs = StreamResampler::new(44_100);
        let block = vec![0.0_f32; 100];
        let sizes: Vec<usize> = (0..8).map(|_| rs.process(&block).len()).collect();
        assert!(sizes.iter().any(|&n| n == 36));
        assert!(sizes.iter().any(|&n| n == 37));
        let total: usize = sizes.iter().sum();
        assert!(total.abs_diff(291) <= 1, "expected ~291, got {total}"); // ceil(800 / 2.75625)
    }
}
