//! Cloud policy — two-tier finality with stable-partial accumulation.
//!
//! The cloud API distinguishes:
//!
//! - `is_final` — this fragment's text will not be revised (stable partial),
//!   but the sentence is still going,
//! - `speech_final` — a natural pause; the utterance is done.
//!
//! Consumers want whole utterances, so stable partials accumulate here and
//! every emission carries the accumulated text so far.  Only `speech_final`
//! maps to `is_endpoint` (and commits the accumulated utterance); stable
//! partials go out with `is_final = false` because the utterance-level text
//! is still growing.

use crate::types::{Transcript, Word};
use crate::wire::CloudFrame;

// ---------------------------------------------------------------------------
// CloudReconciler
// ---------------------------------------------------------------------------

/// State machine mapping cloud `Results` frames to normalized transcripts.
#[derive(Debug, Default)]
pub struct CloudReconciler {
    next_segment_id: u64,
    /// Stable partials joined with single spaces, reset on each endpoint.
    accumulated: String,
}

impl CloudReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the utterance accumulator for a fresh socket.
    ///
    /// Segment ids keep counting across reconnects.
    pub fn begin_session(&mut self) {
        self.accumulated.clear();
    }

    /// Feed one frame.  Non-`Results` types (metadata, VAD events) and
    /// empty transcripts produce nothing.
    pub fn push(&mut self, frame: &CloudFrame, raw: &serde_json::Value) -> Vec<Transcript> {
        if !frame.is_results() {
            return Vec::new();
        }
        let Some(alt) = frame.best_alternative() else {
            return Vec::new();
        };

        let text = alt.transcript.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let words: Option<Vec<Word>> = if alt.words.is_empty() {
            None
        } else {
            Some(
                alt.words
                    .iter()
                    .map(|w| Word {
                        text: w
                            .punctuated_word
                            .clone()
                            .unwrap_or_else(|| w.word.clone()),
                        start: w.start,
                        end: w.end,
                        confidence: w.confidence,
                    })
                    .collect(),
            )
        };

        let joined = if self.accumulated.is_empty() {
            text.to_string()
        } else {
            format!("{} {}", self.accumulated, text)
        };

        let out = if frame.speech_final {
            // Natural endpoint: commit the whole utterance and start over.
            let t = self.make(joined, true, alt.confidence, words, frame, raw);
            self.next_segment_id += 1;
            self.accumulated.clear();
            t
        } else if frame.is_final {
            // Stable partial: fold into the accumulator, still revisable at
            // the utterance level.
            self.accumulated = joined.clone();
            self.make(joined, false, alt.confidence, words, frame, raw)
        } else {
            // Plain interim: show accumulated + current without folding.
            self.make(joined, false, alt.confidence, words, frame, raw)
        };

        vec![out]
    }

    fn make(
        &self,
        text: String,
        is_endpoint: bool,
        confidence: Option<f64>,
        words: Option<Vec<Word>>,
        frame: &CloudFrame,
        raw: &serde_json::Value,
    ) -> Transcript {
        let mut t = Transcript::new(text, self.next_segment_id, is_endpoint, is_endpoint);
        t.start = frame.start;
        t.end = match (frame.start, frame.duration) {
            (Some(s), Some(d)) => Some(s + d),
            _ => None,
        };
        t.confidence = confidence;
        t.words = words;
        t.raw = Some(raw.clone());
        t
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
