//! On-device policy — replay dedup and cumulative-final delta extraction.
//!
//! OS recognizers have two quirks this policy absorbs:
//!
//! - some platforms re-deliver already-final results at the start of a
//!   batch (history replay), identified here by absolute result index,
//! - some platforms report *cumulative* final text (each final contains
//!   everything recognized so far), so only the suffix beyond what was
//!   already committed may be emitted.
//!
//! A final result is both stable and an endpoint: the recognizer only marks
//! a result final once the utterance is over.  Multiple in-progress results
//! in one batch coalesce into a single interim update.

use crate::types::Transcript;
use crate::wire::DeviceResult;

// ---------------------------------------------------------------------------
// DeviceReconciler
// ---------------------------------------------------------------------------

/// State machine mapping recognizer result batches to normalized transcripts.
#[derive(Debug, Default)]
pub struct DeviceReconciler {
    next_segment_id: u64,
    /// Result indices below this were committed in the current run.
    committed_through: usize,
    /// Cumulative committed text for the current run, for delta extraction.
    committed_text: String,
}

impl DeviceReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset per-run state for a fresh recognizer session.
    ///
    /// Result indices restart at zero on every run, so the replay and
    /// cumulative-text tracking reset with them.  Segment ids keep counting
    /// for the life of the source.
    pub fn begin_run(&mut self) {
        self.committed_through = 0;
        self.committed_text.clear();
    }

    /// Advance the segment counter without committing text.
    ///
    /// Used by forced finalization, where the recognizer is restarted and
    /// the next utterance must not share an id with the interrupted one.
    pub fn bump_segment(&mut self) {
        self.next_segment_id += 1;
    }

    /// Feed one result batch.  `first_index` is the absolute index of
    /// `results[0]` in the session's result list.
    pub fn push(&mut self, first_index: usize, results: &[DeviceResult]) -> Vec<Transcript> {
        let mut out = Vec::new();
        let mut interim = String::new();
        let mut interim_confidence = None;

        for (offset, result) in results.iter().enumerate() {
            let index = first_index + offset;
            // History replay: anything below the committed watermark was
            // already delivered in an earlier batch.
            if index < self.committed_through {
                continue;
            }

            if result.is_final {
                self.committed_through = index + 1;

                let full = result.text.trim();
                let delta = self.extract_delta(full);
                self.committed_text = full.to_string();

                // A cumulative replay with no new suffix commits nothing.
                if delta.is_empty() {
                    continue;
                }

                let mut t = Transcript::new(delta, self.next_segment_id, true, true);
                t.confidence = positive(result.confidence);
                out.push(t);
                self.next_segment_id += 1;
            } else {
                interim.push_str(&result.text);
                if let Some(c) = positive(result.confidence) {
                    interim_confidence = Some(c);
                }
            }
        }

        // One update per batch no matter how many in-progress results it held.
        let interim = interim.trim();
        if !interim.is_empty() {
            let mut t = Transcript::new(interim, self.next_segment_id, false, false);
            t.confidence = interim_confidence;
            out.push(t);
        }

        out
    }

    /// New text to commit given a (possibly cumulative) final string.
    ///
    /// Prefix of what was already committed ⇒ only the suffix is new.
    /// Anything else is a fresh utterance and goes out whole, so text is
    /// never lost to a bad prefix guess.
    fn extract_delta(&self, full: &str) -> String {
        if !self.committed_text.is_empty() && full.starts_with(&self.committed_text) {
            full[self.committed_text.len()..].trim_start().to_string()
        } else {
            full.to_string()
        }
    }
}

fn positive(confidence: Option<f64>) -> Option<f64> {
    confidence.filter(|c| *c > 0.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
