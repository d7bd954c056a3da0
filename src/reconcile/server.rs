//! Generic-server policy — append-only interims, two endpoint dialects.
//!
//! Streaming servers in this family never revise text: earlier tokens stand
//! regardless of model, so every emitted transcript has `is_final = true` and
//! only `is_endpoint` varies.  Endpoints are signalled two ways:
//!
//! - servers with an `is_final` field say so explicitly,
//! - the minimal `{ text, segment }` dialect only increments its segment
//!   counter, so a new segment means the previous one just ended and its last
//!   text is flushed as the endpoint.
//!
//! Frames may carry BPE sub-word tokens with parallel timestamps and
//! log-prob arrays; these are coalesced into whole words here.

use crate::types::{Transcript, Word};
use crate::wire::ServerFrame;

// ---------------------------------------------------------------------------
// ServerReconciler
// ---------------------------------------------------------------------------

/// State machine mapping [`ServerFrame`]s to normalized transcripts.
#[derive(Debug, Default)]
pub struct ServerReconciler {
    next_segment_id: u64,
    /// Server-side segment counter last seen (minimal dialect only).
    current_segment: Option<u64>,
    /// Latest text for `current_segment`, flushed when the counter moves.
    current_text: String,
}

impl ServerReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset per-connection tracking for a fresh socket.
    ///
    /// The segment-id counter is deliberately not reset: ids must stay
    /// monotonic across reconnects for the life of the source.
    pub fn begin_session(&mut self) {
        self.current_segment = None;
        self.current_text.clear();
    }

    /// Feed one result frame.  INFO handshakes are the caller's job to
    /// filter (see [`ServerFrame::is_info`]); EOF markers and empty-text
    /// placeholder frames are dropped here.
    ///
    /// Minimal-dialect endpoint flushes are built from the frame that
    /// triggered them: the flushed transcript carries the previous
    /// segment's text but the *new* frame's `start_time`/words/raw, since
    /// the frame that last updated the old segment is gone by the time the
    /// endpoint is known.  Do not "fix" this by caching old frames; the
    /// servers themselves attach no metadata to an inferred endpoint.
    pub fn push(&mut self, frame: &ServerFrame, raw: &serde_json::Value) -> Vec<Transcript> {
        if frame.is_eof {
            return Vec::new();
        }

        let text = frame.text.trim();
        // Servers send empty placeholders and empty finals; committing them
        // would burn segment ids and block interims downstream.
        if text.is_empty() {
            return Vec::new();
        }

        match frame.is_final {
            Some(endpoint) => {
                // Explicit dialect.  The server may reuse its own segment
                // numbers after empty finals, so ids come from our counter.
                let t = self.make(text, endpoint, frame, raw);
                if endpoint {
                    self.next_segment_id += 1;
                }
                vec![t]
            }
            None => {
                // Minimal dialect: endpoint inferred from counter movement.
                let mut out = Vec::with_capacity(2);

                if let Some(current) = self.current_segment {
                    if frame.segment > current && !self.current_text.is_empty() {
                        let prev = std::mem::take(&mut self.current_text);
                        out.push(self.make(&prev, true, frame, raw));
                        self.next_segment_id += 1;
                    }
                }

                self.current_text = text.to_string();
                self.current_segment = Some(frame.segment);
                out.push(self.make(text, false, frame, raw));
                out
            }
        }
    }

    fn make(
        &self,
        text: &str,
        is_endpoint: bool,
        frame: &ServerFrame,
        raw: &serde_json::Value,
    ) -> Transcript {
        let words = coalesce_tokens(frame);
        let confidence = mean_word_confidence(words.as_deref());

        let mut t = Transcript::new(text, self.next_segment_id, true, is_endpoint);
        t.start = frame.start_time;
        t.confidence = confidence;
        t.words = words;
        t.raw = Some(raw.clone());
        t
    }
}

// ---------------------------------------------------------------------------
// Token coalescing
// ---------------------------------------------------------------------------

/// Build [`Word`]s from BPE sub-word tokens and parallel timestamps.
///
/// BPE convention: leading whitespace marks a word boundary, e.g.
/// `[" My", " na", "me"]` becomes `["My", "name"]`.  A token's confidence is
/// `exp` of the sum of whichever log-prob components the server provides;
/// a word's confidence is the mean over its tokens.
fn coalesce_tokens(frame: &ServerFrame) -> Option<Vec<Word>> {
    let tokens = frame.tokens.as_deref()?;
    let timestamps = frame.timestamps.as_deref()?;
    if tokens.is_empty() || tokens.len() != timestamps.len() {
        return None;
    }

    let start_time = frame.start_time.unwrap_or(0.0);
    let ys = frame.ys_probs.as_deref().unwrap_or(&[]);
    let lm = frame.lm_probs.as_deref().unwrap_or(&[]);
    let ctx = frame.context_scores.as_deref().unwrap_or(&[]);
    let has_probs = !ys.is_empty() || !lm.is_empty();

    struct Pending {
        text: String,
        start: f64,
        end: f64,
        confidences: Vec<f64>,
    }

    let mut words: Vec<Word> = Vec::new();
    let mut current: Option<Pending> = None;

    let flush = |pending: Pending, words: &mut Vec<Word>| {
        let confidence = if pending.confidences.is_empty() {
            None
        } else {
            Some(pending.confidences.iter().sum::<f64>() / pending.confidences.len() as f64)
        };
        words.push(Word {
            text: pending.text,
            start: pending.start,
            end: pending.end,
            confidence,
        });
    };

    for (i, token) in tokens.iter().enumerate() {
        let start = start_time + timestamps[i];
        // The last token has no successor; give it a nominal 100 ms.
        let end = if i + 1 < timestamps.len() {
            start_time + timestamps[i + 1]
        } else {
            start + 0.1
        };
        let confidence = if has_probs {
            let log_prob = ys.get(i).copied().unwrap_or(0.0)
                + lm.get(i).copied().unwrap_or(0.0)
                + ctx.get(i).copied().unwrap_or(0.0);
            Some(log_prob.exp())
        } else {
            None
        };

        let is_word_start = token.starts_with(char::is_whitespace) || current.is_none();
        if is_word_start {
            if let Some(pending) = current.take() {
                flush(pending, &mut words);
            }
            current = Some(Pending {
                text: token.trim_start().to_string(),
                start,
                end,
                confidences: confidence.into_iter().collect(),
            });
        } else if let Some(pending) = current.as_mut() {
            pending.text.push_str(token);
            pending.end = end;
            if let Some(c) = confidence {
                pending.confidences.push(c);
            }
        }
    }
    if let Some(pending) = current.take() {
        flush(pending, &mut words);
    }

    Some(words)
}

/// Transcript-level confidence: mean over words that have one.
fn mean_word_confidence(words: Option<&[Word]>) -> Option<f64> {
    let confs: Vec<f64> = words?
        .iter()
        .filter_map(|w| w.confidence)
        .collect();
    if confs.is_empty() {
        None
    } else {
        Some(confs.iter().sum::<f64>() / confs.len() as f64)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
