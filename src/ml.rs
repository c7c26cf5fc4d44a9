#![deny(missing_docs)]

//! Span-selection algorithms for extractive question answering.
//!
//! The encoder yields one start logit and one end logit per token; the
//! answer is the admissible `(start, end)` token pair with the highest
//! joint probability. Everything here is plain slice arithmetic so it
//! can be exercised without a model.

use crate::error::SquadronError;

/// Candidate answer span over token indices, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    /// Index of the first token covered by the span.
    pub start: usize,
    /// Index of the last token covered by the span.
    pub end: usize,
    /// Joint probability `P(start) * P(end)`.
    pub score: f32,
}

/// Numerically stable softmax over raw logits.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

/// Scan every admissible `(start, end)` pair and keep the best one.
///
/// `admissible` marks the tokens a span may cover; the caller masks out
/// question and special tokens. A pair qualifies when both ends are
/// admissible, `start <= end`, and the span covers at most
/// `max_answer_len` tokens. Ties keep the earliest pair in scan order,
/// so identical inputs always select the identical span.
pub fn best_span(
    start_probs: &[f32],
    end_probs: &[f32],
    admissible: &[bool],
    max_answer_len: usize,
) -> Result<Span, SquadronError> {
    if start_probs.len() != end_probs.len() || start_probs.len() != admissible.len() {
        return Err(SquadronError::inference(format!(
            "logit/mask length mismatch: {} starts, {} ends, {} mask",
            start_probs.len(),
            end_probs.len(),
            admissible.len()
        )));
    }
    if max_answer_len == 0 {
        return Err(SquadronError::inference("max answer length is zero"));
    }
    let mut best: Option<Span> = None;
    for start in 0..start_probs.len() {
        if !admissible[start] {
            continue;
        }
        let last = start
            .saturating_add(max_answer_len - 1)
            .min(end_probs.len() - 1);
        for end in start..=last {
            if !admissible[end] {
                continue;
            }
            let score = start_probs[start] * end_probs[end];
            if best.map_or(true, |b| score > b.score) {
                best = Some(Span { start, end, score });
            }
        }
    }
    best.ok_or_else(|| SquadronError::inference("no admissible answer span"))
}
