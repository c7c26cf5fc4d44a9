//! Extractive question answering pipeline.
//!
//! Wires the tokenizer, the ONNX session and the span-selection math
//! into one `fn(context, question) -> answer` unit. Loading acquires
//! artifacts inside the proxy window; answering is pure compute and
//! never touches the network.

use std::path::PathBuf;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokenizers::{Tokenizer, TruncationParams, TruncationStrategy};

use crate::config::AppConfig;
use crate::error::SquadronError;
use crate::hub::{self, TOKENIZER_FILE};
use crate::ml;
use crate::onnx::{ModelConfig, QaSession};
use crate::proxy::ProxyGuard;

const FALLBACK_SEQ_LEN: usize = 384;
const FALLBACK_ANSWER_LEN: usize = 30;

/// One extracted answer with its evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    /// Verbatim slice of the context.
    pub answer: String,
    /// Joint start/end probability of the selected span.
    pub score: f32,
    /// Byte offset of the span's first byte within the context.
    pub start: usize,
    /// Byte offset one past the span's last byte.
    pub end: usize,
}

/// Anything that can answer a question about a context.
///
/// The server holds the model behind this seam so request handling can
/// be exercised with a stub.
pub trait Answerer: Send + Sync {
    fn answer(&self, context: &str, question: &str) -> Result<Answer, SquadronError>;
}

/// Reject blank inputs before they reach the encoder.
pub fn validate_inputs(context: &str, question: &str) -> Result<(), SquadronError> {
    if context.trim().is_empty() {
        return Err(SquadronError::validation("context must not be empty"));
    }
    if question.trim().is_empty() {
        return Err(SquadronError::validation("question must not be empty"));
    }
    Ok(())
}

/// Tokenizer plus ONNX session for one loaded checkpoint.
pub struct QaPipeline {
    tokenizer: Tokenizer,
    session: QaSession,
    max_answer_len: usize,
}

impl QaPipeline {
    /// Acquire artifacts, then stand the tokenizer and session up.
    ///
    /// The proxy window opens strictly around acquisition; by the time
    /// the session is built the environment is back to normal.
    pub fn load(cfg: &AppConfig) -> Result<QaPipeline, SquadronError> {
        let snapshot: PathBuf = {
            let _window = ProxyGuard::engage(&cfg.proxy_url);
            hub::ensure_artifacts(cfg)?
        };
        let model_cfg = ModelConfig::load(&snapshot)?;
        if let Some(model_type) = &model_cfg.model_type {
            info!("checkpoint model_type is {}", model_type);
        }
        let seq_cap = effective_seq_len(cfg.max_seq_len, model_cfg.usable_positions());
        let mut tokenizer = Tokenizer::from_file(snapshot.join(TOKENIZER_FILE))
            .map_err(|e| SquadronError::tokenizer(e.to_string()))?;
        let truncation = TruncationParams {
            max_length: seq_cap,
            strategy: TruncationStrategy::OnlySecond,
            ..Default::default()
        };
        tokenizer
            .with_truncation(Some(truncation))
            .map_err(|e| SquadronError::tokenizer(e.to_string()))?;
        let session = QaSession::load(&snapshot, cfg)?;
        let max_answer_len = if cfg.max_answer_len == 0 {
            warn!("answer length cap of zero, using {}", FALLBACK_ANSWER_LEN);
            FALLBACK_ANSWER_LEN
        } else {
            cfg.max_answer_len
        };
        info!("{} ready, sequences capped at {} tokens", cfg.model_id, seq_cap);
        Ok(QaPipeline {
            tokenizer,
            session,
            max_answer_len,
        })
    }
}

impl Answerer for QaPipeline {
    fn answer(&self, context: &str, question: &str) -> Result<Answer, SquadronError> {
        validate_inputs(context, question)?;
        // question first: truncation drops context tokens, never the question
        let encoding = self
            .tokenizer
            .encode((question, context), true)
            .map_err(|e| SquadronError::tokenizer(e.to_string()))?;
        let ids = encoding.get_ids();
        if ids.is_empty() {
            return Err(SquadronError::inference("encoder produced no tokens"));
        }
        let (start_logits, end_logits) =
            self.session
                .run(ids, encoding.get_attention_mask(), encoding.get_type_ids())?;
        let start_probs = ml::softmax(&start_logits);
        let end_probs = ml::softmax(&end_logits);
        let offsets = encoding.get_offsets();
        let admissible = context_mask(&encoding.get_sequence_ids(), offsets);
        let span = ml::best_span(&start_probs, &end_probs, &admissible, self.max_answer_len)?;
        match slice_answer(context, offsets, span) {
            Some(answer) => Ok(answer),
            None => {
                let byte_start = offsets[span.start].0;
                let byte_end = offsets[span.end].1;
                warn!(
                    "offsets {}..{} missed a boundary, decoding tokens instead",
                    byte_start, byte_end
                );
                let text = self
                    .tokenizer
                    .decode(&ids[span.start..=span.end], true)
                    .map_err(|e| SquadronError::tokenizer(e.to_string()))?
                    .trim()
                    .to_string();
                Ok(Answer {
                    answer: text,
                    score: span.score,
                    start: byte_start,
                    end: byte_end,
                })
            }
        }
    }
}

/// Assemble the answer by slicing the span's byte range out of the
/// context. The slice is what guarantees the answer is a verbatim piece
/// of the supplied text, multi-byte characters included. Returns `None`
/// when the offsets do not land on character boundaries.
fn slice_answer(context: &str, offsets: &[(usize, usize)], span: ml::Span) -> Option<Answer> {
    let byte_start = offsets[span.start].0;
    let byte_end = offsets[span.end].1;
    context.get(byte_start..byte_end).map(|slice| Answer {
        answer: slice.trim().to_string(),
        score: span.score,
        start: byte_start,
        end: byte_end,
    })
}

/// Mark the tokens an answer may cover: context-sequence tokens with a
/// nonempty source range. Question and special tokens stay masked.
fn context_mask(sequence_ids: &[Option<usize>], offsets: &[(usize, usize)]) -> Vec<bool> {
    sequence_ids
        .iter()
        .zip(offsets.iter())
        .map(|(seq, (start, end))| *seq == Some(1) && end > start)
        .collect()
}

fn effective_seq_len(requested: usize, model_limit: Option<usize>) -> usize {
    let requested = if requested == 0 {
        warn!("sequence cap of zero, using {}", FALLBACK_SEQ_LEN);
        FALLBACK_SEQ_LEN
    } else {
        requested
    };
    match model_limit {
        Some(limit) if limit < requested => {
            warn!(
                "sequence cap {} exceeds the model limit, clamping to {}",
                requested, limit
            );
            limit
        }
        _ => requested,
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn blank_inputs_are_rejected() {
        assert!(validate_inputs("", "where?").is_err());
        assert!(validate_inputs("   ", "where?").is_err());
        assert!(validate_inputs("Amy lives in Amsterdam", "").is_err());
        assert!(validate_inputs("Amy lives in Amsterdam", "\n\t").is_err());
        assert!(validate_inputs("Amy lives in Amsterdam", "Where does Amy live ?").is_ok());
    }

    #[test]
    fn mask_admits_only_context_tokens() {
        // [CLS] q q [SEP] c c [SEP]
        let sequence_ids = [
            None,
            Some(0),
            Some(0),
            None,
            Some(1),
            Some(1),
            None,
        ];
        let offsets = [(0, 0), (0, 5), (6, 10), (0, 0), (0, 4), (5, 9), (0, 0)];
        let mask = context_mask(&sequence_ids, &offsets);
        assert_eq!(mask, vec![false, false, false, false, true, true, false]);
    }

    #[test]
    fn mask_drops_zero_width_context_tokens() {
        let sequence_ids = [Some(1), Some(1)];
        let offsets = [(0, 3), (3, 3)];
        assert_eq!(context_mask(&sequence_ids, &offsets), vec![true, false]);
    }

    #[test]
    fn sequence_cap_clamps_to_the_model_limit() {
        assert_eq!(effective_seq_len(384, Some(512)), 384);
        assert_eq!(effective_seq_len(600, Some(512)), 512);
        assert_eq!(effective_seq_len(600, None), 600);
        assert_eq!(effective_seq_len(0, Some(512)), FALLBACK_SEQ_LEN);
    }

    #[test]
    fn chinese_span_is_sliced_from_the_context() {
        // fabricated pair encoding: [CLS] q q q [SEP], one token per
        // context character, [SEP]
        let context = "北京是中国的首都。";
        let sequence_ids: Vec<Option<usize>> = [None, Some(0), Some(0), Some(0), None]
            .into_iter()
            .chain(std::iter::repeat(Some(1)).take(9))
            .chain([None])
            .collect();
        let mut offsets = vec![(0, 0); 5];
        offsets.extend((0..9).map(|i| (i * 3, i * 3 + 3)));
        offsets.push((0, 0));
        let mask = context_mask(&sequence_ids, &offsets);

        // peak the logits on 北 (start) and 京 (end)
        let mut start_logits = vec![0.0_f32; 15];
        let mut end_logits = vec![0.0_f32; 15];
        start_logits[5] = 8.0;
        end_logits[6] = 8.0;
        let span = ml::best_span(
            &ml::softmax(&start_logits),
            &ml::softmax(&end_logits),
            &mask,
            30,
        )
        .unwrap();

        let answer = slice_answer(context, &offsets, span).unwrap();
        assert_eq!(answer.answer, "北京");
        assert!(context.contains(&answer.answer));
        assert_eq!((answer.start, answer.end), (0, 6));
    }

    #[test]
    fn sliced_answers_are_trimmed() {
        let context = "Amy lives in Amsterdam";
        let offsets = [(0, 0), (12, 22)];
        let span = ml::Span {
            start: 1,
            end: 1,
            score: 0.9,
        };
        let answer = slice_answer(context, &offsets, span).unwrap();
        assert_eq!(answer.answer, "Amsterdam");
        assert_eq!((answer.start, answer.end), (12, 22));
    }

    #[test]
    fn ragged_offsets_yield_no_slice() {
        // a range ending inside a multi-byte character cannot be sliced
        let context = "北京是中国的首都。";
        let offsets = [(0, 0), (0, 7)];
        let span = ml::Span {
            start: 1,
            end: 1,
            score: 0.5,
        };
        assert!(slice_answer(context, &offsets, span).is_none());
    }
}
