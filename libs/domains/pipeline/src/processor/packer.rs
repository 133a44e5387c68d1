//! Greedy token-bounded prompt packing.

use domain_vector::Candidate;
use uuid::Uuid;

use crate::tokenizer::TokenCounter;

/// Inserted between the template and each packed body.
///
/// BPE tokenizers usually charge one token for it, so every packed candidate
/// costs its body plus one. The separator is counted against the ceiling like
/// any other text.
pub const CANDIDATE_SEPARATOR: &str = "\n\n";

/// Outcome of packing one candidate list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedPrompt {
    pub text: String,
    /// Token count of `text`
    pub tokens: usize,
    /// Point ids whose bodies made it into `text`, in packing order
    pub packed: Vec<Uuid>,
    /// Point ids that did not fit
    pub rejected: Vec<Uuid>,
}

/// Packs candidates onto a template in arrival order.
///
/// Each candidate is appended tentatively and the whole prompt recounted; the
/// candidate is committed if the count stays within `max_tokens` and dropped
/// otherwise. Later, smaller candidates may still fit after a rejection.
/// Candidates are never reordered.
pub struct PromptPacker<'a> {
    counter: &'a dyn TokenCounter,
    max_tokens: usize,
}

impl<'a> PromptPacker<'a> {
    pub fn new(counter: &'a dyn TokenCounter, max_tokens: usize) -> Self {
        Self {
            counter,
            max_tokens,
        }
    }

    /// True when the template alone leaves room under the ceiling.
    pub fn fits(&self, template: &str) -> bool {
        self.counter.count(template) <= self.max_tokens
    }

    pub fn pack(&self, template: &str, candidates: &[Candidate]) -> PackedPrompt {
        let mut text = template.to_string();
        let mut tokens = self.counter.count(&text);
        let mut packed = Vec::new();
        let mut rejected = Vec::new();

        for candidate in candidates {
            let tentative = format!("{text}{CANDIDATE_SEPARATOR}{}", candidate.record.text());
            let count = self.counter.count(&tentative);

            if count > self.max_tokens {
                rejected.push(candidate.point_id);
                continue;
            }

            text = tentative;
            tokens = count;
            packed.push(candidate.point_id);
        }

        PackedPrompt {
            text,
            tokens,
            packed,
            rejected,
        }
    }
}
