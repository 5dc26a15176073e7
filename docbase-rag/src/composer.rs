//! Answer composition: prompt assembly, language model call and confidence.
//!
//! [`AnswerComposer::compose`] never fails. When the language model is
//! missing, unavailable, erroring or slow, it degrades to an extractive
//! answer that quotes the retrieved chunks and flags the degradation through
//! [`AnswerMode`].

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RagConfig;
use crate::document::{Answer, AnswerMode, RetrievalResult};
use crate::error::RagError;
use crate::inference::CompletionModel;

/// Answer text used when retrieval found nothing relevant.
pub const NO_CONTEXT_ANSWER: &str = "I couldn't find any relevant information in your documents \
     to answer this question. Try rephrasing it or upload more relevant documents.";

const PROMPT_HEADER: &str = "You are a helpful assistant that answers questions based on the \
     provided context. Use only the information from the context to answer the question. If the \
     context doesn't contain enough information to answer the question, say so clearly.";

const CONTEXT_SEPARATOR: &str = "\n\n";

/// Builds prompts from retrieved chunks and turns model output into an [`Answer`].
pub struct AnswerComposer {
    model: Option<Arc<dyn CompletionModel>>,
    max_context_chars: usize,
    max_answer_tokens: usize,
    timeout: Duration,
    extractive_chunks: usize,
    snippet_chars: usize,
}

impl AnswerComposer {
    /// Create a composer. Without a model every answer is extractive.
    pub fn new(config: &RagConfig, model: Option<Arc<dyn CompletionModel>>) -> Self {
        Self {
            model,
            max_context_chars: config.max_context_chars,
            max_answer_tokens: config.max_answer_tokens,
            timeout: config.inference_timeout,
            extractive_chunks: config.extractive_chunks.max(1),
            snippet_chars: config.extractive_snippet_chars,
        }
    }

    /// The language model, if one is configured.
    pub fn model(&self) -> Option<&Arc<dyn CompletionModel>> {
        self.model.as_ref()
    }

    /// The overall budget for one language model call.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Build the prompt for `question` from `supports` in rank order.
    ///
    /// The context section never exceeds `max_context_chars` characters.
    /// Chunks that do not fit are dropped lowest-rank first; only a top chunk
    /// that cannot fit on its own is cut.
    pub fn build_prompt(&self, question: &str, supports: &[RetrievalResult]) -> String {
        let context = self.build_context(supports);
        format!("{PROMPT_HEADER}\n\nContext:\n{context}\n\nQuestion: {question}\n\nAnswer:")
    }

    fn build_context(&self, supports: &[RetrievalResult]) -> String {
        let budget = self.max_context_chars;
        let mut context = String::new();
        let mut used = 0;
        for (rank, support) in supports.iter().enumerate() {
            let len = support.text.chars().count();
            let separator = if rank == 0 { 0 } else { CONTEXT_SEPARATOR.len() };
            if used + separator + len > budget {
                if rank == 0 {
                    context.extend(support.text.chars().take(budget));
                    used = budget;
                }
                debug!(included = rank, dropped = supports.len() - rank, "context budget reached");
                break;
            }
            if rank > 0 {
                context.push_str(CONTEXT_SEPARATOR);
            }
            context.push_str(&support.text);
            used += separator + len;
        }
        context
    }

    /// Compose an answer to `question` from `supports`, best first.
    pub async fn compose(&self, question: &str, supports: Vec<RetrievalResult>) -> Answer {
        if supports.is_empty() {
            return Answer {
                text: NO_CONTEXT_ANSWER.to_string(),
                supports,
                confidence: 0.0,
                mode: AnswerMode::NoContext,
            };
        }
        let confidence = confidence(&supports);

        let Some(model) = &self.model else {
            warn!("no language model configured, answering extractively");
            return self.extractive(supports, confidence, "no language model configured".into());
        };

        let prompt = self.build_prompt(question, &supports);
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.timeout,
            model.complete(&prompt, self.max_answer_tokens, self.timeout),
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(text)) if !text.trim().is_empty() => {
                info!(
                    model = model.name(),
                    elapsed_ms,
                    supports = supports.len(),
                    "generated answer"
                );
                let text = text.trim().to_string();
                Answer { text, supports, confidence, mode: AnswerMode::Generated }
            }
            Ok(Ok(_)) => {
                warn!(model = model.name(), "language model returned an empty completion");
                self.extractive(supports, confidence, "language model returned no text".into())
            }
            Ok(Err(RagError::Timeout { budget, .. })) => self.timed_out(supports, confidence, budget),
            Err(_) => {
                warn!(model = model.name(), elapsed_ms, "language model call exceeded its budget");
                self.timed_out(supports, confidence, self.timeout)
            }
            Ok(Err(e)) => {
                warn!(
                    model = model.name(),
                    error = %e,
                    "language model failed, answering extractively"
                );
                self.extractive(supports, confidence, e.to_string())
            }
        }
    }

    fn extractive(&self, supports: Vec<RetrievalResult>, confidence: f32, reason: String) -> Answer {
        Answer {
            text: self.extractive_text(&supports),
            supports,
            confidence,
            mode: AnswerMode::Extractive { reason },
        }
    }

    fn timed_out(&self, supports: Vec<RetrievalResult>, confidence: f32, budget: Duration) -> Answer {
        let text = format!(
            "{}The language model did not answer within {}s. Please try again.",
            self.extractive_text(&supports),
            budget.as_secs_f32()
        );
        Answer { text, supports, confidence, mode: AnswerMode::TimedOut { budget } }
    }

    /// Numbered excerpts of the top supports.
    pub fn extractive_text(&self, supports: &[RetrievalResult]) -> String {
        let mut text = String::from("Based on the retrieved context:\n\n");
        for (i, support) in supports.iter().take(self.extractive_chunks).enumerate() {
            let snippet: String = support.text.chars().take(self.snippet_chars).collect();
            let ellipsis = if snippet.len() < support.text.len() { "..." } else { "" };
            text.push_str(&format!(
                "{}. From {}:\n{}{}\n\n",
                i + 1,
                support.filename,
                snippet.trim_end(),
                ellipsis
            ));
        }
        text
    }
}

impl std::fmt::Debug for AnswerComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerComposer")
            .field("model", &self.model.as_ref().map(|m| m.name().to_string()))
            .field("max_context_chars", &self.max_context_chars)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Confidence percentage for a set of supports.
///
/// The mean of the scores clamped to `[0, 1]`, scaled to `[0, 100]` and
/// rounded to one decimal. Zero supports give zero.
pub fn confidence(supports: &[RetrievalResult]) -> f32 {
    if supports.is_empty() {
        return 0.0;
    }
    let sum: f32 = supports.iter().map(|s| s.score.clamp(0.0, 1.0)).sum();
    let percent = 100.0 * sum / supports.len() as f32;
    ((percent * 10.0).round() / 10.0).clamp(0.0, 100.0)
}
