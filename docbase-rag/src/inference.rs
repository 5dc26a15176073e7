//! Language model collaborator used by the [`AnswerComposer`](crate::AnswerComposer).

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// A black-box text completion service.
///
/// # Example
///
/// ```rust,ignore
/// use docbase_rag::CompletionModel;
///
/// let text = model.complete("Context: ...\nAnswer:", 256, Duration::from_secs(30)).await?;
/// ```
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// The model name reported in status checks.
    fn name(&self) -> &str;

    /// Whether the model is currently reachable. Used only for reporting;
    /// [`complete`](CompletionModel::complete) decides availability per call.
    async fn is_available(&self) -> bool {
        true
    }

    /// Complete `prompt` with at most `max_tokens` tokens.
    ///
    /// Implementations should honour `timeout` themselves where they can. The
    /// caller enforces it as an overall budget regardless.
    ///
    /// # Errors
    ///
    /// - [`RagError::ModelUnavailable`](crate::RagError::ModelUnavailable) if the model
    ///   is not loaded or not reachable
    /// - [`RagError::Timeout`](crate::RagError::Timeout) if the call exceeded its budget
    /// - [`RagError::Inference`](crate::RagError::Inference) for any other failure
    async fn complete(&self, prompt: &str, max_tokens: usize, timeout: Duration)
    -> Result<String>;
}
