//! History-aware query rewriting.

use std::sync::Arc;

use docchat_core::models::Turn;
use docchat_core::prompt::rewrite_prompt;

use crate::error::Result;
use crate::llm::LanguageModel;

/// Turns a follow-up utterance into a question that stands on its own.
pub struct QueryRewriter {
    llm: Arc<dyn LanguageModel>,
}

impl QueryRewriter {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    /// With no history the utterance is returned unchanged and the model is
    /// not called. Otherwise one completion is requested; blank output falls
    /// back to the utterance.
    pub async fn rewrite(&self, history: &[Turn], utterance: &str) -> Result<String> {
        if history.is_empty() {
            return Ok(utterance.to_string());
        }
        let output = self.llm.complete(&rewrite_prompt(history, utterance)).await?;
        let standalone = output.trim();
        if standalone.is_empty() {
            tracing::debug!("rewriter returned nothing, keeping original question");
            return Ok(utterance.to_string());
        }
        Ok(standalone.to_string())
    }
}
