//! Prompt templates for query rewriting and grounded answering.

use crate::models::{ScoredChunk, Turn};

/// Instruction for turning a follow-up into a standalone question.
pub const CONTEXTUALIZE_SYSTEM_PROMPT: &str = "Given a chat history and the latest user question \
which might reference context in the chat history, formulate a standalone question which can be \
understood without the chat history. Do NOT answer the question, just reformulate it if needed \
and otherwise return it as is. Reply with the question only.";

/// Instruction for answering from retrieved context only.
pub const ANSWER_SYSTEM_PROMPT: &str = "You are an assistant for question-answering tasks. \
Use the following pieces of retrieved context to answer the question. If the context does not \
contain the answer, say that you don't know. Use three sentences maximum and keep the answer \
concise.";

/// Placed in the context section when retrieval returned nothing.
pub const NO_CONTEXT: &str = "(no relevant context was found)";

/// Render turns as alternating `Human:` / `Assistant:` lines.
pub fn format_history(turns: &[Turn]) -> String {
    let mut out = String::new();
    for turn in turns {
        out.push_str("Human: ");
        out.push_str(turn.utterance.trim());
        out.push('\n');
        out.push_str("Assistant: ");
        out.push_str(turn.answer.trim());
        out.push('\n');
    }
    out
}

pub fn rewrite_prompt(history: &[Turn], utterance: &str) -> String {
    format!(
        "{}\n\nChat history:\n{}\nLatest question: {}\n\nStandalone question:",
        CONTEXTUALIZE_SYSTEM_PROMPT,
        format_history(history),
        utterance.trim()
    )
}

/// Retrieved chunk texts, verbatim, separated by blank lines.
pub fn format_context(chunks: &[ScoredChunk]) -> String {
    if chunks.is_empty() {
        return NO_CONTEXT.to_string();
    }
    chunks
        .iter()
        .map(|c| c.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn answer_prompt(question: &str, chunks: &[ScoredChunk]) -> String {
    format!(
        "{}\n\nContext:\n{}\n\nQuestion: {}\n\nAnswer:",
        ANSWER_SYSTEM_PROMPT,
        format_context(chunks),
        question.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn scored(text: &str) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: "id".to_string(),
                origin: "o".to_string(),
                ordinal: 0,
                text: text.to_string(),
                hash: String::new(),
                metadata: BTreeMap::new(),
            },
            score: 0.5,
        }
    }

    #[test]
    fn answer_prompt_embeds_context_verbatim() {
        let p = answer_prompt("Where?", &[scored("Paris is  the capital."), scored("Second.")]);
        assert!(p.contains("Paris is  the capital.\n\nSecond."));
        assert!(p.contains("Question: Where?"));
        assert!(p.contains("don't know"));
        assert!(p.contains("three sentences maximum"));
    }

    #[test]
    fn answer_prompt_without_context() {
        let p = answer_prompt("Where?", &[]);
        assert!(p.contains(NO_CONTEXT));
    }

    #[test]
    fn rewrite_prompt_lists_history_in_order() {
        let turns = vec![
            Turn {
                utterance: "first".to_string(),
                standalone_query: "first".to_string(),
                retrieved: Vec::new(),
                answer: "one".to_string(),
                completed: true,
                created_at: Utc::now(),
            },
            Turn {
                utterance: "second".to_string(),
                standalone_query: "second".to_string(),
                retrieved: Vec::new(),
                answer: "two".to_string(),
                completed: true,
                created_at: Utc::now(),
            },
        ];
        let p = rewrite_prompt(&turns, "third?");
        let first = p.find("Human: first").unwrap();
        let second = p.find("Human: second").unwrap();
        assert!(first < second);
        assert!(p.contains("Do NOT answer the question"));
        assert!(p.ends_with("Latest question: third?\n\nStandalone question:"));
    }
}
