use crate::models::{GenerateRequest, Part, Role, Turn};
use crate::retrieval::{ContextBlock, RETRIEVAL_ERROR_PREFIX};

const PERSONA_INSTRUCTIONS: &str = r#"You are the virtual assistant of this organization. Answer the user's question using the CONTEXT below as your primary source.

Rules:
1. Base your answer on the CONTEXT whenever it contains relevant information. Do not mention fragment numbers or similarity scores.
2. If the CONTEXT is insufficient, absent, or says no relevant information was found, you may answer from general knowledge, but state clearly that the information does not come from the organization's documents.
3. Never invent facts, figures, names, prices, or policies. If you do not know, say so.
4. If the CONTEXT starts with "RETRIEVAL ERROR:", do not answer the question. Tell the user that a technical problem prevented you from consulting the knowledge base and that they should try again later.
5. Be clear, friendly, and concise. Reply in the language the user wrote in."#;

const HTML_FORMAT_INSTRUCTIONS: &str = r#"Formatting:
- Write the whole answer as well-formed HTML.
- Use only these tags: <p>, <strong>, <ul>, <ol>, <li>, <table>, <thead>, <tbody>, <tr>, <th>, <td>.
- Do NOT wrap the answer in code fences (```), and do NOT use Markdown syntax of any kind."#;

const PLAIN_FORMAT_INSTRUCTIONS: &str =
    "Formatting: plain text with short paragraphs. Do not wrap the answer in code fences.";

/// Builds the grounded generation request sent for a normal question.
#[derive(Debug, Clone)]
pub struct AnswerComposer {
    html_output: bool,
}

impl AnswerComposer {
    pub fn new(html_output: bool) -> Self {
        Self { html_output }
    }

    pub fn instruction_text(&self, context: &ContextBlock, question: &str) -> String {
        let format = if self.html_output {
            HTML_FORMAT_INSTRUCTIONS
        } else {
            PLAIN_FORMAT_INSTRUCTIONS
        };
        let context_note = if context.is_error() {
            format!("\n(The context below begins with \"{RETRIEVAL_ERROR_PREFIX}\".)")
        } else {
            String::new()
        };

        format!(
            "{PERSONA_INSTRUCTIONS}\n\n{format}\n{context_note}\n--- CONTEXT ---\n{}\n--- END OF CONTEXT ---\n\nUser question: {}",
            context.render(),
            question.trim()
        )
    }

    /// Rewrites the last user turn to carry instructions, context and the
    /// literal question. Earlier turns are passed through untouched.
    pub fn compose(&self, context: &ContextBlock, history: &[Turn]) -> GenerateRequest {
        let mut contents = history.to_vec();

        match contents.last_mut() {
            Some(last) if last.role == Role::User => {
                let question = last.text();
                last.parts = vec![Part::text(self.instruction_text(context, &question))];
            }
            _ => contents.push(Turn::user(self.instruction_text(context, ""))),
        }

        GenerateRequest::new(contents)
    }
}
