//! Judge request framing

use crate::llm::{LlmMessage, LlmRequest, SystemContent};
use crate::template::Bindings;
use serde::Serialize;

/// Everything the judge needs to assess one learner response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JudgeRequest {
    pub instruction: String,
    pub evaluation_focus: Vec<String>,
    pub target_variables: Vec<String>,
    /// Variables already captured earlier in the conversation
    pub bound_variables: Bindings,
    pub persona_name: String,
    pub persona_tone: String,
    pub learner_text: String,
}

const JUDGE_SYSTEM_PROMPT: &str = "You are the evaluator inside a language-practice \
conversation. You judge one learner reply at a time and answer with a single JSON \
object and nothing else.";

impl JudgeRequest {
    /// Render the request as the user message sent to the judge
    pub fn prompt(&self) -> String {
        let focus = if self.evaluation_focus.is_empty() {
            "general correctness and relevance".to_string()
        } else {
            self.evaluation_focus.join(", ")
        };
        let known: Vec<String> = self
            .bound_variables
            .iter()
            .filter_map(|(name, value)| value.as_ref().map(|v| format!("{name} = {v:?}")))
            .collect();
        let known = if known.is_empty() {
            "(none)".to_string()
        } else {
            known.join("; ")
        };
        let extraction = if self.target_variables.is_empty() {
            "{}".to_string()
        } else {
            let fields: Vec<String> = self
                .target_variables
                .iter()
                .map(|name| format!("\"{name}\": string or null"))
                .collect();
            format!("{{{}}}", fields.join(", "))
        };

        format!(
            "You are {name}, a language teacher with a {tone} personality.\n\n\
             Task given to the learner: {instruction}\n\
             Evaluate for: {focus}\n\
             Already known about the learner: {known}\n\n\
             Learner's reply: {learner:?}\n\n\
             Decide whether the reply completes the task acceptably. Write the \
             feedback in your persona's voice and keep it to one or two sentences. \
             If the reply has mistakes, give a corrected version. Extract the \
             following values from the reply, using null for anything the learner \
             did not provide: {targets}.\n\n\
             Respond with exactly this JSON shape:\n\
             {{\"acceptable\": true or false, \"corrected_text\": string or null, \
             \"feedback\": string, \"extracted_variables\": {extraction}}}",
            name = self.persona_name,
            tone = self.persona_tone,
            instruction = self.instruction,
            learner = self.learner_text,
            targets = if self.target_variables.is_empty() {
                "(nothing to extract)".to_string()
            } else {
                self.target_variables.join(", ")
            },
        )
    }

    pub fn to_llm_request(&self, max_tokens: u32) -> LlmRequest {
        LlmRequest {
            system: vec![SystemContent::cached(JUDGE_SYSTEM_PROMPT)],
            messages: vec![LlmMessage::user(self.prompt())],
            max_tokens: Some(max_tokens),
            temperature: Some(0.2),
        }
    }
}
