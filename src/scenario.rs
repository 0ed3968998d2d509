//! Scenario definitions
//!
//! An authored script is parsed from JSON, validated eagerly and exhaustively,
//! and turned into an immutable [`ScenarioDefinition`] that every session
//! running the scenario shares.

mod catalog;
mod source;
mod validate;

pub use catalog::ScenarioCatalog;
pub use validate::ValidationIssue;

use crate::template::Template;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Tone used when the persona block does not specify one
pub const DEFAULT_PERSONA_TONE: &str = "friendly and encouraging";

/// Errors raised while loading a scenario source
#[derive(Debug, Error)]
pub enum ScenarioLoadError {
    #[error("failed to read scenario {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("scenario is not valid JSON: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("scenario has missing or malformed fields: {0}")]
    Schema(#[source] serde_json::Error),
    #[error("scenario `{scenario_id}` is invalid: {}", join_issues(issues))]
    Invalid {
        scenario_id: String,
        issues: Vec<ValidationIssue>,
    },
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The persona the learner is talking to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tone: String,
}

/// Text and evaluation settings of an input-expecting event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseExpectation {
    pub prompt: Template,
    pub instruction: String,
    pub evaluation_focus: Vec<String>,
    /// Variables this event captures from the learner's answer
    pub target_variables: Vec<String>,
}

/// What kind of beat an event is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    ScriptedPrompt { text: Template },
    RolePlayPrompt { text: Template },
    ResponseExpectation(ResponseExpectation),
    Feedback { text: Template },
    Final { text: Option<Template> },
}

/// One beat of a scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationEvent {
    /// Position in the event sequence
    pub index: usize,
    pub id: u32,
    /// Progress flag set when this event completes
    pub progress_flag: Option<String>,
    pub kind: EventKind,
}

impl ConversationEvent {
    pub fn expects_input(&self) -> bool {
        matches!(self.kind, EventKind::ResponseExpectation(_))
    }

    pub fn expectation(&self) -> Option<&ResponseExpectation> {
        match &self.kind {
            EventKind::ResponseExpectation(expectation) => Some(expectation),
            _ => None,
        }
    }

    /// Text shown to the learner for this event, if any
    pub fn text(&self) -> Option<&Template> {
        match &self.kind {
            EventKind::ScriptedPrompt { text }
            | EventKind::RolePlayPrompt { text }
            | EventKind::Feedback { text } => Some(text),
            EventKind::ResponseExpectation(expectation) => Some(&expectation.prompt),
            EventKind::Final { text } => text.as_ref(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            EventKind::ScriptedPrompt { .. } => "scripted-prompt",
            EventKind::RolePlayPrompt { .. } => "role-play-prompt",
            EventKind::ResponseExpectation(_) => "response-expectation",
            EventKind::Feedback { .. } => "feedback",
            EventKind::Final { .. } => "final",
        }
    }
}

/// A validated, immutable scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioDefinition {
    pub id: String,
    pub name: String,
    pub persona: Persona,
    pub events: Vec<ConversationEvent>,
    pub variables: BTreeSet<String>,
    pub progress_flags: BTreeSet<String>,
}

impl ScenarioDefinition {
    pub fn event(&self, index: usize) -> Option<&ConversationEvent> {
        self.events.get(index)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Text of the `final` event, shown once the conversation completes
    pub fn final_text(&self) -> Option<&Template> {
        self.events.iter().rev().find_map(|event| match &event.kind {
            EventKind::Final { text } => text.as_ref(),
            _ => None,
        })
    }
}

/// Parse and validate a scenario from JSON text
pub fn load(source: &str) -> Result<ScenarioDefinition, ScenarioLoadError> {
    let value: serde_json::Value =
        serde_json::from_str(source).map_err(ScenarioLoadError::Parse)?;
    load_value(value)
}

/// Validate an already-parsed JSON document
pub fn load_value(value: serde_json::Value) -> Result<ScenarioDefinition, ScenarioLoadError> {
    let source: source::ScenarioSource =
        serde_json::from_value(value).map_err(ScenarioLoadError::Schema)?;
    let definition = validate::build(source)?;
    tracing::debug!(
        scenario = %definition.id,
        events = definition.len(),
        variables = definition.variables.len(),
        "Scenario validated"
    );
    Ok(definition)
}

/// Read and validate a scenario file
pub fn load_file(path: &Path) -> Result<ScenarioDefinition, ScenarioLoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| ScenarioLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load(&text)
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Scenario sources shared by tests across the crate

    use serde_json::{json, Value};

    /// Greeting, one scripted intro, three questions, feedback and a final beat
    pub fn friend_source() -> Value {
        json!({
            "scenario_id": "friend",
            "scenario_name": "Making a New Friend",
            "teacher_persona": {
                "name": "Ms. Rivera",
                "tone": "warm and playful",
                "description": "An English teacher who loves animals"
            },
            "conversation_events": [
                {"event_id": 0, "type": "scripted-prompt",
                 "text": "Hi! Today we will practice meeting a new friend.",
                 "progress_flag": "intro_shown"},
                {"event_id": 1, "type": "role-play-prompt",
                 "text_template": "Hello! I'm Alex. What's your name?"},
                {"event_id": 2, "type": "response-expectation", "expecting_input": true,
                 "instruction": "Introduce yourself by name",
                 "evaluation_focus": ["sentence structure", "introductions"],
                 "target_variables": ["user_name"],
                 "progress_flag": "name_given"},
                {"event_id": 3, "type": "role-play-prompt",
                 "text_template": "Nice to meet you, {user_name}! What's your favorite animal?"},
                {"event_id": 4, "type": "response-expectation", "expecting_input": true,
                 "instruction": "Say what your favorite animal is",
                 "evaluation_focus": ["articles"],
                 "target_variables": ["favorite_animal"],
                 "progress_flag": "animal_given"},
                {"event_id": 5, "type": "response-expectation", "expecting_input": true,
                 "text": "Why do you like {favorite_animal}s?",
                 "instruction": "Describe why you like that animal",
                 "evaluation_focus": [],
                 "target_variables": ["animal_reason"]},
                {"event_id": 6, "type": "feedback",
                 "text": "Great chat, {user_name}! {favorite_animal}s are {animal_reason}."},
                {"event_id": 7, "type": "final", "text": "Well done, you finished the scenario!"}
            ],
            "variables": {"user_name": null, "favorite_animal": null, "animal_reason": null},
            "progress_tracking": {"intro_shown": false, "name_given": false, "animal_given": false}
        })
    }

    /// Three consecutive questions and nothing else
    pub fn three_questions_source() -> Value {
        json!({
            "scenario_id": "three",
            "scenario_name": "Three Questions",
            "teacher_persona": {"name": "Sam"},
            "conversation_events": [
                {"event_id": 0, "type": "response-expectation", "instruction": "Say your name",
                 "evaluation_focus": [], "target_variables": ["name"]},
                {"event_id": 1, "type": "response-expectation", "instruction": "Say your city",
                 "evaluation_focus": [], "target_variables": ["city"]},
                {"event_id": 2, "type": "response-expectation", "instruction": "Say your job",
                 "evaluation_focus": [], "target_variables": ["job"]}
            ],
            "variables": ["name", "city", "job"],
            "progress_tracking": []
        })
    }
}
