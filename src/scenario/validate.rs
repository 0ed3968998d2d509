//! Eager scenario validation
//!
//! Every rule is checked for every event and all problems are reported
//! together, so an author sees the full list in one pass.

use super::source::{EventSource, EventTag, ScenarioSource};
use super::{
    ConversationEvent, EventKind, Persona, ResponseExpectation, ScenarioDefinition,
    ScenarioLoadError, DEFAULT_PERSONA_TONE,
};
use crate::template::Template;
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

/// A single problem found in a scenario source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationIssue {
    #[error("scenario has no conversation events")]
    EmptyEvents,
    #[error("event id {event_id} is used more than once")]
    DuplicateEventId { event_id: u32 },
    #[error("event {event_id} ({kind}) has expecting_input set inconsistently with its kind")]
    InputFlagMismatch { event_id: u32, kind: &'static str },
    #[error("event {event_id} has no text")]
    MissingText { event_id: u32 },
    #[error("event {event_id} has no instruction")]
    MissingInstruction { event_id: u32 },
    #[error("event {event_id} has no evaluation_focus list")]
    MissingEvaluationFocus { event_id: u32 },
    #[error("event {event_id} has no target_variables list")]
    MissingTargetVariables { event_id: u32 },
    #[error("event {event_id} lists target variables but does not expect input")]
    UnexpectedTargetVariables { event_id: u32 },
    #[error("event {event_id} references undeclared variable `{variable}`")]
    UndeclaredTemplateVariable { event_id: u32, variable: String },
    #[error("event {event_id} targets undeclared variable `{variable}`")]
    UndeclaredTargetVariable { event_id: u32, variable: String },
    #[error("event {event_id} uses `{variable}` before any earlier event captures it")]
    VariableUsedBeforeCapture { event_id: u32, variable: String },
    #[error("event {event_id} sets undeclared progress flag `{flag}`")]
    UndeclaredProgressFlag { event_id: u32, flag: String },
    #[error("event {event_id} follows the final event {final_id}")]
    EventAfterFinal { event_id: u32, final_id: u32 },
}

struct Checker<'a> {
    variables: &'a BTreeSet<String>,
    flags: &'a BTreeSet<String>,
    /// Variables targeted by response events seen so far
    captured: HashSet<String>,
    issues: Vec<ValidationIssue>,
}

impl Checker<'_> {
    fn check_template(&mut self, event_id: u32, template: &Template) {
        for variable in template.variables() {
            if !self.variables.contains(variable) {
                self.issues.push(ValidationIssue::UndeclaredTemplateVariable {
                    event_id,
                    variable: variable.to_string(),
                });
            } else if !self.captured.contains(variable) {
                self.issues.push(ValidationIssue::VariableUsedBeforeCapture {
                    event_id,
                    variable: variable.to_string(),
                });
            }
        }
    }

    fn required_text(&mut self, source: &EventSource) -> Option<Template> {
        let text = source.template_text().map(Template::parse);
        if text.is_none() {
            self.issues.push(ValidationIssue::MissingText {
                event_id: source.event_id,
            });
        }
        text
    }

    fn response_expectation(&mut self, source: EventSource) -> Option<ResponseExpectation> {
        let event_id = source.event_id;
        let prompt = source.template_text().map(Template::parse);

        if source.instruction.is_none() {
            self.issues.push(ValidationIssue::MissingInstruction { event_id });
        }
        if source.evaluation_focus.is_none() {
            self.issues.push(ValidationIssue::MissingEvaluationFocus { event_id });
        }
        if source.target_variables.is_none() {
            self.issues.push(ValidationIssue::MissingTargetVariables { event_id });
        }
        if let Some(prompt) = &prompt {
            self.check_template(event_id, prompt);
        }

        let targets = source.target_variables.unwrap_or_default();
        for variable in &targets {
            if !self.variables.contains(variable) {
                self.issues.push(ValidationIssue::UndeclaredTargetVariable {
                    event_id,
                    variable: variable.clone(),
                });
            }
        }
        self.captured.extend(targets.iter().cloned());

        let instruction = source.instruction?;
        let prompt =
            prompt.unwrap_or_else(|| Template::literal(format!("Please respond: {instruction}")));
        Some(ResponseExpectation {
            prompt,
            instruction,
            evaluation_focus: source.evaluation_focus?,
            target_variables: targets,
        })
    }

    fn event(&mut self, index: usize, source: EventSource) -> Option<ConversationEvent> {
        let event_id = source.event_id;
        let expects_input = source.kind == EventTag::ResponseExpectation;

        if source.expecting_input.is_some_and(|flag| flag != expects_input) {
            self.issues.push(ValidationIssue::InputFlagMismatch {
                event_id,
                kind: source.kind.name(),
            });
        }
        if let Some(flag) = &source.progress_flag {
            if !self.flags.contains(flag) {
                self.issues.push(ValidationIssue::UndeclaredProgressFlag {
                    event_id,
                    flag: flag.clone(),
                });
            }
        }
        if !expects_input && source.target_variables.as_ref().is_some_and(|t| !t.is_empty()) {
            self.issues
                .push(ValidationIssue::UnexpectedTargetVariables { event_id });
        }

        let progress_flag = source.progress_flag.clone();
        let kind = match source.kind {
            EventTag::ScriptedPrompt => EventKind::ScriptedPrompt {
                text: self.required_text(&source)?,
            },
            EventTag::RolePlayPrompt => EventKind::RolePlayPrompt {
                text: self.required_text(&source)?,
            },
            EventTag::Feedback => {
                // Feedback beats may carry only an instruction for the teacher
                let text = source
                    .template_text()
                    .or(source.instruction.as_deref())
                    .map(Template::parse);
                if text.is_none() {
                    self.issues.push(ValidationIssue::MissingText { event_id });
                }
                EventKind::Feedback { text: text? }
            }
            EventTag::Final => EventKind::Final {
                text: source.template_text().map(Template::parse),
            },
            EventTag::ResponseExpectation => {
                EventKind::ResponseExpectation(self.response_expectation(source)?)
            }
        };

        if !expects_input {
            if let Some(text) = match &kind {
                EventKind::Final { text } => text.as_ref(),
                EventKind::ScriptedPrompt { text }
                | EventKind::RolePlayPrompt { text }
                | EventKind::Feedback { text } => Some(text),
                EventKind::ResponseExpectation(_) => None,
            } {
                self.check_template(event_id, text);
            }
        }

        Some(ConversationEvent {
            index,
            id: event_id,
            progress_flag,
            kind,
        })
    }
}

/// Turn a parsed source into a definition, or report everything wrong with it
pub(super) fn build(source: ScenarioSource) -> Result<ScenarioDefinition, ScenarioLoadError> {
    let variables = source.variables.into_names();
    let progress_flags = source.progress_tracking.into_names();
    let mut checker = Checker {
        variables: &variables,
        flags: &progress_flags,
        captured: HashSet::new(),
        issues: Vec::new(),
    };

    if source.conversation_events.is_empty() {
        checker.issues.push(ValidationIssue::EmptyEvents);
    }

    let mut seen_ids = HashSet::new();
    let mut final_id = None;
    let mut events = Vec::with_capacity(source.conversation_events.len());
    for (index, event) in source.conversation_events.into_iter().enumerate() {
        if !seen_ids.insert(event.event_id) {
            checker.issues.push(ValidationIssue::DuplicateEventId {
                event_id: event.event_id,
            });
        }
        match final_id {
            Some(final_id) => checker.issues.push(ValidationIssue::EventAfterFinal {
                event_id: event.event_id,
                final_id,
            }),
            None if event.kind == EventTag::Final => final_id = Some(event.event_id),
            None => {}
        }
        if usize::try_from(event.event_id).ok() != Some(index) {
            tracing::warn!(
                scenario = %source.scenario_id,
                event_id = event.event_id,
                index,
                "Event id does not match its position"
            );
        }
        if let Some(event) = checker.event(index, event) {
            events.push(event);
        }
    }

    if !checker.issues.is_empty() {
        return Err(ScenarioLoadError::Invalid {
            scenario_id: source.scenario_id,
            issues: checker.issues,
        });
    }

    let persona = Persona {
        name: source.teacher_persona.name,
        description: source.teacher_persona.description,
        tone: source
            .teacher_persona
            .tone
            .unwrap_or_else(|| DEFAULT_PERSONA_TONE.to_string()),
    };

    Ok(ScenarioDefinition {
        id: source.scenario_id,
        name: source.scenario_name,
        persona,
        events,
        variables,
        progress_flags,
    })
}
