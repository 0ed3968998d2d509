//! Wire format of authored scenario files

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

#[derive(Debug, Deserialize)]
pub(super) struct ScenarioSource {
    pub scenario_id: String,
    pub scenario_name: String,
    #[serde(alias = "persona")]
    pub teacher_persona: PersonaSource,
    #[serde(alias = "events")]
    pub conversation_events: Vec<EventSource>,
    pub variables: DeclaredNames,
    #[serde(alias = "progress_flags")]
    pub progress_tracking: DeclaredNames,
}

#[derive(Debug, Deserialize)]
pub(super) struct PersonaSource {
    pub name: String,
    #[serde(alias = "personality")]
    pub description: Option<String>,
    pub tone: Option<String>,
}

/// A declared name set, written either as a list of names or as an object
/// whose keys are the names (`{"user_name": null}`)
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum DeclaredNames {
    List(Vec<String>),
    Map(Map<String, Value>),
}

impl DeclaredNames {
    pub fn into_names(self) -> BTreeSet<String> {
        match self {
            DeclaredNames::List(names) => names.into_iter().collect(),
            DeclaredNames::Map(map) => map.into_iter().map(|(name, _)| name).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct EventSource {
    pub event_id: u32,
    #[serde(rename = "type")]
    pub kind: EventTag,
    pub text: Option<String>,
    pub text_template: Option<String>,
    pub instruction: Option<String>,
    pub evaluation_focus: Option<Vec<String>>,
    pub target_variables: Option<Vec<String>>,
    pub expecting_input: Option<bool>,
    pub progress_flag: Option<String>,
}

impl EventSource {
    /// Authored text, preferring the template field
    pub fn template_text(&self) -> Option<&str> {
        self.text_template.as_deref().or(self.text.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(super) enum EventTag {
    #[serde(alias = "teacher_initial_prompt", alias = "teacher_guidance_and_role_setup")]
    ScriptedPrompt,
    #[serde(
        alias = "role_play_prompt",
        alias = "role_play_prompt_alex",
        alias = "role_play_prompt_stacy"
    )]
    RolePlayPrompt,
    #[serde(alias = "student_response_expectation")]
    ResponseExpectation,
    #[serde(alias = "teacher_feedback")]
    Feedback,
    #[serde(alias = "teacher_final_prompt")]
    Final,
}

impl EventTag {
    pub fn name(self) -> &'static str {
        match self {
            EventTag::ScriptedPrompt => "scripted-prompt",
            EventTag::RolePlayPrompt => "role-play-prompt",
            EventTag::ResponseExpectation => "response-expectation",
            EventTag::Feedback => "feedback",
            EventTag::Final => "final",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_declared_names_from_list_and_map() {
        let list: DeclaredNames = serde_json::from_value(json!(["a", "b", "a"])).unwrap();
        assert_eq!(list.into_names().len(), 2);

        let map: DeclaredNames =
            serde_json::from_value(json!({"user_name": null, "city": "ignored"})).unwrap();
        let names = map.into_names();
        assert!(names.contains("user_name") && names.contains("city"));
    }

    #[test]
    fn test_declared_names_reject_scalars() {
        assert!(serde_json::from_value::<DeclaredNames>(json!("user_name")).is_err());
    }

    #[test]
    fn test_template_text_prefers_template_field() {
        let event: EventSource = serde_json::from_value(json!({
            "event_id": 1,
            "type": "role_play_prompt_alex",
            "text": "plain",
            "text_template": "Hi {name}"
        }))
        .unwrap();
        assert_eq!(event.kind, EventTag::RolePlayPrompt);
        assert_eq!(event.template_text(), Some("Hi {name}"));
    }
}
