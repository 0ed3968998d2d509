//! Per-session conversation state

use crate::scenario::ScenarioDefinition;
use crate::template::Bindings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Mutable progress through one scenario. Serializable so a session store
/// can keep it between requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub scenario_id: String,
    pub scenario_name: String,
    /// A valid event index, or the event count once completed
    pub current_event_index: usize,
    pub variables: Bindings,
    /// Targets the conversation moved past without a value. Their
    /// placeholders render as written instead of failing.
    #[serde(default)]
    pub skipped_variables: BTreeSet<String>,
    /// Evaluated submissions against the current event
    pub attempts: u32,
    pub progress: BTreeMap<String, bool>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

/// A stored state blob that cannot be resumed
#[derive(Debug, Error)]
pub enum StateRestoreError {
    #[error("state blob is not valid: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("state belongs to scenario `{found}`, not `{expected}`")]
    ScenarioMismatch { expected: String, found: String },
    #[error("scenario `{0}` is no longer available")]
    ScenarioUnavailable(String),
    #[error("event index {index} is out of range ({len} events)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("event {index} does not expect input")]
    NotAtInput { index: usize },
    #[error("completed flag does not match event index {index}")]
    CompletionMismatch { index: usize },
    #[error("state binds undeclared variable `{0}`")]
    UndeclaredVariable(String),
    #[error("state sets undeclared progress flag `{0}`")]
    UndeclaredFlag(String),
}

impl ConversationState {
    /// Index 0 with every declared variable unset and every flag cleared
    pub fn fresh(scenario: &ScenarioDefinition) -> Self {
        Self {
            scenario_id: scenario.id.clone(),
            scenario_name: scenario.name.clone(),
            current_event_index: 0,
            variables: scenario
                .variables
                .iter()
                .map(|name| (name.clone(), None))
                .collect(),
            skipped_variables: BTreeSet::new(),
            attempts: 0,
            progress: scenario
                .progress_flags
                .iter()
                .map(|flag| (flag.clone(), false))
                .collect(),
            completed: false,
            created_at: Utc::now(),
        }
    }

    /// Bindings used for rendering, with skipped variables standing in as
    /// their own `{name}` placeholder
    pub fn render_bindings(&self) -> Cow<'_, Bindings> {
        if self.skipped_variables.is_empty() {
            return Cow::Borrowed(&self.variables);
        }
        let mut bindings = self.variables.clone();
        for name in &self.skipped_variables {
            if let Some(slot) = bindings.get_mut(name) {
                if slot.is_none() {
                    *slot = Some(format!("{{{name}}}"));
                }
            }
        }
        Cow::Owned(bindings)
    }

    pub fn to_blob(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_blob(blob: &str) -> Result<Self, StateRestoreError> {
        Ok(serde_json::from_str(blob)?)
    }

    /// Check that this state could have been produced by `scenario`
    pub fn check_against(&self, scenario: &ScenarioDefinition) -> Result<(), StateRestoreError> {
        if self.scenario_id != scenario.id {
            return Err(StateRestoreError::ScenarioMismatch {
                expected: scenario.id.clone(),
                found: self.scenario_id.clone(),
            });
        }
        let index = self.current_event_index;
        if index > scenario.len() {
            return Err(StateRestoreError::IndexOutOfRange {
                index,
                len: scenario.len(),
            });
        }
        if self.completed != (index == scenario.len()) {
            return Err(StateRestoreError::CompletionMismatch { index });
        }
        if !self.completed && !scenario.event(index).is_some_and(|e| e.expects_input()) {
            return Err(StateRestoreError::NotAtInput { index });
        }
        if let Some(name) = self
            .variables
            .keys()
            .chain(&self.skipped_variables)
            .find(|name| !scenario.variables.contains(*name))
        {
            return Err(StateRestoreError::UndeclaredVariable(name.clone()));
        }
        if let Some(flag) = self
            .progress
            .keys()
            .find(|flag| !scenario.progress_flags.contains(*flag))
        {
            return Err(StateRestoreError::UndeclaredFlag(flag.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::fixtures::friend_source;
    use crate::scenario::load_value;

    fn friend() -> ScenarioDefinition {
        load_value(friend_source()).unwrap()
    }

    fn at_first_question(scenario: &ScenarioDefinition) -> ConversationState {
        let mut state = ConversationState::fresh(scenario);
        state.current_event_index = 2;
        state
    }

    #[test]
    fn test_fresh_state() {
        let scenario = friend();
        let state = ConversationState::fresh(&scenario);
        assert_eq!(state.current_event_index, 0);
        assert_eq!(state.attempts, 0);
        assert!(state.variables.values().all(Option::is_none));
        assert_eq!(state.variables.len(), 3);
        assert!(state.progress.values().all(|set| !set));
        assert!(!state.completed);
    }

    #[test]
    fn test_blob_restores_equal_state() {
        let scenario = friend();
        let mut state = at_first_question(&scenario);
        state.attempts = 2;
        state
            .variables
            .insert("user_name".to_string(), Some("Maria".to_string()));
        let restored = ConversationState::from_blob(&state.to_blob().unwrap()).unwrap();
        assert_eq!(restored, state);
        restored.check_against(&scenario).unwrap();
    }

    #[test]
    fn test_corrupt_blob() {
        assert!(matches!(
            ConversationState::from_blob("{\"scenario_id\": 3}"),
            Err(StateRestoreError::Corrupt(_))
        ));
    }

    #[test]
    fn test_check_rejects_inconsistent_states() {
        let scenario = friend();

        let mut state = at_first_question(&scenario);
        state.scenario_id = "other".to_string();
        assert!(matches!(
            state.check_against(&scenario),
            Err(StateRestoreError::ScenarioMismatch { .. })
        ));

        let mut state = at_first_question(&scenario);
        state.current_event_index = 42;
        assert!(matches!(
            state.check_against(&scenario),
            Err(StateRestoreError::IndexOutOfRange { .. })
        ));

        let mut state = at_first_question(&scenario);
        state.current_event_index = 1;
        assert!(matches!(
            state.check_against(&scenario),
            Err(StateRestoreError::NotAtInput { index: 1 })
        ));

        let mut state = at_first_question(&scenario);
        state.completed = true;
        assert!(matches!(
            state.check_against(&scenario),
            Err(StateRestoreError::CompletionMismatch { .. })
        ));

        let mut state = at_first_question(&scenario);
        state.variables.insert("password".to_string(), None);
        assert!(matches!(
            state.check_against(&scenario),
            Err(StateRestoreError::UndeclaredVariable(_))
        ));

        let mut state = at_first_question(&scenario);
        state.skipped_variables.insert("password".to_string());
        assert!(matches!(
            state.check_against(&scenario),
            Err(StateRestoreError::UndeclaredVariable(_))
        ));

        let mut state = at_first_question(&scenario);
        state.progress.insert("hacked".to_string(), true);
        assert!(matches!(
            state.check_against(&scenario),
            Err(StateRestoreError::UndeclaredFlag(_))
        ));
    }

    #[test]
    fn test_completed_state_is_valid() {
        let scenario = friend();
        let mut state = ConversationState::fresh(&scenario);
        state.current_event_index = scenario.len();
        state.completed = true;
        state.check_against(&scenario).unwrap();
    }

    #[test]
    fn test_skipped_variables_render_as_placeholders() {
        let scenario = friend();
        let mut state = at_first_question(&scenario);
        assert!(matches!(state.render_bindings(), Cow::Borrowed(_)));

        state.skipped_variables.insert("user_name".to_string());
        state
            .variables
            .insert("favorite_animal".to_string(), Some("cat".to_string()));
        let bindings = state.render_bindings();
        assert_eq!(bindings["user_name"].as_deref(), Some("{user_name}"));
        assert_eq!(bindings["favorite_animal"].as_deref(), Some("cat"));
        assert_eq!(bindings["animal_reason"], None);
        assert_eq!(state.variables["user_name"], None);
    }

    #[test]
    fn test_blob_without_skipped_variables_loads() {
        let scenario = friend();
        let mut blob: serde_json::Value =
            serde_json::from_str(&at_first_question(&scenario).to_blob().unwrap()).unwrap();
        blob.as_object_mut().unwrap().remove("skipped_variables");
        let state = ConversationState::from_blob(&blob.to_string()).unwrap();
        assert!(state.skipped_variables.is_empty());
        state.check_against(&scenario).unwrap();
    }
}
