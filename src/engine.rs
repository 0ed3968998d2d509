//! Conversation engine
//!
//! Owns one session's progress through a scenario. Transitions are computed
//! by the pure functions in [`transition`] and committed only once they have
//! fully succeeded.

#[cfg(test)]
mod proptests;
mod state;
pub(crate) mod transition;

pub use state::{ConversationState, StateRestoreError};

use crate::evaluator::{JudgeRequest, ResponseEvaluator};
use crate::scenario::{Persona, ScenarioDefinition, ScenarioLoadError};
use crate::template::{Bindings, ScenarioLogicError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use transition::Step;

/// Prompt returned while no scenario is loaded
pub const NO_SCENARIO_PROMPT: &str = "No scenario loaded. Please load a scenario first.";

/// Prompt returned once a scenario without final text is finished
pub const COMPLETED_PROMPT: &str = "Conversation completed! Great job!";

/// Message returned when the judge cannot be reached
pub const UNAVAILABLE_MESSAGE: &str =
    "Sorry, I can't check your answer right now. Please try again in a moment.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Evaluated submissions allowed per event before a forced advance
    pub max_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Where the engine is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    NoScenarioLoaded,
    /// Waiting on the input event at this index
    AwaitingInput(usize),
    Completed,
}

/// Operation not supported in the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidStateError {
    #[error("no scenario is loaded")]
    NoScenarioLoaded,
    #[error("the conversation is already completed")]
    Completed,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Load(#[from] ScenarioLoadError),
    #[error(transparent)]
    InvalidState(#[from] InvalidStateError),
    #[error("scenario logic error: {0}")]
    Logic(#[from] ScenarioLogicError),
    #[error("cannot restore conversation: {0}")]
    Restore(#[from] StateRestoreError),
}

/// Result of loading a scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub scenario_name: String,
    pub persona: Persona,
    /// Texts of the leading events shown before the first question
    pub opening: Vec<String>,
}

/// Outcome of one learner submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResponseOutcome {
    Accepted {
        feedback: String,
        next_prompt: Option<String>,
        completed: bool,
        /// True when the engine moved on after the last allowed attempt
        forced: bool,
        /// Texts of the non-input events passed while advancing
        transcript: Vec<String>,
        variables_updated: Bindings,
    },
    NeedsCorrection {
        feedback: String,
        corrected_text: Option<String>,
        attempt_count: u32,
    },
    /// The judge could not be reached; the attempt was not counted
    Unavailable { message: String },
}

/// Read-only view of a session's progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    pub scenario_name: Option<String>,
    pub current_event_index: usize,
    pub attempts: u32,
    pub variables: Bindings,
    pub progress: BTreeMap<String, bool>,
    pub completed: bool,
}

#[derive(Debug, Clone)]
struct ActiveScenario {
    scenario: Arc<ScenarioDefinition>,
    state: ConversationState,
}

/// State machine for one conversation
pub struct ConversationEngine {
    evaluator: Arc<ResponseEvaluator>,
    config: EngineConfig,
    active: Option<ActiveScenario>,
}

impl ConversationEngine {
    pub fn new(evaluator: Arc<ResponseEvaluator>, config: EngineConfig) -> Self {
        Self {
            evaluator,
            config,
            active: None,
        }
    }

    pub fn status(&self) -> EngineStatus {
        match &self.active {
            None => EngineStatus::NoScenarioLoaded,
            Some(active) if active.state.completed => EngineStatus::Completed,
            Some(active) => EngineStatus::AwaitingInput(active.state.current_event_index),
        }
    }

    pub fn scenario(&self) -> Option<&Arc<ScenarioDefinition>> {
        self.active.as_ref().map(|active| &active.scenario)
    }

    pub fn state(&self) -> Option<&ConversationState> {
        self.active.as_ref().map(|active| &active.state)
    }

    /// Start `scenario` from the beginning, replacing any current one
    pub fn load_scenario(
        &mut self,
        scenario: Arc<ScenarioDefinition>,
    ) -> Result<LoadSummary, EngineError> {
        let (state, opening) = transition::start(&scenario).inspect_err(|e| {
            tracing::error!(scenario = %scenario.id, error = %e, "Scenario cannot start");
        })?;
        tracing::info!(
            scenario = %scenario.id,
            index = state.current_event_index,
            completed = state.completed,
            "Scenario loaded"
        );
        let summary = LoadSummary {
            scenario_name: scenario.name.clone(),
            persona: scenario.persona.clone(),
            opening,
        };
        self.active = Some(ActiveScenario { scenario, state });
        Ok(summary)
    }

    /// Parse, validate and start a scenario from JSON text
    pub fn load_scenario_source(&mut self, source: &str) -> Result<LoadSummary, EngineError> {
        let scenario = crate::scenario::load(source)?;
        self.load_scenario(Arc::new(scenario))
    }

    /// Continue a conversation from a stored state
    pub fn resume(
        &mut self,
        scenario: Arc<ScenarioDefinition>,
        state: ConversationState,
    ) -> Result<(), EngineError> {
        state.check_against(&scenario)?;
        self.active = Some(ActiveScenario { scenario, state });
        Ok(())
    }

    /// Text the learner should see now
    pub fn get_current_prompt(&self) -> Result<String, EngineError> {
        let Some(active) = &self.active else {
            return Ok(NO_SCENARIO_PROMPT.to_string());
        };
        transition::current_prompt(&active.scenario, &active.state)
            .inspect_err(|e| {
                tracing::error!(scenario = %active.scenario.id, error = %e, "Cannot render prompt");
            })
            .map_err(EngineError::from)
    }

    /// Judge a learner's reply to the current event and move the
    /// conversation accordingly
    pub async fn process_student_response(
        &mut self,
        text: &str,
    ) -> Result<ResponseOutcome, EngineError> {
        let active = match &self.active {
            None => return Err(InvalidStateError::NoScenarioLoaded.into()),
            Some(active) if active.state.completed => {
                return Err(InvalidStateError::Completed.into())
            }
            Some(active) => active,
        };
        let scenario = active.scenario.clone();
        let expectation = transition::current_expectation(&scenario, &active.state)?;

        let request = JudgeRequest {
            instruction: expectation.instruction.clone(),
            evaluation_focus: expectation.evaluation_focus.clone(),
            target_variables: expectation.target_variables.clone(),
            bound_variables: active.state.variables.clone(),
            persona_name: scenario.persona.name.clone(),
            persona_tone: scenario.persona.tone.clone(),
            learner_text: text.to_string(),
        };
        let verdict = self.evaluator.evaluate(&request).await;

        let Some(active) = self.active.as_mut() else {
            return Err(InvalidStateError::NoScenarioLoaded.into());
        };
        let step = transition::apply_verdict(
            &scenario,
            &active.state,
            verdict,
            self.config.max_attempts,
        )
        .inspect_err(|e| {
            tracing::error!(
                scenario = %scenario.id,
                index = active.state.current_event_index,
                error = %e,
                "Transition failed"
            );
        })?;

        let outcome = match step {
            Step::Unchanged { reason } => {
                tracing::warn!(scenario = %scenario.id, reason = %reason, "Evaluation unavailable");
                ResponseOutcome::Unavailable {
                    message: UNAVAILABLE_MESSAGE.to_string(),
                }
            }
            Step::Retry {
                state,
                feedback,
                corrected_text,
                attempt_count,
            } => {
                tracing::info!(
                    scenario = %scenario.id,
                    index = state.current_event_index,
                    attempt = attempt_count,
                    "Response needs correction"
                );
                active.state = state;
                ResponseOutcome::NeedsCorrection {
                    feedback,
                    corrected_text,
                    attempt_count,
                }
            }
            Step::Advanced {
                state,
                feedback,
                forced,
                transcript,
                next_prompt,
                variables_updated,
            } => {
                tracing::info!(
                    scenario = %scenario.id,
                    from = active.state.current_event_index,
                    to = state.current_event_index,
                    forced,
                    completed = state.completed,
                    "Conversation advanced"
                );
                let completed = state.completed;
                active.state = state;
                ResponseOutcome::Accepted {
                    feedback,
                    next_prompt,
                    completed,
                    forced,
                    transcript,
                    variables_updated,
                }
            }
        };
        Ok(outcome)
    }

    pub fn get_state(&self) -> StateSnapshot {
        match &self.active {
            None => StateSnapshot {
                scenario_name: None,
                current_event_index: 0,
                attempts: 0,
                variables: Bindings::new(),
                progress: BTreeMap::new(),
                completed: false,
            },
            Some(active) => StateSnapshot {
                scenario_name: Some(active.state.scenario_name.clone()),
                current_event_index: active.state.current_event_index,
                attempts: active.state.attempts,
                variables: active.state.variables.clone(),
                progress: active.state.progress.clone(),
                completed: active.state.completed,
            },
        }
    }

    /// Restart the loaded scenario from the beginning. Without a scenario
    /// this does nothing.
    pub fn reset(&mut self) -> Result<Option<LoadSummary>, EngineError> {
        match self.scenario().cloned() {
            Some(scenario) => self.load_scenario(scenario).map(Some),
            None => Ok(None),
        }
    }

    /// Drop the loaded scenario
    pub fn clear(&mut self) {
        self.active = None;
    }

    /// Serialized state for a session store
    pub fn export_state(&self) -> Result<Option<String>, serde_json::Error> {
        self.state().map(ConversationState::to_blob).transpose()
    }
}
