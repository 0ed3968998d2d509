//! Pure state transitions
//!
//! Every function here takes the current state by reference and returns the
//! next one. Nothing is committed until the whole step has been computed, so
//! a [`ScenarioLogicError`] part way through leaves the session untouched.

use super::state::ConversationState;
use super::COMPLETED_PROMPT;
use crate::evaluator::Verdict;
use crate::scenario::{ResponseExpectation, ScenarioDefinition};
use crate::template::{render, Bindings, ScenarioLogicError};

/// Result of applying a verdict to the current state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// The judge was unavailable; nothing changes
    Unchanged { reason: String },
    /// The learner should try the same event again
    Retry {
        state: ConversationState,
        feedback: String,
        corrected_text: Option<String>,
        attempt_count: u32,
    },
    /// The conversation moved past the current event
    Advanced {
        state: ConversationState,
        feedback: String,
        forced: bool,
        transcript: Vec<String>,
        next_prompt: Option<String>,
        variables_updated: Bindings,
    },
}

/// The input-expecting event the state is waiting on
pub fn current_expectation<'a>(
    scenario: &'a ScenarioDefinition,
    state: &ConversationState,
) -> Result<&'a ResponseExpectation, ScenarioLogicError> {
    let event = scenario
        .event(state.current_event_index)
        .ok_or(ScenarioLogicError::EventOutOfRange {
            index: state.current_event_index,
            len: scenario.len(),
        })?;
    event
        .expectation()
        .ok_or(ScenarioLogicError::NotAnInputEvent { event_id: event.id })
}

/// Text the learner should currently see
pub fn current_prompt(
    scenario: &ScenarioDefinition,
    state: &ConversationState,
) -> Result<String, ScenarioLogicError> {
    if state.completed {
        return match scenario.final_text() {
            Some(text) => render(text, &state.render_bindings()),
            None => Ok(COMPLETED_PROMPT.to_string()),
        };
    }
    render(
        &current_expectation(scenario, state)?.prompt,
        &state.render_bindings(),
    )
}

/// Move through any run of non-input events starting at the current index,
/// rendering each into `transcript` and marking its progress flag
fn settle(
    scenario: &ScenarioDefinition,
    state: &mut ConversationState,
    transcript: &mut Vec<String>,
) -> Result<(), ScenarioLogicError> {
    let bindings = state.render_bindings().into_owned();
    while let Some(event) = scenario.event(state.current_event_index) {
        if event.expects_input() {
            return Ok(());
        }
        if let Some(text) = event.text() {
            transcript.push(render(text, &bindings)?);
        }
        mark_progress(state, event.progress_flag.as_deref());
        state.current_event_index += 1;
        state.attempts = 0;
    }
    state.completed = true;
    Ok(())
}

fn mark_progress(state: &mut ConversationState, flag: Option<&str>) {
    if let Some(flag) = flag {
        if let Some(set) = state.progress.get_mut(flag) {
            *set = true;
        }
    }
}

/// Fresh state for `scenario`, advanced to the first event expecting input.
/// Returns the texts of the events passed on the way.
pub fn start(
    scenario: &ScenarioDefinition,
) -> Result<(ConversationState, Vec<String>), ScenarioLogicError> {
    let mut state = ConversationState::fresh(scenario);
    let mut transcript = Vec::new();
    settle(scenario, &mut state, &mut transcript)?;
    Ok((state, transcript))
}

/// Write extracted values for this event's targets into the bindings.
/// Returns the bindings that changed.
fn merge_extracted(
    state: &mut ConversationState,
    targets: &[String],
    extracted: Bindings,
) -> Bindings {
    let mut updated = Bindings::new();
    for (name, value) in extracted {
        let Some(value) = value.filter(|v| !v.is_empty()) else {
            continue;
        };
        if !targets.contains(&name) {
            tracing::warn!(variable = %name, "Ignoring value for a variable this event does not target");
            continue;
        }
        match state.variables.get_mut(&name) {
            Some(slot) => {
                *slot = Some(value.clone());
                state.skipped_variables.remove(&name);
                updated.insert(name, Some(value));
            }
            None => tracing::warn!(variable = %name, "Ignoring undeclared variable"),
        }
    }
    updated
}

/// Record targets left without a value once the conversation moves past
/// their event
fn skip_unset_targets(state: &mut ConversationState, targets: &[String]) {
    for name in targets {
        if matches!(state.variables.get(name), Some(None)) {
            tracing::warn!(variable = %name, "Moving on without a value");
            state.skipped_variables.insert(name.clone());
        }
    }
}

fn forced_feedback(feedback: &str, corrected_text: Option<&str>) -> String {
    let mut out = feedback.trim_end().to_string();
    if !out.is_empty() {
        out.push(' ');
    }
    match corrected_text {
        Some(corrected) => out.push_str(&format!(
            "A good way to say it would be: \"{corrected}\". Let's move on."
        )),
        None => out.push_str("Let's move on."),
    }
    out
}

/// Apply a judge verdict to the state waiting on an input event
pub fn apply_verdict(
    scenario: &ScenarioDefinition,
    state: &ConversationState,
    verdict: Verdict,
    max_attempts: u32,
) -> Result<Step, ScenarioLogicError> {
    let expectation = current_expectation(scenario, state)?;
    let (feedback, extracted, forced) = match verdict {
        Verdict::Unavailable { reason } => return Ok(Step::Unchanged { reason }),
        Verdict::Accepted {
            feedback,
            extracted,
        } => (feedback, extracted, false),
        Verdict::NeedsCorrection {
            feedback,
            corrected_text,
            extracted,
        } => {
            let attempt_count = state.attempts + 1;
            if attempt_count < max_attempts.max(1) {
                let mut next = state.clone();
                next.attempts = attempt_count;
                return Ok(Step::Retry {
                    state: next,
                    feedback,
                    corrected_text,
                    attempt_count,
                });
            }
            let feedback = forced_feedback(&feedback, corrected_text.as_deref());
            (feedback, extracted, true)
        }
    };

    let mut next = state.clone();
    let variables_updated = merge_extracted(&mut next, &expectation.target_variables, extracted);
    skip_unset_targets(&mut next, &expectation.target_variables);
    let flag = scenario
        .event(state.current_event_index)
        .and_then(|event| event.progress_flag.as_deref());
    mark_progress(&mut next, flag);
    next.current_event_index += 1;
    next.attempts = 0;

    let mut transcript = Vec::new();
    settle(scenario, &mut next, &mut transcript)?;
    let next_prompt = if next.completed {
        None
    } else {
        Some(current_prompt(scenario, &next)?)
    };

    Ok(Step::Advanced {
        state: next,
        feedback,
        forced,
        transcript,
        next_prompt,
        variables_updated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::fixtures::{friend_source, three_questions_source};
    use crate::scenario::load_value;

    fn accepted(pairs: &[(&str, &str)]) -> Verdict {
        Verdict::Accepted {
            feedback: "Good".to_string(),
            extracted: pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), Some((*v).to_string())))
                .collect(),
        }
    }

    fn correction() -> Verdict {
        Verdict::NeedsCorrection {
            feedback: "Not quite.".to_string(),
            corrected_text: Some("My name is Ana.".to_string()),
            extracted: Bindings::new(),
        }
    }

    #[test]
    fn test_start_skips_leading_prompts() {
        let scenario = load_value(friend_source()).unwrap();
        let (state, transcript) = start(&scenario).unwrap();
        assert_eq!(state.current_event_index, 2);
        assert_eq!(transcript.len(), 2);
        assert!(state.progress["intro_shown"]);
        assert_eq!(
            current_prompt(&scenario, &state).unwrap(),
            "Please respond: Introduce yourself by name"
        );
    }

    #[test]
    fn test_accept_advances_through_templated_prompt() {
        let scenario = load_value(friend_source()).unwrap();
        let (state, _) = start(&scenario).unwrap();
        let step = apply_verdict(&scenario, &state, accepted(&[("user_name", "Ana")]), 3).unwrap();
        let Step::Advanced {
            state,
            transcript,
            next_prompt,
            variables_updated,
            forced,
            ..
        } = step
        else {
            panic!("expected advance");
        };
        assert!(!forced);
        assert_eq!(state.current_event_index, 4);
        assert_eq!(
            transcript,
            vec!["Nice to meet you, Ana! What's your favorite animal?"]
        );
        assert_eq!(
            next_prompt.as_deref(),
            Some("Please respond: Say what your favorite animal is")
        );
        assert_eq!(variables_updated["user_name"].as_deref(), Some("Ana"));
        assert!(state.progress["name_given"]);
    }

    #[test]
    fn test_retry_until_forced() {
        let scenario = load_value(friend_source()).unwrap();
        let (state, _) = start(&scenario).unwrap();

        let Step::Retry { state, attempt_count, .. } =
            apply_verdict(&scenario, &state, correction(), 3).unwrap()
        else {
            panic!("expected retry");
        };
        assert_eq!(attempt_count, 1);
        let Step::Retry { state, attempt_count, .. } =
            apply_verdict(&scenario, &state, correction(), 3).unwrap()
        else {
            panic!("expected retry");
        };
        assert_eq!(attempt_count, 2);

        let Step::Advanced {
            state: forced_state,
            forced,
            feedback,
            ..
        } = apply_verdict(&scenario, &state, correction(), 3).unwrap()
        else {
            panic!("expected forced advance");
        };
        assert!(forced);
        assert!(feedback.starts_with("Not quite."));
        assert!(feedback.contains("My name is Ana."));
        assert_eq!(forced_state.attempts, 0);
    }

    #[test]
    fn test_forced_advance_past_unset_target_keeps_placeholder() {
        let scenario = load_value(friend_source()).unwrap();
        let (mut state, _) = start(&scenario).unwrap();
        state.attempts = 2;
        let Step::Advanced {
            state,
            forced,
            transcript,
            next_prompt,
            ..
        } = apply_verdict(&scenario, &state, correction(), 3).unwrap()
        else {
            panic!("expected forced advance");
        };
        assert!(forced);
        assert_eq!(state.current_event_index, 4);
        assert_eq!(state.variables["user_name"], None);
        assert!(state.skipped_variables.contains("user_name"));
        assert_eq!(
            transcript,
            vec!["Nice to meet you, {user_name}! What's your favorite animal?"]
        );
        assert_eq!(
            next_prompt.as_deref(),
            Some("Please respond: Say what your favorite animal is")
        );
    }

    #[test]
    fn test_accepted_without_value_moves_on() {
        let scenario = load_value(friend_source()).unwrap();
        let (state, _) = start(&scenario).unwrap();
        let Step::Advanced {
            state,
            forced,
            variables_updated,
            ..
        } = apply_verdict(&scenario, &state, accepted(&[]), 3).unwrap()
        else {
            panic!("expected advance");
        };
        assert!(!forced);
        assert!(variables_updated.is_empty());
        assert_eq!(state.current_event_index, 4);
        assert!(state.skipped_variables.contains("user_name"));
    }

    #[test]
    fn test_uncaptured_variable_is_still_logic_error() {
        let scenario = load_value(friend_source()).unwrap();
        let mut state = ConversationState::fresh(&scenario);
        // Event 5 asks about {favorite_animal}, which nothing captured or skipped
        state.current_event_index = 5;
        assert_eq!(
            current_prompt(&scenario, &state),
            Err(ScenarioLogicError::UnboundVariable {
                variable: "favorite_animal".to_string()
            })
        );
    }

    #[test]
    fn test_unavailable_is_unchanged() {
        let scenario = load_value(three_questions_source()).unwrap();
        let (state, transcript) = start(&scenario).unwrap();
        assert!(transcript.is_empty());
        let step = apply_verdict(
            &scenario,
            &state,
            Verdict::Unavailable {
                reason: "down".to_string(),
            },
            3,
        )
        .unwrap();
        assert_eq!(
            step,
            Step::Unchanged {
                reason: "down".to_string()
            }
        );
    }

    #[test]
    fn test_non_target_values_are_not_merged() {
        let scenario = load_value(three_questions_source()).unwrap();
        let (state, _) = start(&scenario).unwrap();
        let Step::Advanced { state, .. } =
            apply_verdict(&scenario, &state, accepted(&[("name", "Ana"), ("city", "Oslo")]), 3)
                .unwrap()
        else {
            panic!("expected advance");
        };
        assert_eq!(state.variables["name"].as_deref(), Some("Ana"));
        assert_eq!(state.variables["city"], None);
    }

    #[test]
    fn test_last_answer_completes() {
        let scenario = load_value(three_questions_source()).unwrap();
        let (mut state, _) = start(&scenario).unwrap();
        state.current_event_index = 2;
        let Step::Advanced {
            state, next_prompt, ..
        } = apply_verdict(&scenario, &state, accepted(&[("job", "baker")]), 3).unwrap()
        else {
            panic!("expected advance");
        };
        assert!(state.completed);
        assert_eq!(state.current_event_index, 3);
        assert_eq!(next_prompt, None);
        assert_eq!(current_prompt(&scenario, &state).unwrap(), COMPLETED_PROMPT);
    }

    #[test]
    fn test_apply_on_completed_state_is_logic_error() {
        let scenario = load_value(three_questions_source()).unwrap();
        let mut state = ConversationState::fresh(&scenario);
        state.current_event_index = 3;
        state.completed = true;
        assert!(matches!(
            apply_verdict(&scenario, &state, accepted(&[]), 3),
            Err(ScenarioLogicError::EventOutOfRange { index: 3, len: 3 })
        ));
    }

    #[test]
    fn test_forced_feedback_without_correction() {
        assert_eq!(forced_feedback("Hmm.", None), "Hmm. Let's move on.");
        assert_eq!(forced_feedback("", None), "Let's move on.");
    }
}
