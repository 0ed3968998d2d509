//! Property-based tests for the conversation engine
//!
//! These drive the pure transition functions with generated scenarios and
//! judge verdicts and check the progression invariants.

use super::state::ConversationState;
use super::transition::{apply_verdict, current_prompt, start, Step};
use crate::evaluator::Verdict;
use crate::scenario::{load_value, ScenarioDefinition};
use crate::template::{render, Bindings};
use proptest::prelude::*;
use serde_json::{json, Value};

// ============================================================================
// Generators
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum Beat {
    Scripted,
    RolePlay,
    Question,
    Feedback,
}

fn arb_beat() -> impl Strategy<Value = Beat> {
    prop_oneof![
        1 => Just(Beat::Scripted),
        1 => Just(Beat::RolePlay),
        3 => Just(Beat::Question),
        1 => Just(Beat::Feedback),
    ]
}

/// Build a well-formed scenario: role-play beats and questions mention
/// every variable captured before them, each question captures a fresh
/// variable
fn build_scenario(beats: &[Beat], with_final: bool) -> ScenarioDefinition {
    let mut events = Vec::new();
    let mut captured: Vec<String> = Vec::new();
    let mut flags = Vec::new();
    for (id, beat) in beats.iter().enumerate() {
        let flag = format!("f{id}");
        let event = match beat {
            Beat::Scripted => json!({"event_id": id, "type": "scripted-prompt",
                "text": format!("Scripted {id}"), "progress_flag": flag}),
            Beat::RolePlay => {
                let mentions: Vec<String> = captured.iter().map(|v| format!("{{{v}}}")).collect();
                json!({"event_id": id, "type": "role-play-prompt",
                    "text_template": format!("Role {id}: {}", mentions.join(" "))})
            }
            Beat::Question => {
                let var = format!("v{id}");
                let mut event = json!({"event_id": id, "type": "response-expectation",
                    "instruction": format!("Answer {id}"), "evaluation_focus": [],
                    "target_variables": [var.clone()], "progress_flag": flag});
                if !captured.is_empty() {
                    let mentions: Vec<String> =
                        captured.iter().map(|v| format!("{{{v}}}")).collect();
                    event["text_template"] = json!(format!("Question {id}: {}", mentions.join(" ")));
                }
                captured.push(var);
                event
            }
            Beat::Feedback => json!({"event_id": id, "type": "feedback",
                "text": format!("Feedback {id}")}),
        };
        if event.get("progress_flag").is_some() {
            flags.push(Value::String(flag));
        }
        events.push(event);
    }
    if with_final {
        events.push(json!({"event_id": beats.len(), "type": "final", "text": "The end"}));
    }
    load_value(json!({
        "scenario_id": "generated",
        "scenario_name": "Generated",
        "teacher_persona": {"name": "Gen"},
        "conversation_events": events,
        "variables": captured,
        "progress_tracking": flags,
    }))
    .unwrap()
}

fn arb_scenario() -> impl Strategy<Value = ScenarioDefinition> {
    (prop::collection::vec(arb_beat(), 1..10), any::<bool>())
        .prop_map(|(beats, with_final)| build_scenario(&beats, with_final))
}

#[derive(Debug, Clone, Copy)]
enum Judgment {
    Accept,
    /// Accepted, but the judge extracted nothing
    AcceptBlank,
    Correct,
    /// Rejected with nothing extracted; a forced advance leaves targets unset
    CorrectBlank,
    Unavailable,
}

fn arb_judgment() -> impl Strategy<Value = Judgment> {
    prop_oneof![
        2 => Just(Judgment::Accept),
        1 => Just(Judgment::AcceptBlank),
        2 => Just(Judgment::Correct),
        2 => Just(Judgment::CorrectBlank),
        1 => Just(Judgment::Unavailable),
    ]
}

/// A verdict for the current event. Non-blank judgments fill every target.
fn verdict_for(
    scenario: &ScenarioDefinition,
    state: &ConversationState,
    judgment: Judgment,
) -> Verdict {
    let extracted: Bindings = scenario
        .event(state.current_event_index)
        .and_then(|event| event.expectation())
        .map(|expectation| {
            expectation
                .target_variables
                .iter()
                .map(|name| (name.clone(), Some(format!("{name}-value"))))
                .collect()
        })
        .unwrap_or_default();
    match judgment {
        Judgment::Accept => Verdict::Accepted {
            feedback: "ok".to_string(),
            extracted,
        },
        Judgment::AcceptBlank => Verdict::Accepted {
            feedback: "ok".to_string(),
            extracted: Bindings::new(),
        },
        Judgment::CorrectBlank => Verdict::NeedsCorrection {
            feedback: "again".to_string(),
            corrected_text: None,
            extracted: Bindings::new(),
        },
        Judgment::Correct => Verdict::NeedsCorrection {
            feedback: "again".to_string(),
            corrected_text: None,
            extracted,
        },
        Judgment::Unavailable => Verdict::Unavailable {
            reason: "down".to_string(),
        },
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_progression_invariants(
        scenario in arb_scenario(),
        judgments in prop::collection::vec(arb_judgment(), 0..40),
        max_attempts in 1u32..5,
    ) {
        let (mut state, _) = start(&scenario).unwrap();
        let fresh_index = state.current_event_index;

        for judgment in judgments {
            if state.completed {
                break;
            }
            let verdict = verdict_for(&scenario, &state, judgment);
            let step = apply_verdict(&scenario, &state, verdict, max_attempts).unwrap();
            match step {
                Step::Unchanged { .. } => {}
                Step::Retry { state: next, attempt_count, .. } => {
                    prop_assert_eq!(next.current_event_index, state.current_event_index);
                    prop_assert!(attempt_count < max_attempts);
                    prop_assert_eq!(next.attempts, state.attempts + 1);
                    prop_assert_eq!(&next.variables, &state.variables);
                    state = next;
                }
                Step::Advanced { state: next, next_prompt, .. } => {
                    prop_assert!(next.current_event_index > state.current_event_index);
                    prop_assert_eq!(next.attempts, 0);
                    prop_assert_eq!(next_prompt.is_none(), next.completed);
                    prop_assert!(next.variables.keys().all(|k| scenario.variables.contains(k)));
                    state = next;
                }
            }
            prop_assert!(state.attempts < max_attempts);
            prop_assert!(state.current_event_index <= scenario.len());
            prop_assert!(state.check_against(&scenario).is_ok());
        }

        // Idempotent read
        let first = current_prompt(&scenario, &state).unwrap();
        prop_assert_eq!(first, current_prompt(&scenario, &state).unwrap());

        // Restarting always lands on the same spot with nothing bound
        let (restarted, _) = start(&scenario).unwrap();
        prop_assert_eq!(restarted.current_event_index, fresh_index);
        prop_assert_eq!(restarted.attempts, 0);
        prop_assert!(restarted.variables.values().all(Option::is_none));
    }

    #[test]
    fn prop_always_correcting_forces_after_max_attempts(
        scenario in arb_scenario(),
        max_attempts in 1u32..6,
    ) {
        let (mut state, _) = start(&scenario).unwrap();
        prop_assume!(!state.completed);
        let index = state.current_event_index;

        let mut calls = 0;
        loop {
            calls += 1;
            let verdict = verdict_for(&scenario, &state, Judgment::Correct);
            match apply_verdict(&scenario, &state, verdict, max_attempts).unwrap() {
                Step::Retry { state: next, .. } => state = next,
                Step::Advanced { state: next, forced, .. } => {
                    prop_assert!(forced);
                    prop_assert!(next.current_event_index > index);
                    break;
                }
                Step::Unchanged { .. } => prop_assert!(false, "unexpected unchanged"),
            }
        }
        prop_assert_eq!(calls, max_attempts);
    }

    #[test]
    fn prop_blank_forced_advances_always_finish(
        scenario in arb_scenario(),
        max_attempts in 1u32..4,
    ) {
        let (mut state, _) = start(&scenario).unwrap();
        let questions = u32::try_from(
            scenario.events.iter().filter(|event| event.expects_input()).count(),
        )
        .unwrap();

        let mut calls = 0;
        while !state.completed {
            calls += 1;
            prop_assert!(calls <= questions * max_attempts, "conversation is stuck");
            let verdict = verdict_for(&scenario, &state, Judgment::CorrectBlank);
            match apply_verdict(&scenario, &state, verdict, max_attempts).unwrap() {
                Step::Retry { state: next, .. } => state = next,
                Step::Advanced { state: next, forced, next_prompt, .. } => {
                    prop_assert!(forced);
                    prop_assert!(next.current_event_index > state.current_event_index);
                    prop_assert_eq!(next_prompt.is_none(), next.completed);
                    state = next;
                }
                Step::Unchanged { .. } => prop_assert!(false, "unexpected unchanged"),
            }
        }
        prop_assert_eq!(calls, questions * max_attempts);
        prop_assert!(state.variables.values().all(Option::is_none));
        prop_assert!(current_prompt(&scenario, &state).is_ok());
    }

    #[test]
    fn prop_rendering_with_bound_variables_never_fails(scenario in arb_scenario()) {
        let bound: Bindings = scenario
            .variables
            .iter()
            .map(|name| (name.clone(), Some("x".to_string())))
            .collect();
        for event in &scenario.events {
            if let Some(text) = event.text() {
                prop_assert!(render(text, &bound).is_ok());
            }
        }
    }
}
