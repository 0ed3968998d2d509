//! Prompt templates
//!
//! Templates are parsed once at scenario load time into literal and
//! placeholder segments. Rendering is a pure substitution over the current
//! variable bindings.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;

/// Variable bindings for a conversation. `None` means declared but not yet
/// captured from the learner.
pub type Bindings = BTreeMap<String, Option<String>>;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// Internal invariant violation while driving a scenario.
///
/// Never caused by learner input: it means an event was reached before the
/// variables it depends on were captured, or the engine was handed state that
/// does not fit its scenario.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScenarioLogicError {
    #[error("template references unbound variable `{variable}`")]
    UnboundVariable { variable: String },
    #[error("event index {index} out of range ({len} events)")]
    EventOutOfRange { index: usize, len: usize },
    #[error("event {event_id} does not expect learner input")]
    NotAnInputEvent { event_id: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// A parsed prompt template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse `{name}` placeholders out of `source`. Any other brace text is
    /// kept verbatim.
    pub fn parse(source: impl Into<String>) -> Self {
        let source = source.into();
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(&source) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if let Some(text) = source.get(last..whole.start()).filter(|t| !t.is_empty()) {
                segments.push(Segment::Literal(text.to_string()));
            }
            segments.push(Segment::Variable(name.as_str().to_string()));
            last = whole.end();
        }
        if let Some(text) = source.get(last..).filter(|t| !t.is_empty()) {
            segments.push(Segment::Literal(text.to_string()));
        }

        Self { source, segments }
    }

    /// A template with no placeholders, even if the text contains braces.
    pub fn literal(text: impl Into<String>) -> Self {
        let source = text.into();
        let segments = if source.is_empty() {
            vec![]
        } else {
            vec![Segment::Literal(source.clone())]
        };
        Self { source, segments }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Variable names referenced by this template, in order of appearance
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Variable(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }
}

/// Substitute bound variables into a template.
pub fn render(template: &Template, bindings: &Bindings) -> Result<String, ScenarioLogicError> {
    let mut out = String::with_capacity(template.source.len());
    for segment in &template.segments {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Variable(name) => match bindings.get(name) {
                Some(Some(value)) => out.push_str(value),
                _ => {
                    return Err(ScenarioLogicError::UnboundVariable {
                        variable: name.clone(),
                    })
                }
            },
        }
    }
    Ok(out)
}
