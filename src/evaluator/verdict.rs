//! Judge reply parsing
//!
//! The judge is an untrusted text channel. Its reply is located, decoded and
//! checked against a strict schema; anything that does not fit becomes the
//! conservative fallback verdict instead of an error.

use crate::template::Bindings;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Feedback used whenever the judge's reply cannot be trusted
pub const FALLBACK_FEEDBACK: &str = "Let's try that again";

/// Longest slice of a rejected reply copied into logs
const LOGGED_REPLY_CHARS: usize = 200;

/// A structured judgment of one learner response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted {
        feedback: String,
        extracted: Bindings,
    },
    NeedsCorrection {
        feedback: String,
        corrected_text: Option<String>,
        /// Whatever the judge managed to extract, used on forced advance
        extracted: Bindings,
    },
    /// The judge could not be reached or did not answer in time
    Unavailable { reason: String },
}

impl Verdict {
    pub fn fallback() -> Self {
        Verdict::NeedsCorrection {
            feedback: FALLBACK_FEEDBACK.to_string(),
            corrected_text: None,
            extracted: Bindings::new(),
        }
    }
}

/// Expected shape of the judge's JSON reply
#[derive(Debug, Deserialize)]
struct RawVerdict {
    acceptable: bool,
    #[serde(default)]
    corrected_text: Option<String>,
    feedback: String,
    #[serde(default)]
    extracted_variables: Option<BTreeMap<String, Option<String>>>,
}

/// Locate the JSON object in a reply that may be wrapped in prose or a
/// markdown fence
pub fn extract_json(reply: &str) -> Option<&str> {
    let trimmed = reply.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }
    if let Some(start) = trimmed.find("```") {
        let fenced = trimmed.get(start + 3..)?;
        if let Some(end) = fenced.find("```") {
            let body = fenced.get(..end)?;
            if let (Some(s), Some(e)) = (body.find('{'), body.rfind('}')) {
                if s < e {
                    return body.get(s..=e);
                }
            }
        }
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(s), Some(e)) if s < e => trimmed.get(s..=e),
        _ => None,
    }
}

fn truncated(reply: &str) -> String {
    reply.chars().take(LOGGED_REPLY_CHARS).collect()
}

/// Turn a raw judge reply into a verdict for an event targeting `targets`.
///
/// Extracted values are restricted to `targets`; blank strings count as
/// unset. The judge decides acceptability on its own; a target it could not
/// fill stays unset in either outcome.
pub fn parse_verdict(reply: &str, targets: &[String]) -> Verdict {
    let Some(json) = extract_json(reply) else {
        tracing::warn!(reply = %truncated(reply), "Judge reply contains no JSON object");
        return Verdict::fallback();
    };
    let raw: RawVerdict = match serde_json::from_str(json) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, reply = %truncated(reply), "Judge reply does not match schema");
            return Verdict::fallback();
        }
    };

    let Some(mut reported) = raw.extracted_variables.or_else(|| targets.is_empty().then(BTreeMap::new))
    else {
        tracing::warn!(reply = %truncated(reply), "Judge reply omits extracted_variables");
        return Verdict::fallback();
    };

    for key in reported.keys().filter(|key| !targets.contains(key)) {
        tracing::warn!(variable = %key, "Dropping judge value for non-target variable");
    }
    let extracted: Bindings = targets
        .iter()
        .map(|name| {
            let value = reported
                .remove(name)
                .flatten()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
            (name.clone(), value)
        })
        .collect();

    let corrected_text = raw.corrected_text.filter(|text| !text.trim().is_empty());
    let feedback = if raw.feedback.trim().is_empty() {
        FALLBACK_FEEDBACK.to_string()
    } else {
        raw.feedback
    };

    if raw.acceptable {
        let missing: Vec<_> = extracted
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| name.as_str())
            .collect();
        if !missing.is_empty() {
            tracing::info!(missing = ?missing, "Acceptable reply left target variables unset");
        }
        Verdict::Accepted {
            feedback,
            extracted,
        }
    } else {
        Verdict::NeedsCorrection {
            feedback,
            corrected_text,
            extracted,
        }
    }
}
