//! Scripted judge for tests

use super::{Judge, JudgeRequest};
use crate::llm::LlmError;
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

type Responder = Box<dyn Fn(&JudgeRequest) -> Result<String, LlmError> + Send + Sync>;

/// Judge that replays queued replies, then falls back to a responder
/// closure, recording every request it sees
pub struct ScriptedJudge {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    responder: Option<Responder>,
    delay: Option<Duration>,
    pub requests: Mutex<Vec<JudgeRequest>>,
}

#[allow(dead_code)]
impl ScriptedJudge {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            responder: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every unqueued request with `responder`
    pub fn responding(
        responder: impl Fn(&JudgeRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new()
        }
    }

    /// Accept everything, extracting `value-of-<name>` for each target
    pub fn always_accepting() -> Self {
        Self::responding(|request| {
            let extracted: serde_json::Map<_, _> = request
                .target_variables
                .iter()
                .map(|name| (name.clone(), json!(format!("value-of-{name}"))))
                .collect();
            Ok(json!({
                "acceptable": true,
                "corrected_text": null,
                "feedback": "Well said!",
                "extracted_variables": extracted,
            })
            .to_string())
        })
    }

    /// Reject everything
    pub fn always_correcting() -> Self {
        Self::responding(|_| Ok(correction_reply("Try again", Some("A better answer."))))
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queue_reply(&self, reply: impl Into<String>) {
        self.replies.lock().unwrap().push_back(Ok(reply.into()));
    }

    pub fn queue_error(&self, error: LlmError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn queue_accept(&self, feedback: &str, extracted: &[(&str, &str)]) {
        let extracted: serde_json::Map<_, _> = extracted
            .iter()
            .map(|(name, value)| ((*name).to_string(), json!(value)))
            .collect();
        self.queue_reply(
            json!({
                "acceptable": true,
                "corrected_text": null,
                "feedback": feedback,
                "extracted_variables": extracted,
            })
            .to_string(),
        );
    }

    pub fn queue_correction(&self, feedback: &str, corrected: Option<&str>) {
        self.queue_reply(correction_reply(feedback, corrected));
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn recorded_requests(&self) -> Vec<JudgeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn correction_reply(feedback: &str, corrected: Option<&str>) -> String {
    json!({
        "acceptable": false,
        "corrected_text": corrected,
        "feedback": feedback,
        "extracted_variables": {},
    })
    .to_string()
}

impl Default for ScriptedJudge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn judge(&self, request: &JudgeRequest) -> Result<String, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.replies.lock().unwrap().pop_front();
        match (queued, &self.responder) {
            (Some(reply), _) => reply,
            (None, Some(responder)) => responder(request),
            (None, None) => Err(LlmError::network("No scripted reply queued")),
        }
    }
}
