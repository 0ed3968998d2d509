//! API request and response types

use crate::engine::StateSnapshot;
use crate::scenario::Persona;
use serde::{Deserialize, Serialize};

/// Request to load a scenario, by name or by file path
#[derive(Debug, Deserialize)]
pub struct LoadScenarioRequest {
    pub scenario_name: Option<String>,
    pub scenario_path: Option<String>,
}

impl LoadScenarioRequest {
    /// The catalog key to load: the name, or the file stem of the path
    pub fn catalog_key(&self) -> Option<String> {
        if let Some(name) = self.scenario_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return Some(name.trim().to_string());
        }
        let path = self.scenario_path.as_deref()?;
        std::path::Path::new(path)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.is_empty())
    }
}

/// Response for a loaded scenario
#[derive(Debug, Serialize)]
pub struct LoadScenarioResponse {
    pub status: &'static str,
    pub scenario_name: String,
    pub persona: Persona,
    pub opening: Vec<String>,
    pub state: StateSnapshot,
}

/// Learner reply to the current prompt
#[derive(Debug, Deserialize)]
pub struct StudentResponseRequest {
    pub student_response: Option<String>,
}

/// Response with the current prompt
#[derive(Debug, Serialize)]
pub struct PromptResponse {
    pub prompt: String,
}

/// Response for reset
#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub status: &'static str,
    pub state: StateSnapshot,
}

/// Response with the available scenarios
#[derive(Debug, Serialize)]
pub struct ScenarioListResponse {
    pub scenarios: Vec<String>,
}

/// Response for health checks
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
}

/// Response for session clearing
#[derive(Debug, Serialize)]
pub struct ClearSessionResponse {
    pub status: &'static str,
    pub had_state: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
