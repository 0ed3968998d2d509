//! Response evaluation
//!
//! The evaluator frames one judgment request, calls the external judge under
//! a deadline, retries transient faults with backoff and turns the reply into
//! a [`Verdict`]. It is the only component that reads raw judge output.

mod prompt;
#[cfg(test)]
pub(crate) mod testing;
mod verdict;

pub use prompt::JudgeRequest;
pub use verdict::{extract_json, parse_verdict, Verdict, FALLBACK_FEEDBACK};

use crate::llm::{LlmError, LlmService};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// External judgment capability: one structured request in, free text out
#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, request: &JudgeRequest) -> Result<String, LlmError>;
}

/// Judge backed by an LLM provider
pub struct LlmJudge {
    llm: Arc<dyn LlmService>,
    max_tokens: u32,
}

impl LlmJudge {
    pub fn new(llm: Arc<dyn LlmService>, max_tokens: u32) -> Self {
        Self { llm, max_tokens }
    }
}

#[async_trait]
impl Judge for LlmJudge {
    async fn judge(&self, request: &JudgeRequest) -> Result<String, LlmError> {
        let response = self
            .llm
            .complete(&request.to_llm_request(self.max_tokens))
            .await?;
        Ok(response.text)
    }
}

/// Judge used when no provider is configured; every call is unavailable
pub struct UnconfiguredJudge;

#[async_trait]
impl Judge for UnconfiguredJudge {
    async fn judge(&self, _request: &JudgeRequest) -> Result<String, LlmError> {
        Err(LlmError::auth(
            "No judge model configured (set ANTHROPIC_API_KEY or LLM_GATEWAY)",
        ))
    }
}

/// Bounds on judge calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls per evaluation, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Deadline for each individual call
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            timeout: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with up to 25% jitter, never shorter than the
    /// provider's retry hint
    fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1 << (attempt.saturating_sub(1)).min(16))
            .min(self.max_delay);
        let jitter_ms = u64::try_from(exp.as_millis() / 4).unwrap_or(0);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        (exp + jitter).max(retry_after.unwrap_or(Duration::ZERO))
    }
}

/// Calls the judge and produces trusted verdicts
pub struct ResponseEvaluator {
    judge: Arc<dyn Judge>,
    policy: RetryPolicy,
}

impl ResponseEvaluator {
    pub fn new(judge: Arc<dyn Judge>, policy: RetryPolicy) -> Self {
        Self { judge, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Evaluate one learner response. Never fails: judge faults surface as
    /// [`Verdict::Unavailable`] once retries are exhausted.
    pub async fn evaluate(&self, request: &JudgeRequest) -> Verdict {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let error = match tokio::time::timeout(self.policy.timeout, self.judge.judge(request))
                .await
            {
                Ok(Ok(reply)) => return parse_verdict(&reply, &request.target_variables),
                Ok(Err(e)) => e,
                Err(_) => LlmError::timeout(format!(
                    "Judge did not answer within {}s",
                    self.policy.timeout.as_secs_f32()
                )),
            };

            if !error.kind.is_retryable() || attempt >= max_attempts {
                tracing::warn!(
                    attempt,
                    kind = ?error.kind,
                    error = %error.message,
                    "Judge unavailable"
                );
                return Verdict::Unavailable {
                    reason: error.message,
                };
            }

            let delay = self.policy.delay(attempt, error.retry_after);
            tracing::info!(
                attempt,
                max_attempts,
                delay_ms = %delay.as_millis(),
                error = %error.message,
                "Retrying judge call"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
