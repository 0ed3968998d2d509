//! Runtime configuration from environment variables

use crate::engine::EngineConfig;
use crate::evaluator::RetryPolicy;
use crate::llm::LlmConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default session lifetime: seven days
const DEFAULT_SESSION_TTL_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// `SQLite` session database; sessions stay in memory when unset
    pub db_path: Option<PathBuf>,
    pub scenarios_dir: PathBuf,
    pub session_ttl: Duration,
    pub engine: EngineConfig,
    pub retry: RetryPolicy,
    pub judge_max_tokens: u32,
    pub llm: LlmConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
            match lookup(key) {
                Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                    tracing::warn!(key, value = %raw, "Ignoring unparseable setting");
                    default
                }),
                None => default,
            }
        }

        let retry_defaults = RetryPolicy::default();
        Self {
            port: parsed(&lookup, "CHAT_BUDDY_PORT", 8000),
            db_path: lookup("CHAT_BUDDY_DB_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            scenarios_dir: lookup("CHAT_BUDDY_SCENARIOS_DIR")
                .map_or_else(|| PathBuf::from("scenarios"), PathBuf::from),
            session_ttl: Duration::from_secs(parsed(
                &lookup,
                "CHAT_BUDDY_SESSION_TTL_SECS",
                DEFAULT_SESSION_TTL_SECS,
            )),
            engine: EngineConfig {
                max_attempts: parsed(&lookup, "CHAT_BUDDY_MAX_ATTEMPTS", 3u32).max(1),
            },
            retry: RetryPolicy {
                max_attempts: parsed(&lookup, "JUDGE_MAX_ATTEMPTS", retry_defaults.max_attempts)
                    .max(1),
                base_delay: Duration::from_millis(parsed(&lookup, "JUDGE_RETRY_BASE_MS", 500)),
                max_delay: retry_defaults.max_delay,
                timeout: Duration::from_secs(parsed(&lookup, "JUDGE_TIMEOUT_SECS", 20)),
            },
            judge_max_tokens: parsed(&lookup, "JUDGE_MAX_TOKENS", 1000),
            llm: LlmConfig::from_lookup(&lookup),
        }
    }
}
