//! Chat Buddy - scenario-driven language practice conversations
//!
//! A learner works through an authored scenario one event at a time. Each
//! reply is checked by an LLM judge; accepted replies advance the scenario
//! and may capture variables that later prompts refer to.

#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod evaluator;
pub mod llm;
pub mod scenario;
pub mod session;
pub mod template;
