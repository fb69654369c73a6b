// Evaluation pipeline: judge each uploaded résumé against a weighted rubric.
// All LLM calls go through llm_client; no direct provider calls here.

pub mod error;
pub mod handlers;
pub mod judge;
pub mod orchestrator;
pub mod prompts;
pub mod scoring;
