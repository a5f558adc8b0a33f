//! AI Handoff — automated first-line replies that always end with a human.

pub mod config;
pub mod error;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod server;
pub mod store;
