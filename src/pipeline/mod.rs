//! Conversation escalation pipeline.
//!
//! Every inbound customer turn flows through:
//! 1. `ReplyCounter::count()` — automated replies so far vs. the agent's limit
//! 2. `EscalationDetector::detect()` — explicit requests for a human
//! 3. `LlmProvider::generate_response()` — automated reply with recent context
//!
//! `Orchestrator::handle()` composes them and is the only place failures are
//! handled. Escalations go through `QueueReassigner`.

pub mod counter;
pub mod delivery;
pub mod escalation;
pub mod events;
pub mod locks;
pub mod orchestrator;
pub mod transfer;
pub mod types;

pub use counter::ReplyCounter;
pub use delivery::{DeliveryChannel, StoreDelivery};
pub use escalation::{EscalationDetector, HandoffKeywords};
pub use events::{EventBus, PipelineEvent};
pub use locks::ConversationLocks;
pub use orchestrator::Orchestrator;
pub use transfer::QueueReassigner;
pub use types::*;
