//! Escalation detector — spots explicit requests for a human agent.
//!
//! Keyword matching is a fixed phrase list, compiled once into a single
//! case-folded alternation. When a phrase matches, a target queue other than
//! the current one is picked, preferring queues no automated agent serves.

use std::sync::Arc;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::model::QueueId;
use crate::pipeline::types::EscalationDecision;
use crate::store::Database;

/// Built-in hand-off phrases (Portuguese).
const DEFAULT_PHRASES: &[&str] = &[
    "falar com atendente",
    "falar com humano",
    "atendente humano",
    "pessoa real",
    "não é bot",
    "quero uma pessoa",
    "transferir para humano",
    "sair da IA",
    "parar bot",
    "atendimento humano",
    "operador humano",
    "não quero bot",
    "robô não",
    "humano por favor",
    "gente de verdade",
];

/// Phrases that signal the customer wants a human.
#[derive(Debug, Clone)]
pub struct HandoffKeywords {
    phrases: Vec<String>,
    pattern: Option<Regex>,
}

impl HandoffKeywords {
    /// Build from raw phrases. Blank entries are dropped; the rest are
    /// trimmed and lower-cased.
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases: Vec<String> = phrases
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        let pattern = if phrases.is_empty() {
            None
        } else {
            let alternation = phrases
                .iter()
                .map(|p| regex::escape(p))
                .collect::<Vec<_>>()
                .join("|");
            match Regex::new(&alternation) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(error = %e, "Keyword pattern failed to compile, using plain scan");
                    None
                }
            }
        };

        Self { phrases, pattern }
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// Whether `text`, trimmed and lower-cased, contains any phrase.
    pub fn matches(&self, text: &str) -> bool {
        let normalized = text.trim().to_lowercase();
        if normalized.is_empty() {
            return false;
        }
        match &self.pattern {
            Some(re) => re.is_match(&normalized),
            None => self.phrases.iter().any(|p| normalized.contains(p.as_str())),
        }
    }
}

impl Default for HandoffKeywords {
    fn default() -> Self {
        Self::new(DEFAULT_PHRASES)
    }
}

/// Decides whether an inbound text should be handed to a human queue.
pub struct EscalationDetector {
    db: Arc<dyn Database>,
    keywords: HandoffKeywords,
    notice: String,
}

impl EscalationDetector {
    pub fn new(db: Arc<dyn Database>, keywords: HandoffKeywords, notice: impl Into<String>) -> Self {
        Self {
            db,
            keywords,
            notice: notice.into(),
        }
    }

    pub async fn detect(
        &self,
        text: &str,
        current_queue_id: QueueId,
    ) -> Result<EscalationDecision, DatabaseError> {
        if !self.keywords.matches(text) {
            return Ok(EscalationDecision::no_transfer());
        }
        debug!(current_queue_id, "Hand-off phrase detected");

        match self.pick_target(current_queue_id).await? {
            Some(target) => {
                info!(current_queue_id, target, "Hand-off target selected");
                Ok(EscalationDecision::transfer_to(target, self.notice.clone()))
            }
            None => {
                warn!(current_queue_id, "Hand-off requested but no other queue exists");
                Ok(EscalationDecision::no_transfer())
            }
        }
    }

    /// Lowest-id queue without an active agent, else lowest-id other queue.
    async fn pick_target(&self, current: QueueId) -> Result<Option<QueueId>, DatabaseError> {
        let unattended = self.db.queues_without_active_agent().await?;
        if let Some(id) = unattended.iter().map(|q| q.id).filter(|id| *id != current).min() {
            return Ok(Some(id));
        }
        let all = self.db.list_queues().await?;
        Ok(all.iter().map(|q| q.id).filter(|id| *id != current).min())
    }
}
