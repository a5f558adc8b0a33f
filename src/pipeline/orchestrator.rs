//! Conversation orchestrator — one run per inbound turn.
//!
//! Flow:
//! 1. Entry guard → skip automated turns, unassigned conversations and
//!    queues without an active agent
//! 2. Reply limit → escalate to the agent's hand-off queue
//! 3. Hand-off phrase → escalate to a human queue
//! 4. Auto-reply → provider call with recent history as context
//!
//! Escalations write their notice and the queue change in one transaction.
//! Runs for the same conversation never overlap.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::PipelineConfig;
use crate::error::{LlmError, PipelineError};
use crate::llm::ProviderFactory;
use crate::model::{AgentConfig, ConversationId, QueueId, Turn, TurnOrigin};
use crate::pipeline::counter::ReplyCounter;
use crate::pipeline::delivery::DeliveryChannel;
use crate::pipeline::escalation::EscalationDetector;
use crate::pipeline::events::EventBus;
use crate::pipeline::locks::ConversationLocks;
use crate::pipeline::transfer::QueueReassigner;
use crate::pipeline::types::{EscalationTrigger, InboundTurn, Outcome, SkipReason, Stage};
use crate::store::Database;

type StageResult<T> = Result<T, (Stage, PipelineError)>;

fn at<E: Into<PipelineError>>(stage: Stage) -> impl FnOnce(E) -> (Stage, PipelineError) {
    move |e| (stage, e.into())
}

/// Render turns (oldest first) as `Label: text` lines.
pub fn render_context(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.origin.context_label(), t.text))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct Orchestrator {
    db: Arc<dyn Database>,
    providers: Arc<dyn ProviderFactory>,
    delivery: Arc<dyn DeliveryChannel>,
    counter: ReplyCounter,
    detector: EscalationDetector,
    reassigner: QueueReassigner,
    locks: ConversationLocks,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(
        db: Arc<dyn Database>,
        providers: Arc<dyn ProviderFactory>,
        delivery: Arc<dyn DeliveryChannel>,
        events: EventBus,
        config: PipelineConfig,
    ) -> Self {
        Self {
            counter: ReplyCounter::new(db.clone()),
            detector: EscalationDetector::new(
                db.clone(),
                config.keywords.clone(),
                config.handoff_notice.clone(),
            ),
            reassigner: QueueReassigner::new(db.clone(), events),
            locks: ConversationLocks::new(),
            db,
            providers,
            delivery,
            config,
        }
    }

    /// Run the pipeline in the background. Ingestion never waits on it.
    pub fn dispatch(self: &Arc<Self>, inbound: InboundTurn) -> JoinHandle<Outcome> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.handle(inbound).await })
    }

    /// Process one inbound turn to exactly one terminal action.
    ///
    /// Never fails: errors are logged here with their stage and end the run.
    pub async fn handle(&self, inbound: InboundTurn) -> Outcome {
        let conversation_id = inbound.conversation_id;

        if inbound.origin == TurnOrigin::Automated {
            debug!(conversation_id, "Skipping automated turn");
            return Outcome::Skipped {
                reason: SkipReason::AutomatedOrigin,
            };
        }

        let _guard = self.locks.acquire(conversation_id).await;

        let outcome = match self.run(&inbound).await {
            Ok(outcome) => outcome,
            Err((stage, e)) => {
                match &e {
                    PipelineError::Llm(llm) => error!(
                        conversation_id,
                        stage = stage.as_str(),
                        status = llm.status(),
                        error = %e,
                        "Pipeline run failed"
                    ),
                    _ => error!(
                        conversation_id,
                        stage = stage.as_str(),
                        error = %e,
                        "Pipeline run failed"
                    ),
                }
                Outcome::Failed { stage }
            }
        };

        info!(conversation_id, outcome = outcome.label(), "Pipeline run finished");
        outcome
    }

    async fn run(&self, inbound: &InboundTurn) -> StageResult<Outcome> {
        let conversation_id = inbound.conversation_id;

        let Some(conversation) = self
            .db
            .get_conversation(conversation_id)
            .await
            .map_err(at(Stage::Lookup))?
        else {
            return Ok(Outcome::Skipped {
                reason: SkipReason::ConversationNotFound,
            });
        };
        let Some(queue_id) = conversation.queue_id else {
            return Ok(Outcome::Skipped {
                reason: SkipReason::Unassigned,
            });
        };

        let count = self.counter.count(conversation_id).await;
        let Some(agent) = count.agent else {
            debug!(conversation_id, queue_id, "No active agent for queue");
            return Ok(Outcome::Skipped {
                reason: SkipReason::NoActiveAgent,
            });
        };

        if count.should_escalate {
            info!(
                conversation_id,
                auto_reply_count = count.auto_reply_count,
                threshold = count.threshold,
                "Reply limit reached"
            );
            return self
                .escalate(
                    conversation_id,
                    agent.escalation_queue_id,
                    &self.config.limit_notice,
                    EscalationTrigger::ReplyLimit,
                )
                .await;
        }

        let decision = self
            .detector
            .detect(&inbound.text, queue_id)
            .await
            .map_err(at(Stage::KeywordCheck))?;
        if let (true, Some(target)) = (decision.should_transfer, decision.target_queue_id) {
            let notice = decision
                .notice_text
                .as_deref()
                .unwrap_or(&self.config.handoff_notice);
            return self
                .escalate(conversation_id, target, notice, EscalationTrigger::Keyword)
                .await;
        }

        self.auto_reply(conversation_id, &inbound.text, &agent).await
    }

    /// Validate the target, then record the notice and move the conversation
    /// together.
    async fn escalate(
        &self,
        conversation_id: ConversationId,
        target_queue_id: QueueId,
        notice: &str,
        trigger: EscalationTrigger,
    ) -> StageResult<Outcome> {
        self.reassigner
            .validate(conversation_id, target_queue_id)
            .await
            .map_err(at(Stage::Transfer))?;
        self.reassigner
            .hand_off(conversation_id, target_queue_id, notice)
            .await
            .map_err(at(Stage::Transfer))?;

        Ok(Outcome::Escalated {
            trigger,
            target_queue_id,
        })
    }

    async fn auto_reply(
        &self,
        conversation_id: ConversationId,
        text: &str,
        agent: &AgentConfig,
    ) -> StageResult<Outcome> {
        let mut turns = self
            .db
            .recent_turns(conversation_id, self.config.context_turns)
            .await
            .map_err(at(Stage::Context))?;
        turns.reverse();
        let context = render_context(&turns);

        let provider = self.providers.create(agent).map_err(at(Stage::Provider))?;
        let timeout = self.config.provider_timeout;
        let call = provider.generate_response(text, Some(context.as_str()).filter(|c| !c.is_empty()));
        let reply = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result.map_err(at(Stage::Provider))?,
            Err(_) => {
                return Err((
                    Stage::Provider,
                    LlmError::timed_out(provider.provider_name(), timeout).into(),
                ));
            }
        };

        let turn = self
            .delivery
            .deliver(conversation_id, &reply)
            .await
            .map_err(at(Stage::Delivery))?;
        debug!(
            conversation_id,
            provider = provider.provider_name(),
            model = provider.model_name(),
            "Automated reply delivered"
        );
        Ok(Outcome::Replied { turn_id: turn.id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::llm::{LlmProvider, ProviderKind};
    use crate::model::NewAgentConfig;
    use crate::pipeline::delivery::StoreDelivery;
    use crate::store::LibSqlBackend;

    enum Script {
        Reply(&'static str),
        Fail(u16),
        Hang,
    }

    struct MockProvider {
        script: Script,
        delay: Duration,
        calls: AtomicUsize,
        seen: Mutex<Vec<(String, Option<String>)>>,
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        fn provider_name(&self) -> &str {
            "mock"
        }

        fn model_name(&self) -> &str {
            "mock-1"
        }

        async fn generate_response(
            &self,
            prompt: &str,
            context: Option<&str>,
        ) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((prompt.to_string(), context.map(str::to_string)));
            tokio::time::sleep(self.delay).await;
            match self.script {
                Script::Reply(text) => Ok(text.to_string()),
                Script::Fail(status) => Err(LlmError::Provider {
                    provider: "mock".into(),
                    status,
                    message: "Incorrect API key provided".into(),
                }),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(String::new())
                }
            }
        }
    }

    struct MockFactory(Arc<MockProvider>);

    impl ProviderFactory for MockFactory {
        fn create(&self, _agent: &AgentConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
            Ok(self.0.clone())
        }
    }

    struct Harness {
        db: Arc<LibSqlBackend>,
        provider: Arc<MockProvider>,
        orchestrator: Arc<Orchestrator>,
        bot: QueueId,
        humans: QueueId,
        overflow: QueueId,
        conversation: ConversationId,
    }

    impl Harness {
        async fn new(script: Script, max_auto_replies: i64) -> Self {
            Self::with(script, max_auto_replies, Duration::ZERO, PipelineConfig::default()).await
        }

        async fn with(
            script: Script,
            max_auto_replies: i64,
            delay: Duration,
            config: PipelineConfig,
        ) -> Self {
            let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
            let bot = db.create_queue("Bot").await.unwrap().id;
            let humans = db.create_queue("Humanos").await.unwrap().id;
            let overflow = db.create_queue("Transbordo").await.unwrap().id;
            db.create_agent_config(
                &NewAgentConfig::new("Ana", ProviderKind::OpenAi, "gpt-4o-mini", bot, overflow)
                    .with_credential("sk-test")
                    .with_max_auto_replies(max_auto_replies),
            )
            .await
            .unwrap();
            let conversation = db.create_conversation(Some(bot)).await.unwrap().id;

            let provider = Arc::new(MockProvider {
                script,
                delay,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            });
            let events = EventBus::new();
            let orchestrator = Arc::new(Orchestrator::new(
                db.clone(),
                Arc::new(MockFactory(provider.clone())),
                Arc::new(StoreDelivery::new(db.clone(), events.clone())),
                events,
                config,
            ));

            Self {
                db,
                provider,
                orchestrator,
                bot,
                humans,
                overflow,
                conversation,
            }
        }

        async fn seed(&self, origin: TurnOrigin, n: usize) {
            for i in 0..n {
                self.db
                    .append_turn(self.conversation, &format!("turn {i}"), origin)
                    .await
                    .unwrap();
            }
        }

        /// Record the customer turn and run the pipeline, like ingestion does.
        async fn inbound(&self, text: &str) -> Outcome {
            self.db
                .append_turn(self.conversation, text, TurnOrigin::Customer)
                .await
                .unwrap();
            self.orchestrator
                .handle(InboundTurn::customer(self.conversation, text))
                .await
        }

        async fn automated_turns(&self) -> u64 {
            self.db
                .count_turns(self.conversation, TurnOrigin::Automated)
                .await
                .unwrap()
        }

        async fn queue(&self) -> Option<QueueId> {
            self.db
                .get_conversation(self.conversation)
                .await
                .unwrap()
                .unwrap()
                .queue_id
        }

        async fn last_text(&self) -> String {
            self.db.recent_turns(self.conversation, 1).await.unwrap()[0]
                .text
                .clone()
        }

        fn calls(&self) -> usize {
            self.provider.calls.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn reply_limit_escalates_without_provider_call() {
        let h = Harness::new(Script::Reply("nunca"), 5).await;
        h.seed(TurnOrigin::Automated, 5).await;

        let outcome = h.inbound("oi").await;

        assert_eq!(
            outcome,
            Outcome::Escalated {
                trigger: EscalationTrigger::ReplyLimit,
                target_queue_id: h.overflow,
            }
        );
        assert_eq!(h.calls(), 0);
        assert_eq!(h.queue().await, Some(h.overflow));
        assert_eq!(h.automated_turns().await, 6);
        assert_eq!(h.last_text().await, h.orchestrator.config.limit_notice);
    }

    #[tokio::test]
    async fn handoff_phrase_escalates_to_unattended_queue() {
        let h = Harness::new(Script::Reply("nunca"), 5).await;
        h.seed(TurnOrigin::Automated, 2).await;

        let outcome = h.inbound("quero falar com atendente humano").await;

        // Humanos and Transbordo are both unattended; lowest id wins.
        assert_eq!(
            outcome,
            Outcome::Escalated {
                trigger: EscalationTrigger::Keyword,
                target_queue_id: h.humans,
            }
        );
        assert_ne!(h.humans, h.bot);
        assert_eq!(h.calls(), 0);
        assert_eq!(h.queue().await, Some(h.humans));
        assert_eq!(h.automated_turns().await, 3);
        assert_eq!(h.last_text().await, h.orchestrator.config.handoff_notice);
    }

    #[tokio::test]
    async fn provider_reply_is_delivered_once() {
        let h = Harness::new(Script::Reply("Atendemos das 9h às 18h"), 5).await;
        h.seed(TurnOrigin::Automated, 1).await;

        let outcome = h.inbound("qual o horário de atendimento?").await;

        assert!(matches!(outcome, Outcome::Replied { .. }));
        assert_eq!(h.calls(), 1);
        assert_eq!(h.automated_turns().await, 2);
        assert_eq!(h.last_text().await, "Atendemos das 9h às 18h");
        assert_eq!(h.queue().await, Some(h.bot));
    }

    #[tokio::test]
    async fn provider_failure_creates_no_turn() {
        let h = Harness::new(Script::Fail(401), 5).await;

        let outcome = h.inbound("oi").await;

        assert_eq!(
            outcome,
            Outcome::Failed {
                stage: Stage::Provider
            }
        );
        assert_eq!(h.calls(), 1);
        assert_eq!(h.automated_turns().await, 0);
        assert_eq!(h.queue().await, Some(h.bot));
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test]
    async fn provider_failure_is_logged_with_stage_and_status() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_target(false)
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let h = Harness::new(Script::Fail(401), 5).await;
        h.inbound("oi").await;

        let line = logs
            .contents()
            .lines()
            .find(|l| l.contains("Pipeline run failed"))
            .map(str::to_string)
            .expect("failure was not logged");
        assert!(line.contains("ERROR"), "{line}");
        assert!(line.contains(&format!("conversation_id={}", h.conversation)), "{line}");
        assert!(line.contains("stage=\"provider\""), "{line}");
        assert!(line.contains("status=401"), "{line}");
        assert!(line.contains("Incorrect API key provided"), "{line}");
    }

    #[tokio::test]
    async fn failed_queue_move_sends_no_notice() {
        let h = Harness::new(Script::Reply("nunca"), 1).await;
        h.seed(TurnOrigin::Automated, 1).await;
        h.db.execute_batch(
            "CREATE TRIGGER refuse_queue_move BEFORE UPDATE OF queue_id ON conversations
             BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
        )
        .await;

        let outcome = h.inbound("oi").await;

        assert_eq!(
            outcome,
            Outcome::Failed {
                stage: Stage::Transfer
            }
        );
        assert_eq!(h.queue().await, Some(h.bot));
        assert_eq!(h.automated_turns().await, 1);
        assert_eq!(h.last_text().await, "oi");

        // Once the store recovers, the next turn escalates with a single notice.
        h.db.execute_batch("DROP TRIGGER refuse_queue_move;").await;
        let outcome = h.inbound("alô?").await;
        assert_eq!(
            outcome,
            Outcome::Escalated {
                trigger: EscalationTrigger::ReplyLimit,
                target_queue_id: h.overflow,
            }
        );
        assert_eq!(h.automated_turns().await, 2);
        assert_eq!(h.queue().await, Some(h.overflow));
        assert_eq!(h.calls(), 0);
    }

    #[tokio::test]
    async fn no_active_agent_skips_everything() {
        let h = Harness::new(Script::Reply("nunca"), 5).await;
        let agent = h.db.agent_config_for_queue(h.bot).await.unwrap().unwrap();
        h.db.set_agent_active(agent.id, false).await.unwrap();

        for text in ["oi", "falar com humano"] {
            let outcome = h.inbound(text).await;
            assert_eq!(
                outcome,
                Outcome::Skipped {
                    reason: SkipReason::NoActiveAgent
                }
            );
        }
        assert_eq!(h.calls(), 0);
        assert_eq!(h.automated_turns().await, 0);
        assert_eq!(h.queue().await, Some(h.bot));
    }

    #[tokio::test]
    async fn automated_and_unassigned_turns_are_skipped() {
        let h = Harness::new(Script::Reply("nunca"), 5).await;

        let outcome = h
            .orchestrator
            .handle(InboundTurn {
                conversation_id: h.conversation,
                text: "eco".into(),
                origin: TurnOrigin::Automated,
            })
            .await;
        assert_eq!(
            outcome,
            Outcome::Skipped {
                reason: SkipReason::AutomatedOrigin
            }
        );

        let loose = h.db.create_conversation(None).await.unwrap();
        let outcome = h
            .orchestrator
            .handle(InboundTurn::customer(loose.id, "oi"))
            .await;
        assert_eq!(
            outcome,
            Outcome::Skipped {
                reason: SkipReason::Unassigned
            }
        );
        assert_eq!(h.calls(), 0);
    }

    #[tokio::test]
    async fn context_is_chronological_and_bounded() {
        let config = PipelineConfig {
            context_turns: 3,
            ..PipelineConfig::default()
        };
        let h = Harness::with(Script::Reply("ok"), 10, Duration::ZERO, config).await;
        h.seed(TurnOrigin::Customer, 2).await;
        h.seed(TurnOrigin::Automated, 1).await;

        h.inbound("e o preço?").await;

        let seen = h.provider.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "e o preço?");
        assert_eq!(
            seen[0].1.as_deref(),
            Some("Cliente: turn 1\nAgente: turn 0\nCliente: e o preço?")
        );
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let config = PipelineConfig {
            provider_timeout: Duration::from_millis(50),
            ..PipelineConfig::default()
        };
        let h = Harness::with(Script::Hang, 5, Duration::ZERO, config).await;

        let outcome = h.inbound("oi").await;

        assert_eq!(
            outcome,
            Outcome::Failed {
                stage: Stage::Provider
            }
        );
        assert_eq!(h.automated_turns().await, 0);
    }

    #[tokio::test]
    async fn concurrent_turns_are_serialized() {
        let h = Harness::with(
            Script::Reply("resposta"),
            2,
            Duration::from_millis(50),
            PipelineConfig::default(),
        )
        .await;
        h.seed(TurnOrigin::Automated, 1).await;
        h.seed(TurnOrigin::Customer, 2).await;

        let a = h
            .orchestrator
            .dispatch(InboundTurn::customer(h.conversation, "primeira"));
        let b = h
            .orchestrator
            .dispatch(InboundTurn::customer(h.conversation, "segunda"));
        let (a, b) = futures::future::join(a, b).await;
        let outcomes = [a.unwrap(), b.unwrap()];

        let replied = outcomes
            .iter()
            .filter(|o| matches!(o, Outcome::Replied { .. }))
            .count();
        let escalated = outcomes
            .iter()
            .filter(|o| matches!(o, Outcome::Escalated { .. }))
            .count();
        assert_eq!((replied, escalated), (1, 1));
        assert_eq!(h.calls(), 1);
        assert_eq!(h.queue().await, Some(h.overflow));
    }

    #[test]
    fn render_context_labels_lines() {
        let turn = |text: &str, origin| Turn {
            id: uuid::Uuid::new_v4(),
            conversation_id: 1,
            text: text.into(),
            origin,
            created_at: chrono::Utc::now(),
        };
        let rendered = render_context(&[
            turn("Oi", TurnOrigin::Customer),
            turn("Olá!", TurnOrigin::Automated),
        ]);
        assert_eq!(rendered, "Cliente: Oi\nAgente: Olá!");
        assert_eq!(render_context(&[]), "");
    }
}
