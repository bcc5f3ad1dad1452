//! The conversation engine: one intake entry point, phase-driven handlers,
//! and the receipt path. Timers, store, transport, OCR, and the reply model
//! are all injected so tests can run against isolated instances.

pub mod intents;
pub mod replies;

mod intake;
mod receipt;

use std::sync::Arc;
use std::time::Duration;

use crate::ai::{ReplyCache, ReplyModel};
use crate::channels::{Channel, InboundMessage};
use crate::config::{EngineConfig, MediaConfig};
use crate::escalation::Escalations;
use crate::outbound::{EngineReply, Outbound};
use crate::store::{ConversationStore, LifecyclePhase};
use crate::timers::Timers;
use crate::verify::TextExtractor;

use intents::{PaymentIntent, PhrasePaymentIntent};

/// Operator keyword that releases a paused conversation back into the
/// fallback menu: `reactivar <user-id>`.
const OPERATOR_UNPAUSE_KEYWORD: &str = "reactivar";

pub struct Engine {
    store: Arc<ConversationStore>,
    timers: Arc<Timers>,
    outbound: Arc<Outbound>,
    escalations: Arc<Escalations>,
    ai: ReplyCache,
    ocr: Option<Arc<dyn TextExtractor>>,
    payment_intent: Box<dyn PaymentIntent>,
    media: MediaConfig,
    operator_id: Option<String>,
}

impl Engine {
    /// Assemble an engine from explicit collaborators. Tests inject mocks
    /// here; production wiring goes through [`Engine::from_config`].
    pub fn new(
        channel: Arc<dyn Channel>,
        config: &EngineConfig,
        ocr: Option<Arc<dyn TextExtractor>>,
        model: Option<Arc<dyn ReplyModel>>,
    ) -> Arc<Self> {
        let store = Arc::new(ConversationStore::new());
        let timers = Arc::new(Timers::new());
        let outbound = Arc::new(Outbound::new(channel, config.delays.max_sends_per_minute));
        let escalations = Escalations::new(
            store.clone(),
            timers.clone(),
            outbound.clone(),
            config.reminder_plan(),
        );
        let ai = ReplyCache::new(
            model,
            Duration::from_secs(config.ai.cache_ttl_secs),
            config.ai.max_calls_per_user,
        );

        Arc::new(Self {
            store,
            timers,
            outbound,
            escalations,
            ai,
            ocr,
            payment_intent: Box::new(PhrasePaymentIntent::new()),
            media: config.media.clone(),
            operator_id: config.transport.operator_id.clone(),
        })
    }

    /// Production wiring: build the OCR and reply-model collaborators the
    /// config describes (either may be absent).
    pub fn from_config(channel: Arc<dyn Channel>, config: &EngineConfig) -> Arc<Self> {
        let ocr = config.ocr.build();
        let model = config.ai.build();
        if ocr.is_none() {
            tracing::warn!("OCR not configured - receipt verification disabled");
        }
        if model.is_none() {
            tracing::warn!("reply model not configured - using scripted replies only");
        }
        Self::new(channel, config, ocr, model)
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn timers(&self) -> &Arc<Timers> {
        &self.timers
    }

    pub fn outbound(&self) -> &Arc<Outbound> {
        &self.outbound
    }

    pub fn escalations(&self) -> &Arc<Escalations> {
        &self.escalations
    }

    /// Single intake entry: operator commands, receipts, then text handling.
    pub async fn handle_inbound(&self, msg: InboundMessage) -> Option<EngineReply> {
        if let Some(operator) = &self.operator_id {
            if msg.user_id == *operator {
                return self.handle_operator(&msg.text);
            }
        }
        if let Some(bytes) = &msg.attachment {
            return self.handle_receipt(&msg.user_id, bytes).await;
        }
        self.handle_message(&msg.user_id, &msg.text).await
    }

    /// Commands arriving on the operator's own channel.
    fn handle_operator(&self, text: &str) -> Option<EngineReply> {
        let trimmed = text.trim();
        let rest = trimmed
            .strip_prefix(OPERATOR_UNPAUSE_KEYWORD)
            .map(str::trim)?;
        if rest.is_empty() {
            return Some(EngineReply::text("Uso: reactivar <usuario>"));
        }
        if self.unpause(rest) {
            Some(EngineReply::text(format!("Conversación reactivada: {rest}")))
        } else {
            Some(EngineReply::text(format!(
                "No hay conversación pausada para: {rest}"
            )))
        }
    }

    /// Release a paused conversation into the fallback menu. Only works on
    /// `PausedAfterEscalation`; together with the 10-minute ladder timeout
    /// this is the only way out of that phase.
    pub fn unpause(&self, user: &str) -> bool {
        let released = self.store.mutate(user, |state| {
            if !state.phase.waiting_for_human_help() {
                return false;
            }
            state.phase = LifecyclePhase::AwaitingFallbackChoice;
            state.human_help_timestamp = None;
            true
        });
        if released {
            self.escalations.cancel_help_ladder(user);
            tracing::info!(user, "conversation unpaused by operator");
        }
        released
    }

    /// Daily reset: cancel every timer, then drop all conversations and the
    /// reply cache.
    pub fn reset_all(&self) {
        self.store.clear_all(&self.timers);
        self.ai.clear();
    }
}
