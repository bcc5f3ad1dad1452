//! Optional AI-assisted replies. Never required for correctness: every call
//! site has a scripted fallback, and any failure here surfaces as `None`.

mod openai;

pub use openai::OpenAiModel;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::store::ConversationState;

/// Text-generation collaborator. May be absent or fail at any time.
#[async_trait]
pub trait ReplyModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> anyhow::Result<String>;
}

/// Conversation moment the reply should speak to; selects the context hint
/// baked into the system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyPhase {
    Greeting,
    Explanation,
    Assistance,
    ConfirmWeb,
    Thanks,
    FollowUp,
    HumanHelp,
    Coverage,
    Default,
}

impl ReplyPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Explanation => "explanation",
            Self::Assistance => "assistance",
            Self::ConfirmWeb => "confirm_web",
            Self::Thanks => "thanks",
            Self::FollowUp => "follow_up",
            Self::HumanHelp => "human_help",
            Self::Coverage => "coverage",
            Self::Default => "default",
        }
    }

    fn hint(self) -> &'static str {
        match self {
            Self::Greeting => "El usuario inicia interacción, saluda o prueba un mensaje suelto.",
            Self::Explanation => "El usuario no ha usado la página, explícale brevemente cómo hacerlo.",
            Self::Assistance => "El usuario necesita opciones de ayuda, responde empático y breve.",
            Self::ConfirmWeb => "Pedido web recibido, refuerza confirmación sin repetir literal todo.",
            Self::Thanks => "Usuario dijo gracias tras confirmación.",
            Self::FollowUp => "Preguntamos si desea otro pedido.",
            Self::HumanHelp => "Pidió ayuda humana. Dar tranquilidad y alternativa.",
            Self::Coverage => "Pregunta si llegamos a su dirección.",
            Self::Default => "Contexto genérico.",
        }
    }
}

const BASE_SYSTEM: &str = "Eres un asistente cordial de Cocina Casera. Mantén respuestas breves \
(máx 4 líneas), amables, sin inventar precios ni tiempos exactos. Usa \"veci\" con moderación. \
Nunca des información financiera distinta a la ya conocida (solo Bancolombia, Daviplata). Si piden \
ayuda humana, anima a usar la página y tranquiliza. Si repiten sin enviar pedido, refuerza usar el \
link. No prometas cosas que no están confirmadas.";

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(45);
pub const DEFAULT_MAX_CALLS: u32 = 12;
/// Normalized-prefix length of the cache key, enough to coalesce
/// near-duplicate prompts fired in quick succession.
const KEY_SNIPPET_LEN: usize = 40;

struct CacheEntry {
    text: String,
    expires: Instant,
}

/// Quota'd, TTL-cached front for the reply model.
pub struct ReplyCache {
    model: Option<Arc<dyn ReplyModel>>,
    ttl: Duration,
    max_calls: u32,
    entries: Mutex<HashMap<(String, &'static str, String), CacheEntry>>,
    usage: Mutex<HashMap<String, u32>>,
}

impl ReplyCache {
    pub fn new(model: Option<Arc<dyn ReplyModel>>, ttl: Duration, max_calls: u32) -> Self {
        Self {
            model,
            ttl,
            max_calls,
            entries: Mutex::new(HashMap::new()),
            usage: Mutex::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, DEFAULT_CACHE_TTL, DEFAULT_MAX_CALLS)
    }

    fn cache_key(user: &str, phase: ReplyPhase, text: &str) -> (String, &'static str, String) {
        let snippet: String = text
            .trim()
            .to_lowercase()
            .chars()
            .take(KEY_SNIPPET_LEN)
            .collect();
        (user.to_string(), phase.as_str(), snippet)
    }

    /// Contextual reply for `text`, or `None` when the model is absent, the
    /// user exhausted their quota, or the call failed.
    pub async fn generate(
        &self,
        user: &str,
        phase: ReplyPhase,
        text: &str,
        state: &ConversationState,
    ) -> Option<String> {
        let model = self.model.as_ref()?;

        if self.usage.lock().get(user).copied().unwrap_or(0) >= self.max_calls {
            tracing::debug!(user, "reply model quota exhausted");
            return None;
        }

        let key = Self::cache_key(user, phase, text);
        {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get(&key) {
                if Instant::now() < entry.expires {
                    return Some(entry.text.clone());
                }
                entries.remove(&key);
            }
        }

        let snapshot = serde_json::to_string(state).unwrap_or_default();
        let system = format!(
            "{BASE_SYSTEM}\nFase: {}. Contexto: {} Estado previo: {snapshot}",
            phase.as_str(),
            phase.hint(),
        );

        match model.complete(&system, text).await {
            Ok(reply) => {
                let reply = reply.trim().to_string();
                if reply.is_empty() {
                    return None;
                }
                self.entries.lock().insert(
                    key,
                    CacheEntry {
                        text: reply.clone(),
                        expires: Instant::now() + self.ttl,
                    },
                );
                *self.usage.lock().entry(user.to_string()).or_insert(0) += 1;
                Some(reply)
            }
            Err(e) => {
                tracing::warn!(user, error = %e, "reply model call failed");
                None
            }
        }
    }

    /// Drop all cached replies and usage counters (daily reset).
    pub fn clear(&self) {
        self.entries.lock().clear();
        self.usage.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReplyModel for CountingModel {
        async fn complete(&self, _system: &str, user: &str) -> anyhow::Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("reply {n} to {user}"))
        }
    }

    struct FailingModel;

    #[async_trait]
    impl ReplyModel for FailingModel {
        async fn complete(&self, _system: &str, _user: &str) -> anyhow::Result<String> {
            anyhow::bail!("model offline")
        }
    }

    fn state() -> ConversationState {
        ConversationState::default()
    }

    #[tokio::test]
    async fn absent_model_always_returns_none() {
        let cache = ReplyCache::disabled();
        assert!(cache
            .generate("u", ReplyPhase::Greeting, "hola", &state())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn model_failure_swallowed_into_none() {
        let cache = ReplyCache::new(Some(Arc::new(FailingModel)), DEFAULT_CACHE_TTL, 5);
        assert!(cache
            .generate("u", ReplyPhase::Greeting, "hola", &state())
            .await
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn near_duplicate_prompts_hit_the_cache() {
        let model = Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
        });
        let cache = ReplyCache::new(Some(model.clone()), DEFAULT_CACHE_TTL, 12);

        let first = cache
            .generate("u", ReplyPhase::Greeting, "Hola!", &state())
            .await
            .unwrap();
        let second = cache
            .generate("u", ReplyPhase::Greeting, "hola!", &state())
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);

        // Past the TTL the entry is refreshed.
        tokio::time::advance(DEFAULT_CACHE_TTL + Duration::from_secs(1)).await;
        cache
            .generate("u", ReplyPhase::Greeting, "hola!", &state())
            .await
            .unwrap();
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn quota_is_enforced_per_user() {
        let model = Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
        });
        let cache = ReplyCache::new(Some(model.clone()), DEFAULT_CACHE_TTL, 2);

        assert!(cache
            .generate("u", ReplyPhase::Default, "uno", &state())
            .await
            .is_some());
        assert!(cache
            .generate("u", ReplyPhase::Default, "dos", &state())
            .await
            .is_some());
        assert!(cache
            .generate("u", ReplyPhase::Default, "tres", &state())
            .await
            .is_none());
        // Other users are unaffected.
        assert!(cache
            .generate("v", ReplyPhase::Default, "uno", &state())
            .await
            .is_some());
    }

    #[tokio::test]
    async fn clear_resets_quota_and_cache() {
        let model = Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
        });
        let cache = ReplyCache::new(Some(model.clone()), DEFAULT_CACHE_TTL, 1);

        cache
            .generate("u", ReplyPhase::Default, "uno", &state())
            .await
            .unwrap();
        assert!(cache
            .generate("u", ReplyPhase::Default, "dos", &state())
            .await
            .is_none());

        cache.clear();
        assert!(cache
            .generate("u", ReplyPhase::Default, "dos", &state())
            .await
            .is_some());
    }
}
