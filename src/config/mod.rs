//! Engine configuration loaded from `comanda.toml`, with env-var overrides
//! for secrets. A missing file yields defaults; unconfigured AI/OCR sections
//! simply leave those collaborators absent.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::ai::{OpenAiModel, ReplyModel};
use crate::escalation::{HelpLadderPlan, LongWaitPlan, PaymentLadderPlan, ReminderPlan};
use crate::verify::{TextExtractor, VisionOcr};

pub const DEFAULT_CONFIG_FILE: &str = "comanda.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub delays: DelayConfig,
    #[serde(default)]
    pub reminders: RemindersConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransportConfig {
    /// Channel id of the operator; callback requests and review notices go
    /// there, and unpause commands are accepted from it.
    pub operator_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DelayConfig {
    #[serde(default = "default_max_sends")]
    pub max_sends_per_minute: usize,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            max_sends_per_minute: default_max_sends(),
        }
    }
}

fn default_max_sends() -> usize {
    crate::outbound::DEFAULT_MAX_SENDS_PER_MINUTE
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemindersConfig {
    #[serde(default = "default_payment_first_secs")]
    pub payment_first_secs: u64,
    #[serde(default = "default_payment_interval_secs")]
    pub payment_interval_secs: u64,
    #[serde(default = "default_payment_max_steps")]
    pub payment_max_steps: u32,
    #[serde(default = "default_long_wait_secs")]
    pub long_wait_pause_secs: u64,
    #[serde(default = "default_long_wait_secs")]
    pub long_wait_interval_secs: u64,
    #[serde(default = "default_help_first_secs")]
    pub help_first_secs: u64,
    #[serde(default = "default_help_second_secs")]
    pub help_second_secs: u64,
    #[serde(default = "default_menu_nudge_secs")]
    pub menu_nudge_secs: u64,
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            payment_first_secs: default_payment_first_secs(),
            payment_interval_secs: default_payment_interval_secs(),
            payment_max_steps: default_payment_max_steps(),
            long_wait_pause_secs: default_long_wait_secs(),
            long_wait_interval_secs: default_long_wait_secs(),
            help_first_secs: default_help_first_secs(),
            help_second_secs: default_help_second_secs(),
            menu_nudge_secs: default_menu_nudge_secs(),
        }
    }
}

fn default_payment_first_secs() -> u64 {
    60
}
fn default_payment_interval_secs() -> u64 {
    5 * 60
}
fn default_payment_max_steps() -> u32 {
    3
}
fn default_long_wait_secs() -> u64 {
    30 * 60
}
fn default_help_first_secs() -> u64 {
    5 * 60
}
fn default_help_second_secs() -> u64 {
    10 * 60
}
fn default_menu_nudge_secs() -> u64 {
    15
}

/// Links to the tutorial/welcome videos the transport can deliver. Absent
/// entries degrade to text-only replies.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaConfig {
    pub welcome_video: Option<String>,
    pub support_video: Option<String>,
    pub duplicate_video: Option<String>,
    pub troubleshoot_video: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_max_calls_per_user")]
    pub max_calls_per_user: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_ai_base_url(),
            model: default_ai_model(),
            cache_ttl_secs: default_cache_ttl_secs(),
            max_calls_per_user: default_max_calls_per_user(),
        }
    }
}

fn default_ai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_cache_ttl_secs() -> u64 {
    45
}
fn default_max_calls_per_user() -> u32 {
    12
}

impl AiConfig {
    /// Build the reply model if a key is configured (or in the env).
    pub fn build(&self) -> Option<Arc<dyn ReplyModel>> {
        let key = self
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())?;
        Some(Arc::new(OpenAiModel::new(
            self.base_url.clone(),
            key,
            self.model.clone(),
        )))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OcrConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

impl OcrConfig {
    /// Build the OCR collaborator if an endpoint is configured.
    pub fn build(&self) -> Option<Arc<dyn TextExtractor>> {
        let endpoint = self.endpoint.clone().filter(|e| !e.trim().is_empty())?;
        let key = self
            .api_key
            .clone()
            .or_else(|| std::env::var("VISION_API_KEY").ok())
            .filter(|k| !k.trim().is_empty());
        Some(Arc::new(VisionOcr::new(endpoint, key)))
    }
}

impl EngineConfig {
    /// Load from `path`. A missing file is not an error — defaults apply.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    pub fn reminder_plan(&self) -> ReminderPlan {
        ReminderPlan {
            payment: PaymentLadderPlan {
                first_delay: Duration::from_secs(self.reminders.payment_first_secs),
                interval: Duration::from_secs(self.reminders.payment_interval_secs),
                max_steps: self.reminders.payment_max_steps,
            },
            long_wait: LongWaitPlan {
                pause: Duration::from_secs(self.reminders.long_wait_pause_secs),
                resume_interval: Duration::from_secs(self.reminders.long_wait_interval_secs),
            },
            help: HelpLadderPlan {
                first_delay: Duration::from_secs(self.reminders.help_first_secs),
                second_delay: Duration::from_secs(self.reminders.help_second_secs),
            },
            menu_nudge_delay: Duration::from_secs(self.reminders.menu_nudge_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_parses_to_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.delays.max_sends_per_minute, 20);
        assert_eq!(config.reminders.payment_max_steps, 3);
        assert_eq!(config.ai.cache_ttl_secs, 45);
        assert_eq!(config.ai.max_calls_per_user, 12);
        assert!(config.transport.operator_id.is_none());
        assert!(config.media.welcome_video.is_none());
    }

    #[test]
    fn partial_sections_override_only_named_fields() {
        let config: EngineConfig = toml::from_str(
            r#"
            [transport]
            operator_id = "573001112233"

            [reminders]
            payment_first_secs = 30

            [media]
            welcome_video = "https://example.com/bienvenida.mp4"
            "#,
        )
        .unwrap();
        assert_eq!(config.transport.operator_id.as_deref(), Some("573001112233"));
        assert_eq!(config.reminders.payment_first_secs, 30);
        assert_eq!(config.reminders.payment_interval_secs, 300);
        assert_eq!(
            config.media.welcome_video.as_deref(),
            Some("https://example.com/bienvenida.mp4")
        );
    }

    #[test]
    fn reminder_plan_reflects_config() {
        let config: EngineConfig = toml::from_str(
            r#"
            [reminders]
            payment_first_secs = 10
            payment_max_steps = 2
            menu_nudge_secs = 5
            "#,
        )
        .unwrap();
        let plan = config.reminder_plan();
        assert_eq!(plan.payment.first_delay, Duration::from_secs(10));
        assert_eq!(plan.payment.max_steps, 2);
        assert_eq!(plan.menu_nudge_delay, Duration::from_secs(5));
        assert_eq!(plan.help.second_delay, Duration::from_secs(600));
    }

    #[test]
    fn unconfigured_collaborators_build_to_none() {
        let config = EngineConfig::default();
        assert!(config.ocr.build().is_none());
        // AI may still come from the env; only assert when it is absent.
        if std::env::var("OPENAI_API_KEY").is_err() {
            assert!(config.ai.build().is_none());
        }
    }

    #[test]
    fn missing_file_loads_defaults() {
        let config = EngineConfig::load(Path::new("/nonexistent/comanda.toml")).unwrap();
        assert_eq!(config.delays.max_sends_per_minute, 20);
    }
}
