//! Outbound delivery: rolling per-minute send budget, humanized pacing, and
//! the retry-once-then-drop failure policy. Everything the engine or a timer
//! callback sends goes through here, never straight to the transport.

use parking_lot::Mutex;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::channels::{Channel, MediaRef};
use crate::engine::replies;

/// One deliverable unit of a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundItem {
    Text(String),
    Media { media: MediaRef, caption: String },
}

/// What one processing turn hands back for delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineReply {
    Text(String),
    /// Ordered sequence; any item may be a media message with caption.
    Sequence(Vec<OutboundItem>),
    Pair { main: String, secondary: String },
}

impl EngineReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

pub const DEFAULT_MAX_SENDS_PER_MINUTE: usize = 20;
const BUDGET_WINDOW: Duration = Duration::from_secs(60);
const JITTER_MIN_MS: u64 = 400;
const JITTER_MAX_MS: u64 = 1200;

pub struct Outbound {
    channel: Arc<dyn Channel>,
    sent: Mutex<VecDeque<Instant>>,
    max_per_minute: usize,
}

impl Outbound {
    pub fn new(channel: Arc<dyn Channel>, max_per_minute: usize) -> Self {
        Self {
            channel,
            sent: Mutex::new(VecDeque::new()),
            max_per_minute,
        }
    }

    /// Admit one send against the rolling window, recording it on success.
    fn admit(&self) -> bool {
        let now = Instant::now();
        let mut sent = self.sent.lock();
        while let Some(front) = sent.front() {
            if now.duration_since(*front) >= BUDGET_WINDOW {
                sent.pop_front();
            } else {
                break;
            }
        }
        if sent.len() >= self.max_per_minute {
            return false;
        }
        sent.push_back(now);
        true
    }

    /// Short randomized pause so deliveries do not land in bot-like bursts.
    async fn pace(&self) {
        let pause_ms = rand::thread_rng().gen_range(JITTER_MIN_MS..=JITTER_MAX_MS);
        tokio::time::sleep(Duration::from_millis(pause_ms)).await;
    }

    pub async fn send_text(&self, recipient: &str, text: &str) {
        if !self.admit() {
            tracing::warn!(recipient, "send budget exhausted, dropping message");
            return;
        }
        self.pace().await;
        if let Err(e) = self.channel.send_text(recipient, text).await {
            tracing::warn!(recipient, error = %e, "send failed, retrying with apology");
            if let Err(e) = self
                .channel
                .send_text(recipient, replies::SEND_FAILURE_APOLOGY)
                .await
            {
                tracing::error!(recipient, error = %e, "retry send failed, dropping");
            }
        }
    }

    pub async fn send_media(&self, recipient: &str, media: &MediaRef, caption: &str) {
        if !self.admit() {
            tracing::warn!(recipient, "send budget exhausted, dropping media message");
            return;
        }
        self.pace().await;
        if let Err(e) = self
            .channel
            .send_media_with_caption(recipient, media, caption)
            .await
        {
            tracing::warn!(recipient, error = %e, "media send failed, retrying with apology");
            if let Err(e) = self
                .channel
                .send_text(recipient, replies::SEND_FAILURE_APOLOGY)
                .await
            {
                tracing::error!(recipient, error = %e, "retry send failed, dropping");
            }
        }
    }

    /// Fan a whole reply out to the transport in order.
    pub async fn deliver(&self, recipient: &str, reply: EngineReply) {
        match reply {
            EngineReply::Text(text) => self.send_text(recipient, &text).await,
            EngineReply::Sequence(items) => {
                for item in items {
                    match item {
                        OutboundItem::Text(text) => self.send_text(recipient, &text).await,
                        OutboundItem::Media { media, caption } => {
                            self.send_media(recipient, &media, &caption).await
                        }
                    }
                }
            }
            EngineReply::Pair { main, secondary } => {
                self.send_text(recipient, &main).await;
                self.send_text(recipient, &secondary).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::InboundMessage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingChannel {
        texts: Mutex<Vec<(String, String)>>,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send_text(&self, recipient: &str, text: &str) -> anyhow::Result<()> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("transport hiccup");
            }
            self.texts
                .lock()
                .push((recipient.to_string(), text.to_string()));
            Ok(())
        }

        async fn send_media_with_caption(
            &self,
            recipient: &str,
            media: &MediaRef,
            caption: &str,
        ) -> anyhow::Result<()> {
            self.texts
                .lock()
                .push((recipient.to_string(), format!("<{}> {caption}", media.link)));
            Ok(())
        }

        async fn listen(
            &self,
            _tx: tokio::sync::mpsc::Sender<InboundMessage>,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn budget_drops_excess_sends_within_window() {
        let channel = Arc::new(RecordingChannel::default());
        let outbound = Outbound::new(channel.clone(), 2);

        outbound.send_text("u", "uno").await;
        outbound.send_text("u", "dos").await;
        outbound.send_text("u", "tres").await;
        assert_eq!(channel.texts.lock().len(), 2);

        // Window rolls over and capacity returns.
        tokio::time::advance(Duration::from_secs(61)).await;
        outbound.send_text("u", "cuatro").await;
        assert_eq!(channel.texts.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_retries_once_with_apology() {
        let channel = Arc::new(RecordingChannel::default());
        channel.failures_left.store(1, Ordering::SeqCst);
        let outbound = Outbound::new(channel.clone(), 10);

        outbound.send_text("u", "hola").await;
        let sent = channel.texts.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, replies::SEND_FAILURE_APOLOGY);
    }

    #[tokio::test(start_paused = true)]
    async fn deliver_fans_out_every_reply_shape() {
        let channel = Arc::new(RecordingChannel::default());
        let outbound = Outbound::new(channel.clone(), 10);

        outbound.deliver("u", EngineReply::text("solo")).await;
        outbound
            .deliver(
                "u",
                EngineReply::Sequence(vec![
                    OutboundItem::Text("primero".into()),
                    OutboundItem::Media {
                        media: MediaRef::new("v.mp4"),
                        caption: "mira".into(),
                    },
                ]),
            )
            .await;
        outbound
            .deliver(
                "u",
                EngineReply::Pair {
                    main: "principal".into(),
                    secondary: "secundario".into(),
                },
            )
            .await;

        let sent = channel.texts.lock();
        let bodies: Vec<&str> = sent.iter().map(|(_, t)| t.as_str()).collect();
        assert_eq!(
            bodies,
            vec!["solo", "primero", "<v.mp4> mira", "principal", "secundario"]
        );
    }
}
