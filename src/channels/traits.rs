use async_trait::async_trait;
use tokio::time::Instant;

/// A message arriving from the transport.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: String,
    pub user_id: String,
    pub text: String,
    /// Image bytes when the user attached a picture (payment receipts).
    pub attachment: Option<Vec<u8>>,
    pub arrival: Instant,
}

impl InboundMessage {
    pub fn text(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            text: text.into(),
            attachment: None,
            arrival: Instant::now(),
        }
    }

    pub fn with_attachment(
        user_id: impl Into<String>,
        text: impl Into<String>,
        attachment: Vec<u8>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            text: text.into(),
            attachment: Some(attachment),
            arrival: Instant::now(),
        }
    }
}

/// Reference to a media asset the transport knows how to deliver
/// (a URL or a local path, depending on the implementation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub link: String,
}

impl MediaRef {
    pub fn new(link: impl Into<String>) -> Self {
        Self { link: link.into() }
    }
}

/// Core transport trait — implement for any messaging platform.
///
/// The engine never talks to a concrete platform: ladders and handlers only
/// go through this seam, so browser-automation and cloud-API transports are
/// interchangeable without touching engine logic.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name.
    fn name(&self) -> &str;

    /// Send a plain text message.
    async fn send_text(&self, recipient: &str, text: &str) -> anyhow::Result<()>;

    /// Send a media asset with a caption.
    async fn send_media_with_caption(
        &self,
        recipient: &str,
        media: &MediaRef,
        caption: &str,
    ) -> anyhow::Result<()>;

    /// Start listening for incoming messages (long-running).
    async fn listen(&self, tx: tokio::sync::mpsc::Sender<InboundMessage>) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyChannel;

    #[async_trait]
    impl Channel for DummyChannel {
        fn name(&self) -> &str {
            "dummy"
        }

        async fn send_text(&self, _recipient: &str, _text: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn send_media_with_caption(
            &self,
            _recipient: &str,
            _media: &MediaRef,
            _caption: &str,
        ) -> anyhow::Result<()> {
            Ok(())
        }

        async fn listen(
            &self,
            tx: tokio::sync::mpsc::Sender<InboundMessage>,
        ) -> anyhow::Result<()> {
            tx.send(InboundMessage::text("tester", "hola"))
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))
        }
    }

    #[tokio::test]
    async fn listen_sends_message_through_channel() {
        let channel = DummyChannel;
        let (tx, mut rx) = tokio::sync::mpsc::channel(1);

        channel.listen(tx).await.unwrap();

        let received = rx.recv().await.expect("message should be sent");
        assert_eq!(received.user_id, "tester");
        assert_eq!(received.text, "hola");
        assert!(received.attachment.is_none());
    }

    #[tokio::test]
    async fn send_paths_accept_plain_and_media() {
        let channel = DummyChannel;
        assert!(channel.send_text("u", "hola").await.is_ok());
        assert!(channel
            .send_media_with_caption("u", &MediaRef::new("https://example.com/v.mp4"), "mira")
            .await
            .is_ok());
    }

    #[test]
    fn inbound_message_with_attachment_keeps_bytes() {
        let msg = InboundMessage::with_attachment("u", "", vec![1, 2, 3]);
        assert_eq!(msg.attachment.as_deref(), Some(&[1u8, 2, 3][..]));
    }
}
