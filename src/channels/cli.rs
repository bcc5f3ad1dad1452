use super::traits::{Channel, InboundMessage, MediaRef};
use async_trait::async_trait;
use tokio::io::{self, AsyncBufReadExt, BufReader};

/// CLI channel — stdin/stdout, always available. Lines are treated as
/// messages from a single local user; `!receipt <path>` attaches the file at
/// `<path>` as image bytes, `/quit` ends the session.
pub struct CliChannel {
    user_id: String,
}

impl CliChannel {
    pub fn new() -> Self {
        Self {
            user_id: "local".to_string(),
        }
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn send_text(&self, recipient: &str, text: &str) -> anyhow::Result<()> {
        println!("[{recipient}] {text}");
        Ok(())
    }

    async fn send_media_with_caption(
        &self,
        recipient: &str,
        media: &MediaRef,
        caption: &str,
    ) -> anyhow::Result<()> {
        println!("[{recipient}] <media {}> {caption}", media.link);
        Ok(())
    }

    async fn listen(&self, tx: tokio::sync::mpsc::Sender<InboundMessage>) -> anyhow::Result<()> {
        let stdin = io::stdin();
        let reader = BufReader::new(stdin);
        let mut lines = reader.lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if line == "/quit" || line == "/exit" {
                break;
            }

            let msg = if let Some(path) = line.strip_prefix("!receipt ") {
                match tokio::fs::read(path.trim()).await {
                    Ok(bytes) => InboundMessage::with_attachment(&self.user_id, "", bytes),
                    Err(e) => {
                        eprintln!("could not read {path}: {e}");
                        continue;
                    }
                }
            } else {
                InboundMessage::text(&self.user_id, line)
            };

            if tx.send(msg).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_channel_name() {
        assert_eq!(CliChannel::new().name(), "cli");
    }

    #[tokio::test]
    async fn cli_channel_send_does_not_panic() {
        let ch = CliChannel::new();
        assert!(ch.send_text("local", "hola").await.is_ok());
        assert!(ch
            .send_media_with_caption("local", &MediaRef::new("v.mp4"), "mira")
            .await
            .is_ok());
    }
}
