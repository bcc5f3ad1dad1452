use super::TextExtractor;
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Text-detection OCR client speaking the Vision-style annotate API.
pub struct VisionOcr {
    endpoint: String,
    api_key: Option<String>,
    client: Client,
}

// ─── Request Structures ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AnnotateRequest {
    requests: Vec<AnnotateEntry>,
}

#[derive(Debug, Serialize)]
struct AnnotateEntry {
    image: ImageContent,
    features: Vec<Feature>,
}

#[derive(Debug, Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Debug, Serialize)]
struct Feature {
    #[serde(rename = "type")]
    kind: String,
}

// ─── Response Structures ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateResult>,
}

#[derive(Debug, Deserialize)]
struct AnnotateResult {
    #[serde(default, rename = "textAnnotations")]
    text_annotations: Vec<TextAnnotation>,
    #[serde(default, rename = "fullTextAnnotation")]
    full_text_annotation: Option<FullTextAnnotation>,
}

#[derive(Debug, Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct FullTextAnnotation {
    #[serde(default)]
    text: String,
}

impl VisionOcr {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.and_then(|k| {
                let trimmed = k.trim().to_string();
                (!trimmed.is_empty()).then_some(trimmed)
            }),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }
}

#[async_trait]
impl TextExtractor for VisionOcr {
    async fn extract_text(&self, image: &[u8]) -> anyhow::Result<String> {
        let request = AnnotateRequest {
            requests: vec![AnnotateEntry {
                image: ImageContent {
                    content: base64::engine::general_purpose::STANDARD.encode(image),
                },
                features: vec![Feature {
                    kind: "TEXT_DETECTION".to_string(),
                }],
            }],
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.query(&[("key", key.as_str())]);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let excerpt: String = String::from_utf8_lossy(&body).chars().take(300).collect();
            tracing::error!(%status, "vision OCR error response: {excerpt}");
            anyhow::bail!("vision OCR error ({status})");
        }

        let parsed: AnnotateResponse = serde_json::from_slice(&body)
            .map_err(|e| anyhow::anyhow!("failed to parse vision OCR response: {e}"))?;

        let result = parsed
            .responses
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("vision OCR returned no results"))?;

        // The first annotation carries the full detected text; the
        // fullTextAnnotation field is the newer equivalent.
        if let Some(full) = result.full_text_annotation {
            if !full.text.is_empty() {
                return Ok(full.text);
            }
        }
        Ok(result
            .text_annotations
            .into_iter()
            .next()
            .map(|a| a.description)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_prefers_full_text_annotation() {
        let json = r#"{"responses":[{"fullTextAnnotation":{"text":"Nequi $13.000"},"textAnnotations":[{"description":"partial"}]}]}"#;
        let parsed: AnnotateResponse = serde_json::from_str(json).unwrap();
        let first = &parsed.responses[0];
        assert_eq!(
            first.full_text_annotation.as_ref().unwrap().text,
            "Nequi $13.000"
        );
    }

    #[test]
    fn response_falls_back_to_first_annotation() {
        let json = r#"{"responses":[{"textAnnotations":[{"description":"todo el texto"},{"description":"todo"}]}]}"#;
        let parsed: AnnotateResponse = serde_json::from_str(json).unwrap();
        let first = &parsed.responses[0];
        assert!(first.full_text_annotation.is_none());
        assert_eq!(first.text_annotations[0].description, "todo el texto");
    }

    #[test]
    fn empty_response_deserializes() {
        let parsed: AnnotateResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.responses.is_empty());
    }

    #[test]
    fn endpoint_trailing_slash_trimmed() {
        let ocr = VisionOcr::new("https://vision.example/v1/images:annotate/", None);
        assert_eq!(ocr.endpoint, "https://vision.example/v1/images:annotate");
    }

    #[test]
    fn blank_api_key_treated_as_absent() {
        let ocr = VisionOcr::new("https://vision.example", Some("   ".to_string()));
        assert!(ocr.api_key.is_none());
    }
}
