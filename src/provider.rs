//! Upstream provider presets and the HTTP semantics of OpenAI-compatible
//! APIs: the liveness probe and the default response classifier.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::executor::{CallResult, Classification, TransportErrorKind};
use crate::pool::LivenessProbe;
use crate::types::Credential;

/// Error fragments that mean the credential itself is unusable.
const CREDENTIAL_REJECTIONS: [&str; 3] = [
    "invalid_api_key",
    "organization_restricted",
    "invalid authorization",
];

/// An OpenAI-compatible upstream API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    pub name: String,
    /// Prefix every credential for this provider carries.
    pub key_prefix: String,
    /// Base URL without trailing slash, e.g. `https://api.groq.com/openai/v1`.
    pub base_url: String,
}

impl Provider {
    pub fn new(
        name: impl Into<String>,
        key_prefix: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            key_prefix: key_prefix.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn groq() -> Self {
        Self::new("groq", "gsk_", "https://api.groq.com/openai/v1")
    }

    pub fn openai() -> Self {
        Self::new("openai", "sk-", "https://api.openai.com/v1")
    }

    /// Full URL of an API path such as `chat/completions`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn probe(&self, client: reqwest::Client, timeout: Duration) -> ModelsProbe {
        ModelsProbe {
            client,
            url: self.endpoint("models"),
            timeout,
        }
    }
}

/// Liveness probe listing the provider's models.
///
/// A credential is alive iff the listing answers 200 with a non-empty
/// `data` array.
#[derive(Debug, Clone)]
pub struct ModelsProbe {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

#[async_trait]
impl LivenessProbe for ModelsProbe {
    async fn is_alive(&self, credential: &Credential) -> bool {
        let response = self
            .client
            .get(&self.url)
            .bearer_auth(credential.expose())
            .timeout(self.timeout)
            .send()
            .await;

        let response = match response {
            Ok(r) if r.status().as_u16() == 200 => r,
            Ok(r) => {
                debug!(credential = %credential.masked(), status = r.status().as_u16(), "liveness probe rejected");
                return false;
            }
            Err(err) => {
                debug!(credential = %credential.masked(), error = %err, "liveness probe failed");
                return false;
            }
        };

        match response.json::<serde_json::Value>().await {
            Ok(body) => body
                .get("data")
                .and_then(|d| d.as_array())
                .map_or(false, |models| !models.is_empty()),
            Err(_) => false,
        }
    }
}

/// What a successful response must contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Non-empty `choices` array (chat completions).
    Chat,
    /// Non-empty `text` field (audio transcriptions).
    Transcription,
}

/// Default classifier for OpenAI-compatible APIs.
pub fn classify_openai_compatible(shape: ResponseShape) -> impl Fn(&CallResult) -> Classification {
    move |result| classify(shape, result)
}

fn classify(shape: ResponseShape, result: &CallResult) -> Classification {
    let response = match result {
        Ok(response) => response,
        Err(err) => {
            return match err.kind {
                TransportErrorKind::Timeout | TransportErrorKind::Connect => {
                    Classification::Retryable(err.message.clone())
                }
                TransportErrorKind::Other => Classification::Fatal(err.message.clone()),
            };
        }
    };

    let body = response.json();

    if response.status == 200 && body.as_ref().map_or(false, |b| has_content(shape, b)) {
        return Classification::Success;
    }

    let message = body
        .as_ref()
        .and_then(|b| b.pointer("/error/message").or_else(|| b.pointer("/error/code")))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| String::from_utf8_lossy(&response.body).into_owned());

    let lowered = message.to_lowercase();
    let raw = String::from_utf8_lossy(&response.body).to_lowercase();
    if CREDENTIAL_REJECTIONS
        .iter()
        .any(|needle| lowered.contains(needle) || raw.contains(needle))
    {
        return Classification::RotateCredential(message);
    }

    Classification::Fatal(format!("status {}: {}", response.status, message))
}

fn has_content(shape: ResponseShape, body: &serde_json::Value) -> bool {
    match shape {
        ResponseShape::Chat => body
            .get("choices")
            .and_then(|c| c.as_array())
            .map_or(false, |choices| !choices.is_empty()),
        ResponseShape::Transcription => body
            .get("text")
            .and_then(|t| t.as_str())
            .map_or(false, |text| !text.trim().is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{TransportError, UpstreamResponse};

    fn response(status: u16, body: &str) -> CallResult {
        Ok(UpstreamResponse {
            status,
            body: body.as_bytes().to_vec(),
        })
    }

    #[test]
    fn chat_with_choices_is_success() {
        let result = response(200, r#"{"choices":[{"message":{"content":"hi"}}]}"#);
        assert_eq!(classify(ResponseShape::Chat, &result), Classification::Success);
    }

    #[test]
    fn empty_choices_is_not_success() {
        let result = response(200, r#"{"choices":[]}"#);
        assert!(matches!(classify(ResponseShape::Chat, &result), Classification::Fatal(_)));
    }

    #[test]
    fn transcription_needs_text() {
        let ok = response(200, r#"{"text":"bom dia"}"#);
        let empty = response(200, r#"{"text":"  "}"#);
        assert_eq!(classify(ResponseShape::Transcription, &ok), Classification::Success);
        assert!(matches!(classify(ResponseShape::Transcription, &empty), Classification::Fatal(_)));
    }

    #[test]
    fn invalid_key_rotates() {
        let result = response(401, r#"{"error":{"message":"Invalid API Key","code":"invalid_api_key"}}"#);
        assert!(matches!(
            classify(ResponseShape::Chat, &result),
            Classification::RotateCredential(_)
        ));
        let restricted = response(400, r#"{"error":{"message":"organization_restricted"}}"#);
        assert!(matches!(
            classify(ResponseShape::Chat, &restricted),
            Classification::RotateCredential(_)
        ));
    }

    #[test]
    fn connection_errors_are_retryable() {
        let result: CallResult = Err(TransportError {
            kind: TransportErrorKind::Connect,
            message: "connection refused".to_string(),
        });
        assert_eq!(
            classify(ResponseShape::Chat, &result),
            Classification::Retryable("connection refused".to_string())
        );
    }

    #[test]
    fn other_errors_are_fatal() {
        let result = response(500, r#"{"error":{"message":"model overloaded"}}"#);
        assert_eq!(
            classify(ResponseShape::Chat, &result),
            Classification::Fatal("status 500: model overloaded".to_string())
        );
    }

    #[test]
    fn endpoints_join_cleanly() {
        let provider = Provider::new("x", "x_", "http://host/v1/");
        assert_eq!(provider.endpoint("/models"), "http://host/v1/models");
        assert_eq!(Provider::groq().key_prefix, "gsk_");
    }
}
