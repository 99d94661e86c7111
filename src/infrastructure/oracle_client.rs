use crate::infrastructure::config::OracleSettings;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use url::Url;

/// Binary document sent alongside a prompt (image or PDF).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleAttachment {
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait CompletionOracle: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        attachment: Option<&OracleAttachment>,
    ) -> Result<String, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestGeminiClient {
    client: Client,
    api_key: String,
    settings: OracleSettings,
}

impl ReqwestGeminiClient {
    pub fn new(
        api_key: impl Into<String>,
        settings: OracleSettings,
        timeout: Duration,
    ) -> Result<Self, InfraError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(InfraError::InvalidConfig(
                "google ai api key must not be empty".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| InfraError::Oracle(format!("failed to build http client: {error}")))?;
        Ok(Self {
            client,
            api_key,
            settings,
        })
    }

    fn generate_endpoint(&self) -> Result<Url, InfraError> {
        let base = if self.settings.endpoint.ends_with('/') {
            self.settings.endpoint.clone()
        } else {
            format!("{}/", self.settings.endpoint)
        };
        let mut url = Url::parse(&base)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid oracle endpoint: {error}")))?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("oracle endpoint cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.push("models");
            segments.push(&format!("{}:generateContent", self.settings.model));
        }
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }

    fn build_request<'a>(
        &'a self,
        prompt: &'a str,
        attachment: Option<&OracleAttachment>,
    ) -> GenerateRequest<'a> {
        let mut parts = Vec::with_capacity(2);
        if let Some(attachment) = attachment {
            parts.push(RequestPart::InlineData {
                inline_data: InlineData {
                    mime_type: attachment.mime_type.clone(),
                    data: base64::engine::general_purpose::STANDARD.encode(&attachment.data),
                },
            });
        }
        parts.push(RequestPart::Text { text: prompt });
        GenerateRequest {
            contents: vec![RequestContent { parts }],
            generation_config: GenerationConfig {
                temperature: self.settings.temperature,
                max_output_tokens: self.settings.max_output_tokens,
            },
        }
    }

    fn http_error(status: reqwest::StatusCode, body: &str) -> InfraError {
        let api_message = serde_json::from_str::<ErrorEnvelope>(body)
            .ok()
            .and_then(|envelope| envelope.error)
            .and_then(|error| error.message)
            .map(|message| message.trim().to_string())
            .filter(|message| !message.is_empty());
        match api_message {
            Some(message) => InfraError::Oracle(message),
            None => InfraError::Oracle(format!("gemini api error: http {}", status.as_u16())),
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    InlineData { inline_data: InlineData },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<ResponsePart>>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Text of the first part of the first candidate; empty when absent.
fn first_candidate_text(response: GenerateResponse) -> String {
    response
        .candidates
        .and_then(|candidates| candidates.into_iter().next())
        .and_then(|candidate| candidate.content)
        .and_then(|content| content.parts)
        .and_then(|parts| parts.into_iter().next())
        .and_then(|part| part.text)
        .unwrap_or_default()
}

#[async_trait]
impl CompletionOracle for ReqwestGeminiClient {
    async fn complete(
        &self,
        prompt: &str,
        attachment: Option<&OracleAttachment>,
    ) -> Result<String, InfraError> {
        let endpoint = self.generate_endpoint()?;
        let request = self.build_request(prompt, attachment);
        let started = Instant::now();
        tracing::debug!(
            model = %self.settings.model,
            prompt_chars = prompt.len(),
            has_attachment = attachment.is_some(),
            "sending oracle request"
        );

        let response = self
            .client
            .post(endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|error| {
                InfraError::Oracle(format!("network error while calling oracle: {}", error.without_url()))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Oracle(format!("failed reading oracle response: {error}")))?;
        tracing::debug!(
            status = status.as_u16(),
            latency_ms = started.elapsed().as_millis() as u64,
            "oracle responded"
        );

        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|error| InfraError::Oracle(format!("invalid oracle payload: {error}")))?;
        Ok(first_candidate_text(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ReqwestGeminiClient {
        ReqwestGeminiClient::new("test-key", OracleSettings::default(), Duration::from_secs(30))
            .expect("client")
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let result =
            ReqwestGeminiClient::new("  ", OracleSettings::default(), Duration::from_secs(30));
        assert!(matches!(result, Err(InfraError::InvalidConfig(_))));
    }

    #[test]
    fn endpoint_targets_generate_content_for_model() {
        let url = client().generate_endpoint().expect("endpoint");
        assert_eq!(
            url.as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent?key=test-key"
        );
    }

    #[test]
    fn endpoint_without_trailing_slash_is_accepted() {
        let settings = OracleSettings {
            endpoint: "https://example.test/v1".to_string(),
            model: "tiny".to_string(),
            ..OracleSettings::default()
        };
        let client = ReqwestGeminiClient::new("k", settings, Duration::from_secs(1)).expect("client");
        let url = client.generate_endpoint().expect("endpoint");
        assert_eq!(url.path(), "/v1/models/tiny:generateContent");
    }

    #[test]
    fn request_body_places_attachment_before_prompt() {
        let client = client();
        let attachment = OracleAttachment {
            mime_type: "image/png".to_string(),
            data: vec![1, 2, 3],
        };
        let request = client.build_request("read this", Some(&attachment));
        let body = serde_json::to_value(&request).expect("serialize");

        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["inline_data"]["mime_type"], "image/png");
        assert_eq!(parts[0]["inline_data"]["data"], "AQID");
        assert_eq!(parts[1]["text"], "read this");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 4096);
        assert_eq!(body["generationConfig"]["temperature"], 0.1);
    }

    #[test]
    fn text_only_request_has_single_part() {
        let client = client();
        let body = serde_json::to_value(client.build_request("hello", None)).expect("serialize");
        let parts = body["contents"][0]["parts"].as_array().expect("parts");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0]["text"], "hello");
    }

    #[test]
    fn candidate_text_is_extracted_or_defaults_to_empty() {
        let parsed: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"start_time\":\"x\"}"}]}}]}"#,
        )
        .expect("parse");
        assert_eq!(first_candidate_text(parsed), "{\"start_time\":\"x\"}");

        let empty: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).expect("parse");
        assert_eq!(first_candidate_text(empty), "");
    }

    #[test]
    fn http_error_prefers_api_message() {
        let error = ReqwestGeminiClient::http_error(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error":{"code":400,"message":"API key not valid"}}"#,
        );
        assert_eq!(error.to_string(), "Oracle error: API key not valid");

        let fallback =
            ReqwestGeminiClient::http_error(reqwest::StatusCode::SERVICE_UNAVAILABLE, "oops");
        assert_eq!(fallback.to_string(), "Oracle error: gemini api error: http 503");
    }
}
