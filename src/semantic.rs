use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::settings::SemanticSettings;
use crate::features::{FeatureVector, SEMANTIC_COLUMNS};

const INSTRUCTIONS: &str = r#"You are a security analyst who reviews web page text for signs of phishing.
Judge only from the text below. Do not assume anything the text does not show.

Return one JSON object with exactly these fields:
- "creates_urgency" (boolean): the text pushes the reader to act fast or sets a deadline.
- "uses_threats" (boolean): the text warns of suspension, locking, fines or other harm if the reader does nothing.
- "requests_sensitive_info" (boolean): the text asks for credentials, card numbers or personal identity data.
- "offers_unrealistic_rewards" (boolean): the text promises prizes or winnings that are too good to be true.
- "has_spelling_grammar_errors" (boolean): the text has spelling or grammar mistakes unusual for a professional site.
- "impersonated_brand" (string): the brand or organisation the text pretends to be, or "N/A" if none is evident.
- "language_professionalism_score" (number 0-10): 0-2 badly written, 3-5 noticeably flawed, 6-8 mostly clean, 9-10 polished and official.
- "overall_phishing_likelihood_score" (number 0-10): 0-2 looks benign, 3-5 some suspicious signs, 6-8 strong signs, 9-10 unmistakable phishing.
- "summary_of_intent" (string): one sentence on what the page is trying to get the reader to do.

Reserve 0 and 10 for overwhelming evidence; most pages score between 2 and 8.
Output only the JSON object.

Page text:
"#;

fn build_prompt(text: &str) -> String {
    format!("{}{}\n", INSTRUCTIONS, text)
}

/// Cuts `text` to at most `max_chars` characters on a char boundary.
fn clip(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SemanticFeatures {
    pub creates_urgency: bool,
    pub uses_threats: bool,
    pub requests_sensitive_info: bool,
    pub offers_unrealistic_rewards: bool,
    pub has_spelling_grammar_errors: bool,
    pub impersonated_brand: String,
    pub language_professionalism_score: f64,
    pub overall_phishing_likelihood_score: f64,
    pub summary_of_intent: String,
}

impl SemanticFeatures {
    /// Parses a model reply. Tolerates a markdown code fence around the JSON.
    pub fn parse(reply: &str) -> Result<Self, ClassifyError> {
        let body = reply.trim().replace("```json", "").replace("```", "");
        let features: SemanticFeatures = serde_json::from_str(body.trim())
            .map_err(|e| ClassifyError::Malformed(e.to_string()))?;
        for (name, score) in [
            ("language_professionalism_score", features.language_professionalism_score),
            ("overall_phishing_likelihood_score", features.overall_phishing_likelihood_score),
        ] {
            if !(0.0..=10.0).contains(&score) {
                return Err(ClassifyError::Malformed(format!("{} out of range: {}", name, score)));
            }
        }
        Ok(features)
    }

    pub fn to_vector(&self) -> FeatureVector {
        let mut v = FeatureVector::defaults(SEMANTIC_COLUMNS);
        v.set("creates_urgency", self.creates_urgency);
        v.set("uses_threats", self.uses_threats);
        v.set("requests_sensitive_info", self.requests_sensitive_info);
        v.set("offers_unrealistic_rewards", self.offers_unrealistic_rewards);
        v.set("has_spelling_grammar_errors", self.has_spelling_grammar_errors);
        v.set("impersonated_brand", self.impersonated_brand.as_str());
        v.set("language_professionalism_score", self.language_professionalism_score);
        v.set("overall_phishing_likelihood_score", self.overall_phishing_likelihood_score);
        v.set("summary_of_intent", self.summary_of_intent.as_str());
        v
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("rate limited")]
    RateLimited,
    #[error("service unavailable")]
    Unavailable,
    #[error("malformed reply: {0}")]
    Malformed(String),
    #[error("request failed: {0}")]
    Api(String),
}

/// Outcome label for the `semantic_status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticStatus {
    Ok,
    SkippedFetchError,
    SkippedDisabled,
    RateLimited,
    RetriesExhausted,
    Malformed,
    Api,
}

impl fmt::Display for SemanticStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SemanticStatus::Ok => "OK",
            SemanticStatus::SkippedFetchError => "Skipped_Due_To_Fetch_Error",
            SemanticStatus::SkippedDisabled => "Skipped_Disabled",
            SemanticStatus::RateLimited => "Error_429_RateLimit",
            SemanticStatus::RetriesExhausted => "Error_503_Retries_Failed",
            SemanticStatus::Malformed => "Error_JSON_Parse",
            SemanticStatus::Api => "Error_API",
        })
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<SemanticFeatures, ClassifyError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &SemanticSettings) -> Self {
        Self {
            max_attempts: settings.max_retries,
            base_backoff: Duration::from_secs(settings.base_backoff_secs),
        }
    }
}

/// Classifies `text`, retrying only while the service reports itself
/// unavailable. Rate limiting gives up immediately.
pub async fn classify_with_retry(
    classifier: &dyn Classifier,
    text: &str,
    policy: &RetryPolicy,
) -> (Option<SemanticFeatures>, SemanticStatus) {
    for attempt in 0..policy.max_attempts {
        match classifier.classify(text).await {
            Ok(features) => return (Some(features), SemanticStatus::Ok),
            Err(ClassifyError::RateLimited) => {
                warn!("  semantic analysis rate limited, skipping row");
                return (None, SemanticStatus::RateLimited);
            }
            Err(ClassifyError::Unavailable) => {
                if attempt + 1 == policy.max_attempts {
                    break;
                }
                let backoff = policy.base_backoff * 2u32.pow(attempt);
                warn!(
                    "  semantic service unavailable (attempt {}/{}), retrying in {:?}",
                    attempt + 1,
                    policy.max_attempts,
                    backoff
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e @ ClassifyError::Malformed(_)) => {
                warn!("  semantic analysis failed: {}", e);
                return (None, SemanticStatus::Malformed);
            }
            Err(e @ ClassifyError::Api(_)) => {
                warn!("  semantic analysis failed: {}", e);
                return (None, SemanticStatus::Api);
            }
        }
    }
    warn!("  semantic service still unavailable after {} attempts", policy.max_attempts);
    (None, SemanticStatus::RetriesExhausted)
}

/// Gemini `generateContent` client asking for a JSON reply.
pub struct GeminiClassifier {
    client: Client,
    url: String,
    api_key: String,
    temperature: f32,
    max_chars: usize,
}

impl GeminiClassifier {
    pub fn new(settings: &SemanticSettings, api_key: String) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "Gemini API key is empty");
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self {
            client,
            url: format!(
                "{}/models/{}:generateContent",
                settings.endpoint.trim_end_matches('/'),
                settings.model
            ),
            api_key: api_key.trim().to_string(),
            temperature: settings.temperature,
            max_chars: settings.max_chars,
        })
    }
}

#[async_trait]
impl Classifier for GeminiClassifier {
    async fn classify(&self, text: &str) -> Result<SemanticFeatures, ClassifyError> {
        let prompt = build_prompt(clip(text, self.max_chars));
        let body = GenerateRequest {
            contents: vec![Content { parts: vec![Part { text: &prompt }] }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                response_mime_type: "application/json",
            },
        };
        let resp = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClassifyError::Api(e.to_string()))?;

        match resp.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(ClassifyError::RateLimited),
            StatusCode::SERVICE_UNAVAILABLE => return Err(ClassifyError::Unavailable),
            status if !status.is_success() => {
                let detail = resp
                    .text()
                    .await
                    .unwrap_or_else(|_| "<body unavailable>".to_string());
                return Err(ClassifyError::Api(format!("Gemini returned {}: {}", status, detail)));
            }
            _ => {}
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| ClassifyError::Malformed(e.to_string()))?;
        let reply = parsed
            .candidates
            .into_iter()
            .flat_map(|c| c.content.parts)
            .map(|p| p.text)
            .find(|t| !t.trim().is_empty())
            .ok_or_else(|| ClassifyError::Malformed("reply has no text".to_string()))?;
        SemanticFeatures::parse(&reply)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ReplyPart>,
}

#[derive(Debug, Deserialize)]
struct ReplyPart {
    #[serde(default)]
    text: String,
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::features::FeatureValue;
    use std::sync::atomic::Ordering;

    const REPLY: &str = r#"{"creates_urgency": true, "uses_threats": false, "requests_sensitive_info": true,
        "offers_unrealistic_rewards": false, "has_spelling_grammar_errors": true,
        "impersonated_brand": "中華郵政", "language_professionalism_score": 3,
        "overall_phishing_likelihood_score": 8.5, "summary_of_intent": "Collects card details."}"#;

    fn quick() -> RetryPolicy {
        RetryPolicy { max_attempts: 3, base_backoff: Duration::from_millis(1) }
    }

    #[test]
    fn parses_plain_and_fenced_replies() {
        let plain = SemanticFeatures::parse(REPLY).unwrap();
        assert_eq!(plain.impersonated_brand, "中華郵政");
        assert_eq!(plain.language_professionalism_score, 3.0);

        let fenced = SemanticFeatures::parse(&format!("```json\n{}\n```", REPLY)).unwrap();
        assert_eq!(fenced, plain);
    }

    #[test]
    fn rejects_out_of_range_and_missing_fields() {
        let high = REPLY.replace("8.5", "11");
        assert!(matches!(SemanticFeatures::parse(&high), Err(ClassifyError::Malformed(_))));
        assert!(matches!(
            SemanticFeatures::parse(r#"{"creates_urgency": true}"#),
            Err(ClassifyError::Malformed(_))
        ));
        assert!(matches!(SemanticFeatures::parse("not json"), Err(ClassifyError::Malformed(_))));
    }

    #[test]
    fn vector_uses_flags_and_text() {
        let v = sample_features().to_vector();
        assert_eq!(v.get("uses_threats"), Some(&FeatureValue::Number(1.0)));
        assert_eq!(v.get("offers_unrealistic_rewards"), Some(&FeatureValue::Number(0.0)));
        assert_eq!(v.get("impersonated_brand"), Some(&FeatureValue::Text("PayPal".into())));
        assert_eq!(v.len(), SEMANTIC_COLUMNS.len());
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("登入帳戶", 2), "登入");
        assert_eq!(clip("abc", 10), "abc");
    }

    #[test]
    fn status_labels() {
        assert_eq!(SemanticStatus::SkippedFetchError.to_string(), "Skipped_Due_To_Fetch_Error");
        assert_eq!(SemanticStatus::RetriesExhausted.to_string(), "Error_503_Retries_Failed");
        assert_eq!(SemanticStatus::RateLimited.to_string(), "Error_429_RateLimit");
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let c = ScriptedClassifier::new(vec![Ok(sample_features())]);
        let (features, status) = classify_with_retry(&c, "text", &quick()).await;
        assert_eq!(status, SemanticStatus::Ok);
        assert_eq!(features, Some(sample_features()));
        assert_eq!(c.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unavailable_is_retried_then_succeeds() {
        let c = ScriptedClassifier::new(vec![
            Err(ClassifyError::Unavailable),
            Err(ClassifyError::Unavailable),
            Ok(sample_features()),
        ]);
        let (_, status) = classify_with_retry(&c, "text", &quick()).await;
        assert_eq!(status, SemanticStatus::Ok);
        assert_eq!(c.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unavailable_exhausts_attempts() {
        let c = ScriptedClassifier::new(vec![Err(ClassifyError::Unavailable)]);
        let (features, status) = classify_with_retry(&c, "text", &quick()).await;
        assert!(features.is_none());
        assert_eq!(status, SemanticStatus::RetriesExhausted);
        assert_eq!(c.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rate_limit_is_not_retried() {
        let c = ScriptedClassifier::new(vec![Err(ClassifyError::RateLimited)]);
        let (_, status) = classify_with_retry(&c, "text", &quick()).await;
        assert_eq!(status, SemanticStatus::RateLimited);
        assert_eq!(c.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_reply_is_not_retried() {
        let c = ScriptedClassifier::new(vec![Err(ClassifyError::Malformed("bad".into()))]);
        let (_, status) = classify_with_retry(&c, "text", &quick()).await;
        assert_eq!(status.to_string(), "Error_JSON_Parse");
        assert_eq!(c.calls.load(Ordering::SeqCst), 1);
    }
}
