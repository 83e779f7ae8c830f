//! Wish and image generation over the Gemini `generateContent` API.
//!
//! The flow only sees the `WishBackend` trait; `GeminiClient` is the HTTP
//! implementation with retry on 429/5xx/timeout.

use std::future::Future;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::GenerationConfig;
use crate::error::WishError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Heartfelt,
    Funny,
    Grand,
    Poetic,
    Sarcastic,
    Emotional,
}

impl std::fmt::Display for Tone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Tone::Heartfelt => "heartfelt",
            Tone::Funny => "funny",
            Tone::Grand => "grand",
            Tone::Poetic => "poetic",
            Tone::Sarcastic => "sarcastic",
            Tone::Emotional => "emotional",
        };
        f.write_str(s)
    }
}

impl FromStr for Tone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heartfelt" => Ok(Tone::Heartfelt),
            "funny" => Ok(Tone::Funny),
            "grand" => Ok(Tone::Grand),
            "poetic" => Ok(Tone::Poetic),
            "sarcastic" => Ok(Tone::Sarcastic),
            "emotional" => Ok(Tone::Emotional),
            other => Err(format!("unknown tone: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Hinglish,
    English,
    Hindi,
    Punjabi,
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Language::Hinglish => "hinglish",
            Language::English => "english",
            Language::Hindi => "hindi",
            Language::Punjabi => "punjabi",
        };
        f.write_str(s)
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hinglish" => Ok(Language::Hinglish),
            "english" => Ok(Language::English),
            "hindi" => Ok(Language::Hindi),
            "punjabi" => Ok(Language::Punjabi),
            other => Err(format!("unknown language: {other}")),
        }
    }
}

/// Who the wish is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WishRequest {
    pub name: String,
    pub age: Option<u32>,
    pub relation: String,
    pub tone: Tone,
    pub language: Language,
}

impl WishRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            age: None,
            relation: "Friend".into(),
            tone: Tone::default(),
            language: Language::default(),
        }
    }

    pub fn validate(&self) -> Result<(), WishError> {
        if self.name.trim().is_empty() {
            return Err(WishError::InvalidInput("name is empty".into()));
        }
        Ok(())
    }

    fn prompt(&self) -> String {
        let age = self
            .age
            .map(|a| a.to_string())
            .unwrap_or_else(|| "Not specified".into());
        format!(
            "Generate a creative and personalized birthday wish for a person with the following details:\n\
             Name: {}\nAge: {}\nRelation: {}\nTone: {}\nLanguage: {}\n\n\
             Please provide:\n\
             1. A catchy title.\n\
             2. A heartfelt main message.\n\
             3. A short, beautiful 4-line poem.\n\
             4. A short quote for a card.\n\
             5. A fun hypothetical fact about the person.\n\n\
             IMPORTANT: Return ONLY valid JSON. No conversational text before or after.",
            self.name.trim(),
            age,
            self.relation,
            self.tone,
            self.language
        )
    }
}

/// Generated card text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BirthdayWish {
    pub title: String,
    pub message: String,
    pub poem: String,
    pub short_quote: String,
    pub fun_fact: String,
}

/// Generation collaborator. Each call is a single request with no partial
/// result; image failures are reported as errors and turned into "no image"
/// by the caller.
pub trait WishBackend: Send + Sync {
    fn generate_wish(
        &self,
        request: &WishRequest,
    ) -> impl Future<Output = Result<BirthdayWish, WishError>> + Send;

    /// Returns a `data:` URI, or an empty string when the model sent no image.
    fn generate_image(&self, name: &str) -> impl Future<Output = Result<String, WishError>> + Send;
}

/// Gemini `generateContent` client.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    wish_model: String,
    image_model: String,
}

impl GeminiClient {
    /// Reads the key from `config.api_key_env`, then `GEMINI_API_KEY`.
    pub fn new(config: &GenerationConfig) -> Result<Self, WishError> {
        let api_key = std::env::var(&config.api_key_env)
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| WishError::MissingApiKey(config.api_key_env.clone()))?;
        Self::with_key(config, api_key)
    }

    pub fn with_key(config: &GenerationConfig, api_key: String) -> Result<Self, WishError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(config.timeout())
            .build()
            .map_err(|e| WishError::Api(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            wish_model: config.wish_model.clone(),
            image_model: config.image_model.clone(),
        })
    }

    /// Send request with retry logic.
    /// 429: Retry-After or 1s/2s/4s (max 3).
    /// 5xx: exponential backoff (max 2).
    /// Timeout: immediate retry once.
    async fn send_with_retry(
        &self,
        model: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, WishError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);
        let mut attempt: u32 = 0;
        let max_429_retries: u32 = 3;
        let max_5xx_retries: u32 = 2;
        let mut timeout_retried = false;

        loop {
            let result = self
                .http
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(body)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().as_u16() == 429 => {
                    let wait = resp
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| Duration::from_secs(1 << attempt));
                    if attempt >= max_429_retries {
                        return Err(WishError::RateLimited {
                            retry_after_ms: wait.as_millis() as u64,
                        });
                    }
                    warn!(attempt, wait_ms = wait.as_millis() as u64, "429 rate limited, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Ok(resp) if resp.status().is_server_error() => {
                    if attempt >= max_5xx_retries {
                        return Err(WishError::Api(format!("server error: {}", resp.status())));
                    }
                    let wait = Duration::from_millis(500 * (1 << attempt));
                    warn!(
                        attempt,
                        status = resp.status().as_u16(),
                        wait_ms = wait.as_millis() as u64,
                        "5xx error, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body_text = resp.text().await.unwrap_or_default();
                    return Err(WishError::Api(format!(
                        "unexpected status {}: {}",
                        status,
                        body_text.chars().take(200).collect::<String>()
                    )));
                }
                Err(e) if e.is_timeout() => {
                    if timeout_retried {
                        return Err(WishError::Timeout);
                    }
                    warn!("request timeout, retrying once");
                    timeout_retried = true;
                }
                Err(e) => return Err(WishError::Api(e.to_string())),
            }
        }
    }

    async fn generate(
        &self,
        model: &str,
        body: serde_json::Value,
    ) -> Result<GenerateResponse, WishError> {
        let response = self.send_with_retry(model, &body).await?;
        response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| WishError::Parse(e.to_string()))
    }
}

impl WishBackend for GeminiClient {
    async fn generate_wish(&self, request: &WishRequest) -> Result<BirthdayWish, WishError> {
        request.validate()?;
        let request_id = uuid::Uuid::new_v4().to_string();
        debug!(request_id = %request_id, tone = %request.tone, language = %request.language, "wish_request");

        let body = json!({
            "contents": [{ "parts": [{ "text": request.prompt() }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "title": { "type": "STRING" },
                        "message": { "type": "STRING" },
                        "poem": { "type": "STRING" },
                        "shortQuote": { "type": "STRING" },
                        "funFact": { "type": "STRING" }
                    },
                    "required": ["title", "message", "poem", "shortQuote", "funFact"]
                }
            }
        });

        let response = self.generate(&self.wish_model, body).await?;
        let wish = parse_wish(&response.text())?;
        info!(request_id = %request_id, title = %wish.title, "wish_generated");
        Ok(wish)
    }

    async fn generate_image(&self, name: &str) -> Result<String, WishError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let prompt = format!(
            "A vibrant, high-quality festive birthday celebration background. Colorful balloons, \
             artistic confetti, and elegant birthday aesthetics. Minimalist but joyful. \
             No text, just festive atmosphere for {}.",
            name.trim()
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
                "imageConfig": { "aspectRatio": "16:9" }
            }
        });

        let response = self.generate(&self.image_model, body).await?;
        let uri = response.image_data_uri().unwrap_or_default();
        debug!(request_id = %request_id, has_image = !uri.is_empty(), "image_generated");
        Ok(uri)
    }
}

fn json_object_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("static regex"))
}

/// Strip markdown fences or chatter around the outermost `{...}`.
pub fn extract_json(text: &str) -> &str {
    json_object_pattern()
        .find(text)
        .map(|m| m.as_str())
        .unwrap_or(text)
}

pub fn parse_wish(text: &str) -> Result<BirthdayWish, WishError> {
    serde_json::from_str(extract_json(text)).map_err(|e| WishError::Parse(e.to_string()))
}

// --- Response types ---

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Default, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

impl GenerateResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .into_iter()
            .flat_map(|c| c.parts.iter())
    }

    /// Concatenated text parts of the first candidate.
    fn text(&self) -> String {
        self.parts().filter_map(|p| p.text.as_deref()).collect()
    }

    /// First inline image as a data URI.
    fn image_data_uri(&self) -> Option<String> {
        self.parts().find_map(|p| {
            p.inline_data.as_ref().map(|d| {
                let mime = d.mime_type.as_deref().unwrap_or("image/png");
                format!("data:{};base64,{}", mime, d.data)
            })
        })
    }
}
