//! OpenRouter-compatible chat client with optional OAuth client-credentials auth.

use std::time::Duration;

use chrono::{DateTime, Utc};
use leadflow_shared::{LeadflowError, LlmConfig, OAuthConfig, Result, read_secret};
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// Tokens are refreshed this long before they actually expire.
const TOKEN_EXPIRY_BUFFER_SECS: i64 = 60;

/// Used when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

// ---------------------------------------------------------------------------
// Token cache
// ---------------------------------------------------------------------------

/// A bearer token and the instant it stops being valid.
#[derive(Debug, Clone)]
pub struct TokenCache {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenCache {
    /// Whether the token is still usable at `now`, keeping the safety buffer.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(TOKEN_EXPIRY_BUFFER_SECS) < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

enum Auth {
    ApiKey(String),
    OAuth {
        config: OAuthConfig,
        client_secret: String,
        cache: Mutex<Option<TokenCache>>,
    },
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// LlmClient
// ---------------------------------------------------------------------------

/// Chat-completions client shared by the extractor, predictor, and drafter.
pub struct LlmClient {
    http: Client,
    base_url: String,
    model: String,
    auth: Auth,
}

impl LlmClient {
    /// Build a client authenticating with a static API key.
    pub fn with_api_key(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: build_http(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            auth: Auth::ApiKey(api_key.into()),
        })
    }

    /// Build a client that exchanges client credentials for short-lived tokens.
    pub fn with_oauth(
        config: &LlmConfig,
        oauth: OAuthConfig,
        client_secret: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            http: build_http(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            auth: Auth::OAuth {
                config: oauth,
                client_secret: client_secret.into(),
                cache: Mutex::new(None),
            },
        })
    }

    /// Build a client from config, reading secrets from the environment.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        match &config.oauth {
            Some(oauth) => {
                let secret = read_secret(&oauth.client_secret_env)?;
                Self::with_oauth(config, oauth.clone(), secret)
            }
            None => {
                let key = read_secret(&config.api_key_env)?;
                Self::with_api_key(config, key)
            }
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a system + user prompt and return the raw completion text.
    #[instrument(skip_all, fields(model = %self.model))]
    pub async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.2,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let url = format!("{}/chat/completions", self.base_url);
        let headers = self.headers().await?;

        debug!(prompt_len = user.len(), "chat request");

        let response = self
            .http
            .post(&url)
            .headers(headers)
            .json(&request)
            .send()
            .await
            .map_err(|e| LeadflowError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LeadflowError::Llm(format!(
                "chat API error ({status}): {}",
                truncate(&error_text, 300)
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| LeadflowError::parse(format!("chat response: {e}")))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| LeadflowError::Llm("empty completion".into()))
    }

    /// Send a prompt and decode the JSON object in the reply.
    pub async fn complete_json<T: DeserializeOwned>(&self, system: &str, user: &str) -> Result<T> {
        let raw = self.complete(system, user).await?;
        parse_json_reply(&raw)
    }

    async fn headers(&self) -> Result<HeaderMap> {
        let token = match &self.auth {
            Auth::ApiKey(key) => key.clone(),
            Auth::OAuth {
                config,
                client_secret,
                cache,
            } => {
                let mut guard = cache.lock().await;
                match guard.as_ref() {
                    Some(token) if token.is_fresh(Utc::now()) => token.value.clone(),
                    _ => {
                        let fresh = self.fetch_token(config, client_secret).await?;
                        let value = fresh.value.clone();
                        *guard = Some(fresh);
                        value
                    }
                }
            }
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| LeadflowError::config(format!("invalid credential: {e}")))?,
        );
        headers.insert("X-Title", HeaderValue::from_static("Leadflow"));
        Ok(headers)
    }

    async fn fetch_token(&self, config: &OAuthConfig, client_secret: &str) -> Result<TokenCache> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", config.client_id.as_str()),
            ("client_secret", client_secret),
        ];
        if let Some(scope) = &config.scope {
            form.push(("scope", scope.as_str()));
        }

        let response = self
            .http
            .post(&config.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| LeadflowError::Network(format!("{}: {e}", config.token_url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LeadflowError::Llm(format!(
                "token endpoint returned HTTP {status}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| LeadflowError::parse(format!("token response: {e}")))?;

        let ttl = token.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
        info!(ttl_secs = ttl, "obtained access token");

        Ok(TokenCache {
            value: token.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(ttl),
        })
    }
}

fn build_http(config: &LlmConfig) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| LeadflowError::Network(format!("failed to build HTTP client: {e}")))
}

// ---------------------------------------------------------------------------
// Reply parsing
// ---------------------------------------------------------------------------

/// Decode a model reply, tolerating code fences and prose around the object.
pub(crate) fn parse_json_reply<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let body = json_object_span(raw).unwrap_or(raw);
    serde_json::from_str(body).map_err(|e| {
        LeadflowError::parse(format!("model reply is not valid JSON ({e}): {}", truncate(raw, 200)))
    })
}

/// The outermost `{ ... }` span of `raw`, if any.
fn json_object_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Cut `s` to at most `max` bytes on a char boundary.
pub(crate) fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
