use crate::llm::capability::{CapabilityError, ClassificationCapability};
use futures::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1500;

/// Messages-API client for the Anthropic text-generation service.
#[derive(Clone)]
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            base_url: ANTHROPIC_BASE_URL.to_string(),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    async fn send(
        &self,
        context: &str,
        schema_hint: Option<&Value>,
    ) -> Result<String, CapabilityError> {
        let system = match schema_hint {
            Some(schema) => format!(
                "Respond with a single JSON document matching this schema. \
                 No prose outside the JSON.\n{schema}"
            ),
            None => "Respond with a single JSON document.".to_string(),
        };

        let payload = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system,
            "messages": [{ "role": "user", "content": context }],
        });

        let url = format!("{}/messages", self.base_url);
        let res = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(|e| CapabilityError::Transport(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(CapabilityError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: MessagesResponse = res
            .json()
            .await
            .map_err(|e| CapabilityError::Transport(e.to_string()))?;

        body.content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .ok_or(CapabilityError::EmptyResponse)
    }
}

impl ClassificationCapability for AnthropicClient {
    fn classify<'a>(
        &'a self,
        context: &'a str,
        schema_hint: Option<&'a Value>,
    ) -> BoxFuture<'a, Result<String, CapabilityError>> {
        Box::pin(self.send(context, schema_hint))
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}
