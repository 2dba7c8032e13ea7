mod client;
pub(crate) mod types;

use anyhow::{anyhow, Result};

use crate::schema::StructuredOutput;
use client::ClaudeClient;
use types::*;

// =============================================================================
// Claude Agent
// =============================================================================

#[derive(Clone)]
pub struct Claude {
    api_key: String,
    model: String,
    base_url: Option<String>,
}

impl Claude {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow!("ANTHROPIC_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn client(&self) -> ClaudeClient {
        let client = ClaudeClient::new(&self.api_key);
        if let Some(ref url) = self.base_url {
            client.with_base_url(url)
        } else {
            client
        }
    }

    // =========================================================================
    // Convenience methods
    // =========================================================================

    /// Tool-forced structured extraction, deserialized into `T`.
    pub async fn extract<T: StructuredOutput>(
        &self,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Result<T> {
        let raw = self
            .generate_json(system_prompt, user_prompt, T::tool_schema())
            .await?;
        serde_json::from_str(&raw).map_err(|e| anyhow!("Failed to deserialize response: {}", e))
    }

    /// Tool-forced generation constrained by an explicit schema, returned as
    /// the raw JSON text of the tool input. Callers that expect drift or
    /// truncation parse this themselves.
    pub async fn generate_json(
        &self,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
        schema: serde_json::Value,
    ) -> Result<String> {
        let tool_name = "structured_response";
        let mut request = ChatRequest::new(&self.model)
            .system(system_prompt)
            .message(WireMessage::user(user_prompt))
            .temperature(0.0)
            .tool(ToolDefinitionWire {
                name: tool_name.to_string(),
                description: "Produce structured data matching the schema.".to_string(),
                input_schema: schema,
            });
        request.tool_choice = Some(serde_json::json!({
            "type": "tool",
            "name": tool_name,
        }));

        let response = self.client().chat(&request).await?;

        if let Some(input) = response.tool_input() {
            return Ok(input.to_string());
        }

        // Some responses come back as a plain text block instead of tool use.
        response
            .text()
            .ok_or_else(|| anyhow!("No structured output in Claude response"))
    }

    pub async fn chat_completion(
        &self,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Result<String> {
        let request = ChatRequest::new(&self.model)
            .system(system)
            .message(WireMessage::user(user))
            .temperature(0.0);

        let response = self.client().chat(&request).await?;

        response
            .text()
            .ok_or_else(|| anyhow!("No response from Claude"))
    }
}
