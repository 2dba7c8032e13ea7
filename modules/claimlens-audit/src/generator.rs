//! Claude-backed implementation of the generation seam.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::debug;

use ai_client::Claude;

use crate::traits::{GenerateRequest, Generator, ModelTier};

pub struct ClaudeGenerator {
    fast: Claude,
    deep: Claude,
}

impl ClaudeGenerator {
    pub fn new(api_key: &str, fast_model: &str, deep_model: &str) -> Self {
        Self {
            fast: Claude::new(api_key, fast_model),
            deep: Claude::new(api_key, deep_model),
        }
    }
}

#[async_trait]
impl Generator for ClaudeGenerator {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        let client = match request.tier {
            ModelTier::Fast => &self.fast,
            ModelTier::Deep => &self.deep,
        };

        debug!(model = client.model(), timeout_secs = request.timeout.as_secs(), "generation call");

        match tokio::time::timeout(
            request.timeout,
            client.generate_json(request.system, request.user, request.schema),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "generation timed out after {}s",
                request.timeout.as_secs()
            )),
        }
    }
}
