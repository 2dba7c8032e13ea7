//! Seams the pipeline depends on. The generation collaborator is injected so
//! stages can be driven by a scripted fake in tests.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// Which model class a request should land on. Cheap signal gathering runs on
/// the fast tier; discrepancy analysis and index narration on the deep tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Fast,
    Deep,
}

/// One schema-constrained generation request. The reply is raw text that may
/// be malformed or truncated; callers run it through the repair ladder.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub system: String,
    pub user: String,
    pub schema: serde_json::Value,
    pub timeout: Duration,
    pub tier: ModelTier,
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<String>;
}
