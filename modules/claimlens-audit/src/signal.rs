//! Stage 2: community signal aggregation.
//!
//! Asks the generator what owners actually report about the product. This
//! stage degrades instead of failing: any timeout, transport, or parse
//! problem yields an empty digest and the pipeline continues on weaker
//! signal.

use std::time::Duration;

use tracing::warn;

use ai_client::util::truncate_to_char_boundary;
use ai_client::StructuredOutput;
use claimlens_common::{ClaimField, SignalDigest, Subject};

use crate::repair::repair_parse;
use crate::traits::{GenerateRequest, Generator, ModelTier};

pub const SIGNAL_TIMEOUT: Duration = Duration::from_secs(15);

/// Byte cap on the rendered context bundle.
const CONTEXT_MAX_BYTES: usize = 6_000;

const SIGNAL_SYSTEM_PROMPT: &str = "You are a product research assistant summarizing \
    independent owner feedback. Given a product and its manufacturer claims, report what \
    owners consistently praise and what they consistently report as problems. Only include \
    points with repeated independent mentions; estimate the number of distinct sources per \
    point when you can. Do not restate manufacturer marketing.";

/// Render subject identity + claims into a bounded context bundle.
pub fn render_context(subject: &Subject, claims: &[ClaimField]) -> String {
    let mut out = format!(
        "Product: {} {} ({})\n\nManufacturer claims:\n",
        subject.brand, subject.model, subject.category
    );
    for claim in claims {
        out.push_str(&format!("- {}: {}\n", claim.label, claim.value));
    }
    truncate_to_char_boundary(&out, CONTEXT_MAX_BYTES).to_string()
}

pub async fn gather_signal(
    generator: &dyn Generator,
    subject: &Subject,
    claims: &[ClaimField],
) -> SignalDigest {
    let request = GenerateRequest {
        system: SIGNAL_SYSTEM_PROMPT.to_string(),
        user: render_context(subject, claims),
        schema: SignalDigest::tool_schema(),
        timeout: SIGNAL_TIMEOUT,
        tier: ModelTier::Fast,
    };

    let raw = match generator.generate(request).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, subject = %subject.id, "Signal gathering failed, continuing with empty signal");
            return SignalDigest::default();
        }
    };

    match repair_parse(&raw).and_then(|(value, _)| serde_json::from_value(value).ok()) {
        Some(digest) => digest,
        None => {
            warn!(subject = %subject.id, "Signal output unparseable, continuing with empty signal");
            SignalDigest::default()
        }
    }
}
