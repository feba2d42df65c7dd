// Generation service abstraction
//
// The text-generation backend is an external collaborator. Everything in the
// pipeline talks to it through `GenerationService`, injected at construction
// time so tests can substitute scripted doubles.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

pub mod client;
pub mod schema;
pub mod types;

pub use client::HttpGenerationClient;
pub use schema::{parse_structured, require_non_empty, strip_markdown_fences, SchemaError};
pub use types::{GenerationRequest, Message, StructuredReply, StructuredSchema};

/// Trait for text-generation backends
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Generate free text for a single prompt
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Generate an object constrained to `schema`.
    ///
    /// Implementations return a refusal instead of an object when the
    /// schema cannot be satisfied.
    async fn generate_structured(
        &self,
        messages: &[Message],
        schema: &StructuredSchema,
    ) -> Result<StructuredReply>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Call `generate` with the request's timeout enforced locally.
///
/// A hung backend turns into an ordinary error after `request.timeout`.
pub async fn generate_with_timeout(
    service: &dyn GenerationService,
    request: &GenerationRequest,
) -> Result<String> {
    match tokio::time::timeout(request.timeout, service.generate(request)).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!(
            "{} generation timed out after {:?}",
            service.name(),
            request.timeout
        )),
    }
}
