// Deep analysis: one focused deep dive on top of the persona reports

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::generation::{generate_with_timeout, GenerationRequest, GenerationService};

const SYSTEM_PROMPT: &str = "You are a senior developer who helps juniors see the bigger picture. \
Start with a three line summary, then give at most three key insights grounded in real \
practice, compare the code with better patterns, and close with directions for further growth. \
Talk naturally, as if in person.";

pub struct DeepAnalyzer {
    generation: Arc<dyn GenerationService>,
    timeout: Duration,
}

impl DeepAnalyzer {
    pub fn new(generation: Arc<dyn GenerationService>, timeout: Duration) -> Self {
        Self { generation, timeout }
    }

    /// Pick the most growth-relevant subject in `report` and explain it in depth.
    /// `feedback` carries the reviewer's complaint about a previous attempt.
    pub async fn analyze(&self, report: &str, feedback: Option<&str>) -> Result<String> {
        let request = GenerationRequest::new(deep_prompt(report, feedback))
            .with_system(SYSTEM_PROMPT)
            .with_temperature(0.5)
            .with_timeout(self.timeout);

        let text = generate_with_timeout(self.generation.as_ref(), &request).await?;
        let text = text.trim();
        if text.is_empty() {
            anyhow::bail!("Deep analysis returned nothing");
        }
        Ok(text.to_string())
    }
}

fn deep_prompt(report: &str, feedback: Option<&str>) -> String {
    let mut prompt = format!("Here is today's report:\n\n<report>\n{}\n</report>\n", report);
    if let Some(feedback) = feedback.filter(|f| !f.trim().is_empty()) {
        prompt.push_str(&format!(
            "\nA previous analysis had serious problems:\n{}\nFix them in this attempt.\n",
            feedback
        ));
    }
    prompt.push_str(
        "\nChoose the one subject in the report that matters most for the author's growth and \
         has real technical depth, and explain it in depth. Use this Markdown layout:\n\n\
         ## Digging into <subject> 🔍\n",
    );
    prompt
}
